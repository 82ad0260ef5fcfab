use std::fmt;
use std::fmt::Write as _;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Formats every event as one ASIM WebSession JSON line. Events carrying the
/// `http.context` / `http.response` fields (serialized by the session log)
/// have those objects merged into the envelope.
pub struct AsimFormatter;

impl<S, N> FormatEvent<S, N> for AsimFormatter
where
	S: Subscriber + for<'a> LookupSpan<'a>,
	N: for<'a> FormatFields<'a> + 'static,
{
	fn format_event(
		&self,
		_ctx: &FmtContext<'_, S, N>,
		mut writer: Writer<'_>,
		event: &Event<'_>,
	) -> fmt::Result {
		let mut visitor = FieldVisitor::default();
		event.record(&mut visitor);

		let level = *event.metadata().level();
		let time = Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();

		let mut record = Map::new();
		record.insert("EventMessage".into(), Value::String(visitor.message));
		record.insert("EventCount".into(), json!(1));
		record.insert("EventStartTime".into(), Value::String(time.clone()));
		record.insert("EventEndTime".into(), Value::String(time));
		record.insert("EventType".into(), json!("HTTPsession"));
		record.insert("EventSeverity".into(), json!(event_severity(level)));
		record.insert(
			"EventOriginalSeverity".into(),
			json!(original_severity(level)),
		);
		record.insert("EventSchema".into(), json!("WebSession"));
		record.insert("EventSchemaVersion".into(), json!("0.2.6"));
		record.insert("IpFilterVersion".into(), json!(env!("CARGO_PKG_VERSION")));

		merge_serialized(&mut record, visitor.request);
		merge_serialized(&mut record, visitor.response);
		for (name, value) in visitor.extra {
			record.insert(name, value);
		}

		writeln!(writer, "{}", Value::Object(record))
	}
}

fn event_severity(level: Level) -> &'static str {
	if level == Level::ERROR {
		"Medium"
	} else if level == Level::WARN {
		"Low"
	} else {
		"Informational"
	}
}

fn original_severity(level: Level) -> &'static str {
	if level == Level::ERROR {
		"ERROR"
	} else if level == Level::WARN {
		"WARNING"
	} else if level == Level::INFO {
		"INFO"
	} else {
		"DEBUG"
	}
}

fn merge_serialized(record: &mut Map<String, Value>, raw: Option<String>) {
	let Some(raw) = raw else {
		return;
	};
	if let Ok(Value::Object(fields)) = serde_json::from_str(&raw) {
		record.extend(fields);
	}
}

#[derive(Default)]
struct FieldVisitor {
	message: String,
	request: Option<String>,
	response: Option<String>,
	extra: Vec<(String, Value)>,
}

impl FieldVisitor {
	fn record_value(&mut self, field: &Field, value: Value) {
		match field.name() {
			"message" => {
				self.message = match value {
					Value::String(s) => s,
					other => other.to_string(),
				}
			},
			"http.context" => self.request = value.as_str().map(str::to_string),
			"http.response" => self.response = value.as_str().map(str::to_string),
			name => self.extra.push((name.to_string(), value)),
		}
	}
}

impl Visit for FieldVisitor {
	fn record_str(&mut self, field: &Field, value: &str) {
		self.record_value(field, Value::String(value.to_string()));
	}

	fn record_i64(&mut self, field: &Field, value: i64) {
		self.record_value(field, json!(value));
	}

	fn record_u64(&mut self, field: &Field, value: u64) {
		self.record_value(field, json!(value));
	}

	fn record_bool(&mut self, field: &Field, value: bool) {
		self.record_value(field, json!(value));
	}

	fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
		self.record_value(field, Value::String(format!("{value:?}")));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_event_severity_mapping() {
		assert_eq!(event_severity(Level::DEBUG), "Informational");
		assert_eq!(event_severity(Level::INFO), "Informational");
		assert_eq!(event_severity(Level::WARN), "Low");
		assert_eq!(event_severity(Level::ERROR), "Medium");
	}

	#[test]
	fn test_original_severity_mapping() {
		assert_eq!(original_severity(Level::WARN), "WARNING");
		assert_eq!(original_severity(Level::INFO), "INFO");
	}

	#[test]
	fn test_merge_serialized_merges_objects_and_ignores_garbage() {
		let mut record = Map::new();
		merge_serialized(&mut record, Some(r#"{"Url":"http://x/"}"#.to_string()));
		assert_eq!(record.get("Url"), Some(&json!("http://x/")));
		merge_serialized(&mut record, Some("not json".to_string()));
		merge_serialized(&mut record, None);
		assert_eq!(record.len(), 1);
	}
}
