use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use tracing::{Level, event};

use crate::config::Config;
use crate::http::{self, HeaderMap, StatusCode, header, x_headers};

/// A stable, opaque identifier for one request: the inbound X-B3-TraceId when
/// present and non-empty, otherwise a short random token.
pub fn request_id(headers: &HeaderMap) -> String {
	headers
		.get(&x_headers::X_B3_TRACE_ID)
		.and_then(|v| v.to_str().ok())
		.filter(|v| !v.is_empty())
		.map(str::to_string)
		.unwrap_or_else(|| {
			rand::rng()
				.sample_iter(Alphanumeric)
				.take(8)
				.map(char::from)
				.collect()
		})
}

/// ASIM WebSession request fields, captured once when the request arrives and
/// attached to every session event for that request.
#[derive(Serialize, Debug, Clone, Default)]
pub struct SessionContext {
	#[serde(rename = "Url")]
	pub url: String,
	#[serde(rename = "UrlOriginal")]
	pub url_original: String,
	#[serde(rename = "HttpVersion")]
	pub http_version: String,
	#[serde(rename = "HttpRequestMethod")]
	pub method: String,
	#[serde(rename = "HttpContentType")]
	pub content_type: Option<String>,
	#[serde(rename = "HttpContentFormat")]
	pub content_format: Option<String>,
	#[serde(rename = "HttpReferrer")]
	pub referrer: Option<String>,
	#[serde(rename = "HttpUserAgent")]
	pub user_agent: Option<String>,
	#[serde(rename = "HttpRequestXff")]
	pub xff: Option<String>,
	#[serde(rename = "HttpResponseTime")]
	pub response_time: String,
	#[serde(rename = "HttpHost")]
	pub host: Option<String>,
	#[serde(rename = "AdditionalFields")]
	pub additional: AdditionalFields,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct AdditionalFields {
	#[serde(rename = "TraceHeaders")]
	pub trace_headers: BTreeMap<String, Option<String>>,
}

impl SessionContext {
	pub fn from_request<B>(cfg: &Config, req: &::http::Request<B>) -> SessionContext {
		let headers = req.headers();
		let url = http::forwarded_url(req);
		let content_type = http::header_str(headers, &header::CONTENT_TYPE).map(str::to_string);
		let content_format = content_type
			.as_deref()
			.map(|ct| ct.split(';').next().unwrap_or("").trim().to_string());
		SessionContext {
			url_original: url.clone(),
			url,
			http_version: format!("{:?}", req.version()),
			method: req.method().to_string(),
			content_type,
			content_format,
			referrer: http::header_str(headers, &header::REFERER).map(str::to_string),
			user_agent: http::header_str(headers, &header::USER_AGENT).map(str::to_string),
			xff: http::header_str(headers, &x_headers::X_FORWARDED_FOR).map(str::to_string),
			response_time: "N/A".to_string(),
			host: http::host(req).map(str::to_string),
			additional: AdditionalFields {
				trace_headers: cfg
					.trace_headers
					.iter()
					.map(|name| {
						let value = headers
							.get(name.as_str())
							.and_then(|v| v.to_str().ok())
							.map(str::to_string);
						(name.clone(), value)
					})
					.collect(),
			},
		}
	}
}

/// ASIM WebSession response fields, recorded once the response status is
/// known.
#[derive(Serialize, Debug, Clone)]
pub struct ResponseContext {
	#[serde(rename = "EventResult")]
	pub result: &'static str,
	#[serde(rename = "EventResultDetails")]
	pub details: u16,
	#[serde(rename = "HttpStatusCode")]
	pub status: u16,
	#[serde(rename = "FileName")]
	pub file_name: String,
}

impl ResponseContext {
	pub fn new(status: StatusCode, headers: &HeaderMap) -> ResponseContext {
		ResponseContext {
			result: if status.as_u16() < 400 {
				"Success"
			} else {
				"Failure"
			},
			details: status.as_u16(),
			status: status.as_u16(),
			file_name: file_name(headers),
		}
	}
}

fn file_name(headers: &HeaderMap) -> String {
	headers
		.get(header::CONTENT_DISPOSITION)
		.and_then(|v| v.to_str().ok())
		.map(|v| {
			v.rsplit("filename=")
				.next()
				.unwrap_or(v)
				.trim_matches('"')
				.to_string()
		})
		.unwrap_or_else(|| "N/A".to_string())
}

/// Per-request session log. Emits one event per phase, each carrying the
/// request context; the end-of-request record fires from `DropOnLog` once the
/// downstream body has been fully written or abandoned.
#[derive(Debug)]
pub struct RequestLog {
	pub id: String,
	pub context: SessionContext,
	pub response: Option<ResponseContext>,
	pub client_ip: Option<String>,
	pub error: Option<String>,
}

impl RequestLog {
	pub fn new(id: String, context: SessionContext) -> RequestLog {
		RequestLog {
			id,
			context,
			response: None,
			client_ip: None,
			error: None,
		}
	}

	pub fn start(&self) {
		self.info(format!("[{}] Start", self.id));
	}

	pub fn forwarded_url(&self) {
		self.info(format!("[{}] Forwarded URL: {}", self.id, self.context.url));
	}

	pub fn missing_forwarded_for(&self) {
		self.error(format!("[{}] X-Forwarded-For header is missing or has no usable element", self.id));
	}

	pub fn policy_fetch_begin(&self) {
		self.info(format!("[{}] Fetching policy profiles", self.id));
	}

	pub fn policy_fetch_end(&self) {
		self.info(format!("[{}] Policy profiles fetched", self.id));
	}

	pub fn verdict(&self, verdict: &str) {
		self.info(format!("[{}] Verdict: {verdict}", self.id));
	}

	pub fn blocked(&self, client_ip: &str) {
		self.warning(format!("[{}] Request blocked for {client_ip}", self.id));
	}

	pub fn origin_request_begin(&self) {
		self.info(format!("[{}] Making request to origin", self.id));
	}

	pub fn origin_response_status(&self, status: StatusCode) {
		self.info(format!(
			"[{}] Origin response status: {}",
			self.id,
			status.as_u16()
		));
	}

	pub fn downstream_streaming(&self) {
		self.info(format!("[{}] Starting response to client", self.id));
	}

	pub fn record_response(&mut self, status: StatusCode, headers: &HeaderMap) {
		self.response = Some(ResponseContext::new(status, headers));
	}

	pub fn info(&self, message: impl AsRef<str>) {
		self.emit(Level::INFO, message.as_ref());
	}

	pub fn warning(&self, message: impl AsRef<str>) {
		self.emit(Level::WARN, message.as_ref());
	}

	pub fn error(&self, message: impl AsRef<str>) {
		self.emit(Level::ERROR, message.as_ref());
	}

	fn emit(&self, level: Level, message: &str) {
		let context = serde_json::to_string(&self.context).unwrap_or_default();
		let response = self
			.response
			.as_ref()
			.and_then(|r| serde_json::to_string(r).ok())
			.unwrap_or_default();
		if level == Level::ERROR {
			event!(target: "session", Level::ERROR, http.context = %context, http.response = %response, "{message}");
		} else if level == Level::WARN {
			event!(target: "session", Level::WARN, http.context = %context, http.response = %response, "{message}");
		} else {
			event!(target: "session", Level::INFO, http.context = %context, http.response = %response, "{message}");
		}
	}
}

/// Holder that guarantees the end-of-request record is emitted exactly once,
/// whenever the holder is dropped.
#[derive(Debug)]
pub struct DropOnLog {
	log: Option<RequestLog>,
}

impl DropOnLog {
	pub fn as_mut(&mut self) -> Option<&mut RequestLog> {
		self.log.as_mut()
	}

	pub fn with(&mut self, f: impl FnOnce(&mut RequestLog)) {
		if let Some(log) = self.log.as_mut() {
			f(log)
		}
	}
}

impl From<RequestLog> for DropOnLog {
	fn from(log: RequestLog) -> Self {
		Self { log: Some(log) }
	}
}

impl Drop for DropOnLog {
	fn drop(&mut self) {
		let Some(log) = self.log.take() else {
			return;
		};
		if let Some(error) = &log.error {
			log.info(format!("[{}] End: {error}", log.id));
		} else {
			log.info(format!("[{}] End", log.id));
		}
	}
}

pin_project_lite::pin_project! {
	/// Response body wrapper carrying the request log; the final record fires
	/// when the body is dropped, i.e. once streaming to the client finished
	/// or was abandoned.
	#[derive(Debug)]
	pub struct LogBody<B> {
		#[pin]
		body: B,
		log: DropOnLog,
	}
}

impl<B> LogBody<B> {
	pub fn new(body: B, log: DropOnLog) -> Self {
		Self { body, log }
	}
}

impl<B: http_body::Body> http_body::Body for LogBody<B> {
	type Data = B::Data;
	type Error = B::Error;

	fn poll_frame(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
	) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
		self.project().body.poll_frame(cx)
	}

	fn is_end_stream(&self) -> bool {
		self.body.is_end_stream()
	}

	fn size_hint(&self) -> http_body::SizeHint {
		self.body.size_hint()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_request_id_prefers_trace_header() {
		let mut headers = HeaderMap::new();
		headers.insert("x-b3-traceid", "1234magictraceid".parse().unwrap());
		assert_eq!(request_id(&headers), "1234magictraceid");
	}

	#[test]
	fn test_request_id_ignores_empty_trace_header() {
		let mut headers = HeaderMap::new();
		headers.insert("x-b3-traceid", "".parse().unwrap());
		let id = request_id(&headers);
		assert_eq!(id.len(), 8);
		assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
	}

	#[test]
	fn test_generated_request_ids_differ() {
		assert_ne!(request_id(&HeaderMap::new()), request_id(&HeaderMap::new()));
	}

	#[test]
	fn test_file_name_extraction() {
		let mut headers = HeaderMap::new();
		assert_eq!(file_name(&headers), "N/A");
		headers.insert(
			header::CONTENT_DISPOSITION,
			"attachment; filename=\"report.csv\"".parse().unwrap(),
		);
		assert_eq!(file_name(&headers), "report.csv");
		headers.insert(header::CONTENT_DISPOSITION, "inline".parse().unwrap());
		assert_eq!(file_name(&headers), "inline");
	}

	#[test]
	fn test_response_context_result() {
		let ok = ResponseContext::new(StatusCode::OK, &HeaderMap::new());
		assert_eq!(ok.result, "Success");
		assert_eq!(ok.status, 200);
		let denied = ResponseContext::new(StatusCode::FORBIDDEN, &HeaderMap::new());
		assert_eq!(denied.result, "Failure");
		assert_eq!(denied.details, 403);
	}
}
