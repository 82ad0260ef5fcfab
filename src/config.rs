use std::collections::HashMap;
use std::net::IpAddr;

use anyhow::{Context, bail};
use ipnet::IpNet;
use tracing::warn;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Scheme used to reach the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerScheme {
	Http,
	Https,
}

impl ServerScheme {
	pub fn as_str(&self) -> &'static str {
		match self {
			ServerScheme::Http => "http",
			ServerScheme::Https => "https",
		}
	}
}

/// One entry of `ADDITIONAL_IP_LIST`: a literal address compared by string
/// equality against the selected X-Forwarded-For element, or a network
/// compared by containment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpMatcher {
	Exact(String),
	Network(IpNet),
}

impl IpMatcher {
	pub fn matches(&self, raw: &str, parsed: Option<IpAddr>) -> bool {
		match self {
			IpMatcher::Exact(addr) => addr == raw,
			IpMatcher::Network(net) => parsed.map(|ip| net.contains(&ip)).unwrap_or(false),
		}
	}
}

/// Process configuration, read once at startup. All request-path consumers see
/// this through an `Arc` and never observe changes.
#[derive(Debug, Clone)]
pub struct Config {
	pub environment_name: String,
	pub port: u16,
	pub server: String,
	pub server_scheme: ServerScheme,
	pub appconfig_url: String,
	pub email: String,
	pub email_name: String,
	pub log_level: String,
	pub debug: bool,
	pub ipfilter_enabled: bool,
	pub profiles: Vec<String>,
	pub public_paths: Vec<String>,
	pub protected_paths: Vec<String>,
	pub pub_host_list: Vec<String>,
	pub priv_host_list: Vec<String>,
	pub additional_ip_list: Vec<IpMatcher>,
	pub xff_index: i64,
	pub trace_headers: Vec<String>,
	pub version: &'static str,
}

impl Config {
	pub fn from_env() -> anyhow::Result<Config> {
		Config::load(std::env::vars().collect())
	}

	/// Build a Config from an environment table. Missing required keys and
	/// malformed values fail here, before anything binds a socket.
	pub fn load(vars: HashMap<String, String>) -> anyhow::Result<Config> {
		let env = Environ::new(vars)?;

		let public_paths = env.list("PUBLIC_PATHS", true);
		let mut protected_paths = env.list("PROTECTED_PATHS", true);
		if !public_paths.is_empty() && !protected_paths.is_empty() {
			warn!(
				"Configuration error: PROTECTED_PATHS and PUBLIC_PATHS are mutually exclusive; ignoring PROTECTED_PATHS"
			);
			protected_paths.clear();
		}

		let pub_host_list = env.list("PUB_HOST_LIST", true);
		let mut priv_host_list = env.list("PRIV_HOST_LIST", true);
		if !pub_host_list.is_empty() && !priv_host_list.is_empty() {
			warn!(
				"Configuration error: PUB_HOST_LIST and PRIV_HOST_LIST are mutually exclusive; ignoring PRIV_HOST_LIST"
			);
			priv_host_list.clear();
		}

		let additional_ip_list = env
			.list("ADDITIONAL_IP_LIST", true)
			.into_iter()
			.map(|entry| parse_ip_matcher(&entry))
			.collect::<anyhow::Result<Vec<_>>>()?;

		let server_scheme = match env.string("SERVER_PROTO", "http", true).as_str() {
			"http" => ServerScheme::Http,
			"https" => ServerScheme::Https,
			other => bail!("invalid SERVER_PROTO={other} (expected http or https)"),
		};

		let server = env.required("SERVER")?.to_string();
		server
			.parse::<::http::uri::Authority>()
			.with_context(|| format!("invalid SERVER={server}"))?;

		Ok(Config {
			environment_name: env.environment.clone(),
			port: env
				.int("PORT", Some(8080), false)?
				.try_into()
				.context("PORT out of range")?,
			server,
			server_scheme,
			appconfig_url: env.string("APPCONFIG_URL", "http://localhost:2772", false),
			email: env.required("EMAIL")?.to_string(),
			email_name: env.string("EMAIL_NAME", "DBT", false),
			log_level: env.string("LOG_LEVEL", "WARN", false),
			debug: env.bool("DEBUG", false, true)?,
			ipfilter_enabled: env.bool("IPFILTER_ENABLED", true, true)?,
			profiles: env.list("APPCONFIG_PROFILES", true),
			public_paths,
			protected_paths,
			pub_host_list,
			priv_host_list,
			additional_ip_list,
			xff_index: env.int("IP_DETERMINED_BY_X_FORWARDED_FOR_INDEX", Some(-1), true)?,
			trace_headers: {
				let headers = env.list("DLFA_TRACE_HEADERS", false);
				if headers.is_empty() {
					vec!["X-Amzn-Trace-Id".to_string()]
				} else {
					headers
				}
			},
			version: env!("CARGO_PKG_VERSION"),
		})
	}
}

fn parse_ip_matcher(entry: &str) -> anyhow::Result<IpMatcher> {
	if entry.contains('/') {
		let net = entry
			.parse::<IpNet>()
			.with_context(|| format!("invalid ADDITIONAL_IP_LIST entry {entry}"))?;
		Ok(IpMatcher::Network(net))
	} else {
		Ok(IpMatcher::Exact(entry.to_string()))
	}
}

/// Environment table with copilot-style per-environment overrides: given
/// `COPILOT_ENVIRONMENT_NAME=staging`, `STAGING_FOO` takes precedence over
/// `FOO` for keys that opt in. An override that is present but empty
/// intentionally unsets the base value rather than inheriting it.
struct Environ {
	vars: HashMap<String, String>,
	environment: String,
}

impl Environ {
	fn new(vars: HashMap<String, String>) -> anyhow::Result<Environ> {
		let environment = vars
			.get("COPILOT_ENVIRONMENT_NAME")
			.cloned()
			.context("COPILOT_ENVIRONMENT_NAME is required")?;
		Ok(Environ { vars, environment })
	}

	fn get(&self, key: &str, overridable: bool) -> Option<&str> {
		if overridable {
			let scoped = format!("{}_{key}", self.environment.to_uppercase());
			if let Some(value) = self.vars.get(&scoped) {
				return Some(value.as_str());
			}
		}
		self.vars.get(key).map(String::as_str)
	}

	fn required(&self, key: &str) -> anyhow::Result<&str> {
		self.get(key, false)
			.with_context(|| format!("{key} is required"))
	}

	fn string(&self, key: &str, default: &str, overridable: bool) -> String {
		self
			.get(key, overridable)
			.map(str::to_string)
			.unwrap_or_else(|| default.to_string())
	}

	fn int(&self, key: &str, default: Option<i64>, overridable: bool) -> anyhow::Result<i64> {
		match self.get(key, overridable) {
			Some(raw) => raw
				.parse::<i64>()
				.with_context(|| format!("invalid integer {key}={raw}")),
			None => default.with_context(|| format!("{key} is required")),
		}
	}

	fn bool(&self, key: &str, default: bool, overridable: bool) -> anyhow::Result<bool> {
		match self.get(key, overridable) {
			Some(raw) => match raw.trim().to_lowercase().as_str() {
				"true" => Ok(true),
				"false" | "" => Ok(false),
				_ => bail!("invalid boolean {key}={raw}"),
			},
			None => Ok(default),
		}
	}

	fn list(&self, key: &str, overridable: bool) -> Vec<String> {
		match self.get(key, overridable) {
			Some("") | None => vec![],
			Some(raw) => raw.split(',').map(|v| v.trim().to_string()).collect(),
		}
	}
}
