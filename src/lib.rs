use std::sync::Arc;

pub mod app;
pub mod client;
pub mod config;
pub mod http;
pub mod policy;
pub mod proxy;
pub mod telemetry;

pub use config::Config;

/// Shared, immutable inputs for the request path. Built once at startup and
/// cloned (cheaply, via `Arc`) into every connection task.
pub struct ProxyInputs {
	pub cfg: Arc<Config>,
	pub upstream: client::Client,
	pub appconfig: policy::fetch::AppConfigClient,
}
