use std::fmt::{Debug, Formatter};
use std::time::Instant;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tracing::event;

use crate::http;
use crate::proxy::ProxyError;

/// Idle connections kept per upstream authority.
const POOL_MAX_IDLE: usize = 1000;

/// Pooled HTTP client shared by every in-flight request. Connections are
/// keyed by scheme and authority and go back to the pool when the response
/// body completes, or are discarded when it is dropped mid-stream.
#[derive(Clone)]
pub struct Client {
	client: legacy::Client<HttpsConnector<HttpConnector>, http::Body>,
}

impl Debug for Client {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Client").finish()
	}
}

impl Client {
	pub fn new() -> anyhow::Result<Client> {
		let mut connector = HttpConnector::new();
		connector.enforce_http(false);
		let tls = HttpsConnectorBuilder::new()
			.with_native_roots()?
			.https_or_http()
			.enable_http1()
			.wrap_connector(connector);
		let client = legacy::Client::builder(TokioExecutor::new())
			.timer(TokioTimer::new())
			.pool_max_idle_per_host(POOL_MAX_IDLE)
			.build(tls);
		Ok(Client { client })
	}

	pub async fn request(&self, req: http::Request) -> Result<http::Response, ProxyError> {
		let start = Instant::now();
		let method = req.method().clone();
		let uri = req.uri().clone();
		let version = req.version();

		let resp = self.client.request(req).await;

		event!(
			target: "upstream request",
			parent: None,
			tracing::Level::DEBUG,

			http.method = %method,
			http.host = uri.authority().map(|a| a.as_str()),
			http.path = %uri.path(),
			http.version = ?version,
			http.status = resp.as_ref().ok().map(|r| r.status().as_u16()),

			duration = format!("{}ms", start.elapsed().as_millis()),
		);

		Ok(
			resp
				.map_err(ProxyError::UpstreamCallFailed)?
				.map(http::Body::new),
		)
	}
}
