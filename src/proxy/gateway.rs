use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::httpproxy::HTTPProxy;
use crate::ProxyInputs;

/// Accept loop: one spawned task per connection, each serving any number of
/// requests through `HTTPProxy`.
pub struct Gateway {
	inputs: Arc<ProxyInputs>,
	listener: TcpListener,
}

impl Gateway {
	pub async fn bind(inputs: Arc<ProxyInputs>) -> anyhow::Result<Gateway> {
		let addr = SocketAddr::from(([0, 0, 0, 0], inputs.cfg.port));
		let listener = TcpListener::bind(addr).await?;
		info!(addr = %listener.local_addr()?, "started listener");
		Ok(Gateway { inputs, listener })
	}

	pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
		Ok(self.listener.local_addr()?)
	}

	pub async fn run(self, shutdown: impl Future<Output = ()>) {
		let server = auto_server();
		let graceful = GracefulShutdown::new();
		tokio::pin!(shutdown);
		loop {
			tokio::select! {
				res = self.listener.accept() => {
					let (stream, peer) = match res {
						Ok(conn) => conn,
						Err(err) => {
							warn!("failed to accept connection: {err}");
							continue;
						},
					};
					debug!(peer = %peer, "connection opened");
					let proxy = HTTPProxy {
						inputs: self.inputs.clone(),
					};
					let conn = server.serve_connection(
						TokioIo::new(stream),
						service_fn(move |req| {
							let proxy = proxy.clone();
							async move { Ok::<_, Infallible>(proxy.proxy(req).await) }
						}),
					);
					let conn = graceful.watch(conn.into_owned());
					tokio::spawn(async move {
						if let Err(err) = conn.await {
							debug!("connection closed with error: {err}");
						}
					});
				}
				_ = &mut shutdown => {
					info!("shutdown requested; draining connections");
					break;
				}
			}
		}
		tokio::select! {
			_ = graceful.shutdown() => {
				debug!("connections drained");
			}
			_ = tokio::time::sleep(Duration::from_secs(10)) => {
				warn!("timed out waiting for connections to drain");
			}
		}
	}
}

fn auto_server() -> auto::Builder<TokioExecutor> {
	let mut builder = auto::Builder::new(TokioExecutor::new());
	builder.http2().timer(TokioTimer::new());
	builder
}
