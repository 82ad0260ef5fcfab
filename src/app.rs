use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::policy::fetch::AppConfigClient;
use crate::proxy::gateway::Gateway;
use crate::{Config, ProxyInputs, client};

/// Wire everything up and start serving. Returns once the listener is bound.
pub async fn run(cfg: Arc<Config>) -> anyhow::Result<Bound> {
	let upstream = client::Client::new()?;
	let appconfig = AppConfigClient::new(upstream.clone(), cfg.appconfig_url.clone());
	let inputs = Arc::new(ProxyInputs {
		cfg: cfg.clone(),
		upstream,
		appconfig,
	});

	let gateway = Gateway::bind(inputs).await?;
	let local_addr = gateway.local_addr()?;
	let (shutdown_tx, mut shutdown_rx) = watch::channel(());
	let task = tokio::spawn(async move {
		gateway
			.run(async move {
				let _ = shutdown_rx.changed().await;
			})
			.await;
	});

	info!(addr = %local_addr, upstream = %cfg.server, "ipfilter started");
	Ok(Bound {
		local_addr,
		shutdown: shutdown_tx,
		task,
	})
}

pub struct Bound {
	pub local_addr: SocketAddr,
	shutdown: watch::Sender<()>,
	task: JoinHandle<()>,
}

impl Bound {
	/// Stop accepting and drain in-flight connections.
	pub fn shutdown(&self) {
		let _ = self.shutdown.send(());
	}

	pub async fn wait_termination(self) -> anyhow::Result<()> {
		self.task.await?;
		Ok(())
	}
}
