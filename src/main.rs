use std::sync::Arc;

use ipfilter::{Config, app, telemetry};
use tracing::info;

fn main() -> anyhow::Result<()> {
	// LOG_LEVEL is read directly so that startup-config errors and the
	// path/host conflict warnings are already formatted correctly.
	let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "WARN".to_string());
	telemetry::setup_logging(&level);

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(async {
			let cfg = Arc::new(Config::from_env()?);
			info!(version = cfg.version, environment = %cfg.environment_name, "starting ipfilter");
			let bound = app::run(cfg).await?;
			shutdown_signal().await;
			bound.shutdown();
			bound.wait_termination().await
		})
}

async fn shutdown_signal() {
	let ctrl_c = tokio::signal::ctrl_c();
	#[cfg(unix)]
	{
		let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("installing SIGTERM handler");
		tokio::select! {
			_ = ctrl_c => {},
			_ = term.recv() => {},
		}
	}
	#[cfg(not(unix))]
	{
		let _ = ctrl_c.await;
	}
}
