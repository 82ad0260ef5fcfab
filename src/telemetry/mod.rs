use tracing_subscriber::EnvFilter;

pub mod asim;
pub mod log;

/// Install the global subscriber: every event becomes one ASIM-enveloped
/// JSON line on stdout. `RUST_LOG` wins over the configured level.
pub fn setup_logging(level: &str) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));
	tracing_subscriber::fmt()
		.event_format(asim::AsimFormatter)
		.with_env_filter(filter)
		.init();
}

/// Best-effort logging setup for tests; repeated calls are fine.
pub fn setup_test_logging() {
	let _ = tracing_subscriber::fmt()
		.event_format(asim::AsimFormatter)
		.with_env_filter(EnvFilter::new("debug"))
		.try_init();
}
