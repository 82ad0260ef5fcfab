use crate::config::Config;

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;

/// What to do with an inbound request, decided before any policy fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
	/// X-Forwarded-For is missing, too short for the configured index, or the
	/// selected element is empty.
	Malformed,
	/// ELB health-check probe: answer 200 OK without touching the origin.
	HealthOk,
	/// No enforcement required for this request; proxy straight through.
	Bypass { client_ip: String },
	/// The access-control policy must be consulted for this client address.
	Enforce { client_ip: String },
}

/// Classify a request from its path, Host header, X-Forwarded-For header and
/// user agent. Path/host list conflicts are already resolved in the Config.
pub fn classify(
	cfg: &Config,
	path: &str,
	host: Option<&str>,
	xff: Option<&str>,
	user_agent: Option<&str>,
) -> Classification {
	let Some(xff) = xff else {
		if user_agent.unwrap_or("").starts_with("ELB-HealthChecker") {
			return Classification::HealthOk;
		}
		return Classification::Malformed;
	};

	let Some(client_ip) = select_client_ip(xff, cfg.xff_index) else {
		return Classification::Malformed;
	};

	// Prefix rules apply to the decoded path, the same path the origin's
	// router will see.
	let path = urlencoding::decode(path)
		.map(|p| p.into_owned())
		.unwrap_or_else(|_| path.to_string());

	if bypasses_enforcement(cfg, &path, host.unwrap_or("")) {
		Classification::Bypass { client_ip }
	} else {
		Classification::Enforce { client_ip }
	}
}

fn bypasses_enforcement(cfg: &Config, path: &str, host: &str) -> bool {
	if !cfg.ipfilter_enabled {
		return true;
	}

	// Paths are protected by default unless listed in PUBLIC_PATHS.
	if cfg.public_paths.iter().any(|p| path.starts_with(p.as_str())) {
		return true;
	}

	// Paths are public by default unless listed in PROTECTED_PATHS.
	let path_is_protected = cfg
		.protected_paths
		.iter()
		.any(|p| path.starts_with(p.as_str()));
	if !cfg.protected_paths.is_empty() && !path_is_protected {
		return true;
	}

	// A publicly-listed host skips enforcement, except on a protected path.
	if cfg.pub_host_list.iter().any(|h| h == host)
		&& !(!cfg.protected_paths.is_empty() && path_is_protected)
	{
		return true;
	}

	// With a private host list, only the listed hosts are enforced.
	if !cfg.priv_host_list.is_empty() && !cfg.priv_host_list.iter().any(|h| h == host) {
		return true;
	}

	false
}

/// Select the client address from the comma-separated X-Forwarded-For list.
/// Negative indexes count from the right. An out-of-range index or an empty
/// selected element (trailing comma) yields None.
fn select_client_ip(xff: &str, index: i64) -> Option<String> {
	let parts: Vec<&str> = xff.split(',').map(str::trim).collect();
	let len = parts.len() as i64;
	let idx = if index < 0 { len + index } else { index };
	if idx < 0 || idx >= len {
		return None;
	}
	let selected = parts[idx as usize];
	if selected.is_empty() {
		return None;
	}
	Some(selected.to_string())
}
