use std::net::IpAddr;

use headers::authorization::Basic;
use headers::{Authorization, HeaderMapExt};

use crate::config::Config;
use crate::http::HeaderMap;
use crate::policy::{BasicAuth, Policy};

#[cfg(test)]
#[path = "access_tests.rs"]
mod tests;

/// Outcome of evaluating an enforced request against the effective policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
	/// Every applicable check passed; forward to the origin.
	Allow,
	/// 403 with the rendered denial page.
	Deny,
	/// 401 asking for Basic credentials. Only reachable when the IP and
	/// shared-token checks passed, so the realm is never revealed to clients
	/// that would be denied anyway.
	Challenge,
	/// Correct credentials presented on an auth path: respond 200 `ok`
	/// without calling the origin, so the path acts as a login confirmation
	/// page.
	AuthOk,
}

pub fn evaluate(
	cfg: &Config,
	policy: &Policy,
	path: &str,
	headers: &HeaderMap,
	client_ip: &str,
) -> Verdict {
	let parsed_ip = client_ip.parse::<IpAddr>().ok();
	let ip_in_whitelist = policy
		.ip_networks
		.iter()
		.any(|net| parsed_ip.map(|ip| net.contains(&ip)).unwrap_or(false))
		|| cfg
			.additional_ip_list
			.iter()
			.any(|m| m.matches(client_ip, parsed_ip));

	let shared_token_checks_passed = policy.shared_tokens.is_empty()
		|| policy.shared_tokens.iter().any(|token| {
			headers
				.get(&token.header)
				.map(|v| constant_time_eq(v.as_bytes(), token.value.as_bytes()))
				.unwrap_or(false)
		});

	let credentials = headers.typed_get::<Authorization<Basic>>();
	let basic_auth_ok: Vec<bool> = policy
		.basic_auths
		.iter()
		.map(|auth| verify_credentials(auth, credentials.as_ref()))
		.collect();

	let on_auth_path_and_ok: Vec<bool> = policy
		.basic_auths
		.iter()
		.zip(&basic_auth_ok)
		.filter(|(auth, _)| auth.path == path)
		.map(|(_, ok)| *ok)
		.collect();
	let any_on_auth_path_and_ok = on_auth_path_and_ok.iter().any(|ok| *ok);
	let basic_auth_checks_passed =
		policy.basic_auths.is_empty() || basic_auth_ok.iter().any(|ok| *ok);

	if !on_auth_path_and_ok.is_empty()
		&& !any_on_auth_path_and_ok
		&& ip_in_whitelist
		&& shared_token_checks_passed
	{
		return Verdict::Challenge;
	}
	if any_on_auth_path_and_ok && ip_in_whitelist && shared_token_checks_passed {
		return Verdict::AuthOk;
	}
	if ip_in_whitelist && shared_token_checks_passed && basic_auth_checks_passed {
		return Verdict::Allow;
	}
	Verdict::Deny
}

fn verify_credentials(auth: &BasicAuth, credentials: Option<&Authorization<Basic>>) -> bool {
	let Some(credentials) = credentials else {
		return false;
	};
	constant_time_eq(auth.username.as_bytes(), credentials.0.username().as_bytes())
		&& constant_time_eq(auth.password.as_bytes(), credentials.0.password().as_bytes())
}

/// Constant-time equality for credentials and tokens. Lengths are compared
/// first (length is not secret); equal-length inputs are compared without
/// short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	ring::constant_time::verify_slices_are_equal(a, b).is_ok()
}
