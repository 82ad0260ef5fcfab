use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::Deserialize;

use crate::http::{HeaderName, header};

pub mod fetch;

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;

#[derive(thiserror::Error, Debug)]
pub enum PolicyError {
	#[error("invalid profile {0} (expected application:environment:configuration)")]
	Profile(String),
	#[error("AppConfig for {profile} not available: {reason}")]
	Fetch { profile: String, reason: String },
	#[error("AppConfig validation error: \"{detail}\" for path {profile}")]
	Validation { profile: String, detail: String },
}

/// Raw AppConfig document as served by the agent. Every section is optional
/// and unknown top-level keys are tolerated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProfile {
	#[serde(rename = "IpRanges", default)]
	pub ip_ranges: Vec<String>,
	#[serde(rename = "BasicAuth", default)]
	pub basic_auth: Vec<RawBasicAuth>,
	#[serde(rename = "SharedTokens", default)]
	pub shared_tokens: Vec<RawSharedToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBasicAuth {
	#[serde(rename = "Path")]
	pub path: String,
	#[serde(rename = "Username")]
	pub username: String,
	#[serde(rename = "Password")]
	pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSharedToken {
	#[serde(rename = "HeaderName")]
	pub header_name: String,
	#[serde(rename = "Value")]
	pub value: String,
}

/// A basic-auth realm: credentials are only accepted on the exact `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
	pub path: String,
	pub username: String,
	pub password: String,
}

/// A shared secret carried in a request header, typically set by a CDN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedToken {
	pub header: HeaderName,
	pub value: String,
}

/// The effective policy for one request: every validated profile concatenated
/// in configuration order. Three independent lists; they are never merged
/// behind one interface because their matching rules differ.
#[derive(Debug, Clone, Default)]
pub struct Policy {
	pub ip_networks: Vec<IpNet>,
	pub basic_auths: Vec<BasicAuth>,
	pub shared_tokens: Vec<SharedToken>,
}

impl Policy {
	pub fn extend(&mut self, other: Policy) {
		self.ip_networks.extend(other.ip_networks);
		self.basic_auths.extend(other.basic_auths);
		self.shared_tokens.extend(other.shared_tokens);
	}

	/// Request headers never forwarded to the origin: every configured
	/// shared-token header plus `connection`. Names are lowercase by
	/// `HeaderName` construction.
	pub fn denied_request_headers(&self) -> HashSet<HeaderName> {
		let mut denied: HashSet<HeaderName> =
			self.shared_tokens.iter().map(|t| t.header.clone()).collect();
		denied.insert(header::CONNECTION);
		denied
	}
}

/// Validate one raw document against the AppConfig schema and convert it into
/// a policy fragment. Errors name the profile and the offending key.
pub fn validate(profile: &str, doc: &serde_yaml::Value) -> Result<Policy, PolicyError> {
	let raw: RawProfile =
		serde_yaml::from_value(doc.clone()).map_err(|err| PolicyError::Validation {
			profile: profile.to_string(),
			detail: err.to_string(),
		})?;

	let ip_networks = raw
		.ip_ranges
		.iter()
		.map(|range| {
			parse_network(range).ok_or_else(|| PolicyError::Validation {
				profile: profile.to_string(),
				detail: format!("IpRanges entry {range} is not a valid network"),
			})
		})
		.collect::<Result<Vec<_>, _>>()?;

	let shared_tokens = raw
		.shared_tokens
		.into_iter()
		.map(|token| {
			let header = token
				.header_name
				.parse::<HeaderName>()
				.map_err(|_| PolicyError::Validation {
					profile: profile.to_string(),
					detail: format!("SharedTokens HeaderName {} is not a valid header", token.header_name),
				})?;
			Ok(SharedToken {
				header,
				value: token.value,
			})
		})
		.collect::<Result<Vec<_>, PolicyError>>()?;

	Ok(Policy {
		ip_networks,
		basic_auths: raw
			.basic_auth
			.into_iter()
			.map(|auth| BasicAuth {
				path: auth.path,
				username: auth.username,
				password: auth.password,
			})
			.collect(),
		shared_tokens,
	})
}

/// Parse a CIDR or bare address. Networks must have all host bits clear:
/// 1.1.1.1/16 is rejected, 1.1.1.1/32 is accepted.
fn parse_network(raw: &str) -> Option<IpNet> {
	if let Ok(net) = raw.parse::<IpNet>() {
		return (net.trunc() == net).then_some(net);
	}
	raw.parse::<IpAddr>().ok().map(IpNet::from)
}
