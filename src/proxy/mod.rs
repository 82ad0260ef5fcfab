pub mod gateway;
pub mod httpproxy;

use crate::http::{self, StatusCode};
use crate::policy::PolicyError;

/// Errors that terminate a request before or instead of a proxied response.
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("X-Forwarded-For header is missing or has no usable element")]
	MalformedForwardedFor,
	#[error("{0}")]
	Policy(#[from] PolicyError),
	#[error("request blocked")]
	AccessDenied,
	#[error("upstream call failed: {0:?}")]
	UpstreamCallFailed(hyper_util::client::legacy::Error),
	#[error("invalid request")]
	InvalidRequest,
}

impl ProxyError {
	/// Status for errors that do not render the denial page.
	pub fn status(&self) -> StatusCode {
		match self {
			ProxyError::MalformedForwardedFor
			| ProxyError::Policy(_)
			| ProxyError::AccessDenied => StatusCode::FORBIDDEN,
			ProxyError::UpstreamCallFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
			ProxyError::InvalidRequest => StatusCode::BAD_REQUEST,
		}
	}

	/// Whether the client should see the rendered denial page.
	pub fn renders_denial_page(&self) -> bool {
		self.status() == StatusCode::FORBIDDEN
	}

	/// Extra detail appended to the denial page. Only policy-fetch failures
	/// surface a reason; validation failures leak nothing.
	pub fn denial_detail(&self) -> Option<String> {
		match self {
			ProxyError::Policy(err @ PolicyError::Fetch { .. }) => Some(err.to_string()),
			ProxyError::Policy(err @ PolicyError::Profile(_)) => Some(err.to_string()),
			_ => None,
		}
	}

	pub fn plain_response(&self) -> http::Response {
		http::plain_response(self.status(), match self {
			ProxyError::UpstreamCallFailed(_) => "Internal Server Error",
			_ => "Bad Request",
		})
	}
}
