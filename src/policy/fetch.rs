use http_body_util::BodyExt;
use tracing::debug;

use crate::client::Client;
use crate::http::{Body, Method, StatusCode};
use crate::policy::PolicyError;

/// Client for the local AppConfig agent. Profiles are addressed as
/// `application:environment:configuration` and served as YAML documents.
#[derive(Debug, Clone)]
pub struct AppConfigClient {
	client: Client,
	base_url: String,
}

impl AppConfigClient {
	pub fn new(client: Client, base_url: impl Into<String>) -> AppConfigClient {
		AppConfigClient {
			client,
			base_url: base_url.into(),
		}
	}

	pub async fn fetch(&self, profile: &str) -> Result<serde_yaml::Value, PolicyError> {
		let parts: Vec<&str> = profile.split(':').collect();
		let &[application, environment, configuration] = parts.as_slice() else {
			return Err(PolicyError::Profile(profile.to_string()));
		};
		let url = format!(
			"{}/applications/{application}/environments/{environment}/configurations/{configuration}",
			self.base_url.trim_end_matches('/'),
		);
		debug!(profile, url, "fetching AppConfig profile");

		let req = ::http::Request::builder()
			.method(Method::GET)
			.uri(&url)
			.body(Body::empty())
			.map_err(|err| PolicyError::Fetch {
				profile: profile.to_string(),
				reason: err.to_string(),
			})?;

		let resp = self
			.client
			.request(req)
			.await
			.map_err(|err| PolicyError::Fetch {
				profile: profile.to_string(),
				reason: err.to_string(),
			})?;

		if resp.status() != StatusCode::OK {
			return Err(PolicyError::Fetch {
				profile: profile.to_string(),
				reason: format!("agent returned {}", resp.status()),
			});
		}

		let body = resp
			.into_body()
			.collect()
			.await
			.map_err(|err| PolicyError::Fetch {
				profile: profile.to_string(),
				reason: err.to_string(),
			})?
			.to_bytes();

		serde_yaml::from_slice(&body).map_err(|err| PolicyError::Fetch {
			profile: profile.to_string(),
			reason: format!("invalid YAML: {err}"),
		})
	}
}
