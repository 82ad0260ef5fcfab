use std::collections::HashSet;
use std::sync::Arc;

use hyper::body::Incoming;

use crate::config::ServerScheme;
use crate::http::access::{self, Verdict};
use crate::http::classify::{self, Classification};
use crate::http::{
	self, Body, HeaderName, HeaderValue, PathAndQuery, Response, Scheme, StatusCode, Uri, denial,
	header, x_headers,
};
use crate::policy::{self, Policy};
use crate::proxy::ProxyError;
use crate::ProxyInputs;
use crate::telemetry::log::{DropOnLog, LogBody, RequestLog, SessionContext, request_id};

/// Handles one inbound request end to end: tag, classify, decide, proxy.
#[derive(Clone)]
pub struct HTTPProxy {
	pub(super) inputs: Arc<ProxyInputs>,
}

impl HTTPProxy {
	pub async fn proxy(&self, req: ::http::Request<Incoming>) -> Response {
		let cfg = self.inputs.cfg.as_ref();
		let id = request_id(req.headers());
		let context = SessionContext::from_request(cfg, &req);
		let mut log: DropOnLog = RequestLog::new(id, context).into();
		log.with(|l| {
			l.start();
			l.forwarded_url();
		});

		let ret = self.proxy_internal(req, log.as_mut().unwrap()).await;
		let resp = match ret {
			Ok(resp) => resp,
			Err(err) => {
				let resp = self.error_response(&err, log.as_mut().unwrap());
				log.with(|l| l.error = Some(err.to_string()));
				resp
			},
		};

		log.with(|l| l.record_response(resp.status(), resp.headers()));
		// The log travels with the body so the end-of-request record fires
		// only once the stream to the client is complete.
		resp.map(move |b| Body::new(LogBody::new(b, log)))
	}

	async fn proxy_internal(
		&self,
		req: ::http::Request<Incoming>,
		log: &mut RequestLog,
	) -> Result<Response, ProxyError> {
		let cfg = self.inputs.cfg.as_ref();

		let classification = classify::classify(
			cfg,
			req.uri().path(),
			http::host(&req),
			http::header_str(req.headers(), &x_headers::X_FORWARDED_FOR),
			http::header_str(req.headers(), &header::USER_AGENT),
		);

		let denied_headers = match classification {
			Classification::HealthOk => {
				log.verdict("health check");
				return Ok(http::plain_response(StatusCode::OK, "OK"));
			},
			Classification::Malformed => {
				log.missing_forwarded_for();
				return Err(ProxyError::MalformedForwardedFor);
			},
			Classification::Bypass { client_ip } => {
				log.client_ip = Some(client_ip);
				log.verdict("bypass");
				Policy::default().denied_request_headers()
			},
			Classification::Enforce { client_ip } => {
				log.client_ip = Some(client_ip.clone());
				log.policy_fetch_begin();
				let policy = self.effective_policy().await?;
				log.policy_fetch_end();

				match access::evaluate(cfg, &policy, req.uri().path(), req.headers(), &client_ip) {
					Verdict::Challenge => {
						log.verdict("challenge");
						return Ok(challenge_response());
					},
					Verdict::AuthOk => {
						log.verdict("auth ok");
						return Ok(http::plain_response(StatusCode::OK, "ok"));
					},
					Verdict::Deny => {
						log.blocked(&client_ip);
						return Err(ProxyError::AccessDenied);
					},
					Verdict::Allow => {
						log.verdict("allow");
						policy.denied_request_headers()
					},
				}
			},
		};

		self.forward(req, &denied_headers, log).await
	}

	/// Fetch, validate and concatenate every configured profile. Runs fresh
	/// for each enforced request; a failed fetch always denies.
	async fn effective_policy(&self) -> Result<Policy, ProxyError> {
		let mut policy = Policy::default();
		for profile in &self.inputs.cfg.profiles {
			let doc = self.inputs.appconfig.fetch(profile).await?;
			policy.extend(policy::validate(profile, &doc)?);
		}
		Ok(policy)
	}

	async fn forward(
		&self,
		req: ::http::Request<Incoming>,
		denied: &HashSet<HeaderName>,
		log: &mut RequestLog,
	) -> Result<Response, ProxyError> {
		let cfg = self.inputs.cfg.as_ref();
		let (parts, body) = req.into_parts();

		// The raw path+query as received; never rebuilt from the absolute
		// URL, which would re-encode non-ASCII paths.
		let path_and_query = parts
			.uri
			.path_and_query()
			.cloned()
			.unwrap_or_else(|| PathAndQuery::from_static("/"));
		let scheme = match cfg.server_scheme {
			ServerScheme::Http => Scheme::HTTP,
			ServerScheme::Https => Scheme::HTTPS,
		};
		let uri = Uri::builder()
			.scheme(scheme)
			.authority(cfg.server.as_str())
			.path_and_query(path_and_query)
			.build()
			.map_err(|_| ProxyError::InvalidRequest)?;

		// Without declared framing the outbound request must not grow a body;
		// an unframed GET must not become transfer-encoding: chunked.
		let has_body =
			parts.headers.contains_key(header::CONTENT_LENGTH) || http::is_chunked(&parts.headers);
		let outbound_body = if has_body { Body::new(body) } else { Body::empty() };

		let mut outbound = ::http::Request::builder()
			.method(parts.method.clone())
			.uri(uri)
			.version(::http::Version::HTTP_11)
			.body(outbound_body)
			.map_err(|_| ProxyError::InvalidRequest)?;

		let headers = outbound.headers_mut();
		for (name, value) in parts.headers.iter() {
			if denied.contains(name) || name == header::TRANSFER_ENCODING {
				continue;
			}
			headers.append(name.clone(), value.clone());
		}
		if !headers.contains_key(header::HOST)
			&& let Some(authority) = parts.uri.authority()
			&& let Ok(host) = HeaderValue::try_from(authority.as_str())
		{
			// HTTP/2 clients carry the host in the authority; restore it so
			// the origin sees the inbound host.
			headers.insert(header::HOST, host);
		}

		log.origin_request_begin();
		let resp = self.inputs.upstream.request(outbound).await?;
		log.origin_response_status(resp.status());

		let (mut parts, body) = resp.into_parts();
		let origin_headers = std::mem::take(&mut parts.headers);
		for (name, value) in origin_headers.iter() {
			if name != header::CONNECTION {
				parts.headers.append(name.clone(), value.clone());
			}
		}

		log.downstream_streaming();
		Ok(Response::from_parts(parts, body))
	}

	fn error_response(&self, err: &ProxyError, log: &RequestLog) -> Response {
		if err.renders_denial_page() {
			denial::render_access_denied(
				&self.inputs.cfg,
				log.client_ip.as_deref().unwrap_or("Unknown"),
				&log.context.url,
				&log.id,
				err.denial_detail().as_deref(),
			)
		} else {
			err.plain_response()
		}
	}
}

fn challenge_response() -> Response {
	::http::Response::builder()
		.status(StatusCode::UNAUTHORIZED)
		.header(
			header::WWW_AUTHENTICATE,
			HeaderValue::from_static("Basic realm=\"Login Required\""),
		)
		.body(Body::from(
			"Could not verify your access level for that URL.\nYou have to login with proper credentials",
		))
		.expect("builder with known status code should not fail")
}
