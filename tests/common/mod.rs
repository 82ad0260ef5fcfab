use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use ipfilter::{Config, app};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Echo origin: every request is answered with its method, raw URI and
/// headers reflected as `x-echo-*` response headers and its body echoed back.
pub struct TestOrigin {
	pub addr: SocketAddr,
	hits: Arc<AtomicUsize>,
}

impl TestOrigin {
	pub fn hits(&self) -> usize {
		self.hits.load(Ordering::SeqCst)
	}
}

pub async fn spawn_origin() -> TestOrigin {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let hits = Arc::new(AtomicUsize::new(0));
	let task_hits = hits.clone();
	tokio::spawn(async move {
		loop {
			let Ok((stream, _)) = listener.accept().await else {
				break;
			};
			let hits = task_hits.clone();
			tokio::spawn(async move {
				let service = service_fn(move |req| {
					let hits = hits.clone();
					async move {
						hits.fetch_add(1, Ordering::SeqCst);
						Ok::<_, Infallible>(echo(req).await)
					}
				});
				let _ = hyper::server::conn::http1::Builder::new()
					.serve_connection(TokioIo::new(stream), service)
					.await;
			});
		}
	});
	TestOrigin { addr, hits }
}

async fn echo(req: Request<Incoming>) -> Response<Full<Bytes>> {
	let (parts, body) = req.into_parts();
	let raw_uri = parts
		.uri
		.path_and_query()
		.map(|pq| pq.as_str().to_string())
		.unwrap_or_default();
	let body = body.collect().await.unwrap().to_bytes();

	let status = parts
		.headers
		.get("x-echo-response-status")
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.parse::<u16>().ok())
		.unwrap_or(200);
	let mut builder = Response::builder().status(status);
	let headers = builder.headers_mut().unwrap();
	headers.insert("x-echo-method", parts.method.as_str().parse().unwrap());
	headers.insert("x-echo-raw-uri", HeaderValue::from_str(&raw_uri).unwrap());
	for (name, value) in parts.headers.iter() {
		let echoed = HeaderName::from_str(&format!("x-echo-header-{name}")).unwrap();
		headers.append(echoed, value.clone());
	}
	if parts.uri.path() == "/multiple-cookies"
		&& let Some(cookies) = parts
			.headers
			.get("x-multiple-cookies")
			.and_then(|v| v.to_str().ok())
	{
		for cookie in cookies.split(',') {
			headers.append(header::SET_COOKIE, HeaderValue::from_str(cookie.trim()).unwrap());
		}
	}
	builder.body(Full::new(body)).unwrap()
}

/// AppConfig agent double serving fixed YAML documents per profile.
pub async fn spawn_appconfig(configs: &[(&str, &str)]) -> MockServer {
	let server = MockServer::start().await;
	for (profile, yaml) in configs {
		let parts: Vec<&str> = profile.split(':').collect();
		let &[application, environment, configuration] = parts.as_slice() else {
			panic!("profile must be application:environment:configuration");
		};
		Mock::given(method("GET"))
			.and(path(format!(
				"/applications/{application}/environments/{environment}/configurations/{configuration}"
			)))
			.respond_with(ResponseTemplate::new(200).set_body_string(yaml.to_string()))
			.mount(&server)
			.await;
	}
	server
}

pub struct Filter {
	pub addr: SocketAddr,
	_bound: app::Bound,
}

/// Start the filter on an ephemeral port against the given origin, with test
/// defaults mirroring a typical deployment.
pub async fn spawn_filter(origin: &SocketAddr, env: &[(&str, &str)]) -> Filter {
	ipfilter::telemetry::setup_test_logging();
	let mut vars: HashMap<String, String> = [
		("COPILOT_ENVIRONMENT_NAME", "staging"),
		("EMAIL", "test@test.test"),
		("EMAIL_NAME", "the Department for International Trade WebOps team"),
		("PORT", "0"),
	]
	.into_iter()
	.map(|(k, v)| (k.to_string(), v.to_string()))
	.collect();
	vars.insert("SERVER".to_string(), origin.to_string());
	for (k, v) in env {
		vars.insert(k.to_string(), v.to_string());
	}
	let cfg = Arc::new(Config::load(vars).unwrap());
	let bound = app::run(cfg).await.unwrap();
	Filter {
		addr: bound.local_addr,
		_bound: bound,
	}
}

pub const WHITELISTED_XFF: &str = "1.2.3.4, 1.1.1.1, 1.1.1.1";

/// One request through the filter, response fully collected.
pub async fn send(
	addr: &SocketAddr,
	method: Method,
	path_and_query: &str,
	headers: &[(&str, &str)],
	body: Bytes,
) -> (StatusCode, HeaderMap, Bytes) {
	let client: Client<HttpConnector, Full<Bytes>> =
		Client::builder(TokioExecutor::new()).build_http();
	let mut builder = Request::builder()
		.method(method)
		.uri(format!("http://{addr}{path_and_query}"));
	for (name, value) in headers {
		builder = builder.header(*name, *value);
	}
	let resp = client
		.request(builder.body(Full::new(body)).unwrap())
		.await
		.unwrap();
	let (parts, body) = resp.into_parts();
	let body = body.collect().await.unwrap().to_bytes();
	(parts.status, parts.headers, body)
}

pub async fn get(
	addr: &SocketAddr,
	path_and_query: &str,
	headers: &[(&str, &str)],
) -> (StatusCode, HeaderMap, Bytes) {
	send(addr, Method::GET, path_and_query, headers, Bytes::new()).await
}

/// Request body fed from a channel, for tests that need an upload to stall
/// or to arrive in distinct chunks.
pub struct ChannelBody {
	rx: tokio::sync::mpsc::Receiver<Bytes>,
}

pub fn channel_body(capacity: usize) -> (tokio::sync::mpsc::Sender<Bytes>, ChannelBody) {
	let (tx, rx) = tokio::sync::mpsc::channel(capacity);
	(tx, ChannelBody { rx })
}

impl http_body::Body for ChannelBody {
	type Data = Bytes;
	type Error = Infallible;

	fn poll_frame(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
	) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
		let this = self.get_mut();
		match this.rx.poll_recv(cx) {
			Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(http_body::Frame::data(chunk)))),
			Poll::Ready(None) => Poll::Ready(None),
			Poll::Pending => Poll::Pending,
		}
	}
}
