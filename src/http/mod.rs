use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};

pub mod access;
pub mod classify;
pub mod denial;

pub use ::http::uri::{Authority, PathAndQuery, Scheme};
pub use ::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header, uri};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type Request = ::http::Request<Body>;
pub type Response = ::http::Response<Body>;

pub mod x_headers {
	use http::HeaderName;

	pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
	pub const X_B3_TRACE_ID: HeaderName = HeaderName::from_static("x-b3-traceid");
}

/// The single body type used on both sides of the proxy: a boxed
/// `http_body::Body` erased over whatever produced it (an incoming hyper
/// stream, a static string, nothing). Frames pass through unbuffered.
#[derive(Debug)]
pub struct Body(UnsyncBoxBody<Bytes, BoxError>);

impl Body {
	pub fn new<B>(body: B) -> Body
	where
		B: http_body::Body<Data = Bytes> + Send + 'static,
		B::Error: Into<BoxError>,
	{
		Body(body.map_err(Into::into).boxed_unsync())
	}

	pub fn empty() -> Body {
		Body::new(Empty::new())
	}
}

impl Default for Body {
	fn default() -> Body {
		Body::empty()
	}
}

impl From<&'static str> for Body {
	fn from(value: &'static str) -> Body {
		Body::new(Full::new(Bytes::from_static(value.as_bytes())))
	}
}

impl From<String> for Body {
	fn from(value: String) -> Body {
		Body::new(Full::new(Bytes::from(value)))
	}
}

impl From<Bytes> for Body {
	fn from(value: Bytes) -> Body {
		Body::new(Full::new(value))
	}
}

impl http_body::Body for Body {
	type Data = Bytes;
	type Error = BoxError;

	fn poll_frame(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
	) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
		Pin::new(&mut self.0).poll_frame(cx)
	}

	fn is_end_stream(&self) -> bool {
		self.0.is_end_stream()
	}

	fn size_hint(&self) -> http_body::SizeHint {
		self.0.size_hint()
	}
}

/// The request host as the client sent it (host:port), from the Host header
/// for HTTP/1 or the URI authority for HTTP/2.
pub fn host<B>(req: &::http::Request<B>) -> Option<&str> {
	req
		.headers()
		.get(header::HOST)
		.and_then(|h| h.to_str().ok())
		.or_else(|| req.uri().authority().map(|a| a.as_str()))
}

/// The URL the client asked for, reconstructed for logging and the denial
/// page. The raw path+query is used verbatim; only scheme and host are added.
pub fn forwarded_url<B>(req: &::http::Request<B>) -> String {
	let host = host(req).unwrap_or("");
	let path_and_query = req
		.uri()
		.path_and_query()
		.map(PathAndQuery::as_str)
		.unwrap_or("/");
	format!("http://{host}{path_and_query}")
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
	headers.get(name).and_then(|v| v.to_str().ok())
}

/// Whether the message carries `Transfer-Encoding: chunked`.
pub fn is_chunked(headers: &HeaderMap) -> bool {
	headers
		.get_all(header::TRANSFER_ENCODING)
		.iter()
		.filter_map(|v| v.to_str().ok())
		.any(|v| v.to_ascii_lowercase().contains("chunked"))
}

/// A response with a fixed status and a short plain-text body.
pub fn plain_response(status: StatusCode, body: &'static str) -> Response {
	::http::Response::builder()
		.status(status)
		.header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
		.body(Body::from(body))
		.expect("builder with known status code should not fail")
}
