use std::sync::OnceLock;

use minijinja::{Environment, context};

use crate::config::Config;
use crate::http::{Body, Response, StatusCode, header};

static TEMPLATE: &str = include_str!("../../templates/access-denied.html");

fn environment() -> &'static Environment<'static> {
	static ENV: OnceLock<Environment> = OnceLock::new();
	ENV.get_or_init(|| {
		let mut env = Environment::new();
		env
			.add_template("access-denied.html", TEMPLATE)
			.expect("embedded template parses");
		env
	})
}

/// The 403 page shown for every denied request. `detail` is appended for
/// policy-fetch failures; validation failures leak nothing.
pub fn render_access_denied(
	cfg: &Config,
	client_ip: &str,
	forwarded_url: &str,
	request_id: &str,
	detail: Option<&str>,
) -> Response {
	let mut body = environment()
		.get_template("access-denied.html")
		.expect("template was added at startup")
		.render(context! {
			client_ip,
			forwarded_url,
			request_id,
			email => cfg.email.as_str(),
			email_name => cfg.email_name.as_str(),
		})
		.expect("embedded template renders");
	if let Some(detail) = detail {
		body.push_str("\n<p>");
		body.push_str(detail);
		body.push_str("</p>\n");
	}
	::http::Response::builder()
		.status(StatusCode::FORBIDDEN)
		.header(header::CONTENT_TYPE, "text/html; charset=utf-8")
		.body(Body::from(body))
		.expect("builder with known status code should not fail")
}
