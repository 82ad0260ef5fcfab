use super::*;
use std::collections::HashMap;

fn config(extra: &[(&str, &str)]) -> Config {
	let mut vars: HashMap<String, String> = [
		("COPILOT_ENVIRONMENT_NAME", "staging"),
		("SERVER", "localhost:8081"),
		("EMAIL", "test@test.test"),
	]
	.into_iter()
	.map(|(k, v)| (k.to_string(), v.to_string()))
	.collect();
	for (k, v) in extra {
		vars.insert(k.to_string(), v.to_string());
	}
	Config::load(vars).unwrap()
}

fn enforce(ip: &str) -> Classification {
	Classification::Enforce {
		client_ip: ip.to_string(),
	}
}

fn bypass(ip: &str) -> Classification {
	Classification::Bypass {
		client_ip: ip.to_string(),
	}
}

#[test]
fn test_missing_xff_is_malformed() {
	let cfg = config(&[]);
	assert_eq!(
		classify(&cfg, "/", None, None, Some("curl/8.0")),
		Classification::Malformed
	);
	assert_eq!(classify(&cfg, "/", None, None, None), Classification::Malformed);
}

#[test]
fn test_elb_health_checker_without_xff_is_health_ok() {
	let cfg = config(&[]);
	assert_eq!(
		classify(&cfg, "/", None, None, Some("ELB-HealthChecker/2.0")),
		Classification::HealthOk
	);
}

#[test]
fn test_elb_health_checker_with_xff_is_not_health_ok() {
	let cfg = config(&[]);
	assert_eq!(
		classify(&cfg, "/", None, Some("1.2.3.4"), Some("ELB-HealthChecker/2.0")),
		enforce("1.2.3.4")
	);
}

#[test]
fn test_xff_index_selects_from_the_right() {
	let cfg = config(&[("IP_DETERMINED_BY_X_FORWARDED_FOR_INDEX", "-2")]);
	assert_eq!(
		classify(&cfg, "/", None, Some("1.2.3.4, 1.1.1.1, 9.9.9.9"), None),
		enforce("1.1.1.1")
	);
}

#[test]
fn test_xff_index_selects_from_the_left() {
	let cfg = config(&[("IP_DETERMINED_BY_X_FORWARDED_FOR_INDEX", "0")]);
	assert_eq!(
		classify(&cfg, "/", None, Some("1.2.3.4, 1.1.1.1"), None),
		enforce("1.2.3.4")
	);
}

#[test]
fn test_xff_index_out_of_range_is_malformed() {
	let cfg = config(&[("IP_DETERMINED_BY_X_FORWARDED_FOR_INDEX", "-3")]);
	assert_eq!(
		classify(&cfg, "/", None, Some("1.2.3.4, 1.1.1.1"), None),
		Classification::Malformed
	);
	let cfg = config(&[("IP_DETERMINED_BY_X_FORWARDED_FOR_INDEX", "2")]);
	assert_eq!(
		classify(&cfg, "/", None, Some("1.2.3.4, 1.1.1.1"), None),
		Classification::Malformed
	);
}

#[test]
fn test_xff_elements_are_trimmed() {
	let cfg = config(&[]);
	assert_eq!(
		classify(&cfg, "/", None, Some("1.2.3.4 ,  1.1.1.1  "), None),
		enforce("1.1.1.1")
	);
}

#[test]
fn test_empty_xff_element_is_malformed() {
	// Trailing comma selects an empty element.
	let cfg = config(&[]);
	assert_eq!(
		classify(&cfg, "/", None, Some("1.2.3.4,"), None),
		Classification::Malformed
	);
}

#[test]
fn test_ipfilter_disabled_bypasses() {
	let cfg = config(&[("IPFILTER_ENABLED", "False")]);
	assert_eq!(
		classify(&cfg, "/anything", None, Some("1.2.3.4"), None),
		bypass("1.2.3.4")
	);
}

#[test]
fn test_public_path_prefix_bypasses() {
	let cfg = config(&[("PUBLIC_PATHS", "/healthcheck")]);
	assert_eq!(
		classify(&cfg, "/healthcheck", None, Some("1.2.3.4"), None),
		bypass("1.2.3.4")
	);
	assert_eq!(
		classify(&cfg, "/healthcheck/sub", None, Some("1.2.3.4"), None),
		bypass("1.2.3.4")
	);
	assert_eq!(
		classify(&cfg, "/private", None, Some("1.2.3.4"), None),
		enforce("1.2.3.4")
	);
}

#[test]
fn test_protected_paths_enforce_only_matching_prefixes() {
	let cfg = config(&[("PROTECTED_PATHS", "/protected-test")]);
	assert_eq!(
		classify(&cfg, "/protected-test", None, Some("1.2.3.4"), None),
		enforce("1.2.3.4")
	);
	assert_eq!(
		classify(&cfg, "/protected-test/some/sub/path", None, Some("1.2.3.4"), None),
		enforce("1.2.3.4")
	);
	// The protected path must match the start of the url.
	assert_eq!(
		classify(&cfg, "/should-be-public/protected-test/", None, Some("1.2.3.4"), None),
		bypass("1.2.3.4")
	);
}

#[test]
fn test_prefix_rules_apply_to_decoded_path() {
	let cfg = config(&[("PUBLIC_PATHS", "/public")]);
	assert_eq!(
		classify(&cfg, "/%70ublic/page", None, Some("1.2.3.4"), None),
		bypass("1.2.3.4")
	);
}

#[test]
fn test_public_wins_over_protected_when_both_configured() {
	let cfg = config(&[
		("PUBLIC_PATHS", "/healthcheck"),
		("PROTECTED_PATHS", "/protected-test"),
	]);
	assert_eq!(
		classify(&cfg, "/healthcheck", None, Some("1.2.3.4"), None),
		bypass("1.2.3.4")
	);
	assert_eq!(
		classify(&cfg, "/protected-test", None, Some("1.2.3.4"), None),
		enforce("1.2.3.4")
	);
	assert_eq!(
		classify(&cfg, "/anything-else", None, Some("1.2.3.4"), None),
		enforce("1.2.3.4")
	);
}

#[test]
fn test_host_in_pub_host_list_bypasses() {
	let cfg = config(&[("PUB_HOST_LIST", "127.0.0.1:8080")]);
	assert_eq!(
		classify(&cfg, "/", Some("127.0.0.1:8080"), Some("1.2.3.4"), None),
		bypass("1.2.3.4")
	);
	assert_eq!(
		classify(&cfg, "/", Some("127.0.0.1:9999"), Some("1.2.3.4"), None),
		enforce("1.2.3.4")
	);
}

#[test]
fn test_pub_host_does_not_bypass_protected_path() {
	let cfg = config(&[
		("PUB_HOST_LIST", "127.0.0.1:8080"),
		("PROTECTED_PATHS", "/admin"),
	]);
	assert_eq!(
		classify(&cfg, "/admin", Some("127.0.0.1:8080"), Some("1.2.3.4"), None),
		enforce("1.2.3.4")
	);
	assert_eq!(
		classify(&cfg, "/other", Some("127.0.0.1:8080"), Some("1.2.3.4"), None),
		bypass("1.2.3.4")
	);
}

#[test]
fn test_host_not_in_priv_host_list_bypasses() {
	let cfg = config(&[("PRIV_HOST_LIST", "127.0.0.1:8081")]);
	assert_eq!(
		classify(&cfg, "/", Some("127.0.0.1:8080"), Some("1.2.3.4"), None),
		bypass("1.2.3.4")
	);
	assert_eq!(
		classify(&cfg, "/", Some("127.0.0.1:8081"), Some("1.2.3.4"), None),
		enforce("1.2.3.4")
	);
}

#[test]
fn test_priv_host_list_with_public_path() {
	let cfg = config(&[
		("PRIV_HOST_LIST", "127.0.0.1:8080"),
		("PUBLIC_PATHS", "/healthcheck"),
	]);
	assert_eq!(
		classify(&cfg, "/healthcheck", Some("127.0.0.1:8080"), Some("1.2.3.4"), None),
		bypass("1.2.3.4")
	);
	assert_eq!(
		classify(&cfg, "/secret", Some("127.0.0.1:8080"), Some("1.2.3.4"), None),
		enforce("1.2.3.4")
	);
}
