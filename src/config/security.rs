use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use std::env;
use tower_http::set_header::SetResponseHeaderLayer;

const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";
const CSP_API_VALUE: &str = "default-src 'none'; frame-ancestors 'none'";
const REFERRER_POLICY_VALUE: &str = "strict-origin-when-cross-origin";
const PERMISSIONS_POLICY_VALUE: &str = "geolocation=(), microphone=(), camera=()";

fn header_layer(name: &'static str, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(
        HeaderName::from_static(name),
        HeaderValue::from_static(value),
    )
}

/// Standard API hardening headers. HSTS is only attached when
/// RUST_ENV=production, since it is meaningless over plain HTTP.
pub fn security_headers(router: Router) -> Router {
    let is_production = env::var("RUST_ENV")
        .map(|v| v.to_lowercase() == "production")
        .unwrap_or(false);

    let router = router
        .layer(header_layer("x-content-type-options", "nosniff"))
        .layer(header_layer("x-frame-options", "DENY"))
        .layer(header_layer("content-security-policy", CSP_API_VALUE))
        .layer(header_layer("referrer-policy", REFERRER_POLICY_VALUE))
        .layer(header_layer("permissions-policy", PERMISSIONS_POLICY_VALUE));

    if is_production {
        router.layer(header_layer("strict-transport-security", HSTS_VALUE))
    } else {
        router
    }
}
