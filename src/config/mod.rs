use std::env;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::security_headers;

pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub checkout_success_url: String,
    pub checkout_fail_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/studio".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
            checkout_success_url: env::var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|_| "http://localhost:3000/checkout/success".to_string()),
            checkout_fail_url: env::var("CHECKOUT_FAIL_URL")
                .unwrap_or_else(|_| "http://localhost:3000/checkout/fail".to_string()),
        }
    }
}
