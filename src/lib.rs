pub mod config;
pub mod core;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod routes;
pub mod store;
pub mod utils;
