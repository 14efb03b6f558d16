use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use studio_server::config::Config;
use studio_server::core::orchestrator::{CheckoutUrls, Orchestrator};
use studio_server::handlers::AppState;
use studio_server::notify::LogNotifier;
use studio_server::routes::create_routes;
use studio_server::store::postgres::PgStore;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let orchestrator = Orchestrator::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(LogNotifier),
        CheckoutUrls {
            success_url: config.checkout_success_url.clone(),
            fail_url: config.checkout_fail_url.clone(),
        },
    );

    let app: Router = create_routes(AppState {
        orchestrator: Arc::new(orchestrator),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
