use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use consult_booking::{
    config::Config,
    controllers,
    database::Database,
    services::{
        gateway::{CallbackUrls, HttpGatewayClient},
        reconciliation::{EngineSettings, ReconciliationEngine},
    },
    store::PgStore,
    AppState,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        environment = %config.app.environment,
        "Starting consultation booking API"
    );

    // Connect to the database
    let db = Database::connect(&config.database)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    db.run_migrations().await.expect("Failed to run migrations");

    let store = Arc::new(PgStore::new(db.pool.clone()));
    let gateway = Arc::new(HttpGatewayClient::from_config(
        &config.gateway,
        &config.circuit_breaker,
    ));

    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        gateway.clone(),
        EngineSettings {
            amount_minor: config.consultation.price_minor,
            currency: config.consultation.currency.clone(),
            callbacks: CallbackUrls {
                success_url: config.gateway.success_url.clone(),
                fail_url: config.gateway.fail_url.clone(),
                webhook_url: config.gateway.webhook_url.clone(),
            },
        },
    ));

    // Create the shared application state
    let app_state = Arc::new(AppState {
        config: config.clone(),
        store,
        gateway,
        engine,
    });

    // Create the main router
    let app = Router::new()
        .route("/", get(|| async { "Consultation Booking API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        // Mount the routes from the controllers module
        .nest("/api", controllers::routes())
        // Pass the application state to the router
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.app.host, config.app.port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app.into_make_service())
        .await
        .expect("Server error");
}
