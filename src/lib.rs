pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;

use services::gateway::GatewayAdapter;
use services::reconciliation::ReconciliationEngine;
use store::ReconciliationStore;

// Shared state for the whole application.
pub struct AppState {
    pub config: config::Config,
    pub store: Arc<dyn ReconciliationStore>,
    pub gateway: Arc<dyn GatewayAdapter>,
    pub engine: Arc<ReconciliationEngine>,
}
