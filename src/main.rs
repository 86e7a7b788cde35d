// SPDX-License-Identifier: MIT

//! fitledger API server.
//!
//! Receives fitness provider webhooks, backfills activity history,
//! computes token rewards and maintains the user ledger.

use fitledger::{
    config::Config,
    db::Db,
    services::{LedgerService, ProviderClient, ProviderService, SyncService, TasksService},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting fitledger API");

    // Initialize storage
    let db = Db::connect(&config.gcp_project_id)
        .await
        .expect("Failed to connect to Firestore");

    // Initialize Cloud Tasks service
    let tasks = TasksService::new(&config.gcp_project_id, &config.gcp_region);
    tracing::info!(
        project = %config.gcp_project_id,
        "Cloud Tasks service initialized"
    );

    // Initialize services; the provider service owns the instance-wide
    // token cache and refresh locks.
    let client = ProviderClient::new(&config).expect("Failed to build provider client");
    let provider = ProviderService::new(client, db.clone());
    let ledger = LedgerService::new(db.clone());
    let sync = SyncService::new(db.clone(), provider.clone(), ledger.clone(), config.clone());

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        provider,
        ledger,
        sync,
        tasks,
    });

    // Build router
    let app = fitledger::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fitledger=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
