//! Main Entrypoint for the Empath Relay Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the completion and emotion-classification clients.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use empath_api::{
    config::Config,
    router::{cors_layer, create_router},
    state::AppState,
};
use empath_core::{
    dispatcher::Dispatcher,
    emotion::{HttpEmotionClassifier, Modality},
    llm_client::OpenAICompatibleClient,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Provider Clients ---
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.openai_api_key)
        .with_api_base(&config.openai_api_base);
    let completion = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));

    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let voice = Arc::new(HttpEmotionClassifier::new(
        http.clone(),
        &config.ml_service_url,
        Modality::Voice,
    ));
    let face = Arc::new(HttpEmotionClassifier::new(
        http,
        &config.ml_service_url,
        Modality::Face,
    ));

    let dispatcher = Dispatcher::new(completion, voice, face);
    let app_state = Arc::new(AppState::new(dispatcher, config.clone()));

    // --- 4. Create Router and Apply Middleware ---
    let app = create_router(app_state).layer(cors_layer(&config.client_url)?);

    // --- 5. Start Server ---
    info!(
        model = %config.chat_model,
        ml_service_url = %config.ml_service_url,
        client_url = %config.client_url,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
