//! Aggregation runtime entry point: loads configuration from the
//! environment, builds the shared application state, and serves the HTTP
//! and WebSocket surface until a shutdown signal arrives.

use agg_core::RuntimeSettings;
use agg_security::SecretStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("starting aggregation runtime");

    let settings = RuntimeSettings::from_env();
    let bind_address = settings.bind_address.clone();
    let port = settings.port;

    let secret_key = secret_key_bytes(&settings)?;
    let secrets = Arc::new(SecretStore::new(&secret_key).context("building secret store")?);

    let state = agg_api::AppState::new(settings, secrets);
    let router = agg_api::build_router(state);

    let listener = tokio::net::TcpListener::bind((bind_address.as_str(), port))
        .await
        .with_context(|| format!("binding {bind_address}:{port}"))?;
    info!(address = %bind_address, port, "listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!(error = %err, "server exited with error");
        return Err(err.into());
    }

    info!("aggregation runtime stopped");
    Ok(())
}

/// Decodes the configured base64 AEAD key, or falls back to a process-local
/// random key for development when none is set. A random key means secrets
/// set before a restart become unreadable after one, which is acceptable
/// outside of a real deployment where `AGG_SECRET_KEY` is always set.
fn secret_key_bytes(settings: &RuntimeSettings) -> Result<[u8; 32]> {
    match &settings.secret_key_b64 {
        Some(encoded) => {
            use base64::Engine;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .context("AGG_SECRET_KEY is not valid base64")?;
            decoded
                .try_into()
                .map_err(|_| anyhow::anyhow!("AGG_SECRET_KEY must decode to exactly 32 bytes"))
        }
        None => {
            use ring::rand::SecureRandom;
            tracing::warn!("AGG_SECRET_KEY not set, generating an ephemeral development key");
            let mut key = [0u8; 32];
            ring::rand::SystemRandom::new()
                .fill(&mut key)
                .map_err(|_| anyhow::anyhow!("failed to generate ephemeral secret key"))?;
            Ok(key)
        }
    }
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(err) => error!(error = %err, "unable to listen for shutdown signal"),
    }
}
