mod analysis;
mod auth;
mod billing;
mod config;
mod db;
mod email;
mod entitlements;
mod errors;
mod institutions;
mod models;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::AiClient;
use crate::billing::BillingClient;
use crate::config::Config;
use crate::db::create_pool;
use crate::email::EmailClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (aborts on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ascent API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Provider clients are built once here; handlers receive them via state
    // and fail explicitly when a provider was not configured.
    let billing = match &config.stripe {
        Some(stripe) => {
            info!("Stripe billing client initialized");
            Some(Arc::new(BillingClient::new(stripe.clone())?))
        }
        None => {
            warn!("STRIPE_SECRET_KEY not set; billing endpoints will return errors");
            None
        }
    };

    let email = match &config.email {
        Some(email_config) => {
            info!("Email client initialized (from: {})", email_config.from_address);
            Some(Arc::new(EmailClient::new(email_config.clone())?))
        }
        None => {
            warn!("RESEND_API_KEY not set; notification emails are disabled");
            None
        }
    };

    let ai = Arc::new(AiClient::new(config.ai_api_key.clone())?);
    if config.ai_api_key.is_none() {
        warn!("AI_API_KEY not set; resume analysis will serve the generic fallback");
    }

    // Build app state
    let state = AppState {
        db,
        config: config.clone(),
        billing,
        email,
        ai,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
