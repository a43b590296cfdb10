use anyhow::{Context, Result};

/// Stripe credentials. Constructed once at startup and injected through
/// `AppState`; billing endpoints fail with an explicit error when absent
/// instead of silently succeeding.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub subscription_price_id: String,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub resend_api_key: String,
    pub from_address: String,
}

/// Application configuration loaded from environment variables.
/// Required variables abort startup; provider keys are optional and degrade
/// their endpoints explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub app_base_url: String,
    pub stripe: Option<StripeConfig>,
    pub email: Option<EmailConfig>,
    pub ai_api_key: Option<String>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let stripe = match optional_env("STRIPE_SECRET_KEY") {
            Some(secret_key) => Some(StripeConfig {
                secret_key,
                subscription_price_id: require_env("STRIPE_PRICE_ID")?,
                webhook_secret: optional_env("STRIPE_WEBHOOK_SECRET"),
            }),
            None => None,
        };

        let email = optional_env("RESEND_API_KEY").map(|resend_api_key| EmailConfig {
            resend_api_key,
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Ascent <noreply@ascent.app>".to_string()),
        });

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            stripe,
            email,
            ai_api_key: optional_env("AI_API_KEY"),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
