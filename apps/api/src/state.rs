use std::sync::Arc;

use sqlx::PgPool;

use crate::analysis::AiClient;
use crate::billing::BillingClient;
use crate::config::Config;
use crate::email::EmailClient;

/// Shared application state injected into all route handlers via Axum
/// extractors. Provider clients are built once at startup; `None` means the
/// corresponding credentials were absent and dependent endpoints degrade to
/// explicit errors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub billing: Option<Arc<BillingClient>>,
    pub email: Option<Arc<EmailClient>>,
    pub ai: Arc<AiClient>,
}

impl AppState {
    /// Billing client or the explicit "not configured" error.
    pub fn billing(&self) -> Result<&BillingClient, crate::errors::AppError> {
        self.billing
            .as_deref()
            .ok_or(crate::errors::AppError::BillingNotConfigured)
    }
}
