//! Billing — the single point of entry for all Stripe API calls.
//!
//! ARCHITECTURAL RULE: no other module may talk to the payment provider
//! directly. The client is constructed once at startup from `StripeConfig`
//! and injected through `AppState`; there is no global singleton to probe.

pub mod events;
pub mod handlers;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::StripeConfig;
use crate::errors::AppError;
use crate::models::feature::FeatureKey;
use crate::models::user::User;

const STRIPE_API_URL: &str = "https://api.stripe.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// The subset of a retrieved checkout session that verification needs.
#[derive(Debug, Deserialize)]
pub struct CheckoutSessionDetails {
    pub id: String,
    pub mode: String,
    pub payment_status: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

impl CheckoutSessionDetails {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

pub struct BillingClient {
    http: Client,
    config: StripeConfig,
}

impl BillingClient {
    pub fn new(config: StripeConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.config.webhook_secret.as_deref()
    }

    /// Starts a subscription checkout for the given user.
    pub async fn create_subscription_checkout(
        &self,
        user: &User,
        app_base_url: &str,
    ) -> Result<CheckoutSession, AppError> {
        let success_url =
            format!("{app_base_url}/billing/success?session_id={{CHECKOUT_SESSION_ID}}");
        let cancel_url = format!("{app_base_url}/pricing");
        let user_id = user.id.to_string();

        let params: Vec<(&str, &str)> = vec![
            ("mode", "subscription"),
            ("line_items[0][price]", &self.config.subscription_price_id),
            ("line_items[0][quantity]", "1"),
            ("customer_email", &user.email),
            ("client_reference_id", &user_id),
            ("metadata[user_id]", &user_id),
            ("success_url", &success_url),
            ("cancel_url", &cancel_url),
        ];

        self.post_form("/checkout/sessions", &params).await
    }

    /// Starts a one-off payment checkout for a single feature key. The key
    /// travels in session metadata so the webhook can grant it later.
    pub async fn create_feature_checkout(
        &self,
        user: &User,
        key: FeatureKey,
        app_base_url: &str,
    ) -> Result<CheckoutSession, AppError> {
        let success_url =
            format!("{app_base_url}/billing/success?session_id={{CHECKOUT_SESSION_ID}}");
        let cancel_url = format!("{app_base_url}/features/{key}");
        let user_id = user.id.to_string();
        let amount = key.price_cents().to_string();

        let params: Vec<(&str, &str)> = vec![
            ("mode", "payment"),
            ("line_items[0][price_data][currency]", "usd"),
            (
                "line_items[0][price_data][product_data][name]",
                key.display_name(),
            ),
            ("line_items[0][price_data][unit_amount]", &amount),
            ("line_items[0][quantity]", "1"),
            ("customer_email", &user.email),
            ("client_reference_id", &user_id),
            ("metadata[user_id]", &user_id),
            ("metadata[feature_key]", key.as_str()),
            ("success_url", &success_url),
            ("cancel_url", &cancel_url),
        ];

        self.post_form("/checkout/sessions", &params).await
    }

    /// Re-reads a checkout session after the client returns from the payment
    /// redirect.
    pub async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSessionDetails, AppError> {
        let response = self
            .http
            .get(format!("{STRIPE_API_URL}/checkout/sessions/{session_id}"))
            .basic_auth(&self.config.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("stripe request failed: {e}")))?;

        Self::decode(response).await
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, AppError> {
        debug!(path, "Calling Stripe API");
        let response = self
            .http
            .post(format!("{STRIPE_API_URL}{path}"))
            .basic_auth(&self.config.secret_key, None::<&str>)
            .form(params)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("stripe request failed: {e}")))?;

        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Provider internals stay in the logs; callers get a generic error.
            tracing::error!(%status, body, "Stripe API error");
            return Err(AppError::Upstream(format!("stripe returned {status}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Upstream(format!("stripe response decode failed: {e}")))
    }
}
