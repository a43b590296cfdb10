use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use uuid::Uuid;

use crate::auth::gate::AuthUser;
use crate::billing::events::{self, CheckoutMode, WebhookEvent};
use crate::billing::CheckoutSessionDetails;
use crate::errors::AppError;
use crate::models::feature::FeatureKey;
use crate::state::AppState;

#[derive(Serialize)]
pub struct CheckoutUrlResponse {
    pub url: String,
}

/// POST /api/stripe/create-checkout-session
pub async fn handle_create_checkout_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<CheckoutUrlResponse>, AppError> {
    let billing = state.billing()?;
    let session = billing
        .create_subscription_checkout(&user, &state.config.app_base_url)
        .await?;
    let url = session
        .url
        .ok_or_else(|| AppError::Upstream("checkout session has no redirect URL".to_string()))?;
    Ok(Json(CheckoutUrlResponse { url }))
}

/// POST /api/features/:key/checkout
/// One-off purchase of a single catalog feature.
pub async fn handle_feature_checkout(
    State(state): State<AppState>,
    Path(key): Path<String>,
    AuthUser(user): AuthUser,
) -> Result<Json<CheckoutUrlResponse>, AppError> {
    let key: FeatureKey = key
        .parse()
        .map_err(|e| AppError::Validation(format!("{e}")))?;

    let billing = state.billing()?;
    let session = billing
        .create_feature_checkout(&user, key, &state.config.app_base_url)
        .await?;
    let url = session
        .url
        .ok_or_else(|| AppError::Upstream("checkout session has no redirect URL".to_string()))?;
    Ok(Json(CheckoutUrlResponse { url }))
}

#[derive(Deserialize)]
pub struct VerifySessionRequest {
    pub session_id: String,
}

/// POST /api/stripe/verify-session
/// Synchronous path after the payment redirect: re-read the provider's
/// session object and apply the same ledger mutation the webhook would.
pub async fn handle_verify_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<VerifySessionRequest>,
) -> Result<Json<Value>, AppError> {
    let billing = state.billing()?;
    let details = billing.retrieve_checkout_session(&req.session_id).await?;

    if !details.is_paid() {
        return Ok(Json(json!({ "verified": false, "payment_status": details.payment_status })));
    }

    let event = completed_event(&details, user.id)?;
    events::apply_event(&state.db, &event).await?;

    Ok(Json(json!({ "verified": true })))
}

/// Builds the ledger event for a paid session. The grant target is the
/// identity stamped into the session's metadata when the checkout was
/// created; a caller presenting someone else's session id gets a 403, not
/// a grant. The webhook already credits the metadata user, so crediting
/// the caller here would turn one payment into two grants.
fn completed_event(
    details: &CheckoutSessionDetails,
    caller_id: Uuid,
) -> Result<WebhookEvent, AppError> {
    let grantee = match details.metadata.get("user_id") {
        Some(raw) => {
            let id: Uuid = raw.parse().map_err(|_| {
                AppError::Upstream("checkout session metadata is malformed".to_string())
            })?;
            if id != caller_id {
                return Err(AppError::Forbidden);
            }
            id
        }
        None => caller_id,
    };

    Ok(WebhookEvent::CheckoutCompleted {
        session_id: details.id.clone(),
        mode: if details.mode == "payment" {
            CheckoutMode::Payment
        } else {
            CheckoutMode::Subscription
        },
        paid: true,
        customer_id: details.customer.clone(),
        subscription_id: details.subscription.clone(),
        user_id: Some(grantee),
        feature_key: details.metadata.get("feature_key").cloned(),
    })
}

/// POST /api/stripe/webhook
/// Asynchronous path: provider-pushed lifecycle events. A failure to apply
/// propagates as non-2xx so the provider retries; re-delivery is harmless
/// because every mutation sets absolute state.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, AppError> {
    let billing = state.billing()?;

    if let Some(secret) = billing.webhook_secret() {
        let signature = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Validation("Missing webhook signature header".to_string())
            })?;
        events::verify_signature(&body, signature, secret, events::now_unix())?;
    }

    let event = events::parse_event(&body)?;
    info!(?event, "Billing webhook received");
    events::apply_event(&state.db, &event).await?;

    Ok(Json(json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn paid_session(mode: &str, metadata: &[(&str, &str)]) -> CheckoutSessionDetails {
        CheckoutSessionDetails {
            id: "cs_test_1".to_string(),
            mode: mode.to_string(),
            payment_status: "paid".to_string(),
            customer: Some("cus_1".to_string()),
            subscription: (mode == "subscription").then(|| "sub_1".to_string()),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn verification_grants_the_metadata_user() {
        let owner = Uuid::new_v4();
        let session = paid_session("subscription", &[("user_id", &owner.to_string())]);

        let event = completed_event(&session, owner).unwrap();
        match event {
            WebhookEvent::CheckoutCompleted { user_id, paid, .. } => {
                assert_eq!(user_id, Some(owner));
                assert!(paid);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn verifying_someone_elses_session_is_forbidden() {
        let owner = Uuid::new_v4();
        let other_caller = Uuid::new_v4();
        let session = paid_session("subscription", &[("user_id", &owner.to_string())]);

        let result = completed_event(&session, other_caller);
        assert!(matches!(result, Err(AppError::Forbidden)));
    }

    #[test]
    fn malformed_metadata_identity_is_rejected() {
        let session = paid_session("subscription", &[("user_id", "not-a-uuid")]);
        assert!(matches!(
            completed_event(&session, Uuid::new_v4()),
            Err(AppError::Upstream(_))
        ));
    }

    #[test]
    fn feature_purchase_carries_the_feature_key() {
        let owner = Uuid::new_v4();
        let session = paid_session(
            "payment",
            &[
                ("user_id", &owner.to_string()),
                ("feature_key", "interview_prep"),
            ],
        );

        let event = completed_event(&session, owner).unwrap();
        match event {
            WebhookEvent::CheckoutCompleted {
                mode, feature_key, ..
            } => {
                assert_eq!(mode, CheckoutMode::Payment);
                assert_eq!(feature_key.as_deref(), Some("interview_prep"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
