//! Webhook event parsing, signature verification, and the subscription
//! ledger transitions they drive.
//!
//! Transitions are expressed twice on purpose: once as a pure function over
//! `SubscriptionLedger` (unit-testable, documents idempotence) and once as
//! SQL against the users/purchased_features tables, applied all-or-nothing
//! inside a transaction by `apply_event`.

use std::collections::HashSet;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::feature::FeatureKey;
use crate::models::user::{SubscriptionStatus, SubscriptionTier};

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock skew between the provider's signature timestamp and ours.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutMode {
    Subscription,
    Payment,
}

/// Provider lifecycle events this service reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    CheckoutCompleted {
        session_id: String,
        mode: CheckoutMode,
        paid: bool,
        customer_id: Option<String>,
        subscription_id: Option<String>,
        user_id: Option<Uuid>,
        feature_key: Option<String>,
    },
    SubscriptionUpdated {
        subscription_id: String,
        customer_id: String,
        status: SubscriptionStatus,
    },
    SubscriptionDeleted {
        subscription_id: String,
        customer_id: String,
    },
    InvoicePaymentFailed {
        customer_id: String,
        attempt_count: i64,
    },
    Unknown {
        event_type: String,
    },
}

/// Verifies a `Stripe-Signature` header (`t=...,v1=...`) against the raw
/// payload: HMAC-SHA256 over `"{t}.{payload}"`, constant-time compare,
/// bounded timestamp skew.
pub fn verify_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<(), AppError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::Validation("Malformed webhook signature header".to_string()))?;
    if candidates.is_empty() {
        return Err(AppError::Validation(
            "Webhook signature header has no v1 entry".to_string(),
        ));
    }
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::Validation(
            "Webhook signature timestamp outside tolerance".to_string(),
        ));
    }

    let signed_payload = format!("{timestamp}.{payload}");
    for candidate in candidates {
        let Ok(candidate_bytes) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid webhook secret: {e}"))?;
        mac.update(signed_payload.as_bytes());
        if mac.verify_slice(&candidate_bytes).is_ok() {
            return Ok(());
        }
    }

    Err(AppError::Validation(
        "Webhook signature verification failed".to_string(),
    ))
}

/// Computes a valid signature header for a payload. Test helper.
#[cfg(test)]
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Parses a raw webhook payload into a `WebhookEvent`. Unknown event types
/// parse successfully so they can be acknowledged without side effects.
pub fn parse_event(payload: &str) -> Result<WebhookEvent, AppError> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {e}")))?;

    let event_type = value["type"]
        .as_str()
        .ok_or_else(|| AppError::Validation("Webhook payload missing event type".to_string()))?;
    let object = &value["data"]["object"];

    let event = match event_type {
        "checkout.session.completed" => {
            let mode = match object["mode"].as_str().unwrap_or("subscription") {
                "payment" => CheckoutMode::Payment,
                _ => CheckoutMode::Subscription,
            };
            WebhookEvent::CheckoutCompleted {
                session_id: object["id"].as_str().unwrap_or("").to_string(),
                mode,
                paid: object["payment_status"].as_str() == Some("paid"),
                customer_id: object["customer"].as_str().map(str::to_string),
                subscription_id: object["subscription"].as_str().map(str::to_string),
                user_id: object["metadata"]["user_id"]
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok()),
                feature_key: object["metadata"]["feature_key"]
                    .as_str()
                    .map(str::to_string),
            }
        }
        "customer.subscription.updated" => WebhookEvent::SubscriptionUpdated {
            subscription_id: object["id"].as_str().unwrap_or("").to_string(),
            customer_id: object["customer"].as_str().unwrap_or("").to_string(),
            status: SubscriptionStatus::parse(object["status"].as_str().unwrap_or("")),
        },
        "customer.subscription.deleted" => WebhookEvent::SubscriptionDeleted {
            subscription_id: object["id"].as_str().unwrap_or("").to_string(),
            customer_id: object["customer"].as_str().unwrap_or("").to_string(),
        },
        "invoice.payment_failed" => WebhookEvent::InvoicePaymentFailed {
            customer_id: object["customer"].as_str().unwrap_or("").to_string(),
            attempt_count: object["attempt_count"].as_i64().unwrap_or(0),
        },
        other => WebhookEvent::Unknown {
            event_type: other.to_string(),
        },
    };

    Ok(event)
}

/// A user's billing-relevant state, as the pure transition layer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionLedger {
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub purchased: HashSet<FeatureKey>,
}

impl SubscriptionLedger {
    pub fn free() -> Self {
        Self {
            tier: SubscriptionTier::Free,
            status: SubscriptionStatus::Active,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            purchased: HashSet::new(),
        }
    }
}

/// Applies one event to the ledger. Every arm sets absolute state keyed by
/// provider identifiers, which is what makes re-delivery harmless.
pub fn transition(mut ledger: SubscriptionLedger, event: &WebhookEvent) -> SubscriptionLedger {
    match event {
        WebhookEvent::CheckoutCompleted {
            mode: CheckoutMode::Subscription,
            paid: true,
            customer_id,
            subscription_id,
            ..
        } => {
            ledger.tier = SubscriptionTier::Paid;
            ledger.status = SubscriptionStatus::Active;
            ledger.stripe_customer_id = customer_id.clone();
            ledger.stripe_subscription_id = subscription_id.clone();
        }
        WebhookEvent::CheckoutCompleted {
            mode: CheckoutMode::Payment,
            paid: true,
            feature_key: Some(key),
            ..
        } => {
            if let Ok(key) = key.parse::<FeatureKey>() {
                ledger.purchased.insert(key);
            }
        }
        WebhookEvent::CheckoutCompleted { .. } => {}
        WebhookEvent::SubscriptionUpdated { status, .. } => match status {
            SubscriptionStatus::Active => {
                ledger.tier = SubscriptionTier::Paid;
                ledger.status = SubscriptionStatus::Active;
            }
            SubscriptionStatus::PastDue => {
                ledger.status = SubscriptionStatus::PastDue;
            }
            SubscriptionStatus::Canceled | SubscriptionStatus::Incomplete => {
                // Immediate downgrade, no period-end grace. Product policy.
                ledger.tier = SubscriptionTier::Free;
                ledger.status = SubscriptionStatus::Canceled;
            }
        },
        WebhookEvent::SubscriptionDeleted { .. } => {
            ledger.tier = SubscriptionTier::Free;
            ledger.status = SubscriptionStatus::Canceled;
            ledger.stripe_subscription_id = None;
        }
        WebhookEvent::InvoicePaymentFailed { .. } => {
            ledger.status = SubscriptionStatus::PastDue;
        }
        WebhookEvent::Unknown { .. } => {}
    }
    ledger
}

/// Applies one event to the database, all-or-nothing. Failures propagate so
/// the webhook endpoint returns non-2xx and the provider retries.
pub async fn apply_event(db: &PgPool, event: &WebhookEvent) -> Result<(), AppError> {
    let mut tx = db.begin().await?;

    match event {
        WebhookEvent::CheckoutCompleted {
            session_id,
            mode: CheckoutMode::Subscription,
            paid: true,
            customer_id,
            subscription_id,
            user_id,
            ..
        } => {
            let Some(user_id) = user_id else {
                warn!(%session_id, "Checkout completed without user_id metadata");
                return Ok(());
            };
            sqlx::query(
                "UPDATE users SET subscription_tier = 'paid', subscription_status = 'active', \
                 stripe_customer_id = $2, stripe_subscription_id = $3 WHERE id = $1",
            )
            .bind(user_id)
            .bind(customer_id)
            .bind(subscription_id)
            .execute(&mut *tx)
            .await?;
            info!(%user_id, %session_id, "Subscription activated via checkout");
        }
        WebhookEvent::CheckoutCompleted {
            session_id,
            mode: CheckoutMode::Payment,
            paid: true,
            user_id,
            feature_key,
            ..
        } => {
            let (Some(user_id), Some(raw_key)) = (user_id, feature_key) else {
                warn!(%session_id, "Payment checkout missing user or feature metadata");
                return Ok(());
            };
            let Ok(key) = raw_key.parse::<FeatureKey>() else {
                warn!(%session_id, %raw_key, "Payment checkout names a key outside the catalog");
                return Ok(());
            };
            sqlx::query(
                "INSERT INTO purchased_features (user_id, feature_key, stripe_payment_id) \
                 VALUES ($1, $2, $3) ON CONFLICT (user_id, feature_key) DO NOTHING",
            )
            .bind(user_id)
            .bind(key.as_str())
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
            info!(%user_id, %key, "Feature purchase recorded");
        }
        WebhookEvent::CheckoutCompleted { session_id, .. } => {
            info!(%session_id, "Ignoring unpaid checkout session");
        }
        WebhookEvent::SubscriptionUpdated {
            subscription_id,
            status,
            ..
        } => {
            let (tier, status) = match status {
                SubscriptionStatus::Active => (SubscriptionTier::Paid, SubscriptionStatus::Active),
                SubscriptionStatus::PastDue => {
                    (SubscriptionTier::Paid, SubscriptionStatus::PastDue)
                }
                // Immediate downgrade, no period-end grace. Product policy.
                _ => (SubscriptionTier::Free, SubscriptionStatus::Canceled),
            };
            sqlx::query(
                "UPDATE users SET subscription_tier = $2, subscription_status = $3 \
                 WHERE stripe_subscription_id = $1",
            )
            .bind(subscription_id)
            .bind(tier.as_str())
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
            info!(%subscription_id, status = status.as_str(), "Subscription updated");
        }
        WebhookEvent::SubscriptionDeleted {
            subscription_id, ..
        } => {
            sqlx::query(
                "UPDATE users SET subscription_tier = 'free', subscription_status = 'canceled', \
                 stripe_subscription_id = NULL WHERE stripe_subscription_id = $1",
            )
            .bind(subscription_id)
            .execute(&mut *tx)
            .await?;
            info!(%subscription_id, "Subscription deleted, user downgraded to free");
        }
        WebhookEvent::InvoicePaymentFailed {
            customer_id,
            attempt_count,
        } => {
            sqlx::query(
                "UPDATE users SET subscription_status = 'past_due' WHERE stripe_customer_id = $1",
            )
            .bind(customer_id)
            .execute(&mut *tx)
            .await?;
            warn!(%customer_id, attempt_count, "Invoice payment failed");
        }
        WebhookEvent::Unknown { event_type } => {
            info!(%event_type, "Unhandled webhook event type");
        }
    }

    tx.commit().await?;
    Ok(())
}

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn checkout_payload(mode: &str, extra_metadata: &str) -> String {
        format!(
            r#"{{
                "type": "checkout.session.completed",
                "data": {{"object": {{
                    "id": "cs_123",
                    "mode": "{mode}",
                    "payment_status": "paid",
                    "customer": "cus_456",
                    "subscription": "sub_789",
                    "metadata": {{"user_id": "8a2e9c1f-43a7-4f3e-9d2b-1c5e7a9b0d34"{extra_metadata}}}
                }}}}
            }}"#
        )
    }

    #[test]
    fn parse_subscription_checkout() {
        let event = parse_event(&checkout_payload("subscription", "")).unwrap();
        match event {
            WebhookEvent::CheckoutCompleted {
                session_id,
                mode,
                paid,
                customer_id,
                subscription_id,
                user_id,
                feature_key,
            } => {
                assert_eq!(session_id, "cs_123");
                assert_eq!(mode, CheckoutMode::Subscription);
                assert!(paid);
                assert_eq!(customer_id.as_deref(), Some("cus_456"));
                assert_eq!(subscription_id.as_deref(), Some("sub_789"));
                assert!(user_id.is_some());
                assert_eq!(feature_key, None);
            }
            other => panic!("Expected CheckoutCompleted, got {other:?}"),
        }
    }

    #[test]
    fn parse_payment_checkout_carries_feature_key() {
        let payload = checkout_payload("payment", r#", "feature_key": "resume_analysis""#);
        match parse_event(&payload).unwrap() {
            WebhookEvent::CheckoutCompleted {
                mode, feature_key, ..
            } => {
                assert_eq!(mode, CheckoutMode::Payment);
                assert_eq!(feature_key.as_deref(), Some("resume_analysis"));
            }
            other => panic!("Expected CheckoutCompleted, got {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_event_is_acknowledged_not_errored() {
        let event = parse_event(r#"{"type": "charge.refunded", "data": {"object": {}}}"#).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Unknown {
                event_type: "charge.refunded".to_string()
            }
        );
    }

    #[test]
    fn parse_garbage_payload_is_a_validation_error() {
        assert!(matches!(
            parse_event("not json"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            parse_event(r#"{"data": {}}"#),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn signature_roundtrip_verifies() {
        let payload = r#"{"type":"x"}"#;
        let now = 1_700_000_000;
        let header = sign_payload(payload, SECRET, now);
        assert!(verify_signature(payload, &header, SECRET, now).is_ok());
    }

    #[test]
    fn signature_rejects_tampered_payload_and_wrong_secret() {
        let payload = r#"{"type":"x"}"#;
        let now = 1_700_000_000;
        let header = sign_payload(payload, SECRET, now);
        assert!(verify_signature(r#"{"type":"y"}"#, &header, SECRET, now).is_err());
        assert!(verify_signature(payload, &header, "whsec_other", now).is_err());
    }

    #[test]
    fn signature_rejects_stale_timestamp() {
        let payload = "{}";
        let signed_at = 1_700_000_000;
        let header = sign_payload(payload, SECRET, signed_at);
        assert!(verify_signature(payload, &header, SECRET, signed_at + 301).is_err());
        assert!(verify_signature(payload, &header, SECRET, signed_at + 299).is_ok());
    }

    #[test]
    fn signature_rejects_missing_parts() {
        assert!(verify_signature("{}", "v1=deadbeef", SECRET, 0).is_err());
        assert!(verify_signature("{}", "t=0", SECRET, 0).is_err());
    }

    fn subscribed_ledger() -> SubscriptionLedger {
        transition(
            SubscriptionLedger::free(),
            &WebhookEvent::CheckoutCompleted {
                session_id: "cs_1".into(),
                mode: CheckoutMode::Subscription,
                paid: true,
                customer_id: Some("cus_1".into()),
                subscription_id: Some("sub_1".into()),
                user_id: None,
                feature_key: None,
            },
        )
    }

    #[test]
    fn checkout_activates_subscription() {
        let ledger = subscribed_ledger();
        assert_eq!(ledger.tier, SubscriptionTier::Paid);
        assert_eq!(ledger.status, SubscriptionStatus::Active);
        assert_eq!(ledger.stripe_subscription_id.as_deref(), Some("sub_1"));
    }

    #[test]
    fn applying_the_same_event_twice_is_idempotent() {
        let event = WebhookEvent::CheckoutCompleted {
            session_id: "cs_1".into(),
            mode: CheckoutMode::Subscription,
            paid: true,
            customer_id: Some("cus_1".into()),
            subscription_id: Some("sub_1".into()),
            user_id: None,
            feature_key: None,
        };
        let once = transition(SubscriptionLedger::free(), &event);
        let twice = transition(once.clone(), &event);
        assert_eq!(once, twice);

        let delete = WebhookEvent::SubscriptionDeleted {
            subscription_id: "sub_1".into(),
            customer_id: "cus_1".into(),
        };
        let once = transition(twice, &delete);
        let twice = transition(once.clone(), &delete);
        assert_eq!(once, twice);
    }

    #[test]
    fn deletion_downgrades_immediately_but_purchases_persist() {
        let mut ledger = subscribed_ledger();
        ledger = transition(
            ledger,
            &WebhookEvent::CheckoutCompleted {
                session_id: "cs_2".into(),
                mode: CheckoutMode::Payment,
                paid: true,
                customer_id: None,
                subscription_id: None,
                user_id: None,
                feature_key: Some("resume_analysis".into()),
            },
        );
        ledger = transition(
            ledger,
            &WebhookEvent::SubscriptionDeleted {
                subscription_id: "sub_1".into(),
                customer_id: "cus_1".into(),
            },
        );

        // No grace period: the downgrade is visible the moment the event lands.
        assert_eq!(ledger.tier, SubscriptionTier::Free);
        assert_eq!(ledger.status, SubscriptionStatus::Canceled);
        assert!(ledger.purchased.contains(&FeatureKey::ResumeAnalysis));
    }

    #[test]
    fn unpaid_checkout_changes_nothing() {
        let event = WebhookEvent::CheckoutCompleted {
            session_id: "cs_3".into(),
            mode: CheckoutMode::Subscription,
            paid: false,
            customer_id: Some("cus_9".into()),
            subscription_id: Some("sub_9".into()),
            user_id: None,
            feature_key: None,
        };
        assert_eq!(
            transition(SubscriptionLedger::free(), &event),
            SubscriptionLedger::free()
        );
    }

    #[test]
    fn payment_failure_marks_past_due_without_downgrade() {
        let ledger = transition(
            subscribed_ledger(),
            &WebhookEvent::InvoicePaymentFailed {
                customer_id: "cus_1".into(),
                attempt_count: 2,
            },
        );
        assert_eq!(ledger.tier, SubscriptionTier::Paid);
        assert_eq!(ledger.status, SubscriptionStatus::PastDue);
    }
}
