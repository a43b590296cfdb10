//! Entitlement resolution.
//!
//! `resolve_access` is the single place that decides whether a user may use a
//! gated feature. Route handlers and the request gate call it instead of
//! re-deriving tier/role checks locally. It is a pure function over a
//! snapshot of the caller's persisted state, so the same inputs always yield
//! the same decision.

pub mod handlers;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::feature::{FeatureKey, FEATURE_CATALOG};
use crate::models::institution::License;
use crate::models::user::{SubscriptionStatus, SubscriptionTier, User};

/// Why access was granted or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    Subscription,
    Purchase,
    AccountInactive,
    LicenseExpired,
    NoEntitlement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub granted: bool,
    pub reason: AccessReason,
}

impl AccessDecision {
    fn grant(reason: AccessReason) -> Self {
        Self {
            granted: true,
            reason,
        }
    }

    fn deny(reason: AccessReason) -> Self {
        Self {
            granted: false,
            reason,
        }
    }
}

/// Institution license state as seen by the resolver. `None` when the user
/// has no institution; membership of an institution with an invalid license
/// denies access regardless of personal tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseState {
    NotInstitutional,
    Valid,
    Invalid,
}

/// Snapshot of everything the resolver needs, loaded in one place so the
/// decision itself stays pure and unit-testable.
#[derive(Debug, Clone)]
pub struct EntitlementContext {
    pub is_verified: bool,
    pub is_active: bool,
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    pub license: LicenseState,
    pub purchased: HashSet<FeatureKey>,
}

impl EntitlementContext {
    /// Active personal subscription, or implicit institutional membership
    /// through a currently-valid institution license.
    pub fn has_active_subscription(&self) -> bool {
        (self.tier.is_paid() && self.status == SubscriptionStatus::Active)
            || self.license == LicenseState::Valid
    }

    /// Account-level denial that applies before any feature is considered.
    /// The request gate uses this for its 401 checks.
    pub fn account_denial(&self) -> Option<AccessReason> {
        if !self.is_verified || !self.is_active {
            return Some(AccessReason::AccountInactive);
        }
        if self.license == LicenseState::Invalid {
            return Some(AccessReason::LicenseExpired);
        }
        None
    }
}

/// The access decision, checked in order: account state, institution license,
/// subscription, one-off purchase, denial.
pub fn resolve_access(ctx: &EntitlementContext, key: FeatureKey) -> AccessDecision {
    if let Some(reason) = ctx.account_denial() {
        return AccessDecision::deny(reason);
    }
    if ctx.has_active_subscription() {
        return AccessDecision::grant(AccessReason::Subscription);
    }
    if ctx.purchased.contains(&key) {
        return AccessDecision::grant(AccessReason::Purchase);
    }
    AccessDecision::deny(AccessReason::NoEntitlement)
}

/// Entitlement snapshot returned by `GET /api/user/feature-access`.
#[derive(Debug, Serialize)]
pub struct EntitlementSnapshot {
    pub subscription_tier: SubscriptionTier,
    pub has_active_subscription: bool,
    pub purchased_features: Vec<FeatureKey>,
    pub feature_access: serde_json::Map<String, serde_json::Value>,
}

pub fn build_snapshot(ctx: &EntitlementContext) -> EntitlementSnapshot {
    let mut feature_access = serde_json::Map::new();
    for key in FEATURE_CATALOG {
        let decision = resolve_access(ctx, key);
        feature_access.insert(key.as_str().to_string(), decision.granted.into());
    }

    let mut purchased: Vec<FeatureKey> = ctx.purchased.iter().copied().collect();
    purchased.sort_by_key(|k| k.as_str());

    EntitlementSnapshot {
        subscription_tier: ctx.tier,
        has_active_subscription: ctx.has_active_subscription(),
        purchased_features: purchased,
        feature_access,
    }
}

/// Loads the resolver's inputs for a user: current institution license (if
/// any) and the purchased-feature set.
pub async fn load_context(db: &PgPool, user: &User) -> Result<EntitlementContext, AppError> {
    let license = match user.institution_id {
        Some(institution_id) => license_state(db, institution_id, Utc::now()).await?,
        None => LicenseState::NotInstitutional,
    };

    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT feature_key FROM purchased_features WHERE user_id = $1")
            .bind(user.id)
            .fetch_all(db)
            .await?;

    // Rows predating a catalog change are skipped rather than treated as errors.
    let purchased = rows
        .iter()
        .filter_map(|(key,)| key.parse::<FeatureKey>().ok())
        .collect();

    Ok(EntitlementContext {
        is_verified: user.is_verified,
        is_active: user.is_active,
        tier: user.tier(),
        status: user.status(),
        license,
        purchased,
    })
}

/// Account-level checks shared by the request gate: verified, active, and
/// (for institutional members) a currently-valid license.
pub async fn account_gate(db: &PgPool, user: &User) -> Result<(), AppError> {
    if !user.is_verified {
        return Err(AppError::AccountInactive(
            "Please verify your email address to continue".to_string(),
        ));
    }
    if !user.is_active {
        return Err(AppError::AccountInactive(
            "This account has been deactivated".to_string(),
        ));
    }
    if let Some(institution_id) = user.institution_id {
        if license_state(db, institution_id, Utc::now()).await? != LicenseState::Valid {
            return Err(AppError::LicenseExpired);
        }
    }
    Ok(())
}

/// Feature gate for paid routes: resolves access and maps denial to the
/// paywall error carrying `requires_upgrade`.
pub async fn require_feature(db: &PgPool, user: &User, key: FeatureKey) -> Result<(), AppError> {
    let ctx = load_context(db, user).await?;
    let decision = resolve_access(&ctx, key);
    if decision.granted {
        return Ok(());
    }
    match decision.reason {
        AccessReason::AccountInactive => Err(AppError::AccountInactive(
            "This account is not active".to_string(),
        )),
        AccessReason::LicenseExpired => Err(AppError::LicenseExpired),
        _ => Err(AppError::UpgradeRequired(format!(
            "{} requires a subscription or a one-time purchase",
            key.display_name()
        ))),
    }
}

async fn license_state(
    db: &PgPool,
    institution_id: Uuid,
    now: DateTime<Utc>,
) -> Result<LicenseState, AppError> {
    let license: Option<License> = sqlx::query_as(
        "SELECT * FROM licenses WHERE institution_id = $1 AND is_active \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(institution_id)
    .fetch_optional(db)
    .await?;

    Ok(match license {
        Some(l) if l.is_valid_at(now) => LicenseState::Valid,
        _ => LicenseState::Invalid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(tier: SubscriptionTier, status: SubscriptionStatus) -> EntitlementContext {
        EntitlementContext {
            is_verified: true,
            is_active: true,
            tier,
            status,
            license: LicenseState::NotInstitutional,
            purchased: HashSet::new(),
        }
    }

    #[test]
    fn active_paid_subscription_grants_entire_catalog() {
        let ctx = ctx(SubscriptionTier::Paid, SubscriptionStatus::Active);
        for key in FEATURE_CATALOG {
            let decision = resolve_access(&ctx, key);
            assert!(decision.granted, "expected grant for {key}");
            assert_eq!(decision.reason, AccessReason::Subscription);
        }
    }

    #[test]
    fn free_user_access_equals_purchase_set() {
        let mut ctx = ctx(SubscriptionTier::Free, SubscriptionStatus::Active);
        ctx.purchased.insert(FeatureKey::ResumeAnalysis);
        for key in FEATURE_CATALOG {
            let decision = resolve_access(&ctx, key);
            assert_eq!(decision.granted, ctx.purchased.contains(&key));
        }
        assert_eq!(
            resolve_access(&ctx, FeatureKey::ResumeAnalysis).reason,
            AccessReason::Purchase
        );
        assert_eq!(
            resolve_access(&ctx, FeatureKey::SalaryNegotiator).reason,
            AccessReason::NoEntitlement
        );
    }

    #[test]
    fn expired_institution_license_denies_even_paid_members() {
        let mut ctx = ctx(SubscriptionTier::Paid, SubscriptionStatus::Active);
        ctx.license = LicenseState::Invalid;
        ctx.purchased.insert(FeatureKey::ResumeAnalysis);
        for key in FEATURE_CATALOG {
            let decision = resolve_access(&ctx, key);
            assert!(!decision.granted);
            assert_eq!(decision.reason, AccessReason::LicenseExpired);
        }
    }

    #[test]
    fn valid_license_grants_without_personal_tier() {
        let mut ctx = ctx(SubscriptionTier::Free, SubscriptionStatus::Active);
        ctx.license = LicenseState::Valid;
        let decision = resolve_access(&ctx, FeatureKey::JobMatching);
        assert!(decision.granted);
        assert_eq!(decision.reason, AccessReason::Subscription);
    }

    #[test]
    fn inactive_account_denied_before_anything_else() {
        let mut ctx = ctx(SubscriptionTier::Paid, SubscriptionStatus::Active);
        ctx.is_active = false;
        let decision = resolve_access(&ctx, FeatureKey::CareerRoadmap);
        assert!(!decision.granted);
        assert_eq!(decision.reason, AccessReason::AccountInactive);

        let mut ctx = ctx_unverified();
        ctx.license = LicenseState::Invalid;
        // Account state wins over the license check.
        assert_eq!(
            resolve_access(&ctx, FeatureKey::CareerRoadmap).reason,
            AccessReason::AccountInactive
        );
    }

    fn ctx_unverified() -> EntitlementContext {
        let mut c = ctx(SubscriptionTier::Free, SubscriptionStatus::Active);
        c.is_verified = false;
        c
    }

    #[test]
    fn canceled_subscription_has_no_grace_period() {
        // Cancellation is an immediate downgrade; a canceled status never
        // grants, even while the paid period would still be running.
        let ctx = ctx(SubscriptionTier::Paid, SubscriptionStatus::Canceled);
        let decision = resolve_access(&ctx, FeatureKey::InterviewPrep);
        assert!(!decision.granted);
        assert_eq!(decision.reason, AccessReason::NoEntitlement);
    }

    #[test]
    fn snapshot_reflects_decisions_per_key() {
        let mut c = ctx(SubscriptionTier::Free, SubscriptionStatus::Active);
        c.purchased.insert(FeatureKey::ResumeAnalysis);
        let snapshot = build_snapshot(&c);
        assert!(!snapshot.has_active_subscription);
        assert_eq!(snapshot.purchased_features, vec![FeatureKey::ResumeAnalysis]);
        assert_eq!(
            snapshot.feature_access.get("resume_analysis"),
            Some(&serde_json::Value::Bool(true))
        );
        assert_eq!(
            snapshot.feature_access.get("career_roadmap"),
            Some(&serde_json::Value::Bool(false))
        );
        assert_eq!(snapshot.feature_access.len(), FEATURE_CATALOG.len());
    }

    #[test]
    fn resolver_is_deterministic() {
        let c = ctx(SubscriptionTier::Paid, SubscriptionStatus::Active);
        let first = resolve_access(&c, FeatureKey::MicroProjects);
        for _ in 0..10 {
            assert_eq!(resolve_access(&c, FeatureKey::MicroProjects), first);
        }
    }
}
