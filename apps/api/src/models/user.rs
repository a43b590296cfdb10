use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription tiers. Stored as TEXT; unknown values decode as `Free` so a
/// bad row can never grant paid access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    Paid,
    Institutional,
}

impl SubscriptionTier {
    pub fn parse(s: &str) -> Self {
        match s {
            "paid" => Self::Paid,
            "institutional" => Self::Institutional,
            _ => Self::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid => "paid",
            Self::Institutional => "institutional",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Paid | Self::Institutional)
    }
}

/// Provider-side subscription lifecycle states we track locally.
/// Unknown statuses decode as `Incomplete` to avoid granting access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Incomplete,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            _ => Self::Incomplete,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Incomplete => "incomplete",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Admin,
    InstitutionAdmin,
    SuperAdmin,
}

impl Role {
    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            "institution_admin" => Self::InstitutionAdmin,
            "super_admin" => Self::SuperAdmin,
            _ => Self::Student,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Admin => "admin",
            Self::InstitutionAdmin => "institution_admin",
            Self::SuperAdmin => "super_admin",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub subscription_tier: String,
    pub subscription_status: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub institution_id: Option<Uuid>,
    pub is_verified: bool,
    pub is_active: bool,
    pub last_active_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn tier(&self) -> SubscriptionTier {
        SubscriptionTier::parse(&self.subscription_tier)
    }

    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::parse(&self.subscription_status)
    }

    pub fn role(&self) -> Role {
        Role::parse(&self.role)
    }
}

/// User shape returned to clients. Never includes the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub subscription_tier: SubscriptionTier,
    pub subscription_status: SubscriptionStatus,
    pub institution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            role: u.role(),
            subscription_tier: u.tier(),
            subscription_status: u.status(),
            institution_id: u.institution_id,
            created_at: u.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tier_parses_as_free() {
        assert_eq!(SubscriptionTier::parse("platinum"), SubscriptionTier::Free);
        assert_eq!(SubscriptionTier::parse(""), SubscriptionTier::Free);
    }

    #[test]
    fn unknown_status_parses_as_incomplete() {
        assert_eq!(
            SubscriptionStatus::parse("trialing"),
            SubscriptionStatus::Incomplete
        );
    }

    #[test]
    fn tier_roundtrip() {
        for tier in [
            SubscriptionTier::Free,
            SubscriptionTier::Paid,
            SubscriptionTier::Institutional,
        ] {
            assert_eq!(SubscriptionTier::parse(tier.as_str()), tier);
        }
    }
}
