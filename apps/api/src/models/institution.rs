use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Institution {
    pub id: Uuid,
    pub name: String,
    pub contact_email: String,
    pub primary_domain: String,
    pub additional_domains: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseType {
    PerStudent,
    Site,
}

impl LicenseType {
    pub fn parse(s: &str) -> Self {
        match s {
            "site" => Self::Site,
            _ => Self::PerStudent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerStudent => "per_student",
            Self::Site => "site",
        }
    }
}

/// A license window for an institution. `licensed_seats` is NULL for site
/// licenses (unlimited). At most one license per institution is active.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct License {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub license_type: String,
    pub licensed_seats: Option<i32>,
    pub used_seats: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl License {
    pub fn license_type(&self) -> LicenseType {
        LicenseType::parse(&self.license_type)
    }

    /// True when the license is active and `now` falls inside its window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_date <= now && now < self.end_date
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Invitation {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub email: String,
    pub role: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    /// Pending and not yet past its expiry.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == "pending" && now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn license(active: bool, start_offset_days: i64, end_offset_days: i64) -> License {
        let now = Utc::now();
        License {
            id: Uuid::new_v4(),
            institution_id: Uuid::new_v4(),
            license_type: "per_student".into(),
            licensed_seats: Some(50),
            used_seats: 0,
            start_date: now + Duration::days(start_offset_days),
            end_date: now + Duration::days(end_offset_days),
            is_active: active,
            created_at: now,
        }
    }

    #[test]
    fn license_valid_inside_window() {
        assert!(license(true, -10, 10).is_valid_at(Utc::now()));
    }

    #[test]
    fn license_invalid_when_expired_or_inactive_or_future() {
        let now = Utc::now();
        assert!(!license(true, -20, -1).is_valid_at(now));
        assert!(!license(false, -10, 10).is_valid_at(now));
        assert!(!license(true, 1, 30).is_valid_at(now));
    }

    #[test]
    fn invitation_claimable_only_while_pending() {
        let now = Utc::now();
        let mut inv = Invitation {
            id: Uuid::new_v4(),
            institution_id: Uuid::new_v4(),
            email: "x@example.edu".into(),
            role: "student".into(),
            token: "tok".into(),
            status: "pending".into(),
            expires_at: now + Duration::days(7),
            created_at: now,
        };
        assert!(inv.is_claimable(now));
        inv.status = "claimed".into();
        assert!(!inv.is_claimable(now));
        inv.status = "pending".into();
        inv.expires_at = now - Duration::minutes(1);
        assert!(!inv.is_claimable(now));
    }
}
