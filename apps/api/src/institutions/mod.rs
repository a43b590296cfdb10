//! Institution licensing and the seat ledger.
//!
//! Seat claims go through a single conditional UPDATE so two concurrent
//! registrations can never both take the last seat; availability reads are
//! advisory only.

pub mod handlers;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::institution::{Institution, Invitation, License, LicenseType};
use crate::state::AppState;

const INVITATION_TTL_DAYS: i64 = 7;

/// Fraction of capacity (percent) past which institution admins get notified.
const SEAT_ALERT_PERCENT: i32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatAvailability {
    pub available: bool,
    pub used_seats: i32,
    /// `None` for site licenses (unlimited).
    pub total_seats: Option<i32>,
}

/// Pure seat math: site licenses are always available; per-student licenses
/// are available while used < capacity.
pub fn seat_availability(
    license_type: LicenseType,
    used_seats: i32,
    licensed_seats: Option<i32>,
) -> SeatAvailability {
    match (license_type, licensed_seats) {
        (LicenseType::Site, _) => SeatAvailability {
            available: true,
            used_seats,
            total_seats: None,
        },
        (LicenseType::PerStudent, Some(total)) => SeatAvailability {
            available: used_seats < total,
            used_seats,
            total_seats: Some(total),
        },
        // A per-student license without a capacity is a data error; treat it
        // as full rather than unlimited.
        (LicenseType::PerStudent, None) => SeatAvailability {
            available: false,
            used_seats,
            total_seats: Some(0),
        },
    }
}

/// True when this claim moved usage from below the alert line to at/above it.
pub fn crossed_alert_threshold(previous_used: i32, new_used: i32, capacity: Option<i32>) -> bool {
    let Some(capacity) = capacity else {
        return false;
    };
    if capacity <= 0 {
        return false;
    }
    let at_or_above = |used: i32| used * 100 >= capacity * SEAT_ALERT_PERCENT;
    !at_or_above(previous_used) && at_or_above(new_used)
}

pub async fn active_license(
    db: &PgPool,
    institution_id: Uuid,
) -> Result<Option<License>, AppError> {
    let license: Option<License> = sqlx::query_as(
        "SELECT * FROM licenses WHERE institution_id = $1 AND is_active \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(institution_id)
    .fetch_optional(db)
    .await?;
    Ok(license)
}

pub async fn check_seat_availability(
    db: &PgPool,
    institution_id: Uuid,
) -> Result<SeatAvailability, AppError> {
    let license = active_license(db, institution_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No active license for this institution".to_string()))?;
    Ok(seat_availability(
        license.license_type(),
        license.used_seats,
        license.licensed_seats,
    ))
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ClaimedSeatRow {
    used_seats: i32,
    licensed_seats: Option<i32>,
    license_type: String,
}

pub struct ClaimedSeat {
    pub used_seats: i32,
    pub crossed_alert_threshold: bool,
}

/// Takes one seat on the institution's active, in-window license.
/// The capacity guard lives in the WHERE clause, so overselling is
/// impossible no matter how many registrations race.
pub async fn claim_seat(db: &PgPool, institution_id: Uuid) -> Result<ClaimedSeat, AppError> {
    let row: Option<ClaimedSeatRow> = sqlx::query_as(
        "UPDATE licenses SET used_seats = used_seats + 1 \
         WHERE institution_id = $1 AND is_active \
           AND start_date <= now() AND now() < end_date \
           AND (license_type = 'site' OR used_seats < licensed_seats) \
         RETURNING used_seats, licensed_seats, license_type",
    )
    .bind(institution_id)
    .fetch_optional(db)
    .await?;

    let row = row.ok_or(AppError::NoSeatsAvailable)?;
    let crossed = LicenseType::parse(&row.license_type) == LicenseType::PerStudent
        && crossed_alert_threshold(row.used_seats - 1, row.used_seats, row.licensed_seats);

    Ok(ClaimedSeat {
        used_seats: row.used_seats,
        crossed_alert_threshold: crossed,
    })
}

/// Frees a seat, e.g. when registration fails after the claim.
pub async fn release_seat(db: &PgPool, institution_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE licenses SET used_seats = used_seats - 1 \
         WHERE institution_id = $1 AND is_active AND used_seats > 0",
    )
    .bind(institution_id)
    .execute(db)
    .await?;
    Ok(())
}

/// Undoes a `claim_invitation` whose surrounding registration failed: gives
/// the seat back and reopens the invitation, so the invitee can retry with
/// the same token instead of needing a fresh invite. Both updates land in
/// one transaction.
pub async fn revert_invitation_claim(
    db: &PgPool,
    invitation: &Invitation,
) -> Result<(), AppError> {
    let mut tx = db.begin().await?;
    sqlx::query(
        "UPDATE licenses SET used_seats = used_seats - 1 \
         WHERE institution_id = $1 AND is_active AND used_seats > 0",
    )
    .bind(invitation.institution_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("UPDATE invitations SET status = 'pending' WHERE id = $1 AND status = 'claimed'")
        .bind(invitation.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Creates a license, deactivating any prior active license in the same
/// transaction. Only one license per institution may be active.
pub async fn create_license(
    db: &PgPool,
    institution_id: Uuid,
    license_type: LicenseType,
    licensed_seats: Option<i32>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
) -> Result<License, AppError> {
    if end_date <= start_date {
        return Err(AppError::Validation(
            "License end date must be after its start date".to_string(),
        ));
    }
    if license_type == LicenseType::PerStudent && licensed_seats.unwrap_or(0) <= 0 {
        return Err(AppError::Validation(
            "Per-student licenses require a positive seat count".to_string(),
        ));
    }

    let mut tx = db.begin().await?;
    sqlx::query("UPDATE licenses SET is_active = FALSE WHERE institution_id = $1 AND is_active")
        .bind(institution_id)
        .execute(&mut *tx)
        .await?;
    let license: License = sqlx::query_as(
        "INSERT INTO licenses (institution_id, license_type, licensed_seats, start_date, end_date) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(institution_id)
    .bind(license_type.as_str())
    .bind(if license_type == LicenseType::Site {
        None
    } else {
        licensed_seats
    })
    .bind(start_date)
    .bind(end_date)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(license)
}

/// Issues a seat-bound invitation and queues the invitation email.
pub async fn create_invitation(
    state: &AppState,
    institution_id: Uuid,
    email: &str,
    role: &str,
) -> Result<Invitation, AppError> {
    let availability = check_seat_availability(&state.db, institution_id).await?;
    if !availability.available {
        return Err(AppError::NoSeatsAvailable);
    }

    let institution: Institution = sqlx::query_as("SELECT * FROM institutions WHERE id = $1")
        .bind(institution_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Institution not found".to_string()))?;

    let token = crate::auth::session::generate_token();
    let expires_at = Utc::now() + Duration::days(INVITATION_TTL_DAYS);

    let invitation: Invitation = sqlx::query_as(
        "INSERT INTO invitations (institution_id, email, role, token, expires_at) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(institution_id)
    .bind(email.to_lowercase())
    .bind(role)
    .bind(&token)
    .bind(expires_at)
    .fetch_one(&state.db)
    .await?;

    if let Some(email_client) = &state.email {
        email_client.send_invitation_detached(
            invitation.email.clone(),
            institution.name.clone(),
            format!("{}/join?invite={}", state.config.app_base_url, token),
        );
    }

    Ok(invitation)
}

/// Claims an invitation during registration: validates it, takes a seat
/// atomically, and marks the invitation consumed. Returns the invitation so
/// the caller can bind the new user to the institution and role.
pub async fn claim_invitation(state: &AppState, token: &str) -> Result<Invitation, AppError> {
    let invitation: Invitation = sqlx::query_as("SELECT * FROM invitations WHERE token = $1")
        .bind(token)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::Validation("Invalid invitation token".to_string()))?;

    if !invitation.is_claimable(Utc::now()) {
        return Err(AppError::Validation(
            "This invitation has expired or was already used".to_string(),
        ));
    }

    let claimed = claim_seat(&state.db, invitation.institution_id).await?;

    // The pending guard makes a double claim a no-op on the second pass.
    let updated = sqlx::query(
        "UPDATE invitations SET status = 'claimed' WHERE id = $1 AND status = 'pending'",
    )
    .bind(invitation.id)
    .execute(&state.db)
    .await?;
    if updated.rows_affected() == 0 {
        release_seat(&state.db, invitation.institution_id).await?;
        return Err(AppError::Validation(
            "This invitation has expired or was already used".to_string(),
        ));
    }

    if claimed.crossed_alert_threshold {
        notify_seat_usage(state, invitation.institution_id, claimed.used_seats).await;
    }

    Ok(invitation)
}

/// Fire-and-forget usage alert to the institution's contact address.
/// Failure to send never fails the triggering request.
async fn notify_seat_usage(state: &AppState, institution_id: Uuid, used_seats: i32) {
    let Some(email_client) = &state.email else {
        return;
    };
    let institution: Result<Option<Institution>, _> =
        sqlx::query_as("SELECT * FROM institutions WHERE id = $1")
            .bind(institution_id)
            .fetch_optional(&state.db)
            .await;
    match institution {
        Ok(Some(institution)) => {
            email_client.send_seat_alert_detached(
                institution.contact_email.clone(),
                institution.name.clone(),
                used_seats,
            );
        }
        Ok(None) => {}
        Err(e) => warn!(%institution_id, "Could not load institution for seat alert: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_license_is_always_available() {
        let a = seat_availability(LicenseType::Site, 10_000, None);
        assert!(a.available);
        assert_eq!(a.total_seats, None);
    }

    #[test]
    fn per_student_availability_tracks_capacity() {
        assert!(seat_availability(LicenseType::PerStudent, 49, Some(50)).available);
        assert!(!seat_availability(LicenseType::PerStudent, 50, Some(50)).available);
        assert!(!seat_availability(LicenseType::PerStudent, 51, Some(50)).available);
    }

    #[test]
    fn per_student_without_capacity_is_full() {
        assert!(!seat_availability(LicenseType::PerStudent, 0, None).available);
    }

    #[test]
    fn alert_fires_exactly_once_at_the_threshold() {
        // 80% of 50 seats = 40.
        assert!(!crossed_alert_threshold(38, 39, Some(50)));
        assert!(crossed_alert_threshold(39, 40, Some(50)));
        assert!(!crossed_alert_threshold(40, 41, Some(50)));
    }

    #[test]
    fn alert_handles_small_and_unlimited_capacities() {
        // 80% of 4 seats is fractional; the 4th claim is the crossing one.
        assert!(!crossed_alert_threshold(1, 2, Some(4)));
        assert!(!crossed_alert_threshold(2, 3, Some(4)));
        assert!(crossed_alert_threshold(3, 4, Some(4)));
        assert!(!crossed_alert_threshold(0, 1, None));
        assert!(!crossed_alert_threshold(0, 1, Some(0)));
    }

    #[test]
    fn reopened_invitation_is_claimable_again() {
        // A failed registration reverts the claim by setting the status back
        // to 'pending'; the same token must then pass the claim check again
        // while still inside its expiry window.
        let now = Utc::now();
        let mut invitation = Invitation {
            id: Uuid::new_v4(),
            institution_id: Uuid::new_v4(),
            email: "invitee@example.edu".into(),
            role: "student".into(),
            token: "tok".into(),
            status: "claimed".into(),
            expires_at: now + Duration::days(6),
            created_at: now - Duration::days(1),
        };
        assert!(!invitation.is_claimable(now));

        invitation.status = "pending".into();
        assert!(invitation.is_claimable(now));
    }
}
