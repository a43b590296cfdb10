use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::gate::AuthUser;
use crate::errors::AppError;
use crate::institutions;
use crate::models::institution::{Institution, LicenseType};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateInstitutionRequest {
    pub name: String,
    pub contact_email: String,
    pub primary_domain: String,
    #[serde(default)]
    pub additional_domains: Vec<String>,
}

/// POST /api/institutions
pub async fn handle_create_institution(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateInstitutionRequest>,
) -> Result<Json<Institution>, AppError> {
    auth.require_super_admin()?;
    if req.name.trim().is_empty() || req.primary_domain.trim().is_empty() {
        return Err(AppError::Validation(
            "Institution name and primary domain are required".to_string(),
        ));
    }

    let institution: Institution = sqlx::query_as(
        "INSERT INTO institutions (name, contact_email, primary_domain, additional_domains) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(req.name.trim())
    .bind(req.contact_email.to_lowercase())
    .bind(req.primary_domain.to_lowercase())
    .bind(&req.additional_domains)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(institution))
}

#[derive(Deserialize)]
pub struct CreateLicenseRequest {
    pub license_type: String,
    pub licensed_seats: Option<i32>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// POST /api/institutions/:id/licenses
pub async fn handle_create_license(
    State(state): State<AppState>,
    Path(institution_id): Path<Uuid>,
    auth: AuthUser,
    Json(req): Json<CreateLicenseRequest>,
) -> Result<Json<Value>, AppError> {
    auth.require_super_admin()?;

    let license_type = match req.license_type.as_str() {
        "per_student" => LicenseType::PerStudent,
        "site" => LicenseType::Site,
        other => {
            return Err(AppError::Validation(format!(
                "Unknown license type '{other}'"
            )))
        }
    };

    let license = institutions::create_license(
        &state.db,
        institution_id,
        license_type,
        req.licensed_seats,
        req.start_date,
        req.end_date,
    )
    .await?;

    Ok(Json(json!({ "license": license })))
}

/// GET /api/institutions/:id/seats
pub async fn handle_seat_availability(
    State(state): State<AppState>,
    Path(institution_id): Path<Uuid>,
    auth: AuthUser,
) -> Result<Json<institutions::SeatAvailability>, AppError> {
    auth.require_institution_admin(institution_id)?;
    let availability = institutions::check_seat_availability(&state.db, institution_id).await?;
    Ok(Json(availability))
}

#[derive(Deserialize)]
pub struct InviteRequest {
    pub email: String,
    #[serde(default = "default_invite_role")]
    pub role: String,
}

fn default_invite_role() -> String {
    "student".to_string()
}

/// POST /api/institutions/:id/invite
pub async fn handle_invite(
    State(state): State<AppState>,
    Path(institution_id): Path<Uuid>,
    auth: AuthUser,
    Json(req): Json<InviteRequest>,
) -> Result<Json<Value>, AppError> {
    auth.require_institution_admin(institution_id)?;

    if !req.email.contains('@') {
        return Err(AppError::Validation(
            "A valid email address is required".to_string(),
        ));
    }
    if !matches!(req.role.as_str(), "student" | "institution_admin") {
        return Err(AppError::Validation(format!(
            "Cannot invite with role '{}'",
            req.role
        )));
    }

    let invitation =
        institutions::create_invitation(&state, institution_id, &req.email, &req.role).await?;

    Ok(Json(json!({ "invitation": invitation })))
}
