use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::gate::{token_from_headers, AuthUser};
use crate::auth::{password, session};
use crate::errors::AppError;
use crate::institutions;
use crate::models::user::{PublicUser, User};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub invitation_token: Option<String>,
    pub selected_plan: Option<String>,
}

/// POST /api/auth/register
/// Three outcomes: a plain free account with a session, an institutional
/// account claimed through an invitation, or a `checkout_url` when the
/// caller picked the paid plan at signup.
pub async fn handle_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Value>, AppError> {
    let email = req.email.trim().to_lowercase();
    validate_registration(&email, &req.password, &req.first_name, &req.last_name)?;

    let existing: Option<(uuid::Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(AppError::Validation(
            "An account with this email already exists".to_string(),
        ));
    }

    let password_hash = password::hash_password(&req.password)?;

    // Paid signups need the payment provider; refuse before any row exists
    // so a misconfigured deployment does not strand half-registered users.
    let wants_paid_plan = wants_paid_plan(&req);
    if wants_paid_plan {
        state.billing()?;
    }

    // Invitation path: claim the seat first so a full license rejects the
    // registration before any user row exists.
    let invitation = match &req.invitation_token {
        Some(token) => Some(institutions::claim_invitation(&state, token).await?),
        None => None,
    };

    let (tier, role, institution_id) = match &invitation {
        Some(inv) => ("institutional", inv.role.as_str(), Some(inv.institution_id)),
        None => ("free", "student", None),
    };

    let insert = sqlx::query_as::<_, User>(
        "INSERT INTO users \
         (email, password_hash, first_name, last_name, role, subscription_tier, institution_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(req.first_name.trim())
    .bind(req.last_name.trim())
    .bind(role)
    .bind(tier)
    .bind(institution_id)
    .fetch_one(&state.db)
    .await;

    let user = match insert {
        Ok(user) => user,
        Err(e) => {
            // Lost a race on the unique email index; give back the seat we
            // took and reopen the invitation so its token is not burned.
            if let Some(inv) = &invitation {
                institutions::revert_invitation_claim(&state.db, inv).await?;
            }
            if is_unique_violation(&e) {
                return Err(AppError::Validation(
                    "An account with this email already exists".to_string(),
                ));
            }
            return Err(e.into());
        }
    };

    info!(user_id = %user.id, institutional = invitation.is_some(), "User registered");

    // Paid-plan signups go straight to checkout instead of a session.
    if wants_paid_plan {
        let billing = state.billing()?;
        let checkout = billing
            .create_subscription_checkout(&user, &state.config.app_base_url)
            .await?;
        let url = checkout.url.ok_or_else(|| {
            AppError::Upstream("checkout session has no redirect URL".to_string())
        })?;
        return Ok(Json(json!({ "checkout_url": url })));
    }

    let token = session::create_session(&state.db, user.id).await?;
    Ok(Json(json!({ "user": PublicUser::from(&user), "token": token })))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /api/auth/login
/// Issuing the new session revokes every prior session for the user.
pub async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>, AppError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(req.email.trim().to_lowercase())
        .fetch_optional(&state.db)
        .await?;

    // Same rejection for unknown email and bad password.
    let user = user.ok_or(AppError::Unauthenticated)?;
    if !password::verify_password(&req.password, &user.password_hash) {
        return Err(AppError::Unauthenticated);
    }

    let token = session::create_session(&state.db, user.id).await?;
    Ok(Json(json!({ "user": PublicUser::from(&user), "token": token })))
}

/// POST /api/auth/logout
pub async fn handle_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    if let Some(token) = token_from_headers(&headers) {
        session::revoke_session(&state.db, &token).await?;
    }
    Ok(Json(json!({ "ok": true })))
}

/// GET /api/auth/me
pub async fn handle_me(AuthUser(user): AuthUser) -> Json<PublicUser> {
    Json(PublicUser::from(&user))
}

fn validate_registration(
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
) -> Result<(), AppError> {
    if !email.contains('@') || email.len() < 3 {
        return Err(AppError::Validation(
            "A valid email address is required".to_string(),
        ));
    }
    if password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(AppError::Validation(
            "First and last name are required".to_string(),
        ));
    }
    Ok(())
}

/// An invitation pins the account to its institution's plan, so the paid
/// plan only applies to open signups.
fn wants_paid_plan(req: &RegisterRequest) -> bool {
    req.invitation_token.is_none() && req.selected_plan.as_deref() == Some("paid")
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e.as_database_error().map(|d| d.kind()),
        Some(sqlx::error::ErrorKind::UniqueViolation)
    )
}
