//! Request gate.
//!
//! `AuthUser` is the extractor every protected handler takes. Per request it
//! walks unauthenticated -> authenticated -> usable: resolve the bearer
//! token to a live session, then apply account and institution-license
//! checks before the handler body runs. Feature-level checks happen
//! per-route via `entitlements::require_feature`.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::header, http::request::Parts};

use crate::entitlements;
use crate::errors::AppError;
use crate::models::user::{Role, User};
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "ascent_token";

/// The authenticated caller, attached after all account-level checks pass.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts).ok_or(AppError::Unauthenticated)?;

        let user = crate::auth::session::user_for_token(&state.db, &token)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        entitlements::account_gate(&state.db, &user).await?;

        // Presence signal for institution dashboards; not load-bearing.
        sqlx::query("UPDATE users SET last_active_at = now() WHERE id = $1")
            .bind(user.id)
            .execute(&state.db)
            .await?;

        Ok(AuthUser(user))
    }
}

impl AuthUser {
    pub fn require_super_admin(&self) -> Result<(), AppError> {
        match self.0.role() {
            Role::SuperAdmin => Ok(()),
            _ => Err(AppError::Forbidden),
        }
    }

    /// Institution admins may act on their own institution; platform admins
    /// on any.
    pub fn require_institution_admin(&self, institution_id: uuid::Uuid) -> Result<(), AppError> {
        match self.0.role() {
            Role::SuperAdmin | Role::Admin => Ok(()),
            Role::InstitutionAdmin if self.0.institution_id == Some(institution_id) => Ok(()),
            _ => Err(AppError::Forbidden),
        }
    }
}

/// Bearer token from the Authorization header, falling back to the session
/// cookie set for browser clients.
fn extract_token(parts: &Parts) -> Option<String> {
    token_from_headers(&parts.headers)
}

pub fn token_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookie_value(cookies, SESSION_COOKIE).map(str::to_string)
}

fn cookie_value<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    cookies.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name && !v.is_empty()).then_some(v)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header_name: header::HeaderName, value: &str) -> Parts {
        let request = Request::builder()
            .header(header_name, value)
            .body(())
            .unwrap();
        request.into_parts().0
    }

    #[test]
    fn bearer_header_wins() {
        let parts = parts_with(header::AUTHORIZATION, "Bearer deadbeef");
        assert_eq!(extract_token(&parts), Some("deadbeef".to_string()));
    }

    #[test]
    fn empty_bearer_is_rejected() {
        let parts = parts_with(header::AUTHORIZATION, "Bearer ");
        assert_eq!(extract_token(&parts), None);
    }

    #[test]
    fn cookie_fallback() {
        let parts = parts_with(header::COOKIE, "theme=dark; ascent_token=cafef00d; lang=en");
        assert_eq!(extract_token(&parts), Some("cafef00d".to_string()));
    }

    #[test]
    fn missing_credentials_yield_none() {
        let request = Request::builder().body(()).unwrap();
        let (parts, _) = request.into_parts();
        assert_eq!(extract_token(&parts), None);
    }

    #[test]
    fn cookie_name_must_match_exactly() {
        let parts = parts_with(header::COOKIE, "ascent_token_old=abc");
        assert_eq!(extract_token(&parts), None);
    }
}
