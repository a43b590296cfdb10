pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::analysis::handlers as analysis_handlers;
use crate::auth::handlers as auth_handlers;
use crate::billing::handlers as billing_handlers;
use crate::entitlements::handlers as entitlement_handlers;
use crate::institutions::handlers as institution_handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Auth
        .route("/api/auth/register", post(auth_handlers::handle_register))
        .route("/api/auth/login", post(auth_handlers::handle_login))
        .route("/api/auth/logout", post(auth_handlers::handle_logout))
        .route("/api/auth/me", get(auth_handlers::handle_me))
        // Entitlements
        .route(
            "/api/user/feature-access",
            get(entitlement_handlers::handle_feature_access),
        )
        // Billing
        .route(
            "/api/stripe/create-checkout-session",
            post(billing_handlers::handle_create_checkout_session),
        )
        .route(
            "/api/stripe/verify-session",
            post(billing_handlers::handle_verify_session),
        )
        .route("/api/stripe/webhook", post(billing_handlers::handle_webhook))
        .route(
            "/api/features/:key/checkout",
            post(billing_handlers::handle_feature_checkout),
        )
        // Institutions & licensing
        .route(
            "/api/institutions",
            post(institution_handlers::handle_create_institution),
        )
        .route(
            "/api/institutions/:id/licenses",
            post(institution_handlers::handle_create_license),
        )
        .route(
            "/api/institutions/:id/seats",
            get(institution_handlers::handle_seat_availability),
        )
        .route(
            "/api/institutions/:id/invite",
            post(institution_handlers::handle_invite),
        )
        // Gated features
        .route(
            "/api/analysis/resume",
            post(analysis_handlers::handle_analyze_resume),
        )
        .with_state(state)
}
