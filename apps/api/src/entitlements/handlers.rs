use axum::{extract::State, Json};

use crate::auth::gate::AuthUser;
use crate::entitlements::{build_snapshot, load_context, EntitlementSnapshot};
use crate::errors::AppError;
use crate::state::AppState;

/// GET /api/user/feature-access
/// The client-side gate mirrors this snapshot to decide between content and
/// the upsell panel, so it must match `resolve_access` exactly.
pub async fn handle_feature_access(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<EntitlementSnapshot>, AppError> {
    let ctx = load_context(&state.db, &user).await?;
    Ok(Json(build_snapshot(&ctx)))
}
