use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::gate::AuthUser;
use crate::entitlements;
use crate::errors::AppError;
use crate::models::feature::FeatureKey;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AnalyzeResumeRequest {
    pub resume_text: String,
}

const MAX_RESUME_CHARS: usize = 50_000;

/// POST /api/analysis/resume
/// Feature-gated on `resume_analysis`. Provider failure degrades to the
/// generic analysis; the response says which one the caller got.
pub async fn handle_analyze_resume(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<AnalyzeResumeRequest>,
) -> Result<Json<Value>, AppError> {
    entitlements::require_feature(&state.db, &user, FeatureKey::ResumeAnalysis).await?;

    let text = req.resume_text.trim();
    validate_resume_text(text)?;

    let outcome = state.ai.analyze_resume(text).await;
    Ok(Json(json!({
        "source": outcome.source(),
        "analysis": outcome.analysis(),
    })))
}

/// The limit counts characters, not bytes, so resumes in scripts with
/// multi-byte encodings get the full advertised length.
fn validate_resume_text(text: &str) -> Result<(), AppError> {
    if text.is_empty() {
        return Err(AppError::Validation("Resume text is required".to_string()));
    }
    if text.chars().count() > MAX_RESUME_CHARS {
        return Err(AppError::Validation(
            "Resume text is too long (50k characters max)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_length_counts_characters_not_bytes() {
        // Two bytes per char in UTF-8; would exceed a byte-based limit at
        // half the advertised length.
        let at_limit = "é".repeat(MAX_RESUME_CHARS);
        assert!(at_limit.len() > MAX_RESUME_CHARS);
        assert!(validate_resume_text(&at_limit).is_ok());

        let over_limit = "é".repeat(MAX_RESUME_CHARS + 1);
        assert!(validate_resume_text(&over_limit).is_err());
    }

    #[test]
    fn empty_resume_is_rejected() {
        assert!(validate_resume_text("").is_err());
        assert!(validate_resume_text("software engineer").is_ok());
    }
}
