//! # Input Validation
//!
//! Repository names arrive as a path segment and become keys of the
//! repository registry, so they are checked before any handler touches
//! storage.
//!
//! ```rust,no_run
//! use packhouse_node::validation::validate_repo_name;
//!
//! if let Err(e) = validate_repo_name("my-repo") {
//!     println!("Invalid name: {}", e);
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use validator::ValidationError;

/// Suffix clients commonly append to repository URLs.
pub const GIT_SUFFIX: &str = ".git";

/// Maximum repository name length.
pub const MAX_NAME_LENGTH: usize = 100;

/// Must start with alphanumeric, then alphanumeric, dots, hyphens and
/// underscores.
pub static NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").expect("Invalid regex"));

/// Names that collide with non-repository routes.
pub static RESERVED_NAMES: Lazy<Vec<&str>> = Lazy::new(|| vec!["api", "health", "metrics"]);

/// Validation error response.
#[derive(Debug, Serialize)]
pub struct ValidationErrorResponse {
    /// Error type.
    pub error: String,
    /// Human-readable message.
    pub message: String,
    /// Field-level error details.
    pub details: Vec<FieldError>,
}

/// Field-level validation error.
#[derive(Debug, Serialize)]
pub struct FieldError {
    /// Field name.
    pub field: String,
    /// Error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ValidationErrorResponse {
    /// Wraps a single failed field.
    pub fn for_field(field: &str, err: &ValidationError) -> Self {
        let message = err
            .message
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| format!("Validation failed for field '{}'", field));
        Self {
            error: "validation_error".to_string(),
            message: "Validation failed".to_string(),
            details: vec![FieldError {
                field: field.to_string(),
                code: err.code.to_string(),
                message,
            }],
        }
    }
}

impl IntoResponse for ValidationErrorResponse {
    fn into_response(self) -> Response {
        (StatusCode::UNPROCESSABLE_ENTITY, Json(self)).into_response()
    }
}

/// Validate a repository name, without any `.git` suffix.
pub fn validate_repo_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        let mut err = ValidationError::new("length");
        err.message = Some("Name cannot be empty".into());
        return Err(err);
    }

    if name.len() > MAX_NAME_LENGTH {
        let mut err = ValidationError::new("length");
        err.message = Some(format!("Name must be at most {} characters", MAX_NAME_LENGTH).into());
        return Err(err);
    }

    if !NAME_REGEX.is_match(name) || name.contains("..") {
        let mut err = ValidationError::new("pattern");
        err.message = Some(
            "Name must start with a letter or number and contain only letters, numbers, dots, hyphens, and underscores".into()
        );
        return Err(err);
    }

    if RESERVED_NAMES.contains(&name.to_lowercase().as_str()) {
        let mut err = ValidationError::new("reserved");
        err.message = Some("This name is reserved and cannot be used".into());
        return Err(err);
    }

    Ok(())
}

/// Strips an optional `.git` suffix and validates the rest.
pub fn repo_name(segment: &str) -> Result<&str, ValidationError> {
    let name = segment.strip_suffix(GIT_SUFFIX).unwrap_or(segment);
    validate_repo_name(name)?;
    Ok(name)
}
