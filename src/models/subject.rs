// src/models/subject.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Represents the 'subjects' table in the database.
/// A label used to bucket questions in subject-wise analytics.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub name: String,

    /// Short unique code (e.g., "PHY").
    pub code: String,

    /// Display color as a hex string.
    pub color: String,

    /// Icon class for the UI.
    pub icon: String,

    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for creating a new subject.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubjectRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 10))]
    pub code: String,
    #[validate(custom(function = validate_hex_color))]
    #[serde(default = "default_color")]
    pub color: String,
    #[validate(length(max = 50))]
    #[serde(default)]
    pub icon: String,
}

fn default_color() -> String {
    "#3B82F6".to_string()
}

fn validate_hex_color(color: &str) -> Result<(), validator::ValidationError> {
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(validator::ValidationError::new("invalid_hex_color"));
    }
    Ok(())
}
