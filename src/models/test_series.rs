// src/models/test_series.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

use crate::engine::scoring::MarkingPolicy;

/// Represents the 'test_series' table in the database.
///
/// The aggregate columns (`total_tests`, `total_questions`, `total_marks`)
/// are written only by the explicit recompute operation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TestSeries {
    pub id: i64,
    pub title: String,
    pub description: String,

    pub is_free: bool,
    pub price: f64,

    /// Whether wrong answers deduct `question.negative_marks`.
    pub has_negative_marking: bool,

    /// Default deduction ratio applied to new questions.
    pub negative_marks: f64,

    /// Minimum percentage for a pass (1..=100).
    pub pass_percentage: i32,

    pub is_active: bool,

    pub total_tests: i32,
    pub total_questions: i32,
    pub total_marks: i64,

    /// Graded attempts across all tests of the series.
    pub total_attempts: i64,
    pub average_score: f64,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl TestSeries {
    /// Resolves the marking policy once, for a whole attempt.
    pub fn marking_policy(&self) -> MarkingPolicy {
        MarkingPolicy {
            negative_marking: self.has_negative_marking,
            pass_percentage: self.pass_percentage as f64,
        }
    }
}

/// Aggregates recomputed from a series' active tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub total_tests: i32,
    pub total_questions: i32,
    pub total_marks: i64,
}

/// DTO for creating a new test series.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSeriesRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 20000))]
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_free: bool,
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_true")]
    pub has_negative_marking: bool,
    #[validate(range(min = 0.0, max = 100.0))]
    #[serde(default = "default_negative_marks")]
    pub negative_marks: f64,
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_pass_percentage")]
    pub pass_percentage: i32,
}

fn default_true() -> bool {
    true
}

fn default_negative_marks() -> f64 {
    0.25
}

fn default_pass_percentage() -> i32 {
    40
}
