// src/models/test.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::{Validate, ValidationError};

use crate::models::question::Difficulty;

/// Represents the 'tests' table in the database.
/// A timed, attempt-limited assessment inside one series.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Test {
    pub id: i64,
    pub series_id: i64,
    pub title: String,
    pub description: String,

    pub duration_minutes: i32,
    pub max_attempts: i32,

    pub shuffle_questions: bool,
    pub show_result_immediately: bool,
    pub allow_review: bool,

    /// Optional availability window. A missing bound is open on that side.
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Test {
    /// True when `now` falls inside the (optional) start/end window.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.start_time {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if now > end {
                return false;
            }
        }
        true
    }

    pub fn duration_seconds(&self) -> i64 {
        i64::from(self.duration_minutes) * 60
    }

    /// Results are withheld while the test is still running for others.
    pub fn results_visible_at(&self, now: DateTime<Utc>) -> bool {
        if self.show_result_immediately {
            return true;
        }
        match self.end_time {
            Some(end) => now > end,
            None => true,
        }
    }
}

/// Question-bank figures for one test, computed on read.
#[derive(Debug, Clone, Serialize)]
pub struct TestSummary {
    #[serde(flatten)]
    pub test: Test,
    pub question_count: i64,
    pub total_marks: i64,
    pub difficulty_breakdown: DifficultyBreakdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DifficultyBreakdown {
    pub easy: i64,
    pub medium: i64,
    pub hard: i64,
}

impl DifficultyBreakdown {
    pub fn add(&mut self, difficulty: Difficulty) {
        match difficulty {
            Difficulty::Easy => self.easy += 1,
            Difficulty::Medium => self.medium += 1,
            Difficulty::Hard => self.hard += 1,
        }
    }
}

/// DTO for scheduling a new test under a series.
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = validate_window))]
pub struct CreateTestRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 20000))]
    #[serde(default)]
    pub description: String,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i32,
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_true")]
    pub shuffle_questions: bool,
    #[serde(default = "default_true")]
    pub show_result_immediately: bool,
    #[serde(default = "default_true")]
    pub allow_review: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

fn default_max_attempts() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

fn validate_window(req: &CreateTestRequest) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (req.start_time, req.end_time) {
        if end <= start {
            return Err(ValidationError::new("end_time_before_start_time"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_test() -> Test {
        Test {
            id: 1,
            series_id: 1,
            title: "Mock 1".into(),
            description: String::new(),
            duration_minutes: 30,
            max_attempts: 1,
            shuffle_questions: false,
            show_result_immediately: true,
            allow_review: true,
            start_time: None,
            end_time: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unbounded_window_is_always_available() {
        let test = sample_test();
        assert!(test.is_available_at(Utc::now()));
    }

    #[test]
    fn window_bounds_are_respected() {
        let now = Utc::now();
        let mut test = sample_test();
        test.start_time = Some(now + Duration::hours(1));
        assert!(!test.is_available_at(now));

        test.start_time = Some(now - Duration::hours(2));
        test.end_time = Some(now - Duration::hours(1));
        assert!(!test.is_available_at(now));

        test.end_time = Some(now + Duration::hours(1));
        assert!(test.is_available_at(now));
    }

    #[test]
    fn results_withheld_until_window_closes() {
        let now = Utc::now();
        let mut test = sample_test();
        test.show_result_immediately = false;
        test.end_time = Some(now + Duration::minutes(5));
        assert!(!test.results_visible_at(now));
        assert!(test.results_visible_at(now + Duration::minutes(6)));
    }

    #[test]
    fn create_request_rejects_inverted_window() {
        let now = Utc::now();
        let req = CreateTestRequest {
            title: "Mock".into(),
            description: String::new(),
            duration_minutes: 60,
            max_attempts: 1,
            shuffle_questions: true,
            show_result_immediately: true,
            allow_review: true,
            start_time: Some(now),
            end_time: Some(now - Duration::minutes(1)),
        };
        assert!(req.validate().is_err());
    }
}
