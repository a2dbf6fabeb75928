// src/models/attempt.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use uuid::Uuid;

use crate::models::question::PublicQuestion;

/// Lifecycle of an attempt.
///
/// `started → in_progress → submitted`, with `expired` reachable only
/// through the timeout auto-submit. Nothing leaves a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attempt_status", rename_all = "snake_case")]
pub enum AttemptStatus {
    Started,
    InProgress,
    Submitted,
    Expired,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptStatus::Submitted | AttemptStatus::Expired)
    }

    pub fn can_transition_to(self, next: AttemptStatus) -> bool {
        use AttemptStatus::*;
        matches!(
            (self, next),
            (Started, InProgress) | (Started, Submitted) | (Started, Expired)
                | (InProgress, Submitted) | (InProgress, Expired)
        )
    }
}

/// Per-subject tally stored in `subject_wise_score`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectScore {
    pub correct: i32,
    pub wrong: i32,
    pub marks: f64,
}

/// Represents the 'test_attempts' table in the database.
/// One student's timed run through one test.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TestAttempt {
    /// Random, so attempt URLs cannot be enumerated.
    pub id: Uuid,
    pub user_id: i64,
    pub test_id: i64,

    /// 1-based, unique per (user, test).
    pub attempt_number: i32,
    pub status: AttemptStatus,

    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<i64>,

    pub total_questions: i32,
    pub attempted_questions: i32,
    pub correct_answers: i32,
    pub wrong_answers: i32,

    pub total_marks: f64,

    /// May be negative under negative marking.
    pub marks_obtained: f64,

    /// Floored at 0, two decimals.
    pub percentage_score: f64,
    pub passed: bool,

    pub subject_wise_score: Json<BTreeMap<String, SubjectScore>>,

    /// Backfilled after grading.
    pub rank: Option<i32>,
    pub percentile: Option<f64>,

    pub created_at: DateTime<Utc>,
}

impl TestAttempt {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn skipped_questions(&self) -> i32 {
        self.total_questions - self.attempted_questions
    }

    pub fn accuracy_percentage(&self) -> f64 {
        if self.attempted_questions == 0 {
            return 0.0;
        }
        let acc = self.correct_answers as f64 / self.attempted_questions as f64 * 100.0;
        (acc * 100.0).round() / 100.0
    }
}

/// Fields needed to open a fresh attempt.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub id: Uuid,
    pub user_id: i64,
    pub test_id: i64,
    pub attempt_number: i32,
    pub total_questions: i32,
    pub total_marks: f64,
    pub started_at: DateTime<Utc>,
}

/// Graded outcome of an attempt as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredResult {
    pub attempt_id: Uuid,
    pub test_id: i64,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<i64>,
    pub total_questions: i32,
    pub attempted_questions: i32,
    pub skipped_questions: i32,
    pub correct_answers: i32,
    pub wrong_answers: i32,
    pub total_marks: f64,
    pub marks_obtained: f64,
    pub percentage_score: f64,
    pub accuracy_percentage: f64,
    pub passed: bool,
    pub subject_wise_score: BTreeMap<String, SubjectScore>,
    pub rank: Option<i32>,
    pub percentile: Option<f64>,
}

impl From<&TestAttempt> for ScoredResult {
    fn from(a: &TestAttempt) -> Self {
        ScoredResult {
            attempt_id: a.id,
            test_id: a.test_id,
            attempt_number: a.attempt_number,
            status: a.status,
            started_at: a.started_at,
            submitted_at: a.submitted_at,
            time_spent_seconds: a.time_spent_seconds,
            total_questions: a.total_questions,
            attempted_questions: a.attempted_questions,
            skipped_questions: a.skipped_questions(),
            correct_answers: a.correct_answers,
            wrong_answers: a.wrong_answers,
            total_marks: a.total_marks,
            marks_obtained: a.marks_obtained,
            percentage_score: a.percentage_score,
            accuracy_percentage: a.accuracy_percentage(),
            passed: a.passed,
            subject_wise_score: a.subject_wise_score.0.clone(),
            rank: a.rank,
            percentile: a.percentile,
        }
    }
}

/// What a student sees while taking (or after finishing) an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptState {
    pub attempt_id: Uuid,
    pub test_id: i64,
    pub status: AttemptStatus,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub time_remaining_seconds: i64,
    /// Empty once the attempt is terminal.
    pub questions: Vec<PublicQuestion>,
}

/// Result of a submit call. Both variants carry the graded result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Submission {
    Graded(ScoredResult),
    AlreadySubmitted(ScoredResult),
}

impl Submission {
    pub fn result(&self) -> &ScoredResult {
        match self {
            Submission::Graded(r) | Submission::AlreadySubmitted(r) => r,
        }
    }
}

/// A user's standing on one test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOverview {
    pub test_id: i64,
    pub max_attempts: i32,
    pub attempts_used: i64,
    pub attempts_remaining: i64,
    pub can_attempt: bool,
    pub open_attempt_id: Option<Uuid>,
    pub best_marks: Option<f64>,
    pub best_percentage: Option<f64>,
}

/// Row of the leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: i32,
    pub user_id: i64,
    pub display_name: String,
    pub marks_obtained: f64,
    pub percentage_score: f64,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_never_transition() {
        for from in [AttemptStatus::Submitted, AttemptStatus::Expired] {
            for to in [
                AttemptStatus::Started,
                AttemptStatus::InProgress,
                AttemptStatus::Submitted,
                AttemptStatus::Expired,
            ] {
                assert!(!from.can_transition_to(to));
            }
        }
        assert!(AttemptStatus::InProgress.can_transition_to(AttemptStatus::Submitted));
        assert!(!AttemptStatus::InProgress.can_transition_to(AttemptStatus::Started));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&AttemptStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
