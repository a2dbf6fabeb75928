// src/store/mod.rs

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    engine::{ranking::Standing, scoring::Scorecard},
    error::AppResult,
    models::{
        answer::StudentAnswer,
        attempt::{AttemptStatus, NewAttempt, TestAttempt},
        question::{Difficulty, Question, QuestionType},
        subject::{CreateSubjectRequest, Subject},
        test::{CreateTestRequest, Test},
        test_series::{CreateSeriesRequest, SeriesStats, TestSeries},
    },
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// A validated question ready to be stored. The position is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub test_id: i64,
    pub subject_id: Option<i64>,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    pub question_text: String,
    pub marks: i32,
    pub negative_marks: f64,
    pub options: BTreeMap<String, String>,
    pub correct_answer: serde_json::Value,
    pub explanation: String,
    pub solution_video_url: Option<String>,
}

/// Outcome of opening an attempt.
#[derive(Debug, Clone)]
pub enum OpenOutcome {
    Created(TestAttempt),
    /// The user already had an open attempt; a racing start lands here too.
    Resumed(TestAttempt),
}

impl OpenOutcome {
    pub fn into_attempt(self) -> TestAttempt {
        match self {
            OpenOutcome::Created(a) | OpenOutcome::Resumed(a) => a,
        }
    }
}

/// Terminal write for an attempt: status, timings and the full scorecard.
#[derive(Debug, Clone)]
pub struct Finalization {
    pub status: AttemptStatus,
    pub submitted_at: DateTime<Utc>,
    pub time_spent_seconds: i64,
    pub card: Scorecard,
}

/// Outcome of the compare-and-set on an attempt's status.
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    Finalized(TestAttempt),
    /// Another request got there first; nothing was written.
    AlreadyFinal(TestAttempt),
}

impl FinalizeOutcome {
    pub fn into_attempt(self) -> TestAttempt {
        match self {
            FinalizeOutcome::Finalized(a) | FinalizeOutcome::AlreadyFinal(a) => a,
        }
    }
}

/// Persistence seam for the question bank and attempt lifecycle.
///
/// Implementations must make `open_attempt` and `finalize_attempt` atomic:
/// at most one open attempt per (user, test), and a status leaves the open
/// set exactly once together with all of its answer rows.
#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn create_subject(&self, req: &CreateSubjectRequest) -> AppResult<Subject>;
    async fn get_subject(&self, id: i64) -> AppResult<Option<Subject>>;
    async fn list_subjects(&self) -> AppResult<Vec<Subject>>;

    async fn create_series(&self, req: &CreateSeriesRequest) -> AppResult<TestSeries>;
    async fn get_series(&self, id: i64) -> AppResult<Option<TestSeries>>;

    /// Recounts active tests, their questions and marks, and stores the result.
    async fn recompute_series_stats(&self, series_id: i64) -> AppResult<SeriesStats>;

    /// Refreshes `total_attempts` / `average_score` from graded attempts.
    async fn refresh_series_attempt_stats(&self, series_id: i64) -> AppResult<()>;

    async fn create_test(&self, series_id: i64, req: &CreateTestRequest) -> AppResult<Test>;
    async fn get_test(&self, id: i64) -> AppResult<Option<Test>>;

    async fn create_question(&self, new: &NewQuestion) -> AppResult<Question>;

    /// Questions of a test ordered by position, with subject names joined.
    async fn list_questions(&self, test_id: i64) -> AppResult<Vec<Question>>;

    /// Lifetime counters; `(question_id, was_correct)` per attempted answer.
    async fn record_question_stats(&self, results: &[(i64, bool)]) -> AppResult<()>;

    async fn count_graded_attempts(&self, user_id: i64, test_id: i64) -> AppResult<i64>;
    async fn open_attempt(&self, new: NewAttempt) -> AppResult<OpenOutcome>;
    async fn get_attempt(&self, id: Uuid) -> AppResult<Option<TestAttempt>>;
    async fn list_user_attempts(&self, user_id: i64, test_id: i64) -> AppResult<Vec<TestAttempt>>;

    /// Compare-and-set from an open status to `fin.status`, writing every
    /// answer row in the same unit. Errors with `NotFound` for unknown ids.
    async fn finalize_attempt(&self, id: Uuid, fin: &Finalization) -> AppResult<FinalizeOutcome>;

    async fn list_answers(&self, attempt_id: Uuid) -> AppResult<Vec<StudentAnswer>>;

    /// `(attempts with strictly more marks, all graded attempts)` on a test.
    async fn cohort_position(&self, test_id: i64, marks: f64) -> AppResult<(i64, i64)>;
    async fn set_standing(&self, attempt_id: Uuid, standing: Standing) -> AppResult<()>;

    /// Graded attempts of a test, best first.
    async fn top_attempts(&self, test_id: i64, limit: i64) -> AppResult<Vec<TestAttempt>>;

    /// Open attempts whose deadline falls strictly before `cutoff`.
    async fn list_overdue_attempts(&self, cutoff: DateTime<Utc>, limit: i64) -> AppResult<Vec<TestAttempt>>;
}
