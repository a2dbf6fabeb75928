// src/store/memory.rs

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    engine::{clock, ranking::Standing, scoring::round2},
    error::{AppError, AppResult},
    models::{
        answer::StudentAnswer,
        attempt::{AttemptStatus, NewAttempt, TestAttempt},
        question::Question,
        subject::{CreateSubjectRequest, Subject},
        test::{CreateTestRequest, Test},
        test_series::{CreateSeriesRequest, SeriesStats, TestSeries},
    },
    store::{ExamStore, FinalizeOutcome, Finalization, NewQuestion, OpenOutcome},
};

#[derive(Default)]
struct Tables {
    subjects: BTreeMap<i64, Subject>,
    series: BTreeMap<i64, TestSeries>,
    tests: BTreeMap<i64, Test>,
    questions: BTreeMap<i64, Question>,
    attempts: HashMap<Uuid, TestAttempt>,
    answers: Vec<StudentAnswer>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn with_subject_name(&self, mut question: Question) -> Question {
        question.subject_name = question
            .subject_id
            .and_then(|id| self.subjects.get(&id))
            .map(|s| s.name.clone());
        question
    }

    fn graded_on_test(&self, test_id: i64) -> impl Iterator<Item = &TestAttempt> {
        self.attempts
            .values()
            .filter(move |a| a.test_id == test_id && a.is_terminal())
    }
}

/// `ExamStore` kept entirely in memory.
///
/// A single write lock spans every compound operation, which gives the same
/// guarantees as the unique indexes and transactions of the Postgres store.
/// Used by the test suite and for running without a database.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExamStore for InMemoryStore {
    async fn create_subject(&self, req: &CreateSubjectRequest) -> AppResult<Subject> {
        let mut t = self.tables.write().await;
        if t
            .subjects
            .values()
            .any(|s| s.code.eq_ignore_ascii_case(&req.code) || s.name == req.name)
        {
            return Err(AppError::Conflict("Subject name or code already exists".to_string()));
        }
        let id = t.next_id();
        let subject = Subject {
            id,
            name: req.name.clone(),
            code: req.code.to_uppercase(),
            color: req.color.clone(),
            icon: req.icon.clone(),
            is_active: true,
            created_at: Utc::now(),
        };
        t.subjects.insert(id, subject.clone());
        Ok(subject)
    }

    async fn get_subject(&self, id: i64) -> AppResult<Option<Subject>> {
        Ok(self.tables.read().await.subjects.get(&id).cloned())
    }

    async fn list_subjects(&self) -> AppResult<Vec<Subject>> {
        let t = self.tables.read().await;
        let mut subjects: Vec<_> = t.subjects.values().cloned().collect();
        subjects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(subjects)
    }

    async fn create_series(&self, req: &CreateSeriesRequest) -> AppResult<TestSeries> {
        let mut t = self.tables.write().await;
        let id = t.next_id();
        let series = TestSeries {
            id,
            title: req.title.clone(),
            description: req.description.clone(),
            is_free: req.is_free,
            price: if req.is_free { 0.0 } else { req.price },
            has_negative_marking: req.has_negative_marking,
            negative_marks: req.negative_marks,
            pass_percentage: req.pass_percentage,
            is_active: true,
            total_tests: 0,
            total_questions: 0,
            total_marks: 0,
            total_attempts: 0,
            average_score: 0.0,
            created_at: Utc::now(),
        };
        t.series.insert(id, series.clone());
        Ok(series)
    }

    async fn get_series(&self, id: i64) -> AppResult<Option<TestSeries>> {
        Ok(self.tables.read().await.series.get(&id).cloned())
    }

    async fn recompute_series_stats(&self, series_id: i64) -> AppResult<SeriesStats> {
        let mut t = self.tables.write().await;
        if !t.series.contains_key(&series_id) {
            return Err(AppError::NotFound("Test series not found".to_string()));
        }

        let test_ids: Vec<i64> = t
            .tests
            .values()
            .filter(|test| test.series_id == series_id && test.is_active)
            .map(|test| test.id)
            .collect();
        let (count, marks) = t
            .questions
            .values()
            .filter(|q| test_ids.contains(&q.test_id))
            .fold((0i32, 0i64), |(n, m), q| (n + 1, m + i64::from(q.marks)));

        let stats = SeriesStats {
            total_tests: test_ids.len() as i32,
            total_questions: count,
            total_marks: marks,
        };
        if let Some(series) = t.series.get_mut(&series_id) {
            series.total_tests = stats.total_tests;
            series.total_questions = stats.total_questions;
            series.total_marks = stats.total_marks;
        }
        Ok(stats)
    }

    async fn refresh_series_attempt_stats(&self, series_id: i64) -> AppResult<()> {
        let mut t = self.tables.write().await;
        let test_ids: Vec<i64> = t
            .tests
            .values()
            .filter(|test| test.series_id == series_id)
            .map(|test| test.id)
            .collect();
        let marks: Vec<f64> = t
            .attempts
            .values()
            .filter(|a| a.is_terminal() && test_ids.contains(&a.test_id))
            .map(|a| a.marks_obtained)
            .collect();

        if let Some(series) = t.series.get_mut(&series_id) {
            series.total_attempts = marks.len() as i64;
            series.average_score = if marks.is_empty() {
                0.0
            } else {
                round2(marks.iter().sum::<f64>() / marks.len() as f64)
            };
        }
        Ok(())
    }

    async fn create_test(&self, series_id: i64, req: &CreateTestRequest) -> AppResult<Test> {
        let mut t = self.tables.write().await;
        if !t.series.contains_key(&series_id) {
            return Err(AppError::NotFound("Test series not found".to_string()));
        }
        let id = t.next_id();
        let test = Test {
            id,
            series_id,
            title: req.title.clone(),
            description: req.description.clone(),
            duration_minutes: req.duration_minutes,
            max_attempts: req.max_attempts,
            shuffle_questions: req.shuffle_questions,
            show_result_immediately: req.show_result_immediately,
            allow_review: req.allow_review,
            start_time: req.start_time,
            end_time: req.end_time,
            is_active: true,
            created_at: Utc::now(),
        };
        t.tests.insert(id, test.clone());
        Ok(test)
    }

    async fn get_test(&self, id: i64) -> AppResult<Option<Test>> {
        Ok(self.tables.read().await.tests.get(&id).cloned())
    }

    async fn create_question(&self, new: &NewQuestion) -> AppResult<Question> {
        let mut t = self.tables.write().await;
        if !t.tests.contains_key(&new.test_id) {
            return Err(AppError::NotFound("Test not found".to_string()));
        }
        let position = t
            .questions
            .values()
            .filter(|q| q.test_id == new.test_id)
            .map(|q| q.position)
            .max()
            .unwrap_or(0)
            + 1;
        let id = t.next_id();
        let question = Question {
            id,
            test_id: new.test_id,
            subject_id: new.subject_id,
            subject_name: None,
            question_type: new.question_type,
            difficulty: new.difficulty,
            question_text: new.question_text.clone(),
            marks: new.marks,
            negative_marks: new.negative_marks,
            options: Json(new.options.clone()),
            correct_answer: Json(new.correct_answer.clone()),
            explanation: new.explanation.clone(),
            solution_video_url: new.solution_video_url.clone(),
            total_attempts: 0,
            correct_attempts: 0,
            position,
            created_at: Utc::now(),
        };
        t.questions.insert(id, question.clone());
        Ok(t.with_subject_name(question))
    }

    async fn list_questions(&self, test_id: i64) -> AppResult<Vec<Question>> {
        let t = self.tables.read().await;
        let mut questions: Vec<Question> = t
            .questions
            .values()
            .filter(|q| q.test_id == test_id)
            .cloned()
            .map(|q| t.with_subject_name(q))
            .collect();
        questions.sort_by_key(|q| (q.position, q.id));
        Ok(questions)
    }

    async fn record_question_stats(&self, results: &[(i64, bool)]) -> AppResult<()> {
        let mut t = self.tables.write().await;
        for (question_id, correct) in results {
            if let Some(q) = t.questions.get_mut(question_id) {
                q.total_attempts += 1;
                if *correct {
                    q.correct_attempts += 1;
                }
            }
        }
        Ok(())
    }

    async fn count_graded_attempts(&self, user_id: i64, test_id: i64) -> AppResult<i64> {
        let t = self.tables.read().await;
        Ok(t
            .graded_on_test(test_id)
            .filter(|a| a.user_id == user_id)
            .count() as i64)
    }

    async fn open_attempt(&self, new: NewAttempt) -> AppResult<OpenOutcome> {
        let mut t = self.tables.write().await;

        if let Some(open) = t
            .attempts
            .values()
            .find(|a| a.user_id == new.user_id && a.test_id == new.test_id && !a.is_terminal())
        {
            return Ok(OpenOutcome::Resumed(open.clone()));
        }

        if t.attempts.values().any(|a| {
            a.user_id == new.user_id
                && a.test_id == new.test_id
                && a.attempt_number == new.attempt_number
        }) {
            return Err(AppError::Conflict(
                "Attempt was started concurrently, please retry".to_string(),
            ));
        }

        let attempt = TestAttempt {
            id: new.id,
            user_id: new.user_id,
            test_id: new.test_id,
            attempt_number: new.attempt_number,
            status: AttemptStatus::InProgress,
            started_at: new.started_at,
            submitted_at: None,
            time_spent_seconds: None,
            total_questions: new.total_questions,
            attempted_questions: 0,
            correct_answers: 0,
            wrong_answers: 0,
            total_marks: new.total_marks,
            marks_obtained: 0.0,
            percentage_score: 0.0,
            passed: false,
            subject_wise_score: Json(BTreeMap::new()),
            rank: None,
            percentile: None,
            created_at: new.started_at,
        };
        t.attempts.insert(attempt.id, attempt.clone());
        Ok(OpenOutcome::Created(attempt))
    }

    async fn get_attempt(&self, id: Uuid) -> AppResult<Option<TestAttempt>> {
        Ok(self.tables.read().await.attempts.get(&id).cloned())
    }

    async fn list_user_attempts(&self, user_id: i64, test_id: i64) -> AppResult<Vec<TestAttempt>> {
        let t = self.tables.read().await;
        let mut attempts: Vec<_> = t
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && a.test_id == test_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }

    async fn finalize_attempt(&self, id: Uuid, fin: &Finalization) -> AppResult<FinalizeOutcome> {
        let mut t = self.tables.write().await;

        let current = t
            .attempts
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;
        if !current.status.can_transition_to(fin.status) {
            return Ok(FinalizeOutcome::AlreadyFinal(current));
        }

        let card = &fin.card;
        let mut rows = Vec::with_capacity(card.answers.len());
        for graded in &card.answers {
            rows.push(StudentAnswer {
                id: t.next_id(),
                attempt_id: id,
                question_id: graded.question_id,
                selected_answer: Json(graded.selected.clone()),
                is_correct: graded.is_correct,
                marks_obtained: graded.marks_obtained,
                is_attempted: graded.is_attempted,
                answered_at: graded.is_attempted.then_some(fin.submitted_at),
            });
        }
        t.answers.extend(rows);

        let attempt = t
            .attempts
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;
        attempt.status = fin.status;
        attempt.submitted_at = Some(fin.submitted_at);
        attempt.time_spent_seconds = Some(fin.time_spent_seconds);
        attempt.total_questions = card.total_questions;
        attempt.attempted_questions = card.attempted_questions;
        attempt.correct_answers = card.correct_answers;
        attempt.wrong_answers = card.wrong_answers;
        attempt.total_marks = card.total_marks;
        attempt.marks_obtained = card.marks_obtained;
        attempt.percentage_score = card.percentage_score;
        attempt.passed = card.passed;
        attempt.subject_wise_score = Json(card.subject_wise_score.clone());

        Ok(FinalizeOutcome::Finalized(attempt.clone()))
    }

    async fn list_answers(&self, attempt_id: Uuid) -> AppResult<Vec<StudentAnswer>> {
        let t = self.tables.read().await;
        Ok(t
            .answers
            .iter()
            .filter(|a| a.attempt_id == attempt_id)
            .cloned()
            .collect())
    }

    async fn cohort_position(&self, test_id: i64, marks: f64) -> AppResult<(i64, i64)> {
        let t = self.tables.read().await;
        let (better, total) = t
            .graded_on_test(test_id)
            .fold((0i64, 0i64), |(b, n), a| {
                (b + i64::from(a.marks_obtained > marks), n + 1)
            });
        Ok((better, total))
    }

    async fn set_standing(&self, attempt_id: Uuid, standing: Standing) -> AppResult<()> {
        let mut t = self.tables.write().await;
        if let Some(attempt) = t.attempts.get_mut(&attempt_id) {
            attempt.rank = Some(standing.rank);
            attempt.percentile = standing.percentile;
        }
        Ok(())
    }

    async fn top_attempts(&self, test_id: i64, limit: i64) -> AppResult<Vec<TestAttempt>> {
        let t = self.tables.read().await;
        let mut graded: Vec<_> = t.graded_on_test(test_id).cloned().collect();
        graded.sort_by(|a, b| {
            b.marks_obtained
                .total_cmp(&a.marks_obtained)
                .then(a.submitted_at.cmp(&b.submitted_at))
        });
        graded.truncate(limit.max(0) as usize);
        Ok(graded)
    }

    async fn list_overdue_attempts(&self, cutoff: DateTime<Utc>, limit: i64) -> AppResult<Vec<TestAttempt>> {
        let t = self.tables.read().await;
        let mut overdue: Vec<_> = t
            .attempts
            .values()
            .filter(|a| !a.is_terminal())
            .filter(|a| {
                t.tests
                    .get(&a.test_id)
                    .is_some_and(|test| clock::deadline(a.started_at, test.duration_minutes) < cutoff)
            })
            .cloned()
            .collect();
        overdue.sort_by_key(|a| a.started_at);
        overdue.truncate(limit.max(0) as usize);
        Ok(overdue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::{
        engine::scoring::Scorecard,
        models::question::{Difficulty, QuestionType},
    };

    async fn seeded() -> (InMemoryStore, Test) {
        let store = InMemoryStore::new();
        let series: CreateSeriesRequest =
            serde_json::from_value(serde_json::json!({"title": "Series"})).unwrap();
        let series = store.create_series(&series).await.unwrap();
        let test: CreateTestRequest =
            serde_json::from_value(serde_json::json!({"title": "Mock", "duration_minutes": 30}))
                .unwrap();
        let test = store.create_test(series.id, &test).await.unwrap();
        (store, test)
    }

    fn new_attempt(test_id: i64, number: i32) -> NewAttempt {
        NewAttempt {
            id: Uuid::new_v4(),
            user_id: 7,
            test_id,
            attempt_number: number,
            total_questions: 0,
            total_marks: 0.0,
            started_at: Utc::now(),
        }
    }

    fn empty_card() -> Scorecard {
        Scorecard {
            answers: vec![],
            total_questions: 0,
            attempted_questions: 0,
            correct_answers: 0,
            wrong_answers: 0,
            total_marks: 0.0,
            marks_obtained: 0.0,
            percentage_score: 0.0,
            passed: false,
            subject_wise_score: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn second_open_resumes_the_first() {
        let (store, test) = seeded().await;
        let first = store.open_attempt(new_attempt(test.id, 1)).await.unwrap();
        assert!(matches!(first, OpenOutcome::Created(_)));

        let second = store.open_attempt(new_attempt(test.id, 1)).await.unwrap();
        match second {
            OpenOutcome::Resumed(a) => assert_eq!(a.id, first.into_attempt().id),
            other => panic!("expected resume, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn finalize_is_compare_and_set() {
        let (store, test) = seeded().await;
        let attempt = store
            .open_attempt(new_attempt(test.id, 1))
            .await
            .unwrap()
            .into_attempt();
        let fin = Finalization {
            status: AttemptStatus::Submitted,
            submitted_at: Utc::now(),
            time_spent_seconds: 12,
            card: empty_card(),
        };

        let first = store.finalize_attempt(attempt.id, &fin).await.unwrap();
        assert!(matches!(first, FinalizeOutcome::Finalized(_)));
        let second = store.finalize_attempt(attempt.id, &fin).await.unwrap();
        assert!(matches!(second, FinalizeOutcome::AlreadyFinal(_)));

        let missing = store.finalize_attempt(Uuid::new_v4(), &fin).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn question_positions_are_sequential_per_test() {
        let (store, test) = seeded().await;
        let new = NewQuestion {
            test_id: test.id,
            subject_id: None,
            question_type: QuestionType::Numerical,
            difficulty: Difficulty::Easy,
            question_text: "2+2".into(),
            marks: 1,
            negative_marks: 0.0,
            options: BTreeMap::new(),
            correct_answer: serde_json::json!({"answer": "4"}),
            explanation: String::new(),
            solution_video_url: None,
        };
        let a = store.create_question(&new).await.unwrap();
        let b = store.create_question(&new).await.unwrap();
        assert_eq!((a.position, b.position), (1, 2));
    }

    #[tokio::test]
    async fn overdue_listing_uses_test_duration() {
        let (store, test) = seeded().await;
        let mut stale = new_attempt(test.id, 1);
        stale.started_at = Utc::now() - Duration::minutes(31);
        store.open_attempt(stale).await.unwrap();

        let overdue = store.list_overdue_attempts(Utc::now(), 10).await.unwrap();
        assert_eq!(overdue.len(), 1);
        let fresh = store
            .list_overdue_attempts(Utc::now() - Duration::minutes(5), 10)
            .await
            .unwrap();
        assert!(fresh.is_empty());
    }
}
