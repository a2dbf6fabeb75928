// src/services/catalog.rs

use std::sync::Arc;

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        question::{CreateQuestionRequest, Question, QuestionType, true_false_options, validate_answer_key},
        subject::{CreateSubjectRequest, Subject},
        test::{CreateTestRequest, DifficultyBreakdown, Test, TestSummary},
        test_series::{CreateSeriesRequest, SeriesStats, TestSeries},
    },
    store::{ExamStore, NewQuestion},
    utils::html::clean_html,
};

/// Administrator-facing question bank.
pub struct CatalogService {
    store: Arc<dyn ExamStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn ExamStore>) -> Self {
        Self { store }
    }

    pub async fn create_subject(&self, req: CreateSubjectRequest) -> AppResult<Subject> {
        req.validate()?;
        let subject = self.store.create_subject(&req).await?;
        tracing::info!(subject_id = subject.id, code = %subject.code, "subject created");
        Ok(subject)
    }

    pub async fn list_subjects(&self) -> AppResult<Vec<Subject>> {
        self.store.list_subjects().await
    }

    pub async fn create_series(&self, req: CreateSeriesRequest) -> AppResult<TestSeries> {
        req.validate()?;
        let series = self.store.create_series(&req).await?;
        tracing::info!(series_id = series.id, "test series created");
        Ok(series)
    }

    pub async fn get_series(&self, series_id: i64) -> AppResult<TestSeries> {
        self.store
            .get_series(series_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Test series not found".to_string()))
    }

    /// Recounts the series aggregates from its active tests.
    pub async fn recompute_series_stats(&self, series_id: i64) -> AppResult<SeriesStats> {
        let stats = self.store.recompute_series_stats(series_id).await?;
        tracing::info!(
            series_id,
            total_tests = stats.total_tests,
            total_questions = stats.total_questions,
            total_marks = stats.total_marks,
            "series stats recomputed"
        );
        Ok(stats)
    }

    pub async fn create_test(&self, series_id: i64, req: CreateTestRequest) -> AppResult<Test> {
        req.validate()?;
        self.get_series(series_id).await?;
        let test = self.store.create_test(series_id, &req).await?;
        tracing::info!(series_id, test_id = test.id, "test created");
        Ok(test)
    }

    async fn get_test(&self, test_id: i64) -> AppResult<Test> {
        self.store
            .get_test(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Test not found".to_string()))
    }

    /// Question count, marks and difficulty mix, computed on read.
    pub async fn test_summary(&self, test_id: i64) -> AppResult<TestSummary> {
        let test = self.get_test(test_id).await?;
        let questions = self.store.list_questions(test_id).await?;

        let mut difficulty_breakdown = DifficultyBreakdown::default();
        for q in &questions {
            difficulty_breakdown.add(q.difficulty);
        }

        Ok(TestSummary {
            test,
            question_count: questions.len() as i64,
            total_marks: questions.iter().map(|q| i64::from(q.marks)).sum(),
            difficulty_breakdown,
        })
    }

    /// Admin view of a test's questions, answer keys included.
    pub async fn list_questions(&self, test_id: i64) -> AppResult<Vec<Question>> {
        self.get_test(test_id).await?;
        self.store.list_questions(test_id).await
    }

    /// Adds a question at the end of the test.
    ///
    /// The answer key is checked against the type and the options here, so
    /// grading never meets a key it cannot use for new questions.
    pub async fn create_question(&self, test_id: i64, req: CreateQuestionRequest) -> AppResult<Question> {
        req.validate()?;

        let test = self.get_test(test_id).await?;
        let series = self.get_series(test.series_id).await?;

        if let Some(subject_id) = req.subject_id {
            if self.store.get_subject(subject_id).await?.is_none() {
                return Err(AppError::BadRequest(format!("Unknown subject {}", subject_id)));
            }
        }

        let options = if req.question_type == QuestionType::TrueFalse {
            true_false_options()
        } else {
            req.options
                .iter()
                .map(|(k, v)| (k.trim().to_lowercase(), clean_html(v)))
                .collect()
        };

        validate_answer_key(req.question_type, &options, &req.correct_answer)
            .map_err(AppError::BadRequest)?;

        let question_text = clean_html(req.question_text.trim());
        if question_text.is_empty() {
            return Err(AppError::BadRequest("Question text is empty after sanitizing".to_string()));
        }

        let new = NewQuestion {
            test_id,
            subject_id: req.subject_id,
            question_type: req.question_type,
            difficulty: req.difficulty,
            question_text,
            marks: req.marks,
            negative_marks: req.negative_marks.unwrap_or(series.negative_marks),
            options,
            correct_answer: req.correct_answer,
            explanation: clean_html(req.explanation.trim()),
            solution_video_url: req.solution_video_url,
        };

        let question = self.store.create_question(&new).await?;
        tracing::info!(
            test_id,
            question_id = question.id,
            position = question.position,
            "question added"
        );
        Ok(question)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::store::InMemoryStore;

    async fn catalog_with_test() -> (CatalogService, Test) {
        let catalog = CatalogService::new(Arc::new(InMemoryStore::new()));
        let series = catalog
            .create_series(serde_json::from_value(json!({"title": "Prelims", "negative_marks": 0.5})).unwrap())
            .await
            .unwrap();
        let test = catalog
            .create_test(
                series.id,
                serde_json::from_value(json!({"title": "Mock 1", "duration_minutes": 20})).unwrap(),
            )
            .await
            .unwrap();
        (catalog, test)
    }

    #[tokio::test]
    async fn question_defaults_come_from_the_series() {
        let (catalog, test) = catalog_with_test().await;
        let q = catalog
            .create_question(
                test.id,
                serde_json::from_value(json!({
                    "question_type": "single_choice",
                    "question_text": "Capital of France?",
                    "options": {"A": "Paris", "b": "Rome"},
                    "correct_answer": {"answer": "a"}
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(q.negative_marks, 0.5);
        assert_eq!(q.position, 1);
        assert!(q.options.0.contains_key("a"));
    }

    #[tokio::test]
    async fn true_false_gets_fixed_options() {
        let (catalog, test) = catalog_with_test().await;
        let q = catalog
            .create_question(
                test.id,
                serde_json::from_value(json!({
                    "question_type": "true_false",
                    "question_text": "The earth is round.",
                    "options": {"x": "ignored"},
                    "correct_answer": {"answer": "a"}
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(q.options.0, true_false_options());
    }

    #[tokio::test]
    async fn answer_key_outside_options_is_rejected() {
        let (catalog, test) = catalog_with_test().await;
        let err = catalog
            .create_question(
                test.id,
                serde_json::from_value(json!({
                    "question_type": "multiple_choice",
                    "question_text": "Pick primes",
                    "options": {"a": "2", "b": "4"},
                    "correct_answer": {"answers": ["a", "z"]}
                }))
                .unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn question_text_is_sanitized() {
        let (catalog, test) = catalog_with_test().await;
        let q = catalog
            .create_question(
                test.id,
                serde_json::from_value(json!({
                    "question_type": "fill_blank",
                    "question_text": "<b>Capital</b><script>alert(1)</script> of Italy",
                    "correct_answer": {"answer": "rome"}
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(q.question_text, "<b>Capital</b> of Italy");
    }

    #[tokio::test]
    async fn summary_counts_difficulties() {
        let (catalog, test) = catalog_with_test().await;
        for difficulty in ["easy", "hard", "hard"] {
            catalog
                .create_question(
                    test.id,
                    serde_json::from_value(json!({
                        "question_type": "numerical",
                        "difficulty": difficulty,
                        "question_text": "2 + 2",
                        "marks": 2,
                        "correct_answer": {"answer": "4"}
                    }))
                    .unwrap(),
                )
                .await
                .unwrap();
        }
        let summary = catalog.test_summary(test.id).await.unwrap();
        assert_eq!(summary.question_count, 3);
        assert_eq!(summary.total_marks, 6);
        assert_eq!(summary.difficulty_breakdown.hard, 2);
        assert_eq!(summary.difficulty_breakdown.medium, 0);

        let stats = catalog.recompute_series_stats(test.series_id).await.unwrap();
        assert_eq!((stats.total_tests, stats.total_questions, stats.total_marks), (1, 3, 6));
    }
}
