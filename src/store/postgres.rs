// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json};
use uuid::Uuid;

use crate::{
    engine::ranking::Standing,
    error::{AppError, AppResult},
    models::{
        answer::StudentAnswer,
        attempt::{NewAttempt, TestAttempt},
        question::Question,
        subject::{CreateSubjectRequest, Subject},
        test::{CreateTestRequest, Test},
        test_series::{CreateSeriesRequest, SeriesStats, TestSeries},
    },
    store::{ExamStore, FinalizeOutcome, Finalization, NewQuestion, OpenOutcome},
};

const OPEN_STATUSES: &str = "('started', 'in_progress')";
const GRADED_STATUSES: &str = "('submitted', 'expired')";

/// `ExamStore` backed by Postgres.
///
/// All queries are runtime-checked. Atomicity relies on the schema in
/// `migrations/`: the partial unique index on open attempts and
/// `UNIQUE(attempt_id, question_id)` on answers.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unique_to_conflict(err: sqlx::Error, message: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(message.to_string())
        }
        _ => AppError::from(err),
    }
}

#[async_trait]
impl ExamStore for PgStore {
    async fn create_subject(&self, req: &CreateSubjectRequest) -> AppResult<Subject> {
        sqlx::query_as::<_, Subject>(
            "INSERT INTO subjects (name, code, color, icon)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(&req.name)
        .bind(req.code.to_uppercase())
        .bind(&req.color)
        .bind(&req.icon)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_to_conflict(e, "Subject name or code already exists"))
    }

    async fn get_subject(&self, id: i64) -> AppResult<Option<Subject>> {
        let subject = sqlx::query_as::<_, Subject>("SELECT * FROM subjects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(subject)
    }

    async fn list_subjects(&self) -> AppResult<Vec<Subject>> {
        let subjects = sqlx::query_as::<_, Subject>("SELECT * FROM subjects ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(subjects)
    }

    async fn create_series(&self, req: &CreateSeriesRequest) -> AppResult<TestSeries> {
        let price = if req.is_free { 0.0 } else { req.price };
        let series = sqlx::query_as::<_, TestSeries>(
            "INSERT INTO test_series
                (title, description, is_free, price, has_negative_marking, negative_marks, pass_percentage)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(&req.title)
        .bind(&req.description)
        .bind(req.is_free)
        .bind(price)
        .bind(req.has_negative_marking)
        .bind(req.negative_marks)
        .bind(req.pass_percentage)
        .fetch_one(&self.pool)
        .await?;
        Ok(series)
    }

    async fn get_series(&self, id: i64) -> AppResult<Option<TestSeries>> {
        let series = sqlx::query_as::<_, TestSeries>("SELECT * FROM test_series WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(series)
    }

    async fn recompute_series_stats(&self, series_id: i64) -> AppResult<SeriesStats> {
        let row: Option<(i32, i32, i64)> = sqlx::query_as(
            "WITH stats AS (
                SELECT COUNT(DISTINCT t.id)::INT AS total_tests,
                       COUNT(q.id)::INT AS total_questions,
                       COALESCE(SUM(q.marks), 0)::BIGINT AS total_marks
                FROM tests t
                LEFT JOIN questions q ON q.test_id = t.id
                WHERE t.series_id = $1 AND t.is_active
             )
             UPDATE test_series s
             SET total_tests = stats.total_tests,
                 total_questions = stats.total_questions,
                 total_marks = stats.total_marks
             FROM stats
             WHERE s.id = $1
             RETURNING s.total_tests, s.total_questions, s.total_marks",
        )
        .bind(series_id)
        .fetch_optional(&self.pool)
        .await?;

        let (total_tests, total_questions, total_marks) =
            row.ok_or_else(|| AppError::NotFound("Test series not found".to_string()))?;
        Ok(SeriesStats {
            total_tests,
            total_questions,
            total_marks,
        })
    }

    async fn refresh_series_attempt_stats(&self, series_id: i64) -> AppResult<()> {
        let sql = format!(
            "UPDATE test_series s
             SET total_attempts = agg.total_attempts,
                 average_score = agg.average_score
             FROM (
                SELECT COUNT(a.id) AS total_attempts,
                       COALESCE(ROUND(AVG(a.marks_obtained)::NUMERIC, 2), 0)::DOUBLE PRECISION AS average_score
                FROM test_attempts a
                JOIN tests t ON t.id = a.test_id
                WHERE t.series_id = $1 AND a.status IN {}
             ) agg
             WHERE s.id = $1",
            GRADED_STATUSES
        );
        sqlx::query(&sql).bind(series_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn create_test(&self, series_id: i64, req: &CreateTestRequest) -> AppResult<Test> {
        let test = sqlx::query_as::<_, Test>(
            "INSERT INTO tests
                (series_id, title, description, duration_minutes, max_attempts,
                 shuffle_questions, show_result_immediately, allow_review, start_time, end_time)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING *",
        )
        .bind(series_id)
        .bind(&req.title)
        .bind(&req.description)
        .bind(req.duration_minutes)
        .bind(req.max_attempts)
        .bind(req.shuffle_questions)
        .bind(req.show_result_immediately)
        .bind(req.allow_review)
        .bind(req.start_time)
        .bind(req.end_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(test)
    }

    async fn get_test(&self, id: i64) -> AppResult<Option<Test>> {
        let test = sqlx::query_as::<_, Test>("SELECT * FROM tests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(test)
    }

    async fn create_question(&self, new: &NewQuestion) -> AppResult<Question> {
        // Position is last + 1; the unique (test_id, position) index turns a race into a conflict.
        sqlx::query_as::<_, Question>(
            "WITH inserted AS (
                INSERT INTO questions
                    (test_id, subject_id, question_type, difficulty, question_text, marks,
                     negative_marks, options, correct_answer, explanation, solution_video_url, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                        COALESCE((SELECT MAX(position) FROM questions WHERE test_id = $1), 0) + 1)
                RETURNING *
             )
             SELECT i.*, s.name AS subject_name
             FROM inserted i
             LEFT JOIN subjects s ON s.id = i.subject_id",
        )
        .bind(new.test_id)
        .bind(new.subject_id)
        .bind(new.question_type)
        .bind(new.difficulty)
        .bind(&new.question_text)
        .bind(new.marks)
        .bind(new.negative_marks)
        .bind(Json(&new.options))
        .bind(Json(&new.correct_answer))
        .bind(&new.explanation)
        .bind(&new.solution_video_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_to_conflict(e, "Question was added concurrently, please retry"))
    }

    async fn list_questions(&self, test_id: i64) -> AppResult<Vec<Question>> {
        let questions = sqlx::query_as::<_, Question>(
            "SELECT q.*, s.name AS subject_name
             FROM questions q
             LEFT JOIN subjects s ON s.id = q.subject_id
             WHERE q.test_id = $1
             ORDER BY q.position, q.id",
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(questions)
    }

    async fn record_question_stats(&self, results: &[(i64, bool)]) -> AppResult<()> {
        if results.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
        let correct: Vec<bool> = results.iter().map(|(_, c)| *c).collect();

        sqlx::query(
            "UPDATE questions q
             SET total_attempts = q.total_attempts + 1,
                 correct_attempts = q.correct_attempts + CASE WHEN r.correct THEN 1 ELSE 0 END
             FROM UNNEST($1::BIGINT[], $2::BOOLEAN[]) AS r(id, correct)
             WHERE q.id = r.id",
        )
        .bind(&ids)
        .bind(&correct)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_graded_attempts(&self, user_id: i64, test_id: i64) -> AppResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM test_attempts
             WHERE user_id = $1 AND test_id = $2 AND status IN {}",
            GRADED_STATUSES
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(user_id)
            .bind(test_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn open_attempt(&self, new: NewAttempt) -> AppResult<OpenOutcome> {
        // Either unique index (one open attempt, or attempt_number) makes the insert a no-op.
        let inserted = sqlx::query_as::<_, TestAttempt>(
            "INSERT INTO test_attempts
                (id, user_id, test_id, attempt_number, status, started_at,
                 total_questions, total_marks, created_at)
             VALUES ($1, $2, $3, $4, 'in_progress', $5, $6, $7, $5)
             ON CONFLICT DO NOTHING
             RETURNING *",
        )
        .bind(new.id)
        .bind(new.user_id)
        .bind(new.test_id)
        .bind(new.attempt_number)
        .bind(new.started_at)
        .bind(new.total_questions)
        .bind(new.total_marks)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(attempt) = inserted {
            return Ok(OpenOutcome::Created(attempt));
        }

        let sql = format!(
            "SELECT * FROM test_attempts
             WHERE user_id = $1 AND test_id = $2 AND status IN {}",
            OPEN_STATUSES
        );
        let open = sqlx::query_as::<_, TestAttempt>(&sql)
            .bind(new.user_id)
            .bind(new.test_id)
            .fetch_optional(&self.pool)
            .await?;

        match open {
            Some(attempt) => Ok(OpenOutcome::Resumed(attempt)),
            None => Err(AppError::Conflict(
                "Attempt was started concurrently, please retry".to_string(),
            )),
        }
    }

    async fn get_attempt(&self, id: Uuid) -> AppResult<Option<TestAttempt>> {
        let attempt = sqlx::query_as::<_, TestAttempt>("SELECT * FROM test_attempts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(attempt)
    }

    async fn list_user_attempts(&self, user_id: i64, test_id: i64) -> AppResult<Vec<TestAttempt>> {
        let attempts = sqlx::query_as::<_, TestAttempt>(
            "SELECT * FROM test_attempts
             WHERE user_id = $1 AND test_id = $2
             ORDER BY attempt_number",
        )
        .bind(user_id)
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn finalize_attempt(&self, id: Uuid, fin: &Finalization) -> AppResult<FinalizeOutcome> {
        let card = &fin.card;
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE test_attempts
             SET status = $2,
                 submitted_at = $3,
                 time_spent_seconds = $4,
                 total_questions = $5,
                 attempted_questions = $6,
                 correct_answers = $7,
                 wrong_answers = $8,
                 total_marks = $9,
                 marks_obtained = $10,
                 percentage_score = $11,
                 passed = $12,
                 subject_wise_score = $13
             WHERE id = $1 AND status IN {}
             RETURNING *",
            OPEN_STATUSES
        );
        let updated = sqlx::query_as::<_, TestAttempt>(&sql)
            .bind(id)
            .bind(fin.status)
            .bind(fin.submitted_at)
            .bind(fin.time_spent_seconds)
            .bind(card.total_questions)
            .bind(card.attempted_questions)
            .bind(card.correct_answers)
            .bind(card.wrong_answers)
            .bind(card.total_marks)
            .bind(card.marks_obtained)
            .bind(card.percentage_score)
            .bind(card.passed)
            .bind(Json(&card.subject_wise_score))
            .fetch_optional(&mut *tx)
            .await?;

        let Some(attempt) = updated else {
            // Lost the race, or the id is unknown.
            let current = sqlx::query_as::<_, TestAttempt>("SELECT * FROM test_attempts WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            return match current {
                Some(attempt) => Ok(FinalizeOutcome::AlreadyFinal(attempt)),
                None => Err(AppError::NotFound("Attempt not found".to_string())),
            };
        };

        if !card.answers.is_empty() {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO student_answers
                    (attempt_id, question_id, selected_answer, is_correct, marks_obtained, is_attempted, answered_at) ",
            );
            builder.push_values(&card.answers, |mut row, graded| {
                row.push_bind(id)
                    .push_bind(graded.question_id)
                    .push_bind(Json(graded.selected.clone()))
                    .push_bind(graded.is_correct)
                    .push_bind(graded.marks_obtained)
                    .push_bind(graded.is_attempted)
                    .push_bind(graded.is_attempted.then_some(fin.submitted_at));
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(FinalizeOutcome::Finalized(attempt))
    }

    async fn list_answers(&self, attempt_id: Uuid) -> AppResult<Vec<StudentAnswer>> {
        let answers = sqlx::query_as::<_, StudentAnswer>(
            "SELECT * FROM student_answers WHERE attempt_id = $1 ORDER BY id",
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(answers)
    }

    async fn cohort_position(&self, test_id: i64, marks: f64) -> AppResult<(i64, i64)> {
        let sql = format!(
            "SELECT COUNT(*) FILTER (WHERE marks_obtained > $2), COUNT(*)
             FROM test_attempts
             WHERE test_id = $1 AND status IN {}",
            GRADED_STATUSES
        );
        let position: (i64, i64) = sqlx::query_as(&sql)
            .bind(test_id)
            .bind(marks)
            .fetch_one(&self.pool)
            .await?;
        Ok(position)
    }

    async fn set_standing(&self, attempt_id: Uuid, standing: Standing) -> AppResult<()> {
        sqlx::query("UPDATE test_attempts SET rank = $2, percentile = $3 WHERE id = $1")
            .bind(attempt_id)
            .bind(standing.rank)
            .bind(standing.percentile)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn top_attempts(&self, test_id: i64, limit: i64) -> AppResult<Vec<TestAttempt>> {
        let sql = format!(
            "SELECT * FROM test_attempts
             WHERE test_id = $1 AND status IN {}
             ORDER BY marks_obtained DESC, submitted_at ASC
             LIMIT $2",
            GRADED_STATUSES
        );
        let attempts = sqlx::query_as::<_, TestAttempt>(&sql)
            .bind(test_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(attempts)
    }

    async fn list_overdue_attempts(&self, cutoff: DateTime<Utc>, limit: i64) -> AppResult<Vec<TestAttempt>> {
        let sql = format!(
            "SELECT a.* FROM test_attempts a
             JOIN tests t ON t.id = a.test_id
             WHERE a.status IN {}
               AND a.started_at + make_interval(mins => t.duration_minutes) < $1
             ORDER BY a.started_at
             LIMIT $2",
            OPEN_STATUSES
        );
        let attempts = sqlx::query_as::<_, TestAttempt>(&sql)
            .bind(cutoff)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(attempts)
    }
}
