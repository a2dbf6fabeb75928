// src/services/exam.rs

use std::{collections::HashMap, sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    engine::{
        clock::{self, SubmitWindow},
        normalize::display_selected,
        ranking,
        scoring,
    },
    error::{AppError, AppResult},
    models::{
        answer::{QuestionReview, SelectedAnswer},
        attempt::{
            AttemptState, AttemptStatus, LeaderboardEntry, NewAttempt, ScoredResult, Submission,
            TestAttempt, TestOverview,
        },
        question::Question,
        test::Test,
        test_series::TestSeries,
    },
    services::access::{CatalogAccess, UserDirectory, fallback_name},
    store::{ExamStore, FinalizeOutcome, Finalization, OpenOutcome},
};

/// Upper bound on attempts closed by a single sweep pass.
const SWEEP_BATCH: i64 = 200;

/// Attempt lifecycle: start, deliver, submit, grade, rank, review.
///
/// Every operation has an `_at` form taking the current time explicitly;
/// the plain form uses the wall clock.
pub struct ExamService {
    store: Arc<dyn ExamStore>,
    access: Arc<dyn CatalogAccess>,
    users: Arc<dyn UserDirectory>,
    grace_seconds: i64,
}

/// Deterministic per-attempt seed so a reload shows the same order.
fn shuffle_seed(attempt_id: Uuid) -> u64 {
    let bits = attempt_id.as_u128();
    (bits as u64) ^ ((bits >> 64) as u64)
}

fn terminal_state(attempt: &TestAttempt) -> AttemptState {
    AttemptState {
        attempt_id: attempt.id,
        test_id: attempt.test_id,
        status: attempt.status,
        attempt_number: attempt.attempt_number,
        started_at: attempt.started_at,
        time_remaining_seconds: 0,
        questions: Vec::new(),
    }
}

impl ExamService {
    pub fn new(
        store: Arc<dyn ExamStore>,
        access: Arc<dyn CatalogAccess>,
        users: Arc<dyn UserDirectory>,
        grace_seconds: i64,
    ) -> Self {
        Self {
            store,
            access,
            users,
            grace_seconds,
        }
    }

    async fn load_test(&self, test_id: i64) -> AppResult<Test> {
        self.store
            .get_test(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Test not found".to_string()))
    }

    async fn load_series(&self, series_id: i64) -> AppResult<TestSeries> {
        self.store
            .get_series(series_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Test series not found".to_string()))
    }

    /// Someone else's attempt looks exactly like a missing one.
    async fn owned_attempt(&self, attempt_id: Uuid, user_id: i64) -> AppResult<TestAttempt> {
        match self.store.get_attempt(attempt_id).await? {
            Some(attempt) if attempt.user_id == user_id => Ok(attempt),
            _ => Err(AppError::NotFound("Attempt not found".to_string())),
        }
    }

    /// Past the deadline and its grace period: a submission would be discarded.
    fn is_overdue(&self, attempt: &TestAttempt, test: &Test, now: DateTime<Utc>) -> bool {
        clock::submit_window(attempt.started_at, test.duration_minutes, self.grace_seconds, now)
            == SubmitWindow::Closed
    }

    fn state_for(&self, attempt: &TestAttempt, test: &Test, questions: &[Question], now: DateTime<Utc>) -> AttemptState {
        let mut delivered: Vec<_> = questions.iter().map(Question::to_public).collect();
        if test.shuffle_questions {
            let mut rng = StdRng::seed_from_u64(shuffle_seed(attempt.id));
            delivered.shuffle(&mut rng);
        }
        AttemptState {
            attempt_id: attempt.id,
            test_id: attempt.test_id,
            status: attempt.status,
            attempt_number: attempt.attempt_number,
            started_at: attempt.started_at,
            time_remaining_seconds: clock::remaining_seconds(attempt.started_at, test.duration_minutes, now),
            questions: delivered,
        }
    }

    pub async fn start_attempt(&self, user_id: i64, test_id: i64) -> AppResult<(AttemptState, bool)> {
        self.start_attempt_at(user_id, test_id, Utc::now()).await
    }

    /// Opens a new attempt, or resumes the user's open one.
    ///
    /// Returns the delivered state and whether a new attempt was created.
    pub async fn start_attempt_at(
        &self,
        user_id: i64,
        test_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<(AttemptState, bool)> {
        let test = self.load_test(test_id).await?;
        let series = self.load_series(test.series_id).await?;

        if !test.is_active || !series.is_active {
            return Err(AppError::TestUnavailable("This test is not active".to_string()));
        }
        if !test.is_available_at(now) {
            return Err(AppError::TestUnavailable(
                "This test is not available at this time".to_string(),
            ));
        }
        if !self.access.has_access(user_id, &series).await? {
            return Err(AppError::Forbidden(
                "You do not have access to this test series".to_string(),
            ));
        }

        // A stale open attempt would otherwise block the user forever.
        for open in self.store.list_user_attempts(user_id, test_id).await? {
            if !open.is_terminal() && self.is_overdue(&open, &test, now) {
                self.expire(&open, &test, &series, now).await?;
            }
        }

        let used = self.store.count_graded_attempts(user_id, test_id).await?;
        if used >= i64::from(test.max_attempts) {
            return Err(AppError::AttemptLimitExceeded {
                max_attempts: test.max_attempts,
            });
        }

        let questions = self.store.list_questions(test_id).await?;
        if questions.is_empty() {
            return Err(AppError::TestUnavailable("This test has no questions yet".to_string()));
        }

        let new = NewAttempt {
            id: Uuid::new_v4(),
            user_id,
            test_id,
            attempt_number: used as i32 + 1,
            total_questions: questions.len() as i32,
            total_marks: questions.iter().map(|q| f64::from(q.marks)).sum(),
            started_at: now,
        };

        let (attempt, created) = match self.store.open_attempt(new).await? {
            OpenOutcome::Created(a) => {
                tracing::info!(
                    user_id,
                    test_id,
                    attempt_id = %a.id,
                    attempt_number = a.attempt_number,
                    "attempt started"
                );
                (a, true)
            }
            OpenOutcome::Resumed(a) => {
                tracing::info!(user_id, test_id, attempt_id = %a.id, "attempt resumed");
                (a, false)
            }
        };

        Ok((self.state_for(&attempt, &test, &questions, now), created))
    }

    pub async fn get_attempt_state(&self, attempt_id: Uuid, user_id: i64) -> AppResult<AttemptState> {
        self.get_attempt_state_at(attempt_id, user_id, Utc::now()).await
    }

    /// Current view of an attempt. Once the grace period has run out the
    /// attempt is closed first and the terminal state is returned.
    pub async fn get_attempt_state_at(
        &self,
        attempt_id: Uuid,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<AttemptState> {
        let attempt = self.owned_attempt(attempt_id, user_id).await?;
        if attempt.is_terminal() {
            return Ok(terminal_state(&attempt));
        }

        let test = self.load_test(attempt.test_id).await?;
        if self.is_overdue(&attempt, &test, now) {
            let series = self.load_series(test.series_id).await?;
            let closed = self.expire(&attempt, &test, &series, now).await?.into_attempt();
            return Ok(terminal_state(&closed));
        }

        let questions = self.store.list_questions(test.id).await?;
        Ok(self.state_for(&attempt, &test, &questions, now))
    }

    pub async fn submit_attempt(
        &self,
        attempt_id: Uuid,
        user_id: i64,
        answers: HashMap<i64, Value>,
    ) -> AppResult<Submission> {
        self.submit_attempt_at(attempt_id, user_id, answers, Utc::now()).await
    }

    /// Grades and closes an attempt exactly once.
    ///
    /// A repeat (or losing concurrent) submit returns the stored result.
    /// A payload arriving after the grace period is discarded and the attempt
    /// closes as `expired` with every question unattempted.
    pub async fn submit_attempt_at(
        &self,
        attempt_id: Uuid,
        user_id: i64,
        answers: HashMap<i64, Value>,
        now: DateTime<Utc>,
    ) -> AppResult<Submission> {
        let attempt = self.owned_attempt(attempt_id, user_id).await?;
        if attempt.is_terminal() {
            return Ok(Submission::AlreadySubmitted(ScoredResult::from(&attempt)));
        }

        let test = self.load_test(attempt.test_id).await?;
        let series = self.load_series(test.series_id).await?;

        let window = clock::submit_window(attempt.started_at, test.duration_minutes, self.grace_seconds, now);
        let (status, payload) = match window {
            SubmitWindow::Accepted => (AttemptStatus::Submitted, answers),
            SubmitWindow::Closed => {
                tracing::warn!(
                    attempt_id = %attempt.id,
                    "submission arrived after the deadline; answers discarded"
                );
                (AttemptStatus::Expired, HashMap::new())
            }
        };

        match self.finalize(&attempt, &test, &series, &payload, status, now).await? {
            FinalizeOutcome::Finalized(graded) => Ok(Submission::Graded(ScoredResult::from(&graded))),
            FinalizeOutcome::AlreadyFinal(existing) => {
                Ok(Submission::AlreadySubmitted(ScoredResult::from(&existing)))
            }
        }
    }

    /// Closes an overdue attempt as `expired`, graded blank, stamped at its deadline.
    async fn expire(
        &self,
        attempt: &TestAttempt,
        test: &Test,
        series: &TestSeries,
        now: DateTime<Utc>,
    ) -> AppResult<FinalizeOutcome> {
        let closed_at = now.min(clock::deadline(attempt.started_at, test.duration_minutes));
        self.finalize(attempt, test, series, &HashMap::new(), AttemptStatus::Expired, closed_at)
            .await
    }

    /// Grades in memory, then commits status, totals and every answer row in
    /// one compare-and-set. Follow-up analytics are best-effort.
    async fn finalize(
        &self,
        attempt: &TestAttempt,
        test: &Test,
        series: &TestSeries,
        answers: &HashMap<i64, Value>,
        status: AttemptStatus,
        now: DateTime<Utc>,
    ) -> AppResult<FinalizeOutcome> {
        let questions = self.store.list_questions(test.id).await?;
        let card = scoring::grade(&questions, answers, series.marking_policy());

        for graded in card.answers.iter().filter(|g| g.key_missing) {
            tracing::warn!(
                question_id = graded.question_id,
                test_id = test.id,
                "question has no usable answer key; graded as wrong"
            );
        }

        let elapsed = (now - attempt.started_at).num_seconds().max(0);
        let time_spent_seconds = if status == AttemptStatus::Expired {
            elapsed.min(test.duration_seconds())
        } else {
            elapsed
        };

        let stats: Vec<(i64, bool)> = card
            .answers
            .iter()
            .filter(|g| g.is_attempted)
            .map(|g| (g.question_id, g.is_correct))
            .collect();

        let fin = Finalization {
            status,
            submitted_at: now,
            time_spent_seconds,
            card,
        };

        let mut graded = match self.store.finalize_attempt(attempt.id, &fin).await? {
            FinalizeOutcome::Finalized(a) => a,
            other => {
                tracing::info!(attempt_id = %attempt.id, "attempt already closed by a concurrent request");
                return Ok(other);
            }
        };

        tracing::info!(
            attempt_id = %graded.id,
            user_id = graded.user_id,
            test_id = graded.test_id,
            status = ?graded.status,
            marks = graded.marks_obtained,
            percentage = graded.percentage_score,
            "attempt graded"
        );

        if let Err(e) = self.store.record_question_stats(&stats).await {
            tracing::warn!("Failed to update question analytics: {:?}", e);
        }
        if let Err(e) = self.store.refresh_series_attempt_stats(series.id).await {
            tracing::warn!("Failed to update series analytics: {:?}", e);
        }
        match self.refresh_standing(&graded).await {
            Ok(standing) => {
                graded.rank = Some(standing.rank);
                graded.percentile = standing.percentile;
            }
            Err(e) => tracing::warn!("Failed to compute rank: {:?}", e),
        }

        Ok(FinalizeOutcome::Finalized(graded))
    }

    /// Recomputes rank and percentile against every graded attempt on the test.
    async fn refresh_standing(&self, attempt: &TestAttempt) -> AppResult<ranking::Standing> {
        let (better, total) = self
            .store
            .cohort_position(attempt.test_id, attempt.marks_obtained)
            .await?;
        let standing = ranking::standing(better, total);
        self.store.set_standing(attempt.id, standing).await?;
        Ok(standing)
    }

    pub async fn get_result(&self, attempt_id: Uuid, user_id: i64) -> AppResult<ScoredResult> {
        self.get_result_at(attempt_id, user_id, Utc::now()).await
    }

    /// Scored result with a freshly computed rank.
    pub async fn get_result_at(
        &self,
        attempt_id: Uuid,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<ScoredResult> {
        let mut attempt = self.owned_attempt(attempt_id, user_id).await?;
        let test = self.load_test(attempt.test_id).await?;

        if !attempt.is_terminal() {
            if !self.is_overdue(&attempt, &test, now) {
                return Err(AppError::NotReady("Attempt has not been submitted yet".to_string()));
            }
            let series = self.load_series(test.series_id).await?;
            attempt = self.expire(&attempt, &test, &series, now).await?.into_attempt();
        }

        if !test.results_visible_at(now) {
            return Err(AppError::NotReady(
                "Results will be published when the test closes".to_string(),
            ));
        }

        let standing = self.refresh_standing(&attempt).await?;
        attempt.rank = Some(standing.rank);
        attempt.percentile = standing.percentile;
        Ok(ScoredResult::from(&attempt))
    }

    pub async fn get_review(&self, attempt_id: Uuid, user_id: i64) -> AppResult<Vec<QuestionReview>> {
        self.get_review_at(attempt_id, user_id, Utc::now()).await
    }

    /// Per-question breakdown of a graded attempt, in ordinal order.
    pub async fn get_review_at(
        &self,
        attempt_id: Uuid,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<QuestionReview>> {
        let attempt = self.owned_attempt(attempt_id, user_id).await?;
        let test = self.load_test(attempt.test_id).await?;

        if !test.allow_review {
            return Err(AppError::ReviewNotAllowed);
        }
        if !attempt.is_terminal() {
            return Err(AppError::NotReady("Attempt has not been submitted yet".to_string()));
        }
        if !test.results_visible_at(now) {
            return Err(AppError::NotReady(
                "Results will be published when the test closes".to_string(),
            ));
        }

        let questions = self.store.list_questions(test.id).await?;
        let answers: HashMap<i64, _> = self
            .store
            .list_answers(attempt.id)
            .await?
            .into_iter()
            .map(|a| (a.question_id, a))
            .collect();

        let review = questions
            .into_iter()
            .map(|q| {
                let answer = answers.get(&q.id);
                let selected = answer
                    .map(|a| a.selected_answer.0.clone())
                    .unwrap_or(SelectedAnswer::Blank {});
                let options = q.options.0.clone();
                QuestionReview {
                    question_id: q.id,
                    position: q.position,
                    question_type: q.question_type,
                    difficulty: q.difficulty,
                    subject: q.subject_name.clone(),
                    answer_display: display_selected(q.question_type, &selected, &options),
                    correct_answer_display: q
                        .answer_key()
                        .map(|k| k.display(&options))
                        .unwrap_or_else(|| "No correct answer set".to_string()),
                    is_correct: answer.is_some_and(|a| a.is_correct),
                    is_attempted: answer.is_some_and(|a| a.is_attempted),
                    marks: q.marks,
                    marks_obtained: answer.map(|a| a.marks_obtained).unwrap_or(0.0),
                    question_text: q.question_text,
                    selected_answer: selected,
                    options,
                    explanation: q.explanation,
                    solution_video_url: q.solution_video_url,
                }
            })
            .collect();
        Ok(review)
    }

    pub async fn get_test_overview(&self, user_id: i64, test_id: i64) -> AppResult<TestOverview> {
        self.get_test_overview_at(user_id, test_id, Utc::now()).await
    }

    /// Attempts used and remaining for one user on one test.
    pub async fn get_test_overview_at(
        &self,
        user_id: i64,
        test_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<TestOverview> {
        let test = self.load_test(test_id).await?;
        let attempts = self.store.list_user_attempts(user_id, test_id).await?;

        let graded: Vec<&TestAttempt> = attempts.iter().filter(|a| a.is_terminal()).collect();
        let open = attempts.iter().find(|a| !a.is_terminal());
        let best = graded
            .iter()
            .max_by(|a, b| a.marks_obtained.total_cmp(&b.marks_obtained));

        let used = graded.len() as i64;
        let remaining = (i64::from(test.max_attempts) - used).max(0);

        Ok(TestOverview {
            test_id,
            max_attempts: test.max_attempts,
            attempts_used: used,
            attempts_remaining: remaining,
            can_attempt: test.is_active && test.is_available_at(now) && (remaining > 0 || open.is_some()),
            open_attempt_id: open.map(|a| a.id),
            best_marks: best.map(|a| a.marks_obtained),
            best_percentage: best.map(|a| a.percentage_score),
        })
    }

    /// Best graded attempts on a test, ties sharing a rank.
    pub async fn leaderboard(&self, test_id: i64, limit: i64) -> AppResult<Vec<LeaderboardEntry>> {
        self.load_test(test_id).await?;
        let top = self.store.top_attempts(test_id, limit.clamp(1, 100)).await?;

        let mut user_ids: Vec<i64> = top.iter().map(|a| a.user_id).collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        let names = match self.users.display_names(&user_ids).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("User directory unavailable: {:?}", e);
                HashMap::new()
            }
        };

        let marks: Vec<f64> = top.iter().map(|a| a.marks_obtained).collect();
        let ranks = ranking::competition_ranks(&marks);

        Ok(top
            .into_iter()
            .zip(ranks)
            .map(|(a, rank)| LeaderboardEntry {
                rank,
                user_id: a.user_id,
                display_name: names
                    .get(&a.user_id)
                    .cloned()
                    .unwrap_or_else(|| fallback_name(a.user_id)),
                marks_obtained: a.marks_obtained,
                percentage_score: a.percentage_score,
                submitted_at: a.submitted_at,
            })
            .collect())
    }

    /// Closes open attempts whose deadline and grace period have both passed.
    /// Returns how many were closed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let cutoff = now - Duration::seconds(self.grace_seconds.max(0));
        let overdue = self.store.list_overdue_attempts(cutoff, SWEEP_BATCH).await?;
        let mut closed = 0;

        for attempt in overdue {
            match self.expire_overdue(&attempt, now).await {
                Ok(FinalizeOutcome::Finalized(_)) => closed += 1,
                Ok(FinalizeOutcome::AlreadyFinal(_)) => {}
                Err(e) => tracing::error!(attempt_id = %attempt.id, "Failed to expire attempt: {:?}", e),
            }
        }

        if closed > 0 {
            tracing::info!(closed, "expired attempts swept");
        }
        Ok(closed)
    }

    async fn expire_overdue(&self, attempt: &TestAttempt, now: DateTime<Utc>) -> AppResult<FinalizeOutcome> {
        let test = self.load_test(attempt.test_id).await?;
        let series = self.load_series(test.series_id).await?;
        self.expire(attempt, &test, &series, now).await
    }

    /// Runs `sweep_expired` on a fixed period until the task is aborted.
    pub fn spawn_expiry_sweeper(self: Arc<Self>, period: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_expired(Utc::now()).await {
                    tracing::error!("Expiry sweep failed: {:?}", e);
                }
            }
        })
    }
}
