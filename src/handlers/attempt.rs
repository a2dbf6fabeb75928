// src/handlers/attempt.rs

use std::{collections::HashMap, sync::Arc};

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    config::LEADERBOARD_SIZE, error::AppError, services::ExamService, utils::jwt::Claims,
};

/// Body of a submit call: question id → raw answer.
///
/// Raw answers may be a string, a number, a list of option keys, or the
/// storage shape (`{"answer": ..}` / `{"answers": [..]}`).
#[derive(Debug, Deserialize)]
pub struct SubmitAttemptRequest {
    #[serde(default)]
    pub answers: HashMap<i64, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<i64>,
}

/// Starts (or resumes) the caller's attempt at a test.
/// 201 for a new attempt, 200 for a resumed one.
pub async fn start_attempt(
    State(exam): State<Arc<ExamService>>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let (state, created) = exam.start_attempt(user_id, test_id).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(state)))
}

pub async fn get_test_overview(
    State(exam): State<Arc<ExamService>>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let overview = exam.get_test_overview(claims.user_id()?, test_id).await?;
    Ok(Json(overview))
}

pub async fn get_leaderboard(
    State(exam): State<Arc<ExamService>>,
    Path(test_id): Path<i64>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.unwrap_or(LEADERBOARD_SIZE);
    let entries = exam.leaderboard(test_id, limit).await?;
    Ok(Json(entries))
}

/// Current attempt view; closes the attempt if its time is up.
pub async fn get_attempt(
    State(exam): State<Arc<ExamService>>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let state = exam.get_attempt_state(attempt_id, claims.user_id()?).await?;
    Ok(Json(state))
}

/// Grades and closes the attempt. Repeating the call returns the stored result.
pub async fn submit_attempt(
    State(exam): State<Arc<ExamService>>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let submission = exam
        .submit_attempt(attempt_id, claims.user_id()?, payload.answers)
        .await?;
    Ok(Json(submission))
}

pub async fn get_result(
    State(exam): State<Arc<ExamService>>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let result = exam.get_result(attempt_id, claims.user_id()?).await?;
    Ok(Json(result))
}

pub async fn get_review(
    State(exam): State<Arc<ExamService>>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let review = exam.get_review(attempt_id, claims.user_id()?).await?;
    Ok(Json(review))
}
