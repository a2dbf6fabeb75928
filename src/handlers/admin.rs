// src/handlers/admin.rs
//
// Question bank administration. Every route here sits behind
// `auth_middleware` + `admin_middleware`.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;

use crate::{
    error::AppError,
    models::{
        question::CreateQuestionRequest, subject::CreateSubjectRequest, test::CreateTestRequest,
        test_series::CreateSeriesRequest,
    },
    services::{CatalogService, ExamService},
};

pub async fn create_subject(
    State(catalog): State<Arc<CatalogService>>,
    Json(payload): Json<CreateSubjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    let subject = catalog.create_subject(payload).await?;
    Ok((StatusCode::CREATED, Json(subject)))
}

pub async fn list_subjects(
    State(catalog): State<Arc<CatalogService>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(catalog.list_subjects().await?))
}

pub async fn create_series(
    State(catalog): State<Arc<CatalogService>>,
    Json(payload): Json<CreateSeriesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let series = catalog.create_series(payload).await?;
    Ok((StatusCode::CREATED, Json(series)))
}

pub async fn get_series(
    State(catalog): State<Arc<CatalogService>>,
    Path(series_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(catalog.get_series(series_id).await?))
}

/// Recounts total tests, questions and marks of a series.
pub async fn recompute_series(
    State(catalog): State<Arc<CatalogService>>,
    Path(series_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(catalog.recompute_series_stats(series_id).await?))
}

pub async fn create_test(
    State(catalog): State<Arc<CatalogService>>,
    Path(series_id): Path<i64>,
    Json(payload): Json<CreateTestRequest>,
) -> Result<impl IntoResponse, AppError> {
    let test = catalog.create_test(series_id, payload).await?;
    Ok((StatusCode::CREATED, Json(test)))
}

pub async fn get_test_summary(
    State(catalog): State<Arc<CatalogService>>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(catalog.test_summary(test_id).await?))
}

pub async fn create_question(
    State(catalog): State<Arc<CatalogService>>,
    Path(test_id): Path<i64>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let question = catalog.create_question(test_id, payload).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

/// Questions with their answer keys and lifetime accuracy.
pub async fn list_questions(
    State(catalog): State<Arc<CatalogService>>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let questions = catalog.list_questions(test_id).await?;
    let body: Vec<_> = questions
        .into_iter()
        .map(|q| {
            let accuracy_rate = q.accuracy_rate();
            json!({ "question": q, "accuracy_rate": accuracy_rate })
        })
        .collect();
    Ok(Json(body))
}

/// Runs one expiry sweep now.
pub async fn sweep_attempts(
    State(exam): State<Arc<ExamService>>,
) -> Result<impl IntoResponse, AppError> {
    let closed = exam.sweep_expired(Utc::now()).await?;
    Ok(Json(json!({ "closed": closed })))
}
