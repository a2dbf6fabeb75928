// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, attempt},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Student routes (tests, attempts) require a bearer token.
/// * Admin routes additionally require the admin role.
/// * Global middleware: Trace, CORS.
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let test_routes = Router::new()
        .route("/{test_id}/attempts", post(attempt::start_attempt))
        .route("/{test_id}/overview", get(attempt::get_test_overview))
        .route("/{test_id}/leaderboard", get(attempt::get_leaderboard));

    let attempt_routes = Router::new()
        .route("/{id}", get(attempt::get_attempt))
        .route("/{id}/submit", post(attempt::submit_attempt))
        .route("/{id}/result", get(attempt::get_result))
        .route("/{id}/review", get(attempt::get_review));

    let admin_routes = Router::new()
        .route("/subjects", get(admin::list_subjects).post(admin::create_subject))
        .route("/series", post(admin::create_series))
        .route("/series/{id}", get(admin::get_series))
        .route("/series/{id}/recompute", post(admin::recompute_series))
        .route("/series/{id}/tests", post(admin::create_test))
        .route("/tests/{id}", get(admin::get_test_summary))
        .route(
            "/tests/{id}/questions",
            get(admin::list_questions).post(admin::create_question),
        )
        .route("/attempts/sweep", post(admin::sweep_attempts))
        // Auth runs first, then the admin check
        .layer(middleware::from_fn(admin_middleware));

    let protected = Router::new()
        .nest("/api/tests", test_routes)
        .nest("/api/attempts", attempt_routes)
        .nest("/api/admin", admin_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::Config,
        services::access::{AnonymousDirectory, FreeSeriesOnly},
        store::InMemoryStore,
        utils::jwt::sign_jwt,
    };

    fn app() -> Router {
        let state = AppState::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(FreeSeriesOnly),
            Arc::new(AnonymousDirectory),
            Config::for_tests("router-secret"),
        );
        create_router(state)
    }

    #[tokio::test]
    async fn attempt_routes_require_a_token() {
        let response = app()
            .oneshot(
                Request::post("/api/tests/1/attempts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_test_is_not_found() {
        let token = sign_jwt(9, "student", "router-secret", 60).unwrap();
        let response = app()
            .oneshot(
                Request::post("/api/tests/999/attempts")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
