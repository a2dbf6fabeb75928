// src/config.rs

use std::env;
use dotenvy::dotenv;

/// Grading rejects payloads that arrive later than this past the deadline.
pub const DEFAULT_SUBMIT_GRACE_SECONDS: i64 = 30;

/// Default number of leaderboard rows returned.
pub const LEADERBOARD_SIZE: i64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub rust_log: String,
    pub bind_addr: String,
    pub cors_origins: Vec<String>,

    /// Seconds a submission may trail the deadline and still be graded.
    pub submit_grace_seconds: i64,

    /// Period of the expiry sweeper. Zero disables it.
    pub sweep_interval_secs: u64,

    pub access_service_url: Option<String>,
    pub user_service_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| parse_list(&v))
            .unwrap_or_else(|_| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://127.0.0.1:3000".to_string(),
                ]
            });

        let submit_grace_seconds = env::var("SUBMIT_GRACE_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SUBMIT_GRACE_SECONDS);

        let sweep_interval_secs = env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        Self {
            database_url,
            jwt_secret,
            rust_log,
            bind_addr,
            cors_origins,
            submit_grace_seconds,
            sweep_interval_secs,
            access_service_url: non_empty_var("ACCESS_SERVICE_URL"),
            user_service_url: non_empty_var("USER_SERVICE_URL"),
        }
    }

    /// Configuration for tests and local tooling; no database is contacted.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            database_url: String::new(),
            jwt_secret: jwt_secret.to_string(),
            rust_log: "error".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
            submit_grace_seconds: DEFAULT_SUBMIT_GRACE_SECONDS,
            sweep_interval_secs: 0,
            access_service_url: None,
            user_service_url: None,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
