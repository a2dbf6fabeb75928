// src/services/access.rs
//
// Collaborators the exam core consults but does not own: catalog entitlement
// and user display names.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{config::Config, error::AppResult, models::test_series::TestSeries};

/// "Does this user currently have access to this series?"
#[async_trait]
pub trait CatalogAccess: Send + Sync {
    async fn has_access(&self, user_id: i64, series: &TestSeries) -> AppResult<bool>;
}

/// Resolves user ids to display names for leaderboards.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_names(&self, user_ids: &[i64]) -> AppResult<HashMap<i64, String>>;
}

pub fn fallback_name(user_id: i64) -> String {
    format!("User {}", user_id)
}

/// Grants free series only. Used when no entitlement service is configured.
pub struct FreeSeriesOnly;

#[async_trait]
impl CatalogAccess for FreeSeriesOnly {
    async fn has_access(&self, _user_id: i64, series: &TestSeries) -> AppResult<bool> {
        Ok(series.is_free)
    }
}

/// Names every user `User <id>`.
pub struct AnonymousDirectory;

#[async_trait]
impl UserDirectory for AnonymousDirectory {
    async fn display_names(&self, user_ids: &[i64]) -> AppResult<HashMap<i64, String>> {
        Ok(user_ids.iter().map(|id| (*id, fallback_name(*id))).collect())
    }
}

#[derive(Deserialize)]
struct AccessResponse {
    has_access: bool,
}

#[derive(Deserialize)]
struct UserEntry {
    id: i64,
    display_name: String,
}

/// Asks the catalog service; free series never leave the process.
///
/// `GET {base}/access/{user_id}/series/{series_id}` → `{"has_access": bool}`
pub struct HttpCatalogAccess {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalogAccess {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CatalogAccess for HttpCatalogAccess {
    async fn has_access(&self, user_id: i64, series: &TestSeries) -> AppResult<bool> {
        if series.is_free {
            return Ok(true);
        }
        let url = format!("{}/access/{}/series/{}", self.base_url, user_id, series.id);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body: AccessResponse = response.error_for_status()?.json().await?;
        Ok(body.has_access)
    }
}

/// `GET {base}/users?ids=1,2,3` → `[{"id": 1, "display_name": "..."}]`
pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn display_names(&self, user_ids: &[i64]) -> AppResult<HashMap<i64, String>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids = user_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let entries: Vec<UserEntry> = self
            .client
            .get(format!("{}/users", self.base_url))
            .query(&[("ids", ids)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut names: HashMap<i64, String> =
            entries.into_iter().map(|u| (u.id, u.display_name)).collect();
        for id in user_ids {
            names.entry(*id).or_insert_with(|| fallback_name(*id));
        }
        Ok(names)
    }
}

/// Picks HTTP collaborators when their URLs are configured, local fallbacks otherwise.
pub fn collaborators_from_config(config: &Config) -> (Arc<dyn CatalogAccess>, Arc<dyn UserDirectory>) {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_default();

    let access: Arc<dyn CatalogAccess> = match &config.access_service_url {
        Some(url) => Arc::new(HttpCatalogAccess::new(client.clone(), url)),
        None => Arc::new(FreeSeriesOnly),
    };
    let users: Arc<dyn UserDirectory> = match &config.user_service_url {
        Some(url) => Arc::new(HttpUserDirectory::new(client, url)),
        None => Arc::new(AnonymousDirectory),
    };
    (access, users)
}
