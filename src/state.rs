// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    services::{
        CatalogService, ExamService,
        access::{CatalogAccess, UserDirectory},
    },
    store::ExamStore,
};

#[derive(Clone)]
pub struct AppState {
    pub exam: Arc<ExamService>,
    pub catalog: Arc<CatalogService>,
    pub config: Config,
}

impl AppState {
    /// Wires both services over one store.
    pub fn new(
        store: Arc<dyn ExamStore>,
        access: Arc<dyn CatalogAccess>,
        users: Arc<dyn UserDirectory>,
        config: Config,
    ) -> Self {
        let exam = ExamService::new(store.clone(), access, users, config.submit_grace_seconds);
        Self {
            exam: Arc::new(exam),
            catalog: Arc::new(CatalogService::new(store)),
            config,
        }
    }
}

impl FromRef<AppState> for Arc<ExamService> {
    fn from_ref(state: &AppState) -> Self {
        state.exam.clone()
    }
}

impl FromRef<AppState> for Arc<CatalogService> {
    fn from_ref(state: &AppState) -> Self {
        state.catalog.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
