// src/lib.rs
// Public library surface for the service binary, the demo and integration tests.

pub mod api;
pub mod config;
pub mod criteria;
pub mod diagnosis;
pub mod evaluator;
pub mod flow;
pub mod metrics;
pub mod questions;
pub mod rule_engine;
pub mod session;
pub mod storage;
pub mod transcript;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::criteria::{CriteriaStore, CriterionId, Truth};
pub use crate::diagnosis::{Classification, Diagnosis};
pub use crate::flow::{FlowController, FlowOutput, InterviewDeps, SessionError};
pub use crate::rule_engine::RuleEngine;

use axum::Router;

use crate::config::AppConfig;

/// Build the interview router from config (without `/metrics`).
pub fn app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let state = AppState::from_config(cfg)?;
    Ok(router(state))
}
