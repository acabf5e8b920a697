//! Answer evaluator: provider abstraction + daily budget + test doubles.
//!
//! The flow controller hands every participant answer to an `AnswerEvaluator`
//! and gets back criterion updates or an ambiguity signal. The core treats the
//! call as opaque; any failure is surfaced to the caller, never guessed around.

pub mod limit;
pub mod mock;
pub mod openai;
pub mod prompt;
pub mod reply;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::evaluator::EvaluatorConfig;
use crate::criteria::{CriteriaStore, CriterionUpdate};
use crate::questions::QuestionDef;

pub use limit::DailyLimited;
pub use mock::{DisabledEvaluator, MockEvaluator, ScriptedEvaluator};
pub use openai::OpenAiEvaluator;

pub const ENV_TEST_MODE: &str = "EVALUATOR_TEST_MODE";

/// Everything the evaluator may look at for one answer.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub question: &'a QuestionDef,
    pub answer: &'a str,
    /// Criteria resolved so far in this session.
    pub context: &'a CriteriaStore,
    /// 0 for the first answer, then 1.. for each clarification round.
    pub attempt: u8,
}

/// Structured result of evaluating one answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub updates: Vec<CriterionUpdate>,
    /// The answer did not settle the question.
    #[serde(default)]
    pub ambiguous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
    /// Definitive guess offered alongside an ambiguous answer; used once the
    /// clarification budget is spent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub best_effort: Vec<CriterionUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Evaluation {
    pub fn resolved(updates: Vec<CriterionUpdate>) -> Self {
        Self {
            updates,
            ..Default::default()
        }
    }

    pub fn ambiguous(clarification: Option<String>) -> Self {
        Self {
            ambiguous: true,
            clarification,
            ..Default::default()
        }
    }

    pub fn with_best_effort(mut self, updates: Vec<CriterionUpdate>) -> Self {
        self.best_effort = updates;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluatorError {
    #[error("answer evaluator is disabled: {0}")]
    Disabled(String),

    #[error("evaluator transport error: {0}")]
    Transport(String),

    #[error("evaluator returned HTTP {0}")]
    Status(u16),

    #[error("evaluator timed out after {0}s")]
    Timeout(u64),

    #[error("malformed evaluator output: {0}")]
    Malformed(String),

    #[error("daily evaluator budget of {0} calls exhausted")]
    BudgetExhausted(u32),
}

pub type EvalFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Evaluation, EvaluatorError>> + Send + 'a>>;

/// Trait object used by the flow controller (and tests).
pub trait AnswerEvaluator: Send + Sync {
    fn evaluate<'a>(&'a self, request: EvaluationRequest<'a>) -> EvalFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynEvaluator = Arc<dyn AnswerEvaluator>;

/// Factory: build an evaluator according to config and environment.
///
/// * If `EVALUATOR_TEST_MODE=mock`, returns the deterministic mock.
/// * Else if `config.enabled == false`, returns a disabled evaluator.
/// * Else builds the real provider wrapped with the daily budget.
pub fn build_evaluator_from_config(config: &EvaluatorConfig) -> DynEvaluator {
    if std::env::var(ENV_TEST_MODE)
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockEvaluator);
    }

    if !config.enabled {
        return Arc::new(DisabledEvaluator::new("disabled in config"));
    }

    match config.provider.as_str() {
        "openai" => match OpenAiEvaluator::from_config(config) {
            Ok(provider) => Arc::new(DailyLimited::new(
                provider,
                config.state_dir.clone(),
                config.daily_limit,
            )),
            Err(e) => {
                tracing::error!(error = %e, "failed to build OpenAI evaluator");
                Arc::new(DisabledEvaluator::new(e.to_string()))
            }
        },
        other => {
            tracing::warn!(provider = other, "unsupported evaluator provider");
            Arc::new(DisabledEvaluator::new(format!("unsupported provider `{other}`")))
        }
    }
}
