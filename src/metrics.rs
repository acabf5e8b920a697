use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const SESSIONS_STARTED: &str = "interview_sessions_started_total";
pub const SESSIONS_COMPLETED: &str = "interview_sessions_completed_total";
pub const SESSIONS_ACTIVE: &str = "interview_sessions_active";
pub const CLARIFICATIONS: &str = "interview_clarifications_total";
pub const CONTRADICTIONS: &str = "interview_contradictions_total";
pub const EVALUATOR_FAILURES: &str = "interview_evaluator_failures_total";

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(SESSIONS_STARTED, "Interviews started.");
        describe_counter!(
            SESSIONS_COMPLETED,
            "Interviews finished, labelled by diagnosis."
        );
        describe_gauge!(SESSIONS_ACTIVE, "Sessions held in the registry.");
        describe_counter!(CLARIFICATIONS, "Clarification prompts issued.");
        describe_counter!(
            CONTRADICTIONS,
            "Answers that flipped a definitive criterion."
        );
        describe_counter!(
            EVALUATOR_FAILURES,
            "Answer evaluator calls that failed, labelled by error kind."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder for this process.
    pub fn init() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        ensure_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
