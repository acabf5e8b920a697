//! Evaluators that never leave the process: disabled stub, deterministic mock
//! for local runs, and a scripted double for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::criteria::{CriterionUpdate, Truth};
use crate::questions::{AnswerKind, TargetField};

use super::{AnswerEvaluator, EvalFuture, Evaluation, EvaluationRequest, EvaluatorError};

/// Always fails with `EvaluatorError::Disabled`.
pub struct DisabledEvaluator {
    reason: String,
}

impl DisabledEvaluator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AnswerEvaluator for DisabledEvaluator {
    fn evaluate<'a>(&'a self, _request: EvaluationRequest<'a>) -> EvalFuture<'a> {
        let err = EvaluatorError::Disabled(self.reason.clone());
        Box::pin(async move { Err(err) })
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("number regex"));

/// Deterministic reader for local runs (`EVALUATOR_TEST_MODE=mock`).
///
/// Value questions need a plain yes/no; a number in the answer is kept as the
/// score (score questions) or the length in months. Duration questions take a
/// number of months, or yes/no for "at least the threshold".
#[derive(Debug, Clone, Copy, Default)]
pub struct MockEvaluator;

impl MockEvaluator {
    fn read(req: &EvaluationRequest<'_>) -> Evaluation {
        let Some(target) = req.question.target else {
            return Evaluation::resolved(Vec::new());
        };
        let lower = req.answer.trim().to_ascii_lowercase();
        let number = RE_NUMBER
            .find(&lower)
            .and_then(|m| m.as_str().parse::<u32>().ok());

        let first = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .find(|w| !w.is_empty())
            .unwrap_or("");
        let value = match first {
            "yes" | "y" | "yeah" | "positive" => Truth::True,
            "no" | "n" | "nope" | "negative" => Truth::False,
            _ => Truth::Unknown,
        };

        if req.question.field == TargetField::Duration {
            let update = CriterionUpdate::new(target, Truth::Unknown);
            return match (number, value) {
                (Some(months), _) => Evaluation::resolved(vec![update.with_duration(months)]),
                // "yes" / "no" answer whether it has lasted long enough.
                (None, Truth::True) => Evaluation::resolved(vec![update.with_sustained(true)]),
                (None, Truth::False) => Evaluation::resolved(vec![update.with_sustained(false)]),
                (None, Truth::Unknown) => {
                    Evaluation::ambiguous(Some("How many months has this lasted?".into()))
                }
            };
        }
        if !value.is_known() {
            return Evaluation::ambiguous(Some("Could you answer with yes or no?".into()));
        }

        let mut update = CriterionUpdate::new(target, value);
        match (req.question.kind, number) {
            (AnswerKind::Score, Some(n)) => update = update.with_score(n as f32),
            (AnswerKind::Months, Some(n)) => update = update.with_duration(n),
            _ => {}
        }
        Evaluation::resolved(vec![update]).with_rationale("mock evaluator")
    }
}

impl AnswerEvaluator for MockEvaluator {
    fn evaluate<'a>(&'a self, request: EvaluationRequest<'a>) -> EvalFuture<'a> {
        let out = Self::read(&request);
        Box::pin(async move { Ok(out) })
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// Replays queued results per question id, for tests.
///
/// A question with an empty queue fails with `Malformed`, which makes a
/// missing script entry obvious in test output.
#[derive(Default)]
pub struct ScriptedEvaluator {
    scripts: Mutex<HashMap<String, VecDeque<Result<Evaluation, EvaluatorError>>>>,
    calls: AtomicUsize,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for the next evaluation of `question_id`.
    pub fn push(&self, question_id: &str, result: Result<Evaluation, EvaluatorError>) -> &Self {
        let mut g = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
        g.entry(question_id.to_string()).or_default().push_back(result);
        self
    }

    /// Queue a resolved single-criterion answer.
    pub fn answer(&self, question_id: &str, update: CriterionUpdate) -> &Self {
        self.push(question_id, Ok(Evaluation::resolved(vec![update])))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AnswerEvaluator for ScriptedEvaluator {
    fn evaluate<'a>(&'a self, request: EvaluationRequest<'a>) -> EvalFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut g = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
            g.get_mut(&request.question.id).and_then(|q| q.pop_front())
        };
        let id = request.question.id.clone();
        Box::pin(async move {
            next.unwrap_or_else(|| Err(EvaluatorError::Malformed(format!("no scripted reply for {id}"))))
        })
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}
