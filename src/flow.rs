//! # Flow controller
//! Drives one interview through
//! `question_handler → rule_evaluator → stop_rule_checker → final_diagnosis → interview_complete`.
//!
//! Each participant turn enters at `question_handler` and the machine runs
//! until it needs the next answer or the interview is complete. One
//! controller is one session; it is never shared between participants.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::InterviewSettings;
use crate::criteria::{ContradictionEvent, CriteriaStore, CriterionUpdate};
use crate::diagnosis::{Classification, Diagnosis, GroupSnapshot};
use crate::evaluator::{DynEvaluator, Evaluation, EvaluationRequest, EvaluatorError};
use crate::metrics as m;
use crate::questions::{QuestionBank, QuestionDef, TargetField};
use crate::rule_engine::RuleEngine;
use crate::session::SessionRecord;
use crate::storage::{DynSink, StorageError};
use crate::transcript::{ConversationTurn, QuestionResult};

pub const OPENING_MESSAGE: &str = "Thank you for taking part. I will ask some questions about your daily life \
and your contact with other people. Please answer in your own words.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    QuestionHandler,
    RuleEvaluator,
    StopRuleChecker,
    FinalDiagnosis,
    InterviewComplete,
}

/// What the participant sees after a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowOutput {
    Question {
        question_id: String,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Clarification {
        question_id: String,
        prompt: String,
        attempt: u8,
    },
    Finished {
        diagnosis: Diagnosis,
        message: String,
        record: Box<SessionRecord>,
    },
}

impl FlowOutput {
    pub fn is_finished(&self) -> bool {
        matches!(self, FlowOutput::Finished { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("interview has not been started")]
    NotStarted,

    #[error("interview is already complete")]
    AlreadyComplete,

    #[error("answer is empty")]
    EmptyAnswer,

    #[error("unknown session `{0}`")]
    UnknownSession(String),
}

/// Read-only view of a running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub session_id: String,
    pub started: bool,
    pub state: FlowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_question: Option<String>,
    pub clarification_attempts: u8,
    pub classification: Classification,
    pub groups: GroupSnapshot,
    pub criteria: CriteriaStore,
    pub answered: usize,
    pub contradictions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
}

/// Immutable collaborators shared by every session.
#[derive(Clone)]
pub struct InterviewDeps {
    pub bank: Arc<QuestionBank>,
    pub evaluator: DynEvaluator,
    pub sink: DynSink,
    pub engine: RuleEngine,
    pub max_clarifications: u8,
}

impl InterviewDeps {
    pub fn new(
        bank: Arc<QuestionBank>,
        evaluator: DynEvaluator,
        sink: DynSink,
        settings: &InterviewSettings,
    ) -> Self {
        Self {
            bank,
            evaluator,
            sink,
            engine: RuleEngine::new(settings.duration_threshold_months),
            max_clarifications: settings.max_clarifications,
        }
    }
}

pub struct FlowController {
    session_id: String,
    deps: InterviewDeps,
    state: FlowState,
    started_at: Option<DateTime<Utc>>,
    /// Index of the outstanding question.
    current: Option<usize>,
    attempts: u8,
    store: CriteriaStore,
    classification: Classification,
    answers: Vec<QuestionResult>,
    transcript: Vec<ConversationTurn>,
    contradictions: Vec<ContradictionEvent>,
    total_clarifications: u32,
    early_stop: bool,
    record: Option<SessionRecord>,
}

impl FlowController {
    pub fn new(session_id: impl Into<String>, deps: InterviewDeps) -> Self {
        Self {
            session_id: session_id.into(),
            deps,
            state: FlowState::QuestionHandler,
            started_at: None,
            current: None,
            attempts: 0,
            store: CriteriaStore::new(),
            classification: Classification::Continue,
            answers: Vec::new(),
            transcript: Vec::new(),
            contradictions: Vec::new(),
            total_clarifications: 0,
            early_stop: false,
            record: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn criteria(&self) -> &CriteriaStore {
        &self.store
    }

    pub fn is_complete(&self) -> bool {
        self.state == FlowState::InterviewComplete
    }

    /// Opening message plus the first question.
    ///
    /// Calling it again on a running session repeats the outstanding prompt.
    pub async fn start(&mut self) -> Result<FlowOutput, SessionError> {
        if self.is_complete() {
            return Err(SessionError::AlreadyComplete);
        }
        if self.started_at.is_some() {
            if let Some(q) = self.current_question() {
                return Ok(FlowOutput::Question {
                    question_id: q.id.clone(),
                    prompt: q.prompt.clone(),
                    message: None,
                });
            }
            return self.finalize().await;
        }

        self.started_at = Some(Utc::now());
        m::ensure_described();
        counter!(m::SESSIONS_STARTED).increment(1);
        info!(session_id = %self.session_id, questions = self.deps.bank.len(), "interview started");
        self.transcript
            .push(ConversationTurn::assistant(OPENING_MESSAGE, None));

        match self.next_question(0) {
            Some(idx) => Ok(self.ask(idx, Some(OPENING_MESSAGE.to_string()))),
            None => self.finalize().await,
        }
    }

    /// One participant turn.
    pub async fn submit_answer(&mut self, text: &str) -> Result<FlowOutput, SessionError> {
        match self.state {
            FlowState::InterviewComplete => return Err(SessionError::AlreadyComplete),
            // A previous turn decided the outcome but could not store it.
            FlowState::FinalDiagnosis => return self.finalize().await,
            _ => {}
        }
        if self.started_at.is_none() {
            return Err(SessionError::NotStarted);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyAnswer);
        }
        let Some(idx) = self.current else {
            return self.finalize().await;
        };

        let bank = Arc::clone(&self.deps.bank);
        let Some(question) = bank.get(idx) else {
            return self.finalize().await;
        };

        debug!(
            session_id = %self.session_id,
            question_id = %question.id,
            answer = %anon_hash(text),
            attempt = self.attempts,
            "answer received"
        );

        if question.is_free_text() {
            self.transcript
                .push(ConversationTurn::participant(text, Some(question.id.as_str())));
            self.answers.push(QuestionResult::recorded(&question.id, text));
            return self.after_question(idx).await;
        }

        let evaluation = self.evaluate(question, text).await?;
        self.transcript
            .push(ConversationTurn::participant(text, Some(question.id.as_str())));

        if evaluation.ambiguous {
            let limit = question
                .max_clarifications
                .unwrap_or(self.deps.max_clarifications);
            if self.attempts < limit {
                // Other criteria the answer did settle are kept meanwhile.
                if !evaluation.updates.is_empty() {
                    self.apply_updates(&question.id, &evaluation.updates);
                    self.classification = self.deps.engine.evaluate(&self.store);
                }
                return Ok(self.clarify(question, evaluation.clarification));
            }
            info!(
                session_id = %self.session_id,
                question_id = %question.id,
                attempts = self.attempts,
                best_effort = !evaluation.best_effort.is_empty(),
                "clarification limit reached"
            );
        }

        self.state = FlowState::RuleEvaluator;
        self.record_evaluation(question, evaluation);
        self.after_question(idx).await
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            session_id: self.session_id.clone(),
            started: self.started_at.is_some(),
            state: self.state,
            current_question: self.current_question().map(|q| q.id.clone()),
            clarification_attempts: self.attempts,
            classification: self.classification,
            groups: self.deps.engine.groups(&self.store),
            criteria: self.store.clone(),
            answered: self.answers.len(),
            contradictions: self.contradictions.len(),
            diagnosis: self.record.as_ref().map(|r| r.diagnosis),
        }
    }

    fn current_question(&self) -> Option<&QuestionDef> {
        self.current.and_then(|i| self.deps.bank.get(i))
    }

    async fn evaluate(
        &self,
        question: &QuestionDef,
        text: &str,
    ) -> Result<Evaluation, SessionError> {
        let request = EvaluationRequest {
            question,
            answer: text,
            context: &self.store,
            attempt: self.attempts,
        };
        match self.deps.evaluator.evaluate(request).await {
            Ok(ev) => Ok(ev),
            Err(e) => {
                counter!(m::EVALUATOR_FAILURES, "kind" => error_kind(&e)).increment(1);
                warn!(
                    session_id = %self.session_id,
                    question_id = %question.id,
                    provider = self.deps.evaluator.provider_name(),
                    error = %e,
                    "answer evaluation failed"
                );
                Err(e.into())
            }
        }
    }

    fn clarify(&mut self, question: &QuestionDef, clarification: Option<String>) -> FlowOutput {
        self.attempts += 1;
        self.total_clarifications += 1;
        counter!(m::CLARIFICATIONS).increment(1);

        let prompt = clarification
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("Could you be a little more specific? {}", question.prompt));
        self.transcript
            .push(ConversationTurn::assistant(&prompt, Some(question.id.as_str())));
        debug!(
            session_id = %self.session_id,
            question_id = %question.id,
            attempt = self.attempts,
            "clarification requested"
        );
        FlowOutput::Clarification {
            question_id: question.id.clone(),
            prompt,
            attempt: self.attempts,
        }
    }

    /// rule_evaluator: merge the updates, then re-classify.
    fn record_evaluation(&mut self, question: &QuestionDef, evaluation: Evaluation) {
        let Evaluation {
            mut updates,
            ambiguous,
            best_effort,
            rationale,
            ..
        } = evaluation;
        if ambiguous {
            updates.extend(best_effort);
        }
        self.apply_updates(&question.id, &updates);

        let target = question.target;
        if let Some(t) = target {
            let hit = updates.iter().rev().find(|u| u.criterion == t);
            let resolved = match question.field {
                TargetField::Value => hit.is_some_and(|u| u.value.is_known()),
                TargetField::Duration => hit.is_some_and(CriterionUpdate::has_duration),
            };
            if !resolved {
                self.store.mark_unknown(t);
            }
            self.answers.push(QuestionResult::from_update(
                &question.id,
                hit,
                self.store.value(t),
                rationale,
                self.attempts,
            ));
        }

        self.classification = self.deps.engine.evaluate(&self.store);
        info!(
            session_id = %self.session_id,
            question_id = %question.id,
            classification = %self.classification,
            groups = %self.deps.engine.groups(&self.store).describe(),
            "criteria updated"
        );
    }

    fn apply_updates(&mut self, question_id: &str, updates: &[CriterionUpdate]) {
        for update in updates {
            if let Some((previous, current)) = self.store.conflict(update) {
                counter!(m::CONTRADICTIONS).increment(1);
                warn!(
                    session_id = %self.session_id,
                    question_id,
                    criterion = %update.criterion,
                    %previous,
                    %current,
                    "contradictory answer, latest value wins"
                );
                self.contradictions.push(ContradictionEvent {
                    criterion: update.criterion,
                    previous,
                    current,
                    question_id: Some(question_id.to_string()),
                    at: Utc::now(),
                });
            }
            self.store.apply(update);
        }
    }

    /// stop_rule_checker: early `normal`, next question, or the end.
    async fn after_question(&mut self, idx: usize) -> Result<FlowOutput, SessionError> {
        self.state = FlowState::StopRuleChecker;
        self.classification = self.deps.engine.evaluate(&self.store);

        if self.classification == Classification::Normal {
            self.early_stop = self.next_question(idx + 1).is_some();
            return self.finalize().await;
        }

        match self.next_question(idx + 1) {
            Some(next) => Ok(self.ask(next, None)),
            None => self.finalize().await,
        }
    }

    fn ask(&mut self, idx: usize, message: Option<String>) -> FlowOutput {
        self.state = FlowState::QuestionHandler;
        self.current = Some(idx);
        self.attempts = 0;

        let bank = Arc::clone(&self.deps.bank);
        let (question_id, prompt) = match bank.get(idx) {
            Some(q) => (q.id.clone(), q.prompt.clone()),
            None => (String::new(), String::new()),
        };
        self.transcript
            .push(ConversationTurn::assistant(&prompt, Some(question_id.as_str())));
        FlowOutput::Question {
            question_id,
            prompt,
            message,
        }
    }

    /// First question at or after `from` that can still change the outcome.
    fn next_question(&self, from: usize) -> Option<usize> {
        let engine = &self.deps.engine;
        let store = &self.store;
        self.deps
            .bank
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, q)| {
                let Some(t) = q.target else { return true };
                if q.is_free_text() {
                    return true;
                }
                match q.field {
                    TargetField::Value => {
                        !store.value(t).is_known() && engine.needs_value(store, t)
                    }
                    TargetField::Duration => engine.needs_duration(store, t),
                }
            })
            .map(|(i, _)| i)
    }

    /// final_diagnosis → interview_complete.
    async fn finalize(&mut self) -> Result<FlowOutput, SessionError> {
        self.state = FlowState::FinalDiagnosis;
        self.current = None;
        self.attempts = 0;

        let record = match self.record.take() {
            Some(r) => r,
            None => {
                let diagnosis = self.deps.engine.conclude(&self.store);
                self.transcript
                    .push(ConversationTurn::assistant(diagnosis.summary(), None));
                self.build_record(diagnosis)
            }
        };
        if record.diagnosis == Diagnosis::Indeterminate {
            warn!(
                session_id = %self.session_id,
                groups = %record.groups.describe(),
                "questions exhausted before the criteria decided"
            );
        }

        if let Err(e) = self.deps.sink.persist(&record).await {
            warn!(session_id = %self.session_id, error = %e, "failed to persist session record");
            self.record = Some(record);
            return Err(e.into());
        }

        let message = record.diagnosis.summary().to_string();
        self.state = FlowState::InterviewComplete;
        counter!(m::SESSIONS_COMPLETED, "diagnosis" => record.diagnosis.as_str()).increment(1);
        info!(
            session_id = %self.session_id,
            diagnosis = %record.diagnosis,
            early_stop = record.early_stop,
            contradictions = record.contradictions.len(),
            "interview complete"
        );

        self.record = Some(record.clone());
        Ok(FlowOutput::Finished {
            diagnosis: record.diagnosis,
            message,
            record: Box::new(record),
        })
    }

    fn build_record(&self, diagnosis: Diagnosis) -> SessionRecord {
        let engine = &self.deps.engine;
        let now = Utc::now();
        SessionRecord {
            session_id: self.session_id.clone(),
            started_at: self.started_at.unwrap_or(now),
            completed_at: now,
            diagnosis,
            classification: engine.evaluate(&self.store),
            early_stop: self.early_stop,
            criteria: self.store.clone(),
            groups: engine.groups(&self.store),
            answers: self.answers.clone(),
            transcript: self.transcript.clone(),
            contradictions: self.contradictions.clone(),
            total_clarifications: self.total_clarifications,
        }
    }
}

/// Short stable hash for log lines; participant text is never logged raw.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn error_kind(e: &EvaluatorError) -> &'static str {
    match e {
        EvaluatorError::Disabled(_) => "disabled",
        EvaluatorError::Transport(_) => "transport",
        EvaluatorError::Status(_) => "status",
        EvaluatorError::Timeout(_) => "timeout",
        EvaluatorError::Malformed(_) => "malformed",
        EvaluatorError::BudgetExhausted(_) => "budget",
    }
}
