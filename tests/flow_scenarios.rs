// tests/flow_scenarios.rs
//
// End-to-end interviews through the flow controller with a scripted
// evaluator and an in-memory sink. No network, no filesystem.
//
// Covered:
// - early `normal` stop
// - hikikomori / social isolation outcomes
// - contradictory answers (latest wins, event kept)
// - a "less than three months" duration keeps D false
// - clarification bound, best-effort fallback, related criteria kept
// - evaluator failure leaves the question outstanding
// - indeterminate when questions run out
// - persistence failure is retried on the next turn

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use isolation_interview::config::InterviewSettings;
use isolation_interview::criteria::{CriterionId, CriterionUpdate, Truth};
use isolation_interview::evaluator::reply::parse_reply;
use isolation_interview::evaluator::{Evaluation, EvaluatorError, ScriptedEvaluator};
use isolation_interview::flow::FlowState;
use isolation_interview::questions::QuestionBank;
use isolation_interview::session::SessionRecord;
use isolation_interview::storage::{MemorySink, ResultSink, StorageError};
use isolation_interview::transcript::AnswerStatus;
use isolation_interview::{Classification, Diagnosis, FlowController, FlowOutput, InterviewDeps, SessionError};

use CriterionId::*;

fn settings(max_clarifications: u8) -> InterviewSettings {
    InterviewSettings {
        max_clarifications,
        ..InterviewSettings::default()
    }
}

fn flow_with(
    ev: &Arc<ScriptedEvaluator>,
    sink: Arc<dyn ResultSink>,
    settings: &InterviewSettings,
) -> FlowController {
    let deps = InterviewDeps::new(
        Arc::new(QuestionBank::builtin()),
        ev.clone(),
        sink,
        settings,
    );
    FlowController::new("session-under-test", deps)
}

fn yes(id: CriterionId) -> CriterionUpdate {
    CriterionUpdate::new(id, Truth::True)
}

fn no(id: CriterionId) -> CriterionUpdate {
    CriterionUpdate::new(id, Truth::False)
}

fn qid(out: &FlowOutput) -> &str {
    match out {
        FlowOutput::Question { question_id, .. } | FlowOutput::Clarification { question_id, .. } => {
            question_id
        }
        FlowOutput::Finished { .. } => "<finished>",
    }
}

fn record(out: FlowOutput) -> SessionRecord {
    match out {
        FlowOutput::Finished { record, .. } => *record,
        other => panic!("expected finished interview, got {other:?}"),
    }
}

#[tokio::test]
async fn all_negative_groups_stop_early_as_normal() {
    let ev = Arc::new(ScriptedEvaluator::new());
    ev.answer("A1", no(A1))
        .answer("A2", no(A2))
        .answer("B1", no(B1))
        .answer("C1", no(C1));
    let sink = Arc::new(MemorySink::new());
    let mut flow = flow_with(&ev, sink.clone(), &settings(2));

    assert_eq!(qid(&flow.start().await.unwrap()), "A1");
    assert_eq!(qid(&flow.submit_answer("not really").await.unwrap()), "A2");
    // A is settled, so A3 is skipped.
    assert_eq!(qid(&flow.submit_answer("I go out daily").await.unwrap()), "B1");
    // B1 false settles B, so B2 is skipped.
    assert_eq!(qid(&flow.submit_answer("lots of friends").await.unwrap()), "C1");

    let out = flow.submit_answer("my two neighbours").await.unwrap();
    let rec = record(out);
    assert_eq!(rec.diagnosis, Diagnosis::Normal);
    assert_eq!(rec.classification, Classification::Normal);
    assert!(rec.early_stop);
    assert_eq!(rec.answers.len(), 4);
    assert_eq!(ev.calls(), 4);

    assert_eq!(flow.state(), FlowState::InterviewComplete);
    assert_eq!(sink.records().len(), 1);
    assert!(matches!(
        flow.submit_answer("one more thing").await,
        Err(SessionError::AlreadyComplete)
    ));
}

#[tokio::test]
async fn full_positive_path_is_hikikomori() {
    let ev = Arc::new(ScriptedEvaluator::new());
    ev.answer("A1", yes(A1))
        .answer("A3", yes(A3))
        .answer("B1", yes(B1))
        .answer("B2", yes(B2))
        .answer("C1", yes(C1))
        .answer("C2", yes(C2))
        .answer("D1", yes(D1).with_score(6.0).with_duration(4));
    let sink = Arc::new(MemorySink::new());
    let mut flow = flow_with(&ev, sink.clone(), &settings(2));

    let mut asked = vec![qid(&flow.start().await.unwrap()).to_string()];
    for answer in ["yes", "over a year", "nobody", "half a year", "no one", "months", "7, for 4 months"] {
        let out = flow.submit_answer(answer).await.unwrap();
        asked.push(qid(&out).to_string());
    }
    // A2 skipped (A1 true), D follow-ups skipped (D already true).
    assert_eq!(asked, ["A1", "A3", "B1", "B2", "C1", "C2", "D1", "E1"]);

    assert_eq!(qid(&flow.submit_answer("I draw a lot").await.unwrap()), "E2");
    let rec = record(flow.submit_answer("someone to talk to").await.unwrap());

    assert_eq!(rec.diagnosis, Diagnosis::Hikikomori);
    assert!(!rec.early_stop);
    assert_eq!(rec.criteria.score(D1), Some(6.0));
    assert_eq!(rec.criteria.value(A2), Truth::Unknown);
    let e1 = rec.answers.iter().find(|a| a.question_id == "E1").unwrap();
    assert_eq!(e1.status, AnswerStatus::Recorded);
    assert_eq!(e1.text.as_deref(), Some("I draw a lot"));
    // Free-text answers never reach the evaluator.
    assert_eq!(ev.calls(), 7);
    assert_eq!(sink.records()[0].session_id, "session-under-test");
}

#[tokio::test]
async fn negative_a_with_bcd_is_social_isolation() {
    let ev = Arc::new(ScriptedEvaluator::new());
    ev.answer("A1", no(A1))
        .answer("A2", no(A2))
        .answer("B1", yes(B1))
        .answer("B2", yes(B2))
        .answer("C1", yes(C1))
        .answer("C2", yes(C2))
        .answer("D1", yes(D1).with_score(7.0))
        .answer("D1_duration", CriterionUpdate::new(D1, Truth::Unknown).with_duration(4));
    let mut flow = flow_with(&ev, Arc::new(MemorySink::new()), &settings(2));

    flow.start().await.unwrap();
    for _ in 0..6 {
        flow.submit_answer("answer").await.unwrap();
    }
    // D1 is true but its duration is still missing.
    let out = flow.submit_answer("yes, a 7").await.unwrap();
    assert_eq!(qid(&out), "D1_duration");
    assert_eq!(flow.snapshot().classification, Classification::Continue);

    let out = flow.submit_answer("about four months").await.unwrap();
    assert_eq!(qid(&out), "E1");
    assert_eq!(flow.snapshot().classification, Classification::SocialIsolation);

    flow.submit_answer("nothing").await.unwrap();
    let rec = record(flow.submit_answer("nothing").await.unwrap());
    assert_eq!(rec.diagnosis, Diagnosis::SocialIsolation);
    assert_eq!(rec.groups.a, Truth::False);
    assert_eq!(rec.criteria.duration_months(D1), Some(4));
}

#[tokio::test]
async fn short_duration_keeps_d_false_and_concludes_normal() {
    let bank = QuestionBank::builtin();
    let d1_duration = bank.find("D1_duration").unwrap();
    let short = parse_reply(r#"{"status":"negative","months":2.5}"#, d1_duration).unwrap();

    let ev = Arc::new(ScriptedEvaluator::new());
    ev.answer("A1", no(A1))
        .answer("A2", no(A2))
        .answer("B1", yes(B1))
        .answer("B2", yes(B2))
        .answer("C1", yes(C1))
        .answer("C2", yes(C2))
        .answer("D1", yes(D1).with_score(6.0))
        .push("D1_duration", Ok(short))
        .answer("D2", no(D2));
    let mut flow = flow_with(&ev, Arc::new(MemorySink::new()), &settings(2));

    let mut out = flow.start().await.unwrap();
    let mut asked = Vec::new();
    while !out.is_finished() {
        asked.push(qid(&out).to_string());
        out = flow.submit_answer("answer").await.unwrap();
    }
    // D2 is false, so its duration is never asked.
    assert_eq!(
        asked,
        ["A1", "A2", "B1", "B2", "C1", "C2", "D1", "D1_duration", "D2", "E1", "E2"]
    );

    let rec = record(out);
    assert_eq!(rec.criteria.duration_months(D1), Some(2));
    assert_eq!(rec.criteria.sustained(D1), Some(false));
    assert_eq!(rec.groups.d, Truth::False);
    assert_eq!(rec.diagnosis, Diagnosis::Normal);
    let row = rec.answers.iter().find(|a| a.question_id == "D1_duration").unwrap();
    assert_eq!(row.status, AnswerStatus::Negative);
}

#[tokio::test]
async fn contradicting_answer_keeps_latest_value_and_logs_event() {
    let ev = Arc::new(ScriptedEvaluator::new());
    ev.answer("A1", no(A1))
        .answer("A2", no(A2))
        .answer("B1", yes(B1))
        .push(
            "B2",
            Ok(Evaluation::resolved(vec![yes(B2), no(B1)])),
        )
        .answer("C1", no(C1));
    let mut flow = flow_with(&ev, Arc::new(MemorySink::new()), &settings(2));

    flow.start().await.unwrap();
    flow.submit_answer("no").await.unwrap();
    flow.submit_answer("no").await.unwrap();
    flow.submit_answer("nobody").await.unwrap();
    let out = flow.submit_answer("actually I talked to a friend last week").await.unwrap();
    assert_eq!(qid(&out), "C1");
    assert_eq!(flow.snapshot().contradictions, 1);

    let rec = record(flow.submit_answer("plenty").await.unwrap());
    assert_eq!(rec.criteria.value(B1), Truth::False);
    assert_eq!(rec.contradictions.len(), 1);
    let ev0 = &rec.contradictions[0];
    assert_eq!(ev0.criterion, B1);
    assert_eq!(ev0.previous, Truth::True);
    assert_eq!(ev0.current, Truth::False);
    assert_eq!(ev0.question_id.as_deref(), Some("B2"));
    assert_eq!(rec.diagnosis, Diagnosis::Normal);
}

#[tokio::test]
async fn clarifications_are_bounded_then_target_stays_unknown() {
    let ev = Arc::new(ScriptedEvaluator::new());
    for _ in 0..3 {
        ev.push("A1", Ok(Evaluation::ambiguous(Some("Do you mostly stay in?".into()))));
    }
    let mut flow = flow_with(&ev, Arc::new(MemorySink::new()), &settings(2));
    flow.start().await.unwrap();

    match flow.submit_answer("it depends").await.unwrap() {
        FlowOutput::Clarification { question_id, prompt, attempt } => {
            assert_eq!(question_id, "A1");
            assert_eq!(prompt, "Do you mostly stay in?");
            assert_eq!(attempt, 1);
        }
        other => panic!("expected clarification, got {other:?}"),
    }
    assert!(matches!(
        flow.submit_answer("sometimes").await.unwrap(),
        FlowOutput::Clarification { attempt: 2, .. }
    ));

    // Third ambiguous answer: bound reached, move on with A1 unknown.
    let out = flow.submit_answer("hard to say").await.unwrap();
    assert_eq!(qid(&out), "A2");
    let snap = flow.snapshot();
    assert_eq!(snap.clarification_attempts, 0);
    assert_eq!(snap.criteria.value(A1), Truth::Unknown);
    assert!(snap.criteria.get(A1).is_some());
    assert_eq!(ev.calls(), 3);
}

#[tokio::test]
async fn best_effort_guess_is_used_once_clarifications_run_out() {
    let ev = Arc::new(ScriptedEvaluator::new());
    ev.push("A1", Ok(Evaluation::ambiguous(None)))
        .push(
            "A1",
            Ok(Evaluation::ambiguous(None).with_best_effort(vec![yes(A1)])),
        );
    let mut flow = flow_with(&ev, Arc::new(MemorySink::new()), &settings(1));
    flow.start().await.unwrap();

    match flow.submit_answer("meh").await.unwrap() {
        FlowOutput::Clarification { prompt, .. } => {
            // No evaluator wording: fall back to re-asking the question.
            assert!(prompt.contains("spent most of your time at home"));
        }
        other => panic!("expected clarification, got {other:?}"),
    }
    let out = flow.submit_answer("I guess I stay in").await.unwrap();
    assert_eq!(qid(&out), "A3");
    assert_eq!(flow.criteria().value(A1), Truth::True);
}

#[tokio::test]
async fn related_answers_count_while_the_target_is_clarified() {
    let mut unclear = Evaluation::ambiguous(Some("Could you say a bit more?".into()));
    unclear.updates = vec![no(A2)];
    let ev = Arc::new(ScriptedEvaluator::new());
    ev.push("A1", Ok(unclear)).answer("A1", no(A1));
    let mut flow = flow_with(&ev, Arc::new(MemorySink::new()), &settings(2));
    flow.start().await.unwrap();

    let out = flow.submit_answer("I go out for walks, I think").await.unwrap();
    assert!(matches!(out, FlowOutput::Clarification { attempt: 1, .. }));
    assert_eq!(flow.criteria().value(A2), Truth::False);

    // A1 false settles A with A2 already false, so B1 comes next.
    assert_eq!(qid(&flow.submit_answer("no, not really").await.unwrap()), "B1");
}

#[tokio::test]
async fn evaluator_failure_propagates_and_question_stays_outstanding() {
    let ev = Arc::new(ScriptedEvaluator::new());
    ev.push("A1", Err(EvaluatorError::Timeout(30)))
        .answer("A1", no(A1));
    let mut flow = flow_with(&ev, Arc::new(MemorySink::new()), &settings(2));
    flow.start().await.unwrap();

    let err = flow.submit_answer("no").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Evaluator(EvaluatorError::Timeout(30))
    ));
    let snap = flow.snapshot();
    assert_eq!(snap.current_question.as_deref(), Some("A1"));
    assert_eq!(snap.answered, 0);
    assert!(snap.criteria.is_empty());

    // Same answer again succeeds.
    assert_eq!(qid(&flow.submit_answer("no").await.unwrap()), "A2");
}

#[tokio::test]
async fn unresolved_d_group_ends_indeterminate() {
    let ev = Arc::new(ScriptedEvaluator::new());
    ev.answer("A1", yes(A1))
        .answer("A3", yes(A3))
        .answer("B1", yes(B1))
        .answer("B2", yes(B2))
        .answer("C1", yes(C1))
        .answer("C2", yes(C2))
        .answer("D1", yes(D1).with_score(8.0))
        .push("D1_duration", Ok(Evaluation::ambiguous(None)))
        .push("D2", Ok(Evaluation::ambiguous(None)))
        .push("D2_duration", Ok(Evaluation::ambiguous(None)));
    let mut flow = flow_with(&ev, Arc::new(MemorySink::new()), &settings(0));

    let mut out = flow.start().await.unwrap();
    let mut asked = Vec::new();
    while !out.is_finished() {
        asked.push(qid(&out).to_string());
        out = flow.submit_answer("not sure").await.unwrap();
    }
    assert_eq!(
        asked,
        ["A1", "A3", "B1", "B2", "C1", "C2", "D1", "D1_duration", "D2", "D2_duration", "E1", "E2"]
    );

    let rec = record(out);
    assert_eq!(rec.classification, Classification::Continue);
    assert_eq!(rec.diagnosis, Diagnosis::Indeterminate);
    assert_eq!(rec.groups.d, Truth::Unknown);
    assert_eq!(rec.total_clarifications, 0);
}

/// Fails the first write, then behaves like `MemorySink`.
#[derive(Default)]
struct FlakySink {
    failed_once: AtomicBool,
    inner: MemorySink,
}

#[async_trait]
impl ResultSink for FlakySink {
    async fn persist(&self, record: &SessionRecord) -> Result<(), StorageError> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.persist(record).await
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, StorageError> {
        self.inner.list().await
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        self.inner.load(session_id).await
    }
}

#[tokio::test]
async fn failed_persist_is_retried_on_next_turn() {
    let ev = Arc::new(ScriptedEvaluator::new());
    ev.answer("A1", no(A1))
        .answer("A2", no(A2))
        .answer("B1", no(B1))
        .answer("C1", no(C1));
    let sink = Arc::new(FlakySink::default());
    let mut flow = flow_with(&ev, sink.clone(), &settings(2));

    flow.start().await.unwrap();
    for _ in 0..3 {
        flow.submit_answer("no").await.unwrap();
    }
    assert!(matches!(
        flow.submit_answer("no").await,
        Err(SessionError::Storage(_))
    ));
    assert_eq!(flow.state(), FlowState::FinalDiagnosis);

    let rec = record(flow.submit_answer("retry").await.unwrap());
    assert_eq!(rec.diagnosis, Diagnosis::Normal);
    assert_eq!(sink.inner.records().len(), 1);
    assert_eq!(ev.calls(), 4);
}
