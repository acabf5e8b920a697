//! Prompt text sent to LLM-backed evaluators.

use std::fmt::Write as _;

use crate::questions::{AnswerKind, TargetField};

use super::EvaluationRequest;

pub const SYSTEM_PROMPT: &str = "You assess answers in a structured social-isolation interview. \
Classify the participant's answer against the rule you are given and reply with ONE JSON object only, no prose. \
Schema: {\"status\": \"positive\" | \"negative\" | \"clarification_needed\", \
\"score\": number 0-10 or null, \"months\": number or null, \
\"clarification_question\": string or null, \"best_guess\": \"positive\" | \"negative\" or null, \
\"rationale\": short string, \"related\": object mapping other criterion ids (A1..D2) to \"positive\" | \"negative\"}. \
Use clarification_needed only when the answer truly cannot be classified. \
A clarification_question must open with a short empathetic phrase and keep a warm, gentle tone.";

fn kind_instruction(kind: AnswerKind, field: TargetField) -> &'static str {
    match (field, kind) {
        (TargetField::Duration, _) => {
            "Decide positive or negative from the rule. Convert any length of time to whole months \
(1 year = 12, 90 days = 3) and put it in `months`. If the answer neither gives a length nor says \
whether the rule is met, use clarification_needed and ask how long."
        }
        (_, AnswerKind::YesNo) => "Treat 'yes' or similar as positive and 'no' or similar as negative.",
        (_, AnswerKind::Count) => {
            "Extract the number mentioned; phrases like 'nobody' count as 0. Compare it with the rule."
        }
        (_, AnswerKind::Months) => {
            "Convert the length of time to months, put it in `months`, and compare it with the rule."
        }
        (_, AnswerKind::Score) => {
            "Put a 0-10 integer in `score` when one is given. If distress or impact is mentioned without a score, \
use clarification_needed and ask for a score from 1 to 10."
        }
        (_, AnswerKind::FreeText) => "Summarise the answer in `rationale`.",
    }
}

/// User message for one evaluation request.
pub fn build_user_prompt(req: &EvaluationRequest<'_>) -> String {
    let q = req.question;
    let mut out = String::with_capacity(512);
    let _ = writeln!(out, "Question ({}): {}", q.id, q.prompt);
    if let Some(rule) = &q.guidance {
        let _ = writeln!(out, "Rule: {rule}");
    }
    let _ = writeln!(out, "Instructions: {}", kind_instruction(q.kind, q.field));

    let known: Vec<String> = req
        .context
        .iter()
        .filter(|c| c.value.is_known())
        .map(|c| format!("{}={}", c.id, c.value))
        .collect();
    if !known.is_empty() {
        let _ = writeln!(out, "Already established: {}", known.join(", "));
    }
    if req.attempt > 0 {
        let _ = writeln!(
            out,
            "This is clarification round {}; prefer a definitive status if the answer allows it.",
            req.attempt
        );
    }
    let _ = write!(out, "Participant answer: {}", req.answer.trim());
    out
}
