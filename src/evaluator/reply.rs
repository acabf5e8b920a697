//! Parsing of the evaluator's structured JSON reply into an `Evaluation`.
//!
//! Anything that does not match the schema is `EvaluatorError::Malformed`;
//! the flow controller never guesses a criterion from a broken reply.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::criteria::{CriterionId, CriterionUpdate, Truth, MAX_SCORE};
use crate::questions::{QuestionDef, TargetField};

use super::{Evaluation, EvaluatorError};

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```(?:json|JSON)?\s*(.*?)\s*```\s*$").expect("fence regex"));

#[derive(Debug, Deserialize)]
struct Reply {
    status: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    months: Option<f64>,
    #[serde(default)]
    clarification_question: Option<String>,
    #[serde(default)]
    best_guess: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    related: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Positive,
    Negative,
    Unclear,
}

fn parse_status(raw: &str) -> Result<Status, EvaluatorError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "positive" | "true" | "yes" => Ok(Status::Positive),
        "negative" | "false" | "no" => Ok(Status::Negative),
        "clarification_needed" | "unclear" | "ambiguous" | "unknown" => Ok(Status::Unclear),
        other => Err(EvaluatorError::Malformed(format!("unknown status `{other}`"))),
    }
}

impl Status {
    fn truth(self) -> Truth {
        match self {
            Status::Positive => Truth::True,
            Status::Negative => Truth::False,
            Status::Unclear => Truth::Unknown,
        }
    }
}

/// Strip markdown fences and surrounding chatter, leaving the JSON object.
pub fn extract_json(raw: &str) -> &str {
    if let Some(caps) = RE_FENCE.captures(raw) {
        if let Some(m) = caps.get(1) {
            return m.as_str();
        }
    }
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw.trim(),
    }
}

fn checked_score(score: Option<f64>) -> Result<Option<f32>, EvaluatorError> {
    match score {
        None => Ok(None),
        Some(s) if s.is_finite() && (0.0..=f64::from(MAX_SCORE)).contains(&s) => Ok(Some(s as f32)),
        Some(s) => Err(EvaluatorError::Malformed(format!("score {s} out of range 0..=10"))),
    }
}

fn checked_months(months: Option<f64>) -> Result<Option<u32>, EvaluatorError> {
    match months {
        None => Ok(None),
        // Whole months only; 2.5 months has not reached 3.
        Some(m) if m.is_finite() && m >= 0.0 && m <= f64::from(u32::MAX) => Ok(Some(m.floor() as u32)),
        Some(m) => Err(EvaluatorError::Malformed(format!("months {m} is not a valid length"))),
    }
}

fn target_update(
    target: CriterionId,
    field: TargetField,
    status: Status,
    score: Option<f32>,
    months: Option<u32>,
) -> CriterionUpdate {
    let mut u = match field {
        TargetField::Value => CriterionUpdate::new(target, status.truth()),
        // The value comes from its own question; a duration answer carries
        // the threshold verdict and, when given, the length.
        TargetField::Duration => {
            let u = CriterionUpdate::new(target, Truth::Unknown);
            match status {
                Status::Positive => u.with_sustained(true),
                Status::Negative => u.with_sustained(false),
                Status::Unclear => u,
            }
        }
    };
    if let Some(s) = score {
        u = u.with_score(s);
    }
    if let Some(m) = months {
        u = u.with_duration(m);
    }
    u
}

fn fallback_clarification(question: &QuestionDef) -> String {
    format!(
        "Thank you for sharing. Could you tell me a little more about this: {}",
        question.prompt
    )
}

/// Parse a raw reply for `question`.
pub fn parse_reply(raw: &str, question: &QuestionDef) -> Result<Evaluation, EvaluatorError> {
    let reply: Reply = serde_json::from_str(extract_json(raw))
        .map_err(|e| EvaluatorError::Malformed(e.to_string()))?;

    let status = parse_status(&reply.status)?;
    let score = checked_score(reply.score)?;
    let months = checked_months(reply.months)?;

    let mut related = Vec::with_capacity(reply.related.len());
    for (id, raw_status) in &reply.related {
        let criterion: CriterionId = id
            .parse()
            .map_err(|e: crate::criteria::UnknownCriterion| EvaluatorError::Malformed(e.to_string()))?;
        let truth = parse_status(raw_status)?.truth();
        if truth.is_known() && Some(criterion) != question.target {
            related.push(CriterionUpdate::new(criterion, truth));
        }
    }

    let Some(target) = question.target else {
        let mut ev = Evaluation::resolved(Vec::new());
        ev.rationale = reply.rationale;
        return Ok(ev);
    };

    let mut ev = if status == Status::Unclear {
        let clarification = reply
            .clarification_question
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| fallback_clarification(question));
        let best_effort = match reply.best_guess.as_deref().map(parse_status).transpose()? {
            Some(guess) if guess != Status::Unclear => {
                vec![target_update(target, question.field, guess, score, months)]
            }
            _ => Vec::new(),
        };
        // Related criteria the answer did settle are kept while the target is clarified.
        let mut ev = Evaluation::ambiguous(Some(clarification)).with_best_effort(best_effort);
        ev.updates = related;
        ev
    } else {
        let mut updates = vec![target_update(target, question.field, status, score, months)];
        updates.extend(related);
        Evaluation::resolved(updates)
    };
    ev.rationale = reply.rationale;
    Ok(ev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::CriteriaStore;
    use crate::questions::QuestionBank;
    use crate::rule_engine::RuleEngine;

    fn q(id: &str) -> QuestionDef {
        QuestionBank::builtin().find(id).cloned().unwrap()
    }

    #[test]
    fn positive_reply_with_score_and_fences() {
        let raw = "```json\n{\"status\":\"positive\",\"score\":7,\"rationale\":\"strong distress\"}\n```";
        let ev = parse_reply(raw, &q("D1")).unwrap();
        assert!(!ev.ambiguous);
        assert_eq!(ev.updates.len(), 1);
        assert_eq!(ev.updates[0].criterion, CriterionId::D1);
        assert_eq!(ev.updates[0].value, Truth::True);
        assert_eq!(ev.updates[0].score, Some(7.0));
        assert_eq!(ev.rationale.as_deref(), Some("strong distress"));
    }

    #[test]
    fn chatter_around_json_is_tolerated() {
        let raw = "Sure! {\"status\": \"negative\"} Hope that helps.";
        let ev = parse_reply(raw, &q("B1")).unwrap();
        assert_eq!(ev.updates[0].value, Truth::False);
    }

    #[test]
    fn duration_reply_sets_verdict_and_months() {
        let ev = parse_reply(r#"{"status":"positive","months":4.4}"#, &q("D1_duration")).unwrap();
        assert_eq!(ev.updates[0].criterion, CriterionId::D1);
        assert_eq!(ev.updates[0].value, Truth::Unknown);
        assert_eq!(ev.updates[0].duration_months, Some(4));
        assert_eq!(ev.updates[0].sustained, Some(true));
    }

    #[test]
    fn short_duration_stays_below_threshold() {
        let engine = RuleEngine::default();
        let base = CriteriaStore::new().with(CriterionId::D1, Truth::True);
        for (raw, months) in [
            (r#"{"status":"negative","months":2.5}"#, 2),
            (r#"{"status":"negative","months":3.0}"#, 3),
            (r#"{"status":"positive","months":2.9}"#, 2),
        ] {
            let ev = parse_reply(raw, &q("D1_duration")).unwrap();
            assert_eq!(ev.updates[0].duration_months, Some(months), "{raw}");
            let mut store = base.clone();
            store.apply(&ev.updates[0]);
            assert_eq!(engine.groups(&store).d, Truth::Unknown, "{raw}");
            assert_eq!(engine.lasted(&store, CriterionId::D1), Truth::False, "{raw}");
        }

        let ev = parse_reply(r#"{"status":"positive","months":3.0}"#, &q("D1_duration")).unwrap();
        let mut store = base;
        store.apply(&ev.updates[0]);
        assert_eq!(engine.groups(&store).d, Truth::True);
    }

    #[test]
    fn duration_verdict_without_months_is_decisive() {
        let ev = parse_reply(r#"{"status":"negative"}"#, &q("D2_duration")).unwrap();
        assert!(!ev.ambiguous);
        assert_eq!(ev.updates[0].criterion, CriterionId::D2);
        assert_eq!(ev.updates[0].sustained, Some(false));
        assert_eq!(ev.updates[0].duration_months, None);
    }

    #[test]
    fn unclear_duration_asks_how_long_and_keeps_a_guess() {
        let raw = r#"{"status":"clarification_needed","best_guess":"positive"}"#;
        let ev = parse_reply(raw, &q("D2_duration")).unwrap();
        assert!(ev.ambiguous);
        assert!(ev.clarification.unwrap().contains("How long"));
        assert_eq!(ev.best_effort[0].sustained, Some(true));
    }

    #[test]
    fn clarification_keeps_best_guess_aside() {
        let raw = r#"{"status":"clarification_needed","clarification_question":"Thanks, could you give a number?","best_guess":"negative"}"#;
        let ev = parse_reply(raw, &q("A2")).unwrap();
        assert!(ev.ambiguous);
        assert!(ev.updates.is_empty());
        assert_eq!(ev.best_effort[0].value, Truth::False);
        assert_eq!(ev.clarification.as_deref(), Some("Thanks, could you give a number?"));
    }

    #[test]
    fn related_criteria_are_carried() {
        let raw = r#"{"status":"positive","related":{"b1":"negative","C1":"unknown"}}"#;
        let ev = parse_reply(raw, &q("C1")).unwrap();
        assert_eq!(ev.updates.len(), 2);
        assert_eq!(ev.updates[1], CriterionUpdate::new(CriterionId::B1, Truth::False));
    }

    #[test]
    fn related_criteria_survive_an_unclear_target() {
        let raw = r#"{"status":"clarification_needed","related":{"B1":"positive"}}"#;
        let ev = parse_reply(raw, &q("C1")).unwrap();
        assert!(ev.ambiguous);
        assert_eq!(ev.updates, vec![CriterionUpdate::new(CriterionId::B1, Truth::True)]);
    }

    #[test]
    fn malformed_replies_are_errors() {
        let d1 = q("D1");
        assert!(matches!(parse_reply("not json", &d1), Err(EvaluatorError::Malformed(_))));
        assert!(matches!(
            parse_reply(r#"{"status":"maybe"}"#, &d1),
            Err(EvaluatorError::Malformed(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"status":"positive","score":11}"#, &d1),
            Err(EvaluatorError::Malformed(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"status":"positive","months":-2}"#, &d1),
            Err(EvaluatorError::Malformed(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"status":"positive","related":{"Z9":"positive"}}"#, &d1),
            Err(EvaluatorError::Malformed(_))
        ));
    }
}
