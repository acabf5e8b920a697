// src/questions.rs
//! Question source: the ordered list of interview questions.
//!
//! Loaded from TOML or JSON with env + fallbacks, otherwise the built-in bank
//! is used. The flow controller only needs the ordered definitions.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::criteria::CriterionId;

pub const ENV_QUESTIONS_PATH: &str = "INTERVIEW_QUESTIONS_PATH";

/// What shape of answer the evaluator should extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    #[default]
    YesNo,
    /// A count of people or events.
    Count,
    /// A length of time, reported in months.
    Months,
    /// A 0..=10 severity score.
    Score,
    /// Recorded verbatim, never sent to the evaluator.
    FreeText,
}

/// Which part of the target criterion an answer fills in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetField {
    #[default]
    Value,
    Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDef {
    pub id: String,
    pub prompt: String,
    /// Criterion this question resolves. `None` marks a free-text question.
    #[serde(default)]
    pub target: Option<CriterionId>,
    #[serde(default)]
    pub field: TargetField,
    #[serde(default)]
    pub kind: AnswerKind,
    /// Positive/negative rule handed to the evaluator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    /// Per-question override of the clarification bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_clarifications: Option<u8>,
}

impl QuestionDef {
    pub fn is_free_text(&self) -> bool {
        self.target.is_none() || self.kind == AnswerKind::FreeText
    }

    fn new(id: &str, target: Option<CriterionId>, kind: AnswerKind, prompt: &str) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            target,
            field: TargetField::Value,
            kind,
            guidance: None,
            max_clarifications: None,
        }
    }

    fn guided(mut self, guidance: &str) -> Self {
        self.guidance = Some(guidance.to_string());
        self
    }

    fn duration_of(mut self) -> Self {
        self.field = TargetField::Duration;
        self
    }
}

/// Ordered, validated question definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBank {
    questions: Vec<QuestionDef>,
}

impl QuestionBank {
    pub fn new(questions: Vec<QuestionDef>) -> Result<Self> {
        let bank = Self { questions };
        bank.validate()?;
        Ok(bank)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QuestionDef> {
        self.questions.get(index)
    }

    pub fn find(&self, id: &str) -> Option<&QuestionDef> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuestionDef> {
        self.questions.iter()
    }

    fn validate(&self) -> Result<()> {
        if self.questions.is_empty() {
            bail!("question bank is empty");
        }
        let mut seen = HashSet::new();
        for q in &self.questions {
            if q.id.trim().is_empty() {
                bail!("question with empty id");
            }
            if q.prompt.trim().is_empty() {
                bail!("question `{}` has an empty prompt", q.id);
            }
            if !seen.insert(q.id.as_str()) {
                bail!("duplicate question id `{}`", q.id);
            }
            if q.field == TargetField::Duration && q.target.is_none() {
                bail!("duration question `{}` has no target criterion", q.id);
            }
        }
        Ok(())
    }

    /// Built-in bank: A1..D2 with the D duration follow-ups, then two
    /// free-text closing questions.
    pub fn builtin() -> Self {
        use AnswerKind::*;
        use CriterionId::*;
        let questions = vec![
            QuestionDef::new(
                "A1",
                Some(A1),
                YesNo,
                "Over the past month, have you spent most of your time at home, going out only rarely?",
            )
            .guided("positive if the participant mostly stays at home; negative otherwise"),
            QuestionDef::new(
                "A2",
                Some(A2),
                Count,
                "During the past month, how many times a week did you go out on average, not counting taking out the trash or buying daily necessities?",
            )
            .guided("positive for fewer than 4 outings per week; negative for 4 or more"),
            QuestionDef::new(
                "A3",
                Some(A3),
                Months,
                "How long has this pattern of staying at home lasted?",
            )
            .guided("positive if it has lasted 6 months or more; negative if less than 6 months"),
            QuestionDef::new(
                "B1",
                Some(B1),
                Count,
                "Over the past month, how many people did you have a meaningful conversation or interaction with? Please leave out people you live with, family, online-only contacts, service staff and simple greetings.",
            )
            .guided("positive if zero people; negative if one or more"),
            QuestionDef::new(
                "B2",
                Some(B2),
                Months,
                "How long has it been since you last had that kind of meaningful interaction?",
            )
            .guided("positive if 3 months or more; negative if less than 3 months"),
            QuestionDef::new(
                "C1",
                Some(C1),
                Count,
                "If you needed help, how many people could you rely on? Please leave out people you live with, family and online-only contacts.",
            )
            .guided("positive if zero people; negative if one or more"),
            QuestionDef::new(
                "C2",
                Some(C2),
                Months,
                "How long have you been without anyone to rely on?",
            )
            .guided("positive if 3 months or more; negative if less than 3 months"),
            QuestionDef::new(
                "D1",
                Some(D1),
                Score,
                "Do you feel distressed about this situation? If so, how strong is it on a scale from 1 to 10?",
            )
            .guided("positive if distress is reported or the score is 5 or more; negative if no distress or a score of 4 or less; no distress counts as score 0"),
            QuestionDef::new(
                "D1_duration",
                Some(D1),
                Months,
                "How long have you been feeling this distress?",
            )
            .guided("positive if it has lasted 3 months or more; negative if less than 3 months; report the length in months when one is given")
            .duration_of(),
            QuestionDef::new(
                "D2",
                Some(D2),
                Score,
                "Has this situation interfered with your daily life, work or studies? If so, how much on a scale from 1 to 10?",
            )
            .guided("positive if impairment is reported or the score is 5 or more; negative if no impact or a score of 4 or less; no impact counts as score 0"),
            QuestionDef::new(
                "D2_duration",
                Some(D2),
                Months,
                "How long has this interference been going on?",
            )
            .guided("positive if it has lasted 3 months or more; negative if less than 3 months; report the length in months when one is given")
            .duration_of(),
            QuestionDef::new(
                "E1",
                None,
                FreeText,
                "Is there anything else about your daily life you would like to share?",
            ),
            QuestionDef::new(
                "E2",
                None,
                FreeText,
                "What kind of support, if any, would you find helpful?",
            ),
        ];
        Self { questions }
    }
}

/// Load a bank from an explicit path. Supports TOML or JSON formats.
pub fn load_questions_from(path: &Path) -> Result<QuestionBank> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading questions from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_questions(&content, ext.as_str())
        .with_context(|| format!("parsing questions from {}", path.display()))
}

/// Load a bank using env var + fallbacks:
/// 1) $INTERVIEW_QUESTIONS_PATH
/// 2) `configured` (from the interview config)
/// 3) config/questions.toml
/// 4) config/questions.json
/// 5) built-in bank
pub fn load_questions_default(configured: Option<&Path>) -> Result<QuestionBank> {
    if let Ok(p) = std::env::var(ENV_QUESTIONS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_questions_from(&pb);
        }
        return Err(anyhow!("{ENV_QUESTIONS_PATH} points to non-existent path"));
    }
    if let Some(p) = configured {
        if p.exists() {
            return load_questions_from(p);
        }
        tracing::warn!(path = %p.display(), "configured questions file missing, trying fallbacks");
    }
    for candidate in ["config/questions.toml", "config/questions.json"] {
        let pb = PathBuf::from(candidate);
        if pb.exists() {
            return load_questions_from(&pb);
        }
    }
    Ok(QuestionBank::builtin())
}

#[derive(Deserialize)]
struct BankFile {
    questions: Vec<QuestionDef>,
}

fn parse_questions(s: &str, hint_ext: &str) -> Result<QuestionBank> {
    let try_toml = hint_ext == "toml" || s.contains("[[questions]]");
    if try_toml {
        if let Ok(v) = toml::from_str::<BankFile>(s) {
            return QuestionBank::new(v.questions);
        }
    }
    if let Ok(v) = serde_json::from_str::<BankFile>(s) {
        return QuestionBank::new(v.questions);
    }
    if let Ok(v) = serde_json::from_str::<Vec<QuestionDef>>(s) {
        return QuestionBank::new(v);
    }
    if !try_toml {
        if let Ok(v) = toml::from_str::<BankFile>(s) {
            return QuestionBank::new(v.questions);
        }
    }
    Err(anyhow!("unsupported question bank format"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn builtin_bank_is_valid_and_ordered() {
        let bank = QuestionBank::builtin();
        assert!(bank.validate().is_ok());
        let ids: Vec<&str> = bank.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(&ids[..3], &["A1", "A2", "A3"]);
        assert_eq!(bank.find("D1_duration").unwrap().field, TargetField::Duration);
        assert!(bank.find("E2").unwrap().is_free_text());
    }

    #[test]
    fn toml_and_json_formats_parse() {
        let toml = r#"
[[questions]]
id = "B1"
prompt = "How many people?"
target = "B1"
kind = "count"

[[questions]]
id = "note"
prompt = "Anything else?"
"#;
        let bank = parse_questions(toml, "toml").unwrap();
        assert_eq!(bank.len(), 2);
        assert_eq!(bank.get(0).unwrap().kind, AnswerKind::Count);
        assert!(bank.get(1).unwrap().is_free_text());

        let json = r#"[{"id":"D1","prompt":"Score?","target":"D1","kind":"score","max_clarifications":1}]"#;
        let bank = parse_questions(json, "json").unwrap();
        assert_eq!(bank.get(0).unwrap().max_clarifications, Some(1));
    }

    #[test]
    fn duplicates_and_empty_prompts_are_rejected() {
        let dup = r#"[{"id":"A1","prompt":"x"},{"id":"A1","prompt":"y"}]"#;
        assert!(parse_questions(dup, "json").is_err());
        let empty = r#"[{"id":"A1","prompt":"  "}]"#;
        assert!(parse_questions(empty, "json").is_err());
        assert!(parse_questions("[]", "json").is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_QUESTIONS_PATH);

        // No files in temp CWD -> built-in bank
        let bank = load_questions_default(None).unwrap();
        assert_eq!(bank, QuestionBank::builtin());

        let p = tmp.path().join("custom.json");
        fs::write(&p, r#"[{"id":"X","prompt":"Only question"}]"#).unwrap();
        env::set_var(ENV_QUESTIONS_PATH, p.display().to_string());
        let bank = load_questions_default(None).unwrap();
        assert_eq!(bank.len(), 1);
        env::remove_var(ENV_QUESTIONS_PATH);

        let bank = load_questions_default(Some(&p)).unwrap();
        assert_eq!(bank.find("X").unwrap().prompt, "Only question");

        env::set_current_dir(&old).unwrap();
    }
}
