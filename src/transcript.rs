//! Conversation log and per-question outcomes kept in the session record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::criteria::{CriterionUpdate, Truth};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Assistant,
    Participant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn assistant(content: impl Into<String>, question_id: Option<&str>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            question_id: question_id.map(str::to_string),
            at: Utc::now(),
        }
    }

    pub fn participant(content: impl Into<String>, question_id: Option<&str>) -> Self {
        Self {
            role: Role::Participant,
            content: content.into(),
            question_id: question_id.map(str::to_string),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Positive,
    Negative,
    Unknown,
    /// Free-text answer stored as given.
    Recorded,
}

impl From<Truth> for AnswerStatus {
    fn from(t: Truth) -> Self {
        match t {
            Truth::True => AnswerStatus::Positive,
            Truth::False => AnswerStatus::Negative,
            Truth::Unknown => AnswerStatus::Unknown,
        }
    }
}

/// Outcome of one question after its clarification loop ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub status: AnswerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub months: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub clarifications: u8,
    pub answered_at: DateTime<Utc>,
}

impl QuestionResult {
    /// Summarize the update that hit the question's own target.
    ///
    /// A duration answer carries `Unknown` as its value; it reports the
    /// target's current value instead so the row stays readable.
    pub fn from_update(
        question_id: &str,
        update: Option<&CriterionUpdate>,
        current: Truth,
        rationale: Option<String>,
        clarifications: u8,
    ) -> Self {
        let status = match update {
            Some(u) if u.value.is_known() => AnswerStatus::from(u.value),
            Some(CriterionUpdate {
                sustained: Some(lasted),
                ..
            }) => AnswerStatus::from(Truth::from(*lasted)),
            _ => AnswerStatus::from(current),
        };
        Self {
            question_id: question_id.to_string(),
            status,
            score: update.and_then(|u| u.score),
            months: update.and_then(|u| u.duration_months),
            text: None,
            rationale,
            clarifications,
            answered_at: Utc::now(),
        }
    }

    pub fn recorded(question_id: &str, text: &str) -> Self {
        Self {
            question_id: question_id.to_string(),
            status: AnswerStatus::Recorded,
            score: None,
            months: None,
            text: Some(text.to_string()),
            rationale: None,
            clarifications: 0,
            answered_at: Utc::now(),
        }
    }
}
