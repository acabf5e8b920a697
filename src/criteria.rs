//! # Criteria
//! Tri-state criterion values and the per-session `CriteriaStore`.
//!
//! The store is created empty when an interview starts and is only written by
//! the flow controller. A definitive value is kept until a later answer flips
//! it; `conflict` spots such a flip so the caller can record a
//! `ContradictionEvent` before `apply` lets the latest value win.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound of a criterion score (scores live in `0.0..=10.0`).
pub const MAX_SCORE: f32 = 10.0;

/// Identifier of one behavioral criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CriterionId {
    A1,
    A2,
    A3,
    B1,
    B2,
    C1,
    C2,
    D1,
    D2,
}

impl CriterionId {
    pub const ALL: [CriterionId; 9] = [
        CriterionId::A1,
        CriterionId::A2,
        CriterionId::A3,
        CriterionId::B1,
        CriterionId::B2,
        CriterionId::C1,
        CriterionId::C2,
        CriterionId::D1,
        CriterionId::D2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CriterionId::A1 => "A1",
            CriterionId::A2 => "A2",
            CriterionId::A3 => "A3",
            CriterionId::B1 => "B1",
            CriterionId::B2 => "B2",
            CriterionId::C1 => "C1",
            CriterionId::C2 => "C2",
            CriterionId::D1 => "D1",
            CriterionId::D2 => "D2",
        }
    }

    /// Composite group this criterion feeds.
    pub fn group(self) -> Group {
        match self {
            CriterionId::A1 | CriterionId::A2 | CriterionId::A3 => Group::A,
            CriterionId::B1 | CriterionId::B2 => Group::B,
            CriterionId::C1 | CriterionId::C2 => Group::C,
            CriterionId::D1 | CriterionId::D2 => Group::D,
        }
    }
}

impl fmt::Display for CriterionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown criterion id `{0}`")]
pub struct UnknownCriterion(pub String);

impl FromStr for CriterionId {
    type Err = UnknownCriterion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        CriterionId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownCriterion(wanted.to_string()))
    }
}

/// Composite criterion groups combined by the rule engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Group {
    A,
    B,
    C,
    D,
}

/// Kleene three-valued truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truth {
    #[default]
    Unknown,
    True,
    False,
}

impl Truth {
    pub fn is_known(self) -> bool {
        self != Truth::Unknown
    }

    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    pub fn is_false(self) -> bool {
        self == Truth::False
    }

    /// False dominates; otherwise any unknown operand keeps the result unknown.
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    /// True dominates; otherwise any unknown operand keeps the result unknown.
    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    /// Two definitive values that disagree.
    pub fn conflicts_with(self, other: Truth) -> bool {
        self.is_known() && other.is_known() && self != other
    }
}

impl From<bool> for Truth {
    fn from(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }
}

impl fmt::Display for Truth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Truth::Unknown => "unknown",
            Truth::True => "true",
            Truth::False => "false",
        };
        f.write_str(s)
    }
}

/// One criterion as currently known for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: CriterionId,
    pub value: Truth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_months: Option<u32>,
    /// Evaluator's verdict on whether the criterion lasted at least the
    /// duration threshold, independent of an exact month count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sustained: Option<bool>,
}

impl Criterion {
    pub fn unknown(id: CriterionId) -> Self {
        Self {
            id,
            value: Truth::Unknown,
            score: None,
            duration_months: None,
            sustained: None,
        }
    }
}

/// A change proposed by the answer evaluator for one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionUpdate {
    pub criterion: CriterionId,
    pub value: Truth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_months: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sustained: Option<bool>,
}

impl CriterionUpdate {
    pub fn new(criterion: CriterionId, value: Truth) -> Self {
        Self {
            criterion,
            value,
            score: None,
            duration_months: None,
            sustained: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(clamp_score(score));
        self
    }

    pub fn with_duration(mut self, months: u32) -> Self {
        self.duration_months = Some(months);
        self
    }

    pub fn with_sustained(mut self, sustained: bool) -> Self {
        self.sustained = Some(sustained);
        self
    }

    /// Whether this update answers a duration question.
    pub fn has_duration(&self) -> bool {
        self.duration_months.is_some() || self.sustained.is_some()
    }
}

/// Recorded when a later answer flips a definitive value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionEvent {
    pub criterion: CriterionId,
    pub previous: Truth,
    pub current: Truth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    pub at: DateTime<Utc>,
}

/// Per-session mapping `CriterionId -> Criterion`. Entries are never removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CriteriaStore {
    entries: BTreeMap<CriterionId, Criterion>,
}

impl CriteriaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: CriterionId) -> Option<&Criterion> {
        self.entries.get(&id)
    }

    /// Value of `id`, `Unknown` when never set.
    pub fn value(&self, id: CriterionId) -> Truth {
        self.entries.get(&id).map(|c| c.value).unwrap_or_default()
    }

    pub fn duration_months(&self, id: CriterionId) -> Option<u32> {
        self.entries.get(&id).and_then(|c| c.duration_months)
    }

    pub fn sustained(&self, id: CriterionId) -> Option<bool> {
        self.entries.get(&id).and_then(|c| c.sustained)
    }

    pub fn score(&self, id: CriterionId) -> Option<f32> {
        self.entries.get(&id).and_then(|c| c.score)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Criterion> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builder used by tests and fixtures.
    pub fn with(mut self, id: CriterionId, value: Truth) -> Self {
        self.apply(&CriterionUpdate::new(id, value));
        self
    }

    /// Builder used by tests and fixtures.
    pub fn with_duration(mut self, id: CriterionId, months: u32) -> Self {
        let value = self.value(id);
        self.apply(&CriterionUpdate::new(id, value).with_duration(months));
        self
    }

    /// `(previous, proposed)` when `update` would flip a definitive value.
    pub fn conflict(&self, update: &CriterionUpdate) -> Option<(Truth, Truth)> {
        let previous = self.value(update.criterion);
        previous
            .conflicts_with(update.value)
            .then_some((previous, update.value))
    }

    /// Merge one update; the latest definitive value wins. `Unknown` never
    /// erases a definitive value, and score/duration only change when the
    /// update carries them.
    pub fn apply(&mut self, update: &CriterionUpdate) {
        let entry = self
            .entries
            .entry(update.criterion)
            .or_insert_with(|| Criterion::unknown(update.criterion));

        if update.value.is_known() {
            entry.value = update.value;
        }
        if let Some(score) = update.score {
            entry.score = Some(clamp_score(score));
        }
        if let Some(months) = update.duration_months {
            entry.duration_months = Some(months);
        }
        if let Some(sustained) = update.sustained {
            entry.sustained = Some(sustained);
        }
    }

    /// Marks `id` as asked-but-unresolved without touching a known value.
    pub fn mark_unknown(&mut self, id: CriterionId) {
        self.entries
            .entry(id)
            .or_insert_with(|| Criterion::unknown(id));
    }
}

fn clamp_score(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, MAX_SCORE)
    }
}
