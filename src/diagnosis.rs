//! Outcome types produced by the rule engine.
//!
//! `Classification` is the running verdict (`continue` while the interview
//! still needs answers). `Diagnosis` is what a finished session reports; it
//! adds `indeterminate` for interviews that ran out of questions before the
//! formulas could decide.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::criteria::Truth;

/// Running verdict derived from a `CriteriaStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Continue,
    Normal,
    SocialIsolation,
    Hikikomori,
}

impl Classification {
    pub fn is_final(self) -> bool {
        self != Classification::Continue
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Continue => "continue",
            Classification::Normal => "normal",
            Classification::SocialIsolation => "social_isolation",
            Classification::Hikikomori => "hikikomori",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of a completed interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnosis {
    Normal,
    SocialIsolation,
    Hikikomori,
    /// All questions were asked but the criteria still do not decide.
    Indeterminate,
}

impl Diagnosis {
    pub fn as_str(self) -> &'static str {
        match self {
            Diagnosis::Normal => "normal",
            Diagnosis::SocialIsolation => "social_isolation",
            Diagnosis::Hikikomori => "hikikomori",
            Diagnosis::Indeterminate => "indeterminate",
        }
    }

    /// Short participant-facing summary shown when the interview ends.
    pub fn summary(self) -> &'static str {
        match self {
            Diagnosis::Normal => "The interview is complete. The criteria for social isolation were not met.",
            Diagnosis::SocialIsolation => "The interview is complete. Your answers meet the criteria for social isolation.",
            Diagnosis::Hikikomori => "The interview is complete. Your answers meet the criteria for hikikomori.",
            Diagnosis::Indeterminate => "The interview is complete, but the information collected is not enough for a conclusion. A follow-up assessment is recommended.",
        }
    }
}

impl From<Classification> for Option<Diagnosis> {
    fn from(c: Classification) -> Self {
        match c {
            Classification::Continue => None,
            Classification::Normal => Some(Diagnosis::Normal),
            Classification::SocialIsolation => Some(Diagnosis::SocialIsolation),
            Classification::Hikikomori => Some(Diagnosis::Hikikomori),
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values of the four composite groups, kept for explainability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub a: Truth,
    pub b: Truth,
    pub c: Truth,
    pub d: Truth,
}

impl GroupSnapshot {
    /// Compact `A=true B=false C=unknown D=unknown` form for log lines.
    pub fn describe(&self) -> String {
        format!("A={} B={} C={} D={}", self.a, self.b, self.c, self.d)
    }
}
