//! # Rule Engine
//! Pure, testable logic that maps a `CriteriaStore` → `Classification`.
//! No I/O; the same store always yields the same answer.
//!
//! Formulas (Kleene three-valued logic):
//! - A = (A1 OR A2) AND A3
//! - B = B1 AND B2
//! - C = C1 AND C2
//! - D = (D1 AND D1 lasted >= threshold) OR (D2 AND D2 lasted >= threshold)
//!
//! Policy: A, B and C definitively false stop the interview as `normal`;
//! A+B+C+D is `hikikomori`; B+C+D with A not true is `social_isolation`;
//! anything else keeps the interview going.

use crate::criteria::{CriteriaStore, CriterionId, Group, Truth};
use crate::diagnosis::{Classification, Diagnosis, GroupSnapshot};

pub const DEFAULT_DURATION_THRESHOLD_MONTHS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleEngine {
    duration_threshold_months: u32,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(DEFAULT_DURATION_THRESHOLD_MONTHS)
    }
}

impl RuleEngine {
    pub fn new(duration_threshold_months: u32) -> Self {
        Self {
            duration_threshold_months,
        }
    }

    pub fn duration_threshold_months(&self) -> u32 {
        self.duration_threshold_months
    }

    /// Value of a single composite group.
    pub fn group_value(&self, store: &CriteriaStore, group: Group) -> Truth {
        use CriterionId::*;
        match group {
            Group::A => store.value(A1).or(store.value(A2)).and(store.value(A3)),
            Group::B => store.value(B1).and(store.value(B2)),
            Group::C => store.value(C1).and(store.value(C2)),
            Group::D => self.gated(store, D1).or(self.gated(store, D2)),
        }
    }

    pub fn groups(&self, store: &CriteriaStore) -> GroupSnapshot {
        GroupSnapshot {
            a: self.group_value(store, Group::A),
            b: self.group_value(store, Group::B),
            c: self.group_value(store, Group::C),
            d: self.group_value(store, Group::D),
        }
    }

    /// Running classification of `store`.
    pub fn evaluate(&self, store: &CriteriaStore) -> Classification {
        classify(&self.groups(store))
    }

    /// Final diagnosis once no more questions will be asked.
    ///
    /// A store that still classifies as `continue` is `normal` only when
    /// neither diagnostic formula can become true whatever the remaining
    /// unknowns turn out to be; otherwise it is `indeterminate`.
    pub fn conclude(&self, store: &CriteriaStore) -> Diagnosis {
        let g = self.groups(store);
        if let Some(d) = Option::<Diagnosis>::from(classify(&g)) {
            return d;
        }

        let bcd = g.b.and(g.c).and(g.d);
        let hikikomori_possible = !g.a.and(bcd).is_false();
        let isolation_possible = !bcd.is_false() && !g.a.is_true();
        if hikikomori_possible || isolation_possible {
            Diagnosis::Indeterminate
        } else {
            Diagnosis::Normal
        }
    }

    /// Whether asking for `id`'s value can still change its group.
    ///
    /// Kleene AND/OR already settle a group once a deciding operand is known,
    /// so an unknown group means every operand still matters, except the other
    /// side of `A1 OR A2` once one side is true.
    pub fn needs_value(&self, store: &CriteriaStore, id: CriterionId) -> bool {
        if self.group_value(store, id.group()).is_known() {
            return false;
        }
        match id {
            CriterionId::A1 => !store.value(CriterionId::A2).is_true(),
            CriterionId::A2 => !store.value(CriterionId::A1).is_true(),
            _ => true,
        }
    }

    /// Whether asking how long `id` has lasted can still change its group.
    /// A criterion already false gates to false regardless of duration.
    pub fn needs_duration(&self, store: &CriteriaStore, id: CriterionId) -> bool {
        !store.value(id).is_false()
            && !self.lasted(store, id).is_known()
            && self.needs_value(store, id)
    }

    /// Whether `id` lasted at least the threshold.
    ///
    /// Whole months (rounded down) and the evaluator's own verdict must both
    /// pass when both are present, so a "less than three months" verdict is
    /// never overridden by a month count.
    pub fn lasted(&self, store: &CriteriaStore, id: CriterionId) -> Truth {
        let by_months = store
            .duration_months(id)
            .map(|m| Truth::from(m >= self.duration_threshold_months));
        match (store.sustained(id).map(Truth::from), by_months) {
            (Some(verdict), Some(months)) => verdict.and(months),
            (Some(verdict), None) => verdict,
            (None, Some(months)) => months,
            (None, None) => Truth::Unknown,
        }
    }

    /// Criterion gated by its own duration.
    fn gated(&self, store: &CriteriaStore, id: CriterionId) -> Truth {
        store.value(id).and(self.lasted(store, id))
    }
}

fn classify(g: &GroupSnapshot) -> Classification {
    if g.a.is_false() && g.b.is_false() && g.c.is_false() {
        return Classification::Normal;
    }

    if g.b.and(g.c).and(g.d).is_true() {
        // A decides between the two diagnoses, so they can never both hold.
        return if g.a.is_true() {
            Classification::Hikikomori
        } else {
            Classification::SocialIsolation
        };
    }

    Classification::Continue
}
