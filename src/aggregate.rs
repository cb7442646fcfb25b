//! # Vote Documents
//!
//! JSON documents stored per course.
//!
//! ## Layout
//!
//! - Unified aggregate: `codes/{code}.json`, one per course code. Holds the
//!   running totals plus per-voter detail so an "update my vote" never
//!   double-counts.
//! - Legacy aggregate: `courses/{degree}/{code}.json`, the deprecated
//!   per-degree layout with bare totals and no voter detail. Folded into the
//!   unified document at most once, guarded by the `migrated` flag.
//!
//! Field names are fixed by the stored blobs (`sum`, `count`, `votes`,
//! `last`, `migrated`, `updatedAt`) so the maintenance tooling can address
//! the same records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Storage key for the unified per-course aggregate.
pub fn unified_key(code: &str) -> String {
    format!("codes/{code}.json")
}

/// Storage key for the deprecated per-degree aggregate, read-only here.
pub fn legacy_key(degree: &str, code: &str) -> String {
    format!("courses/{degree}/{code}.json")
}

/// Per-course vote aggregate.
///
/// Invariants after every completed write: `sum` equals the total of `votes`
/// plus whatever a legacy fold contributed, `count` equals the number of
/// voters in `votes` plus the folded legacy count, and every stored score is
/// in `0..=100`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseAggregate {
    #[serde(default)]
    pub sum: i64,
    #[serde(default)]
    pub count: u64,
    /// Voter fingerprint -> last submitted score.
    #[serde(default)]
    pub votes: HashMap<String, u8>,
    /// Voter fingerprint -> epoch millis of the last counted submission.
    #[serde(default)]
    pub last: HashMap<String, u64>,
    /// Set once the legacy per-degree record has been folded in. Never reverts.
    #[serde(default)]
    pub migrated: bool,
    #[serde(default, rename = "updatedAt")]
    pub updated_at: u64,
}

/// Deprecated per-degree totals, no voter detail.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LegacyAggregate {
    #[serde(default)]
    pub sum: i64,
    #[serde(default)]
    pub count: u64,
}

/// What the endpoint reports back: average to one decimal place, or `None`
/// while the course has no votes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub avg: Option<f64>,
    pub count: u64,
}

/// How a submitted score changed the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// First vote from this fingerprint.
    New,
    /// Fingerprint had voted before with a different score.
    Updated,
    /// Same score as before, nothing to write.
    Unchanged,
}

impl CourseAggregate {
    pub fn summary(&self) -> Summary {
        let avg = (self.count > 0).then(|| round1(self.sum as f64 / self.count as f64));
        Summary {
            avg,
            count: self.count,
        }
    }

    /// Additively merges the legacy totals and marks the migration done.
    pub fn fold_legacy(&mut self, legacy: &LegacyAggregate) {
        self.sum += legacy.sum;
        self.count += legacy.count;
        self.migrated = true;
    }

    /// Applies one score for one fingerprint, keeping `sum`/`count` in step
    /// with the `votes` map. Does not touch `last`; the cooldown bookkeeping
    /// is the caller's call.
    pub fn apply_vote(&mut self, fingerprint: &str, score: u8) -> VoteOutcome {
        match self.votes.get(fingerprint).copied() {
            Some(prior) if prior == score => VoteOutcome::Unchanged,
            Some(prior) => {
                self.sum += i64::from(score) - i64::from(prior);
                self.votes.insert(fingerprint.to_string(), score);
                VoteOutcome::Updated
            }
            None => {
                self.sum += i64::from(score);
                self.count += 1;
                self.votes.insert(fingerprint.to_string(), score);
                VoteOutcome::New
            }
        }
    }

    /// Remaining cooldown in millis for this fingerprint, `None` once the
    /// window has elapsed or the fingerprint never voted.
    pub fn cooldown_remaining_ms(
        &self,
        fingerprint: &str,
        window_ms: u64,
        now_ms: u64,
    ) -> Option<u64> {
        let last = *self.last.get(fingerprint)?;
        let elapsed = now_ms.saturating_sub(last);
        (elapsed < window_ms).then(|| window_ms - elapsed)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_course_has_no_average() {
        let doc = CourseAggregate::default();
        assert_eq!(
            doc.summary(),
            Summary {
                avg: None,
                count: 0
            }
        );
    }

    #[test]
    fn average_rounds_to_one_decimal() {
        let mut doc = CourseAggregate::default();
        doc.apply_vote("a", 33);
        doc.apply_vote("b", 33);
        doc.apply_vote("c", 34);
        // 100 / 3 = 33.333...
        assert_eq!(doc.summary().avg, Some(33.3));
    }

    #[test]
    fn revote_replaces_without_double_count() {
        let mut doc = CourseAggregate::default();
        assert_eq!(doc.apply_vote("a", 80), VoteOutcome::New);
        assert_eq!(doc.apply_vote("a", 20), VoteOutcome::Updated);
        assert_eq!(doc.sum, 20);
        assert_eq!(doc.count, 1);
        assert_eq!(doc.votes.len(), 1);
    }

    #[test]
    fn unchanged_score_is_a_no_op() {
        let mut doc = CourseAggregate::default();
        doc.apply_vote("a", 50);
        assert_eq!(doc.apply_vote("a", 50), VoteOutcome::Unchanged);
        assert_eq!(doc.sum, 50);
        assert_eq!(doc.count, 1);
    }

    #[test]
    fn legacy_fold_adds_totals_and_sets_flag() {
        let mut doc = CourseAggregate::default();
        doc.fold_legacy(&LegacyAggregate { sum: 10, count: 2 });
        assert!(doc.migrated);
        assert_eq!(doc.summary().avg, Some(5.0));
        assert_eq!(doc.summary().count, 2);
    }

    #[test]
    fn cooldown_window_math() {
        let mut doc = CourseAggregate::default();
        doc.last.insert("a".to_string(), 1_000);
        assert_eq!(doc.cooldown_remaining_ms("a", 60_000, 31_000), Some(30_000));
        assert_eq!(doc.cooldown_remaining_ms("a", 60_000, 61_000), None);
        assert_eq!(doc.cooldown_remaining_ms("b", 60_000, 1_500), None);
    }

    #[test]
    fn stored_field_names_stay_stable() {
        let mut doc = CourseAggregate::default();
        doc.apply_vote("a", 80);
        doc.updated_at = 123;
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["sum"], 80);
        assert_eq!(json["count"], 1);
        assert_eq!(json["votes"]["a"], 80);
        assert_eq!(json["migrated"], false);
        assert_eq!(json["updatedAt"], 123);
    }
}
