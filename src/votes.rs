//! # Vote Service
//!
//! Read-modify-write over the blob store.
//!
//! Every request re-reads the aggregate, applies the change, and writes it
//! back under the version token from the read. A losing writer sees a
//! conflict, re-reads, and tries again up to a bounded number of attempts.
//! That conditional write plus the retry loop is the only concurrency
//! mechanism in the system; there is no in-process shared state.
//!
//! De-duplication relies on the caller-derived voter fingerprint. It is
//! untrusted but stable: nothing stops a determined user from voting again
//! under a fresh fingerprint, and this service does not pretend otherwise.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::aggregate::{
    legacy_key, unified_key, CourseAggregate, LegacyAggregate, Summary, VoteOutcome,
};
use crate::error::AppError;
use crate::store::{AggregateStore, Precondition, StoreError, Version};

pub struct VoteService {
    store: Arc<dyn AggregateStore>,
    cooldown: Duration,
    max_write_attempts: u32,
}

impl VoteService {
    pub fn new(store: Arc<dyn AggregateStore>, cooldown: Duration, max_write_attempts: u32) -> Self {
        Self {
            store,
            cooldown,
            max_write_attempts: max_write_attempts.max(1),
        }
    }

    /// Current `{avg, count}` for a course. Unknown courses read as the zero
    /// state; a pure read persists nothing. The one exception is the legacy
    /// fold: when `legacy_hint` names a degree and the unified document has
    /// not been migrated yet, the old per-degree totals are merged in and the
    /// result is persisted before returning.
    pub async fn read_aggregate(
        &self,
        code: &str,
        legacy_hint: Option<&str>,
    ) -> Result<Summary, AppError> {
        let code = valid_code(code)?;
        let key = unified_key(code);

        for _ in 0..self.max_write_attempts {
            let (mut doc, version) = self.load(&key).await?;

            if !self.fold_legacy(&mut doc, code, legacy_hint).await? {
                return Ok(doc.summary());
            }

            doc.updated_at = now_ms();
            match self.persist(&key, &doc, version).await {
                Ok(()) => return Ok(doc.summary()),
                Err(StoreError::Conflict) => continue,
                Err(error) => return Err(error.into()),
            }
        }

        Err(AppError::Busy)
    }

    /// Records one score for one voter fingerprint and returns the fresh
    /// `{avg, count}`.
    ///
    /// A repeat fingerprint replaces its prior score instead of adding a new
    /// count. Submitting the exact same score again is a no-op and does not
    /// refresh the cooldown timer. A differing score inside the cooldown
    /// window is rejected with the remaining wait and the unmodified summary.
    pub async fn submit_vote(
        &self,
        code: &str,
        score: i64,
        fingerprint: &str,
        legacy_hint: Option<&str>,
    ) -> Result<Summary, AppError> {
        let code = valid_code(code)?;
        let score = u8::try_from(score)
            .ok()
            .filter(|s| *s <= 100)
            .ok_or(AppError::InvalidScore)?;
        let key = unified_key(code);
        let cooldown_ms = self.cooldown.as_millis() as u64;

        for attempt in 0..self.max_write_attempts {
            let (mut doc, version) = self.load(&key).await?;
            let folded = self.fold_legacy(&mut doc, code, legacy_hint).await?;

            let now = now_ms();
            if let Some(remaining) = doc.cooldown_remaining_ms(fingerprint, cooldown_ms, now) {
                return Err(AppError::CooldownActive {
                    retry_after_s: remaining.div_ceil(1000),
                    summary: doc.summary(),
                });
            }

            if doc.apply_vote(fingerprint, score) == VoteOutcome::Unchanged {
                // Same score as before: leave `last` alone so an unchanged
                // resubmission cannot keep the cooldown alive forever. Still
                // persist when this request pulled in the legacy totals.
                if !folded {
                    return Ok(doc.summary());
                }
            } else {
                doc.last.insert(fingerprint.to_string(), now);
            }
            doc.updated_at = now;

            match self.persist(&key, &doc, version).await {
                Ok(()) => return Ok(doc.summary()),
                Err(StoreError::Conflict) => {
                    debug!(course = code, attempt, "write conflict, retrying");
                    continue;
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(AppError::Busy)
    }

    async fn load(&self, key: &str) -> Result<(CourseAggregate, Option<Version>), AppError> {
        match self.store.read(key).await? {
            Some((raw, version)) => {
                let doc = serde_json::from_str(&raw).map_err(|e| {
                    AppError::StoreUnavailable(format!("corrupt document at {key}: {e}"))
                })?;
                Ok((doc, Some(version)))
            }
            None => Ok((CourseAggregate::default(), None)),
        }
    }

    /// Merges the per-degree totals into `doc` when a hint is given and the
    /// migration has not happened yet. Returns whether `doc` changed.
    async fn fold_legacy(
        &self,
        doc: &mut CourseAggregate,
        code: &str,
        legacy_hint: Option<&str>,
    ) -> Result<bool, AppError> {
        if doc.migrated {
            return Ok(false);
        }
        let Some(degree) = legacy_hint.map(str::trim).filter(|d| !d.is_empty()) else {
            return Ok(false);
        };
        let key = legacy_key(degree, code);
        let Some((raw, _)) = self.store.read(&key).await? else {
            return Ok(false);
        };

        // a blob that fails to parse must not fold as zero and burn the
        // migration flag; surface it and leave the totals recoverable
        let legacy: LegacyAggregate = serde_json::from_str(&raw)
            .map_err(|e| AppError::StoreUnavailable(format!("corrupt document at {key}: {e}")))?;
        doc.fold_legacy(&legacy);
        debug!(course = code, degree, sum = legacy.sum, count = legacy.count, "folded legacy totals");
        Ok(true)
    }

    async fn persist(
        &self,
        key: &str,
        doc: &CourseAggregate,
        version: Option<Version>,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(doc)
            .map_err(|e| StoreError::Unavailable(format!("serialize failed: {e}")))?;
        let precondition = match version {
            Some(version) => Precondition::MustMatchVersion(version),
            None => Precondition::MustNotExist,
        };
        self.store.write(key, &raw, precondition).await.map(|_| ())
    }
}

fn valid_code(code: &str) -> Result<&str, AppError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(AppError::MissingCourseCode);
    }
    Ok(code)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
