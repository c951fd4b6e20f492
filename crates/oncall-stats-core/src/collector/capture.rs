//! Alert lifecycle capture
//!
//! Each lifecycle transition is a targeted, idempotent write. Updates for
//! fingerprints with no stored occurrence are logged and skipped.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::db::StatisticsStore;
use crate::error::{Error, ErrorContext, Result};
use crate::filter::Filter;
use crate::models::{
    AcknowledgedEvent, AlertOccurrence, BatchCaptureResult, CaptureOutcome, CaptureSummary,
    FiredEvent, GroupBy, OccurrenceOrder, ResolvedEvent, StatisticsSummary,
    DEFAULT_HISTORY_LIMIT,
};

/// Records fired, acknowledged and resolved transitions
#[derive(Clone)]
pub struct StatisticsCaptureService {
    store: Arc<dyn StatisticsStore>,
    retention_days: u32,
}

impl StatisticsCaptureService {
    /// Create a capture service with the default 90-day retention
    pub fn new(store: Arc<dyn StatisticsStore>) -> Self {
        Self {
            store,
            retention_days: 90,
        }
    }

    /// Override the retention window used by [`purge_expired`](Self::purge_expired)
    #[must_use]
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Record a fired alert. Re-capturing the same (fingerprint, fired_at)
    /// returns [`CaptureOutcome::Duplicate`].
    pub async fn capture_fired(&self, event: FiredEvent) -> Result<CaptureOutcome> {
        if event.fingerprint.is_empty() {
            return Err(Error::validation("fingerprint is required"));
        }
        if event.alert_name.is_empty() {
            return Err(Error::validation("alert_name is required"));
        }

        let (occ, created) = self
            .store
            .insert_if_absent(&event)
            .await
            .context("capture fired alert")?;

        if created {
            debug!(fingerprint = %occ.fingerprint, fired_at = %occ.fired_at, "Captured fired alert");
            Ok(CaptureOutcome::Created)
        } else {
            debug!(fingerprint = %occ.fingerprint, fired_at = %occ.fired_at, "Fired alert already captured");
            Ok(CaptureOutcome::Duplicate)
        }
    }

    /// Record a resolution on every unresolved occurrence of the fingerprint
    pub async fn capture_resolved(&self, event: ResolvedEvent) -> Result<CaptureOutcome> {
        let updated = self
            .store
            .resolve_unresolved(
                &event.fingerprint,
                event.resolved_at,
                event.metadata.as_ref(),
            )
            .await
            .context("capture resolved alert")?;

        if updated > 0 {
            debug!(fingerprint = %event.fingerprint, rows = updated, "Captured resolution");
            return Ok(CaptureOutcome::Created);
        }
        self.no_update_outcome(&event.fingerprint, "resolved").await
    }

    /// Record the first acknowledgment of the latest occurrence
    pub async fn capture_acknowledged(&self, event: AcknowledgedEvent) -> Result<CaptureOutcome> {
        let updated = self
            .store
            .acknowledge_latest(&event.fingerprint, event.acknowledged_at)
            .await
            .context("capture acknowledged alert")?;

        if updated > 0 {
            debug!(fingerprint = %event.fingerprint, "Captured acknowledgment");
            return Ok(CaptureOutcome::Created);
        }
        self.no_update_outcome(&event.fingerprint, "acknowledged").await
    }

    async fn no_update_outcome(&self, fingerprint: &str, transition: &str) -> Result<CaptureOutcome> {
        let existing = self
            .store
            .latest_by_fingerprint(fingerprint)
            .await
            .context("look up occurrence")?;

        if existing.is_some() {
            debug!(fingerprint, transition, "Transition already applied");
            Ok(CaptureOutcome::AlreadyApplied)
        } else {
            warn!(fingerprint, transition, "No captured occurrence for alert, skipping");
            Ok(CaptureOutcome::Skipped)
        }
    }

    /// Backfill a batch of fired alerts
    pub async fn capture_batch(&self, events: Vec<FiredEvent>) -> BatchCaptureResult {
        let mut result = BatchCaptureResult::default();
        for event in events {
            let fingerprint = event.fingerprint.clone();
            match self.capture_fired(event).await {
                Ok(_) => result.succeeded += 1,
                Err(e) => {
                    warn!(%fingerprint, error = %e, "Failed to capture alert in batch");
                    result.failed += 1;
                }
            }
        }
        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            "Captured alert batch"
        );
        result
    }

    /// Occurrences of one fingerprint, newest first
    pub async fn history(
        &self,
        fingerprint: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AlertOccurrence>> {
        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_HISTORY_LIMIT);
        self.store
            .history(fingerprint, limit)
            .await
            .context("load alert history")
    }

    /// Occurrence counts over the last day and week
    pub async fn summary(&self) -> Result<CaptureSummary> {
        let now = Utc::now();
        let total = self
            .store
            .count_occurrences(&Filter::True)
            .await
            .context("count occurrences")?;
        let last_24h = self
            .store
            .count_occurrences(&Filter::fired_between(now - Duration::hours(24), now))
            .await
            .context("count occurrences in the last 24h")?;
        let last_7d = self
            .store
            .count_occurrences(&Filter::fired_between(now - Duration::days(7), now))
            .await
            .context("count occurrences in the last 7d")?;

        Ok(CaptureSummary {
            total,
            last_24h,
            last_7d,
        })
    }

    /// Store-wide totals, severity breakdown and fired-time bounds
    pub async fn statistics_summary(&self) -> Result<StatisticsSummary> {
        let groups = self
            .store
            .aggregate(&Filter::True, GroupBy::Severity, None)
            .await
            .context("aggregate by severity")?;
        let earliest = self
            .store
            .query_occurrences(&Filter::True, OccurrenceOrder::FiredAtAsc, 1, 0)
            .await
            .context("load earliest occurrence")?;
        let latest = self
            .store
            .query_occurrences(&Filter::True, OccurrenceOrder::FiredAtDesc, 1, 0)
            .await
            .context("load latest occurrence")?;

        Ok(StatisticsSummary {
            total: groups.iter().map(|g| g.stats.count).sum(),
            by_severity: groups
                .into_iter()
                .map(|g| (g.key, g.stats.count))
                .collect(),
            earliest_fired_at: earliest.first().map(|o| o.fired_at),
            latest_fired_at: latest.first().map(|o| o.fired_at),
        })
    }

    /// Delete occurrences older than the retention window
    pub async fn purge_expired(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.retention_days));
        let deleted = self
            .store
            .purge_fired_before(cutoff)
            .await
            .context("purge expired occurrences")?;
        info!(deleted, retention_days = self.retention_days, %cutoff, "Purged expired statistics");
        Ok(deleted)
    }
}
