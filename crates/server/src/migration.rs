//! Background migration of aged content from the local to the remote tier.
//!
//! A sweep pages through the content ledger in id order and asks the router
//! to migrate every record whose local file was last modified more than
//! `min_age` before the sweep started. Records with no local file are
//! skipped. A second phase removes staging files that were abandoned for
//! longer than `min_age`.

use crate::error::LibrarianResult;
use crate::metrics;
use librarian_core::config::MigrationConfig;
use librarian_metadata::{ContentRepo, ContentRow, MetadataStore};
use librarian_storage::{MigrationOutcome, ObjectStore, StorageError, StorageRouter, content_key};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Counters from one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Ledger records looked at.
    pub examined: u64,
    /// Records moved to the remote tier. In a dry run, records that would
    /// have been moved.
    pub migrated: u64,
    pub skipped_young: u64,
    /// Records with no local copy (already remote, or missing).
    pub skipped_absent: u64,
    /// Records another sweep was already migrating.
    pub skipped_busy: u64,
    pub failed: u64,
    /// Abandoned staging files removed.
    pub staging_removed: u64,
    pub dry_run: bool,
}

pub struct MigrationSweep {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<StorageRouter>,
    config: MigrationConfig,
}

impl MigrationSweep {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<StorageRouter>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            metadata,
            storage,
            config,
        }
    }

    /// Run one full pass over the ledger, then clean the staging area.
    ///
    /// Per-record failures are counted and logged; only ledger and staging
    /// listing errors abort the sweep.
    pub async fn run_once(&self) -> LibrarianResult<SweepStats> {
        let mut stats = SweepStats {
            dry_run: self.config.dry_run,
            ..SweepStats::default()
        };

        if self.storage.remote().is_some() {
            let cutoff = OffsetDateTime::now_utc() - self.config.min_age();
            let mut after = None;
            loop {
                let page = self
                    .metadata
                    .list_contents(after, self.config.batch_size)
                    .await?;
                let Some(last) = page.last() else { break };
                after = Some(last.id()?);

                for row in &page {
                    self.examine(row, cutoff, &mut stats).await;
                }
                if page.len() < self.config.batch_size as usize {
                    break;
                }
            }
        } else {
            tracing::debug!("no remote tier configured, skipping content migration");
        }

        stats.staging_removed = self.clean_staging().await?;

        tracing::info!(
            examined = stats.examined,
            migrated = stats.migrated,
            skipped_young = stats.skipped_young,
            skipped_absent = stats.skipped_absent,
            skipped_busy = stats.skipped_busy,
            failed = stats.failed,
            staging_removed = stats.staging_removed,
            dry_run = stats.dry_run,
            "migration sweep finished"
        );
        Ok(stats)
    }

    async fn examine(&self, row: &ContentRow, cutoff: OffsetDateTime, stats: &mut SweepStats) {
        stats.examined += 1;

        let (id, digests) = match (row.id(), row.digests()) {
            (Ok(id), Ok(digests)) => (id, digests),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(content_id = row.content_id, error = %e, "skipping corrupt ledger row");
                stats.failed += 1;
                return;
            }
        };

        let modified = match self.storage.local().head(&content_key(id)).await {
            Ok(meta) => meta.last_modified,
            Err(StorageError::NotFound(_)) => {
                stats.skipped_absent += 1;
                return;
            }
            Err(e) => {
                tracing::warn!(content_id = %id, error = %e, "failed to stat local copy");
                stats.failed += 1;
                return;
            }
        };
        // A file whose mtime cannot be read is never old enough.
        if !modified.is_some_and(|at| at <= cutoff) {
            stats.skipped_young += 1;
            return;
        }

        if self.config.dry_run {
            tracing::info!(content_id = %id, size = row.size(), "would migrate");
            stats.migrated += 1;
            return;
        }

        match self.storage.migrate(id, row.size(), &digests).await {
            Ok(MigrationOutcome::Migrated { bytes }) => {
                stats.migrated += 1;
                metrics::MIGRATIONS.with_label_values(&["migrated"]).inc();
                metrics::MIGRATED_BYTES.inc_by(bytes);
            }
            Ok(MigrationOutcome::NotLocal) => stats.skipped_absent += 1,
            Ok(MigrationOutcome::InProgress) => stats.skipped_busy += 1,
            Err(e) => {
                tracing::warn!(content_id = %id, error = %e, "migration failed, local copy kept");
                metrics::MIGRATIONS.with_label_values(&["failed"]).inc();
                stats.failed += 1;
            }
        }
    }

    /// Remove staging files older than `min_age`. Removal is skipped in a
    /// dry run, but stale files are still counted.
    async fn clean_staging(&self) -> LibrarianResult<u64> {
        let max_age = Duration::from_secs(self.config.min_age_secs);
        let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
            return Ok(0);
        };

        let mut removed = 0;
        for staged in self.storage.local().list_staged().await? {
            if staged.modified > cutoff {
                continue;
            }
            if self.config.dry_run {
                removed += 1;
                continue;
            }
            match self.storage.local().remove_staged(&staged.path).await {
                Ok(()) => {
                    tracing::debug!(staging = %staged.path.display(), "removed abandoned staging file");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(staging = %staged.path.display(), error = %e, "failed to remove staging file");
                }
            }
        }
        Ok(removed)
    }

    /// Run the sweep every `interval_secs` until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.config.interval();
            tracing::info!(
                interval_secs = interval.as_secs(),
                min_age_secs = self.config.min_age_secs,
                dry_run = self.config.dry_run,
                "migration sweep scheduled"
            );
            loop {
                tokio::time::sleep(interval).await;
                match self.run_once().await {
                    Ok(_) => metrics::SWEEP_RUNS.with_label_values(&["ok"]).inc(),
                    Err(e) => {
                        metrics::SWEEP_RUNS.with_label_values(&["error"]).inc();
                        tracing::error!(error = %e, "migration sweep failed, retrying next interval");
                    }
                }
            }
        })
    }
}
