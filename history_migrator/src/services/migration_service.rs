//! Pipeline history migration driver.
//!
//! Walks every history group, picks the most recent records of each and
//! migrates them one at a time, each in its own transaction:
//!
//! 1. lock the legacy row (skip if another run holds it)
//! 2. skip if the build id already exists in pipeline_build
//! 3. decode the snapshot
//! 4. rebuild stages/jobs and insert the build
//! 5. commit
//!
//! A failing record is rolled back and logged; the run always moves on to
//! the next record. Re-running the whole migration is safe.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::error::{MigrationError, RecordError};
use crate::models::build::NewPipelineBuild;
use crate::models::legacy::HistoryGroup;
use crate::services::build_reconstructor;
use crate::services::legacy_decoder::{self, StagesField};
use crate::store::{HistoryStore, LockOutcome, RecordTransaction};

/// Number of records migrated per group when not configured otherwise.
pub const DEFAULT_WINDOW: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another run holds the row lock; a later run will pick it up.
    LockContended,
    /// The build id is already present in pipeline_build.
    AlreadyMigrated,
    /// The snapshot has no `stages` key at all.
    MissingStages,
}

#[derive(Debug)]
pub enum RecordOutcome {
    Migrated,
    Skipped(SkipReason),
    Failed(RecordError),
}

impl RecordOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Migrated => "migrated",
            Self::Skipped(SkipReason::LockContended) => "lock_contended",
            Self::Skipped(SkipReason::AlreadyMigrated) => "already_migrated",
            Self::Skipped(SkipReason::MissingStages) => "missing_stages",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
    pub record_id: i64,
    pub kind: &'static str,
    pub error: String,
}

/// Per-run tally of record outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub groups: usize,
    pub groups_failed: usize,
    pub candidates: usize,
    pub migrated: usize,
    pub already_migrated: usize,
    pub lock_contended: usize,
    pub missing_stages: usize,
    pub failed: Vec<FailedRecord>,
}

impl MigrationSummary {
    fn record(&mut self, record_id: i64, outcome: &RecordOutcome) {
        self.candidates += 1;
        match outcome {
            RecordOutcome::Migrated => self.migrated += 1,
            RecordOutcome::Skipped(SkipReason::AlreadyMigrated) => self.already_migrated += 1,
            RecordOutcome::Skipped(SkipReason::LockContended) => self.lock_contended += 1,
            RecordOutcome::Skipped(SkipReason::MissingStages) => self.missing_stages += 1,
            RecordOutcome::Failed(err) => self.failed.push(FailedRecord {
                record_id,
                kind: err.kind(),
                error: err.to_string(),
            }),
        }
    }

    fn merge(&mut self, other: MigrationSummary) {
        self.groups_failed += other.groups_failed;
        self.candidates += other.candidates;
        self.migrated += other.migrated;
        self.already_migrated += other.already_migrated;
        self.lock_contended += other.lock_contended;
        self.missing_stages += other.missing_stages;
        self.failed.extend(other.failed);
    }
}

/// What to do with a record's transaction once its steps ran.
enum Disposition {
    Commit,
    Skip(SkipReason),
}

#[derive(Clone)]
pub struct MigrationDriver {
    store: Arc<dyn HistoryStore>,
    window: i64,
    workers: usize,
}

impl MigrationDriver {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            window: DEFAULT_WINDOW,
            workers: 1,
        }
    }

    pub fn with_window(mut self, window: i64) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Migrate every group. Only a failure to list groups aborts the run.
    pub async fn run(&self) -> Result<MigrationSummary, MigrationError> {
        let groups = self.store.list_groups().await.map_err(|e| {
            tracing::error!(error = %e, "Cannot select distinct pipeline history");
            MigrationError::GroupQuery(e)
        })?;

        tracing::info!(
            groups = groups.len(),
            window = self.window,
            workers = self.workers,
            "Pipeline history migration started"
        );

        let mut summary = MigrationSummary {
            groups: groups.len(),
            ..MigrationSummary::default()
        };

        if self.workers <= 1 {
            for group in &groups {
                self.migrate_group(group, &mut summary).await;
            }
        } else {
            summary.merge(self.run_parallel(groups).await);
        }

        tracing::info!(
            migrated = summary.migrated,
            already_migrated = summary.already_migrated,
            lock_contended = summary.lock_contended,
            missing_stages = summary.missing_stages,
            failed = summary.failed.len(),
            groups_failed = summary.groups_failed,
            "Pipeline history migration finished"
        );

        Ok(summary)
    }

    /// Spread groups over `workers` tasks pulling from a shared queue.
    async fn run_parallel(&self, groups: Vec<HistoryGroup>) -> MigrationSummary {
        let queue = Arc::new(Mutex::new(VecDeque::from(groups)));
        let mut tasks = JoinSet::new();

        for _ in 0..self.workers {
            let driver = self.clone();
            let queue = queue.clone();
            tasks.spawn(async move {
                let mut partial = MigrationSummary::default();
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some(group) = next else { break };
                    driver.migrate_group(&group, &mut partial).await;
                }
                partial
            });
        }

        let mut summary = MigrationSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(partial) => summary.merge(partial),
                Err(e) => tracing::error!(error = %e, "Migration worker aborted"),
            }
        }
        summary
    }

    /// Migrate the candidates of one group. A failing candidate query skips
    /// the group only.
    pub async fn migrate_group(&self, group: &HistoryGroup, summary: &mut MigrationSummary) {
        let candidates = match self.store.list_candidates(group, self.window).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(group = %group, error = %e, "Cannot get pipeline history by criteria");
                crate::metrics::group_failed();
                summary.groups_failed += 1;
                return;
            }
        };

        tracing::debug!(group = %group, candidates = candidates.len(), "Migrating history group");

        for record_id in candidates {
            let outcome = self.migrate_record(record_id).await;
            summary.record(record_id, &outcome);
        }
    }

    /// Migrate a single legacy record inside its own transaction.
    pub async fn migrate_record(&self, record_id: i64) -> RecordOutcome {
        let started = Instant::now();
        tracing::info!(record_id, "Pipeline history: migrating");

        let outcome = match self.store.begin().await {
            Ok(mut tx) => {
                let result = migrate_in_transaction(tx.as_mut(), record_id).await;
                finish(tx.as_mut(), record_id, result).await
            }
            Err(e) => {
                tracing::error!(record_id, error = %e, "Cannot start transaction");
                RecordOutcome::Failed(RecordError::Store(e))
            }
        };

        crate::metrics::record_migrated(outcome.label(), started.elapsed().as_millis() as u64);
        outcome
    }
}

async fn migrate_in_transaction(
    tx: &mut dyn RecordTransaction,
    record_id: i64,
) -> Result<Disposition, RecordError> {
    let raw = match tx.try_lock(record_id).await.map_err(RecordError::Store)? {
        LockOutcome::Acquired(raw) => raw,
        LockOutcome::Contended => return Ok(Disposition::Skip(SkipReason::LockContended)),
    };

    if tx.build_exists(record_id).await.map_err(RecordError::Store)? {
        return Ok(Disposition::Skip(SkipReason::AlreadyMigrated));
    }

    let record = legacy_decoder::decode(&raw)?;
    let build_id = record.skeleton.id;
    if build_id != record_id {
        tracing::warn!(record_id, build_id, "Snapshot id differs from history row id");
        if tx.build_exists(build_id).await.map_err(RecordError::Store)? {
            return Ok(Disposition::Skip(SkipReason::AlreadyMigrated));
        }
    }

    match record.stages() {
        StagesField::Missing => return Ok(Disposition::Skip(SkipReason::MissingStages)),
        StagesField::Null => tracing::debug!(record_id, "Null stages, migrating an empty build"),
        StagesField::Entries(entries) => {
            tracing::debug!(record_id, stages = entries.len(), "Rebuilding stages")
        }
    }

    let build = build_reconstructor::reconstruct(&record.skeleton, &record.tree)?;
    let row = NewPipelineBuild::from_build(&build).map_err(RecordError::Encode)?;
    tx.insert_build(&row).await.map_err(RecordError::Write)?;

    Ok(Disposition::Commit)
}

/// Commit or roll back according to the steps' result and log the outcome.
async fn finish(
    tx: &mut dyn RecordTransaction,
    record_id: i64,
    result: Result<Disposition, RecordError>,
) -> RecordOutcome {
    let outcome = match result {
        Ok(Disposition::Commit) => match tx.commit().await {
            Ok(()) => {
                tracing::info!(record_id, "Pipeline history: end migrating");
                return RecordOutcome::Migrated;
            }
            Err(e) => RecordOutcome::Failed(RecordError::Write(e)),
        },
        Ok(Disposition::Skip(reason)) => RecordOutcome::Skipped(reason),
        Err(e) => RecordOutcome::Failed(e),
    };

    if let Err(e) = tx.rollback().await {
        tracing::warn!(record_id, error = %e, "Cannot roll back transaction");
    }

    match &outcome {
        RecordOutcome::Skipped(SkipReason::LockContended) => {
            tracing::debug!(record_id, "Pipeline history locked by another run, skipped");
        }
        RecordOutcome::Skipped(SkipReason::AlreadyMigrated) => {
            tracing::info!(record_id, "Pipeline history already migrated");
        }
        RecordOutcome::Skipped(SkipReason::MissingStages) => {
            tracing::warn!(record_id, "No stages on pipeline history, skipped");
        }
        RecordOutcome::Failed(e) => {
            tracing::error!(record_id, kind = e.kind(), error = %e, "Cannot migrate pipeline history");
        }
        RecordOutcome::Migrated => {}
    }

    outcome
}
