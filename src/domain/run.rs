//! Reconciliation run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cap on error messages kept in a single run result.
pub const MAX_RUN_ERRORS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJob { Catalog, Inventory }

impl SyncJob {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Catalog => "catalog", Self::Inventory => "inventory" }
    }
}

impl std::fmt::Display for SyncJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode { DryRun, #[default] Execute }

impl RunMode {
    pub fn from_dry_run(dry_run: bool) -> Self { if dry_run { Self::DryRun } else { Self::Execute } }
    pub fn is_dry_run(&self) -> bool { *self == Self::DryRun }
    pub fn as_str(&self) -> &'static str {
        match self { Self::DryRun => "dry_run", Self::Execute => "execute" }
    }
}

/// Classification of one processed record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome { Created, Updated, Skipped }

/// Summary of one reconciler invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncRunResult {
    pub run_id: Uuid,
    pub job: SyncJob,
    pub mode: RunMode,
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
    /// Record count the ERP reported for the run window, when known.
    pub fetched_total: Option<u64>,
    pub errors: Vec<String>,
    /// Run stopped at a record boundary because it was cancelled.
    pub cancelled: bool,
    /// Run stopped on a run-level error (authentication, fatal transport).
    pub aborted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncRunResult {
    pub fn start(job: SyncJob, mode: RunMode) -> Self {
        Self {
            run_id: Uuid::now_v7(), job, mode, created: 0, updated: 0, skipped: 0, failed: 0,
            fetched_total: None, errors: vec![], cancelled: false, aborted: false,
            started_at: Utc::now(), finished_at: None,
        }
    }

    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Count a per-record failure; the message is kept while under [`MAX_RUN_ERRORS`].
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.failed += 1;
        self.push_error(message.into());
    }

    /// Stop the run on a run-level error.
    pub fn abort(&mut self, message: impl Into<String>) {
        self.aborted = true;
        self.push_error(message.into());
    }

    pub fn processed(&self) -> u32 { self.created + self.updated + self.skipped + self.failed }

    pub fn is_success(&self) -> bool { !self.aborted && self.failed == 0 }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    fn push_error(&mut self, message: String) {
        if self.errors.len() < MAX_RUN_ERRORS { self.errors.push(message); }
    }
}
