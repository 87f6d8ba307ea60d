//! Periodic execution of the catalog and inventory jobs.
//!
//! Each job has a single-flight guard shared by its timer and the manual
//! trigger. A tick that finds the previous run still going is skipped and
//! logged; runs never overlap and ticks never queue up.

use serde::{Serialize, Serializer};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::domain::events::DomainEvent;
use crate::domain::{RunMode, SyncJob, SyncRunResult};
use crate::error::SyncError;
use crate::publisher::EventPublisher;
use crate::sync::catalog::{CatalogReconciler, RunRequest};
use crate::sync::inventory::InventoryReconciler;
use crate::sync::locks::KeyedLocks;

/// How often a job runs.
///
/// Accepts `90s`, `10m`, `1h`, `every 15m`, a bare number of seconds, and the
/// step form of a cron minute field, `*/N * * * *`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cadence {
    period: Duration,
}

impl Cadence {
    pub fn every(period: Duration) -> Self { Self { period } }
    pub fn period(&self) -> Duration { self.period }
}

impl FromStr for Cadence {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SyncError::Config(format!("invalid cadence '{s}'"));
        let raw = s.trim().to_ascii_lowercase();

        let fields: Vec<&str> = raw.split_whitespace().collect();
        if fields.len() == 5 {
            if fields[1..].iter().any(|f| *f != "*") { return Err(invalid()); }
            let minutes: u64 = match fields[0] {
                "*" => 1,
                step => step.strip_prefix("*/").and_then(|n| n.parse().ok()).ok_or_else(invalid)?,
            };
            if minutes == 0 { return Err(invalid()); }
            return Ok(Self::every(Duration::from_secs(minutes * 60)));
        }

        let rest = raw.strip_prefix("every").map(str::trim).unwrap_or(&raw);
        let split = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (value, unit) = rest.split_at(split);
        let value: u64 = value.parse().map_err(|_| invalid())?;
        let secs = match unit.trim() {
            "" | "s" | "sec" | "secs" | "second" | "seconds" => value,
            "m" | "min" | "mins" | "minute" | "minutes" => value * 60,
            "h" | "hr" | "hour" | "hours" => value * 3600,
            _ => return Err(invalid()),
        };
        if secs == 0 { return Err(invalid()); }
        Ok(Self::every(Duration::from_secs(secs)))
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.period.as_secs();
        if secs % 3600 == 0 { write!(f, "{}h", secs / 3600) }
        else if secs % 60 == 0 { write!(f, "{}m", secs / 60) }
        else { write!(f, "{secs}s") }
    }
}

impl Serialize for Cadence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// At most one holder at a time.
#[derive(Clone, Default)]
pub struct SingleFlight {
    running: Arc<AtomicBool>,
}

/// Releases its [`SingleFlight`] on drop.
pub struct FlightGuard {
    running: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok()?;
        Some(FlightGuard { running: self.running.clone() })
    }

    pub fn is_running(&self) -> bool { self.running.load(Ordering::Acquire) }
}

impl Drop for FlightGuard {
    fn drop(&mut self) { self.running.store(false, Ordering::Release); }
}

/// The catalog and inventory jobs behind their guards.
#[derive(Clone)]
pub struct SyncJobs {
    pub catalog: Arc<CatalogReconciler>,
    pub inventory: Arc<InventoryReconciler>,
    catalog_flight: SingleFlight,
    inventory_flight: SingleFlight,
    locks: KeyedLocks,
    publisher: EventPublisher,
    shutdown: CancellationToken,
}

impl SyncJobs {
    pub fn new(
        catalog: Arc<CatalogReconciler>, inventory: Arc<InventoryReconciler>, locks: KeyedLocks,
        publisher: EventPublisher, shutdown: CancellationToken,
    ) -> Self {
        Self {
            catalog, inventory, catalog_flight: SingleFlight::default(), inventory_flight: SingleFlight::default(),
            locks, publisher, shutdown,
        }
    }

    pub fn is_running(&self, job: SyncJob) -> bool {
        match job {
            SyncJob::Catalog => self.catalog_flight.is_running(),
            SyncJob::Inventory => self.inventory_flight.is_running(),
        }
    }

    /// Run the catalog job now, or fail fast if it is already running.
    pub async fn run_catalog(&self, request: RunRequest) -> Result<SyncRunResult, SyncError> {
        let guard = self.catalog_flight.try_acquire().ok_or(SyncError::AlreadyRunning(SyncJob::Catalog.as_str()))?;
        Ok(self.run_catalog_guarded(guard, request).await)
    }

    pub async fn run_inventory(&self, mode: RunMode) -> Result<SyncRunResult, SyncError> {
        let guard = self.inventory_flight.try_acquire().ok_or(SyncError::AlreadyRunning(SyncJob::Inventory.as_str()))?;
        Ok(self.run_inventory_guarded(guard, mode).await)
    }

    async fn run_catalog_guarded(&self, _guard: FlightGuard, request: RunRequest) -> SyncRunResult {
        let result = self.catalog.run(&request, &self.shutdown).await;
        self.completed(&result).await;
        result
    }

    async fn run_inventory_guarded(&self, _guard: FlightGuard, mode: RunMode) -> SyncRunResult {
        let result = self.inventory.run(mode, &self.shutdown).await;
        self.completed(&result).await;
        result
    }

    async fn completed(&self, result: &SyncRunResult) {
        self.locks.prune_idle();
        self.publisher.publish(&DomainEvent::SyncCompleted { run: result.clone() }).await;
    }

    /// Start both timers. They stop when the shutdown token fires.
    pub fn spawn(&self, config: &SyncConfig) -> Vec<JoinHandle<()>> {
        let catalog = {
            let jobs = self.clone();
            let flight = self.catalog_flight.clone();
            tokio::spawn(run_every(SyncJob::Catalog, config.catalog_cadence.clone(), flight, self.shutdown.clone(), move |guard| {
                let jobs = jobs.clone();
                async move { jobs.run_catalog_guarded(guard, RunRequest::default()).await }
            }))
        };
        let inventory = {
            let jobs = self.clone();
            let flight = self.inventory_flight.clone();
            tokio::spawn(run_every(SyncJob::Inventory, config.inventory_cadence.clone(), flight, self.shutdown.clone(), move |guard| {
                let jobs = jobs.clone();
                async move { jobs.run_inventory_guarded(guard, RunMode::Execute).await }
            }))
        };
        vec![catalog, inventory]
    }
}

/// Fire `task` on every tick of `cadence` unless the previous run still holds `flight`.
pub async fn run_every<F, Fut>(job: SyncJob, cadence: Cadence, flight: SingleFlight, shutdown: CancellationToken, task: F)
where
    F: Fn(FlightGuard) -> Fut,
    Fut: Future<Output = SyncRunResult> + Send + 'static,
{
    info!(%job, cadence = %cadence, "Scheduler started");
    let mut interval = tokio::time::interval(cadence.period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await; // skip immediate tick

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(%job, "Scheduler shutting down");
                break;
            }
            _ = interval.tick() => {
                let Some(guard) = flight.try_acquire() else {
                    warn!(%job, "Previous run still in progress, skipping tick");
                    continue;
                };
                let run = task(guard);
                tokio::spawn(async move {
                    let result = run.await;
                    if result.aborted {
                        error!(%job, run_id = %result.run_id, errors = ?result.errors, "Scheduled run aborted");
                    }
                });
            }
        }
    }
}
