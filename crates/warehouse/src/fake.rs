//! In-memory warehouse for tests and offline development.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use sqlscout_core::{Error, QueryJob, QueryOutcome, Result, Warehouse};

/// Scripted warehouse: returns a configured outcome and records whether a
/// wet run was ever issued.
#[derive(Default)]
pub struct StaticWarehouse {
    outcome: Mutex<QueryOutcome>,
    bytes_estimate: AtomicU64,
    wet_runs: AtomicU64,
    dry_runs: AtomicU64,
    fail_wet: AtomicBool,
}

impl StaticWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome returned by wet runs.
    pub fn with_outcome(self, outcome: QueryOutcome) -> Self {
        *self.outcome.lock() = outcome;
        self
    }

    /// Byte estimate reported by dry runs.
    pub fn with_bytes_estimate(self, bytes: u64) -> Self {
        self.bytes_estimate.store(bytes, Ordering::SeqCst);
        self
    }

    /// Make wet runs fail with a backend error.
    pub fn with_failing_wet_runs(self) -> Self {
        self.fail_wet.store(true, Ordering::SeqCst);
        self
    }

    pub fn wet_runs(&self) -> u64 {
        self.wet_runs.load(Ordering::SeqCst)
    }

    pub fn dry_runs(&self) -> u64 {
        self.dry_runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Warehouse for StaticWarehouse {
    async fn run(&self, job: &QueryJob) -> Result<QueryOutcome> {
        if job.dry_run {
            self.dry_runs.fetch_add(1, Ordering::SeqCst);
            return Ok(QueryOutcome {
                bytes_processed: self.bytes_estimate.load(Ordering::SeqCst),
                cache_hit: false,
                job_id: "dry-run".to_string(),
                ..QueryOutcome::default()
            });
        }

        self.wet_runs.fetch_add(1, Ordering::SeqCst);
        if self.fail_wet.load(Ordering::SeqCst) {
            return Err(Error::Backend("scripted failure".to_string()));
        }
        Ok(self.outcome.lock().clone())
    }
}
