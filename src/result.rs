// Arcvet columnar archive validator.

//! Aggregated result of the concurrent spot sweep: per-kind counters and
//! the to-finish latch the driver drains.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering::Relaxed};
use std::time::Duration;

use tracing::info;

use crate::misc::count_with_commas;

/// Counters updated by sweep workers; `finish` decrements the latch so the
/// driver can await termination.
#[derive(Debug, Default)]
pub struct SweepResult {
    seq_records: AtomicU64,
    seq_errors: AtomicU64,
    prim_records: AtomicU64,
    prim_errors: AtomicU64,
    to_finish: AtomicU32,
}

impl SweepResult {
    pub fn new() -> SweepResult {
        SweepResult::default()
    }

    pub fn update_seq(&self, errors: u32) {
        self.seq_records.fetch_add(1, Relaxed);
        self.seq_errors.fetch_add(errors as u64, Relaxed);
    }

    pub fn update_prim(&self, errors: u32) {
        self.prim_records.fetch_add(1, Relaxed);
        self.prim_errors.fetch_add(errors as u64, Relaxed);
    }

    pub fn set_to_finish(&self, value: u32) {
        self.to_finish.store(value, Relaxed);
    }

    pub fn finish(&self) {
        self.to_finish.fetch_sub(1, Relaxed);
    }

    /// Poll until every worker has called `finish`.
    pub fn wait(&self, poll: Duration) {
        while self.to_finish.load(Relaxed) > 0 {
            std::thread::sleep(poll);
        }
    }

    pub fn seq_records(&self) -> u64 {
        self.seq_records.load(Relaxed)
    }

    pub fn prim_records(&self) -> u64 {
        self.prim_records.load(Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.seq_errors.load(Relaxed) + self.prim_errors.load(Relaxed)
    }

    pub fn log_summary(&self) {
        info!(
            seq_rows = %count_with_commas(self.seq_records.load(Relaxed)),
            seq_errors = %count_with_commas(self.seq_errors.load(Relaxed)),
            prim_rows = %count_with_commas(self.prim_records.load(Relaxed)),
            prim_errors = %count_with_commas(self.prim_errors.load(Relaxed)),
            "spot sweep finished"
        );
    }
}
