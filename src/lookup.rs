// Arcvet columnar archive validator.

//! The shared lookup map used by the producer/consumer pair of the
//! concurrent spot sweep.
//!
//! Producers stream primary-alignment rows into the map keyed by primary
//! row id; consumers resolve each key and delete it on a successful match,
//! which bounds the map to the producer/consumer skew.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

use crate::misc::count_with_commas;

/// What the sweep remembers about one primary alignment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PrimRec {
    pub read_len: u32,
    pub ref_orient: bool,
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<i64, PrimRec>,
    in_map: u64,
    max_in_map: u64,
}

/// Mutex-guarded map from primary row id to its record.
#[derive(Debug, Default)]
pub struct PrimLookup {
    inner: Mutex<Inner>,
}

impl PrimLookup {
    pub fn new() -> PrimLookup {
        PrimLookup::default()
    }

    /// Producer side: publish one primary row.
    pub fn enter(&self, align_row_id: i64, rec: PrimRec) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.insert(align_row_id, rec);
        inner.in_map += 1;
        if inner.in_map > inner.max_in_map {
            inner.max_in_map = inner.in_map;
        }
    }

    /// Consumer side: resolve and delete one key.
    pub fn take(&self, align_row_id: i64) -> Option<PrimRec> {
        let mut inner = self.inner.lock().unwrap();
        let rec = inner.map.remove(&align_row_id);
        if rec.is_some() {
            inner.in_map -= 1;
        }
        rec
    }

    /// Entries currently held, for tests and diagnostics.
    pub fn len(&self) -> u64 {
        self.inner.lock().unwrap().in_map
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Steady-state high-water mark of the map.
    pub fn high_water(&self) -> u64 {
        self.inner.lock().unwrap().max_in_map
    }

    /// Log the drain state; leftover keys are primaries no consumer claimed.
    pub fn report(&self) -> Vec<i64> {
        let inner = self.inner.lock().unwrap();
        info!(
            in_map = %count_with_commas(inner.in_map),
            max_in_map = %count_with_commas(inner.max_in_map),
            "lookup drain state"
        );
        let mut leftover: Vec<i64> = inner.map.keys().copied().collect();
        leftover.sort_unstable();
        leftover
    }
}
