// Arcvet columnar archive validator.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! The concurrent spot/alignment sweep: a bag of fixed-width workers over
//! disjoint row slices.
//!
//! Producer workers stream PRIMARY_ALIGNMENT rows into the shared lookup
//! map; consumer workers read SEQUENCE rows, enforce the per-mate
//! alignment-count laws, and resolve each nonzero PRIMARY_ALIGNMENT_ID
//! against the map, retrying with a short sleep while the producers have
//! not yet caught up. Entries are deleted on successful match to bound
//! memory.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cursor::{RowRange, Table};
use crate::lookup::{PrimLookup, PrimRec};
use crate::monitor::ReportSink;
use crate::progress::Progress;
use crate::result::SweepResult;
use crate::threads::ThreadRunner;
use crate::validate::{CancelToken, ValidatorOptions};
use crate::*;

/// Sleep between lookup retries while a producer is behind.
const LOOKUP_RETRY: Duration = Duration::from_millis(20);
/// Poll interval for the final latch drain.
const FINISH_POLL: Duration = Duration::from_millis(100);

/// Mates per spot in the standard paired layout.
const MATES_PER_SPOT: usize = 2;

struct SweepShared {
    lookup: PrimLookup,
    result: SweepResult,
    producers_left: AtomicU32,
    first_err: Mutex<Option<Error>>,
    sink: Arc<dyn ReportSink>,
    cancel: CancelToken,
    exhaustive: bool,
    progress: Option<Arc<Progress>>,
}

impl SweepShared {
    /// Record a finding; outside exhaustive mode it also winds the sweep down.
    fn note(&self, err: Error) {
        self.sink.error(&err);
        let mut first = self.first_err.lock().unwrap();
        if first.is_none() {
            *first = Some(err);
        }
        if !self.exhaustive {
            self.cancel.cancel();
        }
    }

    fn bump_progress(&self) {
        if let Some(progress) = &self.progress {
            progress.update(1);
        }
    }
}

/// Slice `count` rows starting at `first` into `slices` disjoint ranges.
fn slice_ranges(first: i64, count: u64, slices: usize) -> Vec<RowRange> {
    let slices = slices.max(1) as u64;
    let rows_per_slice = count / slices + 1;
    let mut out = Vec::new();
    let mut row = first;
    let end = first + count as i64;
    while row < end {
        let len = rows_per_slice.min((end - row) as u64);
        out.push(RowRange {
            first: row,
            count: len,
        });
        row += len as i64;
    }
    out
}

/// Run the producer/consumer sweep over SEQUENCE and PRIMARY_ALIGNMENT.
pub fn run_sweep(
    dbname: &str,
    seq: &Table,
    pri: &Table,
    options: &ValidatorOptions,
    sink: Arc<dyn ReportSink>,
    cancel: CancelToken,
    progress: Option<Arc<Progress>>,
) -> Result<()> {
    let (seq_range, prim_range) = sweep_ranges(seq, pri)?;
    let shared = Arc::new(SweepShared {
        lookup: PrimLookup::new(),
        result: SweepResult::new(),
        producers_left: AtomicU32::new(0),
        first_err: Mutex::new(None),
        sink,
        cancel,
        exhaustive: options.exhaustive,
        progress,
    });

    let producer_slices = slice_ranges(prim_range.first, prim_range.count, options.threads);
    let consumer_slices = slice_ranges(seq_range.first, seq_range.count, options.threads);
    shared
        .producers_left
        .store(producer_slices.len() as u32, Ordering::Relaxed);
    shared
        .result
        .set_to_finish((producer_slices.len() + consumer_slices.len()) as u32);
    if let Some(progress) = &shared.progress {
        progress.start(2, seq_range.count + prim_range.count);
    }
    debug!(
        database = dbname,
        producers = producer_slices.len(),
        consumers = consumer_slices.len(),
        "starting spot sweep"
    );

    let mut runner = ThreadRunner::new();
    for (nr, slice) in producer_slices.into_iter().enumerate() {
        let shared = Arc::clone(&shared);
        let pri = pri.clone();
        runner.add(&format!("sweep-producer-{nr}"), move || {
            let result = producer_slice(&shared, &pri, slice);
            shared.producers_left.fetch_sub(1, Ordering::Release);
            shared.result.finish();
            result
        });
    }
    for (nr, slice) in consumer_slices.into_iter().enumerate() {
        let shared = Arc::clone(&shared);
        let seq = seq.clone();
        runner.add(&format!("sweep-consumer-{nr}"), move || {
            let result = consumer_slice(&shared, &seq, slice);
            shared.result.finish();
            result
        });
    }

    shared.result.wait(FINISH_POLL);
    let joined = runner.join_all();
    if let Some(progress) = &shared.progress {
        progress.stop();
    }
    shared.result.log_summary();
    let leftover = shared.lookup.report();
    if !leftover.is_empty() {
        use itertools::Itertools;
        warn!(
            database = dbname,
            count = leftover.len(),
            first = %leftover.iter().take(8).join(","),
            "primary alignments never referenced by a SEQUENCE row"
        );
    }

    // A finding that wound the sweep down outranks the cancellations it
    // caused in the other workers.
    if let Some(err) = shared.first_err.lock().unwrap().take() {
        return Err(err);
    }
    joined?;
    Ok(())
}

/// Row ranges of the two tables, read through short-lived cursors.
fn sweep_ranges(seq: &Table, pri: &Table) -> Result<(RowRange, RowRange)> {
    let mut seq_cursor = seq.cursor();
    let seq_col = seq_cursor.add_column("PRIMARY_ALIGNMENT_ID")?;
    seq_cursor.open_cursor()?;
    let seq_range = seq_cursor.row_range(seq_col)?;

    let mut pri_cursor = pri.cursor();
    let pri_col = pri_cursor.add_column("READ_LEN")?;
    pri_cursor.open_cursor()?;
    let prim_range = pri_cursor.row_range(pri_col)?;
    Ok((seq_range, prim_range))
}

fn producer_slice(shared: &SweepShared, pri: &Table, slice: RowRange) -> Result<()> {
    let mut cursor = pri.cursor();
    let read_len_col = cursor.add_column("READ_LEN")?;
    let ref_orient_col = cursor.try_add_column("REF_ORIENTATION");
    cursor.open_cursor()?;

    for row in slice.first..slice.end() {
        shared.cancel.check()?;
        let read_len = match cursor.read_scalar::<u32>(row, read_len_col) {
            Ok(read_len) => read_len,
            Err(err) if err.is_row_not_found() => continue,
            Err(err) => return Err(err),
        };
        let ref_orient = match ref_orient_col {
            Some(col) => cursor.read_scalar::<u8>(row, col).unwrap_or(0) != 0,
            None => false,
        };
        shared.lookup.enter(
            row,
            PrimRec {
                read_len,
                ref_orient,
            },
        );
        shared.result.update_prim(0);
        shared.bump_progress();
    }
    Ok(())
}

fn consumer_slice(shared: &SweepShared, seq: &Table, slice: RowRange) -> Result<()> {
    let mut cursor = seq.cursor();
    let pa_id_col = cursor.add_column("PRIMARY_ALIGNMENT_ID")?;
    let count_col = cursor.add_column("ALIGNMENT_COUNT")?;
    cursor.open_cursor()?;

    for row in slice.first..slice.end() {
        shared.cancel.check()?;
        let pa_ids = match cursor.read_array::<i64>(row, pa_id_col) {
            Ok(ids) => ids,
            Err(err) if err.is_row_not_found() => continue,
            Err(err) => return Err(err),
        };
        let counts = cursor.read_array::<u8>(row, count_col)?;

        let mut errors = 0u32;
        for (column, actual) in [
            ("PRIMARY_ALIGNMENT_ID", pa_ids.len()),
            ("ALIGNMENT_COUNT", counts.len()),
        ] {
            if actual != MATES_PER_SPOT {
                errors += 1;
                shared.note(Error::ElementCount {
                    column: column.to_string(),
                    row,
                    expected: MATES_PER_SPOT as u32,
                    actual: actual as u32,
                });
            }
        }

        for mate in 0..pa_ids.len().min(counts.len()) {
            let id = pa_ids[mate];
            if id > 0 {
                errors += resolve_join(shared, row, id)?;
            }
            errors += alignment_count_law(shared, row, mate, counts[mate], id);
        }

        shared.result.update_seq(errors);
        shared.bump_progress();
    }
    Ok(())
}

/// ALIGNMENT_COUNT and PRIMARY_ALIGNMENT_ID must agree per mate.
fn alignment_count_law(shared: &SweepShared, row: i64, mate: usize, count: u8, id: i64) -> u32 {
    let consistent = match count {
        0 => id == 0,
        1 => id != 0,
        _ => false,
    };
    if consistent {
        0
    } else {
        shared.note(Error::AlignmentCountMismatch {
            row,
            mate,
            count,
            id,
        });
        1
    }
}

/// Resolve one mate against the lookup map, waiting for the producer when
/// the key is not yet present. Resolution only checks presence; the
/// per-mate length laws belong to the secondary deep check.
fn resolve_join(shared: &SweepShared, row: i64, id: i64) -> Result<u32> {
    loop {
        shared.cancel.check()?;
        if shared.lookup.take(id).is_some() {
            return Ok(0);
        }
        if shared.producers_left.load(Ordering::Acquire) == 0 {
            // One final look closes the race with the last producer.
            if shared.lookup.take(id).is_some() {
                return Ok(0);
            }
            shared.note(Error::RefIntegrityMissing {
                a: "SEQUENCE.PRIMARY_ALIGNMENT_ID".to_string(),
                b: "PRIMARY_ALIGNMENT".to_string(),
                fkey: id,
                row,
            });
            return Ok(1);
        }
        std::thread::sleep(LOOKUP_RETRY);
    }
}
