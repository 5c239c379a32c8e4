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

//! The top-level validation run: probe the path, walk the structure, then
//! apply the schema-aware semantic checks.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::archive::{Archive, ObjectKind};
use crate::cursor::Table;
use crate::errors::ReportKind;
use crate::monitor::{Counter, ReportEvent, ReportSink};
use crate::probe::probe;
use crate::progress::Progress;
use crate::ric::{census_align_db, dbric_align};
use crate::walker::Walker;
use crate::*;

/// Schema-name prefix of read tables.
pub const SCHEMA_SRA_TABLE: &str = "sra:tbl";
/// Schema-name prefix of alignment databases.
pub const SCHEMA_ALIGN_DB: &str = "align:db";

/// Default memory budget for the referential-integrity work buffers.
const DEFAULT_MEMORY_BUDGET: usize = 2 * 1024 * 1024 * 1024;
/// Default worker count for the concurrent sweep.
const DEFAULT_THREADS: usize = 4;

/// A row budget expressed as an absolute count or a percentage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SdcLimit {
    Rows(u64),
    Percent(u8),
}

impl SdcLimit {
    /// Resolve against a total row count. A zero or oversized absolute
    /// budget means the whole table.
    pub fn resolve(&self, total: u64) -> u64 {
        match *self {
            SdcLimit::Rows(0) => total,
            SdcLimit::Rows(rows) => rows.min(total),
            SdcLimit::Percent(percent) => {
                ((total as f64) * (percent as f64) / 100.0).ceil() as u64
            }
        }
    }
}

/// Configuration of the secondary-alignment deep check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SdcOptions {
    pub rows: SdcLimit,
    pub plen_thold: SdcLimit,
}

impl Default for SdcOptions {
    fn default() -> SdcOptions {
        SdcOptions {
            rows: SdcLimit::Rows(100_000),
            plen_thold: SdcLimit::Percent(1),
        }
    }
}

/// Immutable options threaded through a validation run.
#[derive(Clone, Debug)]
pub struct ValidatorOptions {
    /// Verify MD5 manifests where present.
    pub md5: bool,
    /// Treat a missing manifest as fatal rather than a warning.
    pub md5_required: bool,
    /// Verify per-blob CRC32s.
    pub blob_crc: bool,
    /// Verify persisted indices.
    pub index: bool,
    /// Continue past the first failure within an object.
    pub exhaustive: bool,
    /// Run the referential-integrity joins on alignment databases.
    pub ref_int: bool,
    /// Run the deep table-shape checks.
    pub consistency_check: bool,
    /// Secondary-alignment deep check; None disables it.
    pub sdc: Option<SdcOptions>,
    /// Budget for referential-integrity work buffers, in bytes.
    pub memory_budget: usize,
    /// Worker slices for the concurrent sweep.
    pub threads: usize,
}

impl Default for ValidatorOptions {
    fn default() -> ValidatorOptions {
        ValidatorOptions {
            md5: true,
            md5_required: false,
            blob_crc: true,
            index: false,
            exhaustive: false,
            ref_int: true,
            consistency_check: false,
            sdc: None,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            threads: DEFAULT_THREADS,
        }
    }
}

/// Cooperative cancellation flag shared across workers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Relaxed)
    }

    /// Polled at every chunk boundary and before each IO.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a checker needs from the run.
pub struct ValidateContext<'a> {
    pub options: &'a ValidatorOptions,
    pub sink: &'a Arc<dyn ReportSink>,
    pub cancel: &'a CancelToken,
}

/// Aggregated outcome of validating one path.
#[derive(Debug, Default)]
pub struct ValidateStats {
    pub columns_checked: usize,
    pub indexes_checked: usize,
    /// First non-warning failure, deciding the exit code.
    pub first_failure: Option<ReportKind>,
    /// Problem counts by kind, warnings included.
    pub counts: HashMap<ReportKind, usize>,
}

impl ValidateStats {
    pub fn is_clean(&self) -> bool {
        self.first_failure.is_none()
    }

    pub fn error_count(&self) -> usize {
        self.counts
            .iter()
            .filter(|(kind, _)| !kind.is_warning())
            .map(|(_, count)| count)
            .sum()
    }

    pub fn warning_count(&self) -> usize {
        self.counts
            .iter()
            .filter(|(kind, _)| kind.is_warning())
            .map(|(_, count)| count)
            .sum()
    }

    pub fn exit_code(&self) -> i32 {
        self.first_failure.map_or(0, ReportKind::exit_code)
    }
}

/// Tee sink that also aggregates problem kinds for the run's stats.
struct RunSink {
    inner: Arc<dyn ReportSink>,
    state: Mutex<RunState>,
}

#[derive(Clone, Default)]
struct RunState {
    first_failure: Option<ReportKind>,
    counts: HashMap<ReportKind, usize>,
}

impl RunSink {
    fn record(&self, kind: ReportKind) {
        let mut state = self.state.lock().unwrap();
        *state.counts.entry(kind).or_insert(0) += 1;
        if !kind.is_warning() && state.first_failure.is_none() {
            state.first_failure = Some(kind);
        }
    }

    fn snapshot(&self) -> RunState {
        self.state.lock().unwrap().clone()
    }

    fn has_failure(&self) -> bool {
        self.state.lock().unwrap().first_failure.is_some()
    }
}

impl ReportSink for RunSink {
    fn event(&self, event: ReportEvent) {
        self.inner.event(event);
    }

    fn error(&self, err: &Error) {
        self.record(err.kind());
        self.inner.error(err);
    }

    fn warning(&self, err: &Error) {
        self.record(err.kind());
        self.inner.warning(err);
    }

    fn count(&self, counter: Counter, increment: usize) {
        self.inner.count(counter, increment);
    }
}

/// Validate one path end-to-end: probe, structural walk, semantic checks.
///
/// Problems are reported through the sink as they are found; the returned
/// stats summarise them and carry the exit code.
pub fn validate_path(
    path: &Path,
    options: &ValidatorOptions,
    sink: Arc<dyn ReportSink>,
    cancel: &CancelToken,
    progress: Option<Arc<Progress>>,
) -> ValidateStats {
    let run_sink: Arc<RunSink> = Arc::new(RunSink {
        inner: sink,
        state: Mutex::new(RunState::default()),
    });
    let shared: Arc<dyn ReportSink> = run_sink.clone();
    let mut stats = ValidateStats::default();

    let root = match probe(path) {
        Ok(root) => root,
        Err(err) => {
            run_sink.error(&err);
            return finish_stats(stats, &run_sink);
        }
    };
    info!(kind = %root.kind, path = %path.display(), "Validating...");

    let archive = match Archive::open(root) {
        Ok(archive) => archive,
        Err(err) => {
            run_sink.error(&err);
            return finish_stats(stats, &run_sink);
        }
    };

    let walker = Walker::new(options, run_sink.as_ref(), cancel);
    let (walk_stats, walk_result) = walker.walk(&archive);
    stats.columns_checked = walk_stats.columns_checked;
    stats.indexes_checked = walk_stats.indexes_checked;
    match walk_result {
        Ok(()) => {
            if stats.columns_checked == 0 && stats.indexes_checked == 0 && !run_sink.has_failure()
            {
                run_sink.warning(&Error::NothingToValidate {
                    object: archive.name().to_string(),
                });
            }
        }
        Err(Error::Cancelled) => {
            run_sink.error(&Error::Cancelled);
            return finish_stats(stats, &run_sink);
        }
        Err(err) => {
            // Check failures were reported where they were found; io and
            // metadata failures surface here.
            if !run_sink.has_failure() {
                run_sink.error(&err);
            }
            if !options.exhaustive {
                return finish_stats(stats, &run_sink);
            }
        }
    }

    let ctx = ValidateContext {
        options,
        sink: &shared,
        cancel,
    };
    match semantic_checks(&ctx, &archive, progress) {
        Ok(()) => (),
        Err(Error::Cancelled) => run_sink.error(&Error::Cancelled),
        Err(err) => {
            // Check failures were reported at their detection site; anything
            // else (an unreadable table, say) still needs recording.
            if !run_sink.has_failure() {
                run_sink.error(&err);
            }
        }
    }

    let stats = finish_stats(stats, &run_sink);
    if stats.is_clean() {
        info!(
            object = archive.name(),
            kind = %archive.root_kind(),
            "is consistent"
        );
    } else {
        warn!(
            object = archive.name(),
            errors = stats.error_count(),
            "check failed"
        );
    }
    stats
}

fn finish_stats(mut stats: ValidateStats, run_sink: &RunSink) -> ValidateStats {
    let state = run_sink.snapshot();
    stats.first_failure = state.first_failure;
    stats.counts = state.counts;
    stats
}

/// Dispatch the semantic validator by the root object's schema.
fn semantic_checks(
    ctx: &ValidateContext<'_>,
    archive: &Archive,
    progress: Option<Arc<Progress>>,
) -> Result<()> {
    let schema = archive.schema()?;
    match archive.root_kind() {
        ObjectKind::Table => {
            let is_sra = schema
                .as_deref()
                .map_or(true, |schema| schema.starts_with(SCHEMA_SRA_TABLE));
            if !is_sra {
                ctx.sink.warning(&Error::CheckSkipped {
                    check: "semantic checks".to_string(),
                    reason: format!("table has unrecognized type {:?}", schema.unwrap()),
                });
                return Ok(());
            }
            let table = Table::open(archive.transport().clone(), archive.name())?;
            crate::consistency::verify_sequence_table(ctx, &table)
        }
        ObjectKind::Database => {
            let is_align = schema
                .as_deref()
                .map_or(false, |schema| schema.starts_with(SCHEMA_ALIGN_DB));
            if !is_align {
                ctx.sink.warning(&Error::CheckSkipped {
                    check: "semantic checks".to_string(),
                    reason: format!(
                        "database has unrecognized type {:?}",
                        schema.unwrap_or_default()
                    ),
                });
                return Ok(());
            }
            align_db_checks(ctx, archive, progress)
        }
        _ => Ok(()),
    }
}

/// Census, referential integrity, deep checks and the concurrent sweep for
/// an alignment database.
fn align_db_checks(
    ctx: &ValidateContext<'_>,
    archive: &Archive,
    progress: Option<Arc<Progress>>,
) -> Result<()> {
    let (tables, census_err) = census_align_db(ctx, archive)?;
    let mut first_err = census_err;

    if ctx.options.ref_int && (first_err.is_none() || ctx.options.exhaustive) {
        if let Err(err) = dbric_align(ctx, archive.name(), &tables) {
            if matches!(err, Error::Cancelled) {
                return Err(err);
            }
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    }

    if ctx.options.consistency_check && (first_err.is_none() || ctx.options.exhaustive) {
        if let (Some(seq), Some(pri)) = (&tables.sequence, &tables.primary) {
            let result = crate::sweep::run_sweep(
                archive.name(),
                seq,
                pri,
                ctx.options,
                Arc::clone(ctx.sink),
                ctx.cancel.clone(),
                progress,
            );
            if let Err(err) = result {
                if matches!(err, Error::Cancelled) {
                    return Err(err);
                }
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
    }

    match first_err {
        None => Ok(()),
        Some(err) => Err(err),
    }
}
