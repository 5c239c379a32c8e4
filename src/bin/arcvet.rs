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

//! Command-line entry point for arcvet.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arcvet::misc::count_with_commas;
use arcvet::monitor::{Counter, ReportEvent, ReportSink};
use arcvet::progress::{Painter, Progress, ProgressView};
use arcvet::*;

/// Poll interval of the progress painter.
const PAINT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(author, about, version)]
struct Args {
    /// Paths to validate, in sequence.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Check MD5 manifests of files; `required` makes a missing manifest
    /// an error.
    #[arg(long, value_enum, default_value = "yes")]
    md5: Md5Mode,

    /// Check CRC32 of column blobs.
    #[arg(long = "blob-crc", value_enum, default_value = "yes")]
    blob_crc: YesNo,

    /// Check persisted indices.
    #[arg(long, short = 'i', value_enum, default_value = "no")]
    index: YesNo,

    /// Continue past the first failure within an object.
    #[arg(long, short = 'x')]
    exhaustive: bool,

    /// Check referential integrity of alignment databases.
    #[arg(long = "referential-integrity", short = 'd', value_enum, default_value = "yes")]
    referential_integrity: YesNo,

    /// Run deep table-shape checks.
    #[arg(long = "consistency-check", short = 'C', value_enum, default_value = "no")]
    consistency_check: YesNo,

    /// Secondary-alignment deep check row budget: a count or a percentage
    /// like `5%`. Enables the check.
    #[arg(long = "sdc-rows", value_name = "ROWS")]
    sdc_rows: Option<String>,

    /// Threshold for secondary alignments with a longer primary: a count
    /// or a percentage. Enables the check.
    #[arg(long = "sdc-plen-thold", value_name = "THRESHOLD")]
    sdc_plen_thold: Option<String>,

    /// Worker slices for the concurrent sweep.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// No progress bars.
    #[arg(long, short = 'P')]
    no_progress: bool,

    /// Show debug trace on stderr.
    #[arg(long, short = 'D')]
    debug: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum YesNo {
    Yes,
    No,
}

impl From<YesNo> for bool {
    fn from(value: YesNo) -> bool {
        value == YesNo::Yes
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Md5Mode {
    Yes,
    No,
    Required,
}

/// Parse "100000" or "1%" into an [SdcLimit].
fn parse_limit(text: &str) -> std::result::Result<SdcLimit, String> {
    if let Some(percent) = text.strip_suffix('%') {
        let value: u8 = percent
            .parse()
            .map_err(|_| format!("bad percentage {text:?}"))?;
        if value == 0 || value > 100 {
            return Err(format!("percentage {text:?} must be 1-100"));
        }
        Ok(SdcLimit::Percent(value))
    } else {
        let value: u64 = text.parse().map_err(|_| format!("bad row count {text:?}"))?;
        Ok(SdcLimit::Rows(value))
    }
}

fn options_from_args(args: &Args) -> std::result::Result<ValidatorOptions, String> {
    let mut sdc = None;
    if args.sdc_rows.is_some() || args.sdc_plen_thold.is_some() {
        let mut sdc_options = SdcOptions::default();
        if let Some(rows) = &args.sdc_rows {
            sdc_options.rows = parse_limit(rows)?;
        }
        if let Some(thold) = &args.sdc_plen_thold {
            sdc_options.plen_thold = parse_limit(thold)?;
        }
        sdc = Some(sdc_options);
    }
    Ok(ValidatorOptions {
        md5: args.md5 != Md5Mode::No,
        md5_required: args.md5 == Md5Mode::Required,
        blob_crc: args.blob_crc.into(),
        index: args.index.into(),
        exhaustive: args.exhaustive,
        ref_int: args.referential_integrity.into(),
        consistency_check: args.consistency_check.into(),
        sdc,
        threads: args.threads.max(1),
        ..ValidatorOptions::default()
    })
}

/// Sink that forwards findings to the log.
#[derive(Debug, Default)]
struct LoggingSink;

impl ReportSink for LoggingSink {
    fn event(&self, event: ReportEvent) {
        if let ReportEvent::Done { obj_name, mesg, rc } = &event {
            if *rc != 0 {
                warn!(object = %obj_name, rc, "{mesg}");
            }
        }
    }

    fn error(&self, err: &Error) {
        error!("{err}");
    }

    fn warning(&self, err: &Error) {
        warn!("{err}");
    }

    fn count(&self, _counter: Counter, _increment: usize) {}
}

/// Progress painted as a percent line through nutmeg.
struct PercentModel {
    scaled: u32,
    digits: u32,
}

impl nutmeg::Model for PercentModel {
    fn render(&mut self, _width: usize) -> String {
        match self.digits {
            0 => format!("checked {:3}%", self.scaled),
            1 => format!("checked {:5.1}%", self.scaled as f64 / 10.0),
            _ => format!("checked {:6.2}%", self.scaled as f64 / 100.0),
        }
    }
}

#[derive(Default)]
struct NutmegView {
    view: Mutex<Option<nutmeg::View<PercentModel>>>,
}

impl ProgressView for NutmegView {
    fn begin(&self, digits: u32) {
        *self.view.lock().unwrap() = Some(nutmeg::View::new(
            PercentModel { scaled: 0, digits },
            nutmeg::Options::default(),
        ));
    }

    fn paint(&self, scaled_percent: u32) {
        if let Some(view) = self.view.lock().unwrap().as_ref() {
            view.update(|model| model.scaled = scaled_percent);
        }
    }

    fn end(&self) {
        self.view.lock().unwrap().take();
    }
}

fn main() {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.debug { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = match options_from_args(&args) {
        Ok(options) => options,
        Err(message) => {
            error!("{message}");
            std::process::exit(2);
        }
    };

    let sink: Arc<dyn ReportSink> = Arc::new(LoggingSink);
    let cancel = CancelToken::new();

    let (progress, painter_thread) = if args.no_progress {
        (None, None)
    } else {
        let progress = Progress::new();
        let view = Arc::new(NutmegView::default());
        let painter = Painter::new(progress.clone(), view as Arc<dyn ProgressView>);
        let handle = std::thread::spawn(move || painter.run(PAINT_INTERVAL));
        (Some(progress), Some(handle))
    };

    let mut exit_code = 0;
    for path in &args.paths {
        let stats = validate_path(path, &options, sink.clone(), &cancel, progress.clone());
        info!(
            path = %path.display(),
            columns = %count_with_commas(stats.columns_checked as u64),
            errors = stats.error_count(),
            warnings = stats.warning_count(),
            "validation finished"
        );
        if exit_code == 0 {
            exit_code = stats.exit_code();
        }
    }

    if let Some(progress) = &progress {
        progress.terminate();
    }
    if let Some(handle) = painter_thread {
        handle.join().expect("join progress painter");
    }
    std::process::exit(exit_code);
}

#[test]
fn verify_clap() {
    use clap::CommandFactory;
    Args::command().debug_assert()
}
