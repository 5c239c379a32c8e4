// Arcvet columnar archive validator.

//! A sink that collects everything it is given, mostly for tests.

use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex};

use crate::errors::{Error, ReportKind};

use super::{Counter, ReportEvent, ReportSink, NUM_COUNTERS};

/// Collects reported events, problems and counters into vectors.
#[derive(Debug, Default)]
pub struct CollectSink {
    events: Mutex<Vec<ReportEvent>>,
    problems: Mutex<Vec<(ReportKind, String)>>,
    counters: [AtomicUsize; NUM_COUNTERS],
}

impl CollectSink {
    pub fn arc() -> Arc<CollectSink> {
        Arc::new(CollectSink::default())
    }

    pub fn get_counter(&self, counter: Counter) -> usize {
        self.counters[counter as usize].load(Relaxed)
    }

    /// All events reported so far, in emission order.
    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().unwrap().clone()
    }

    /// All problems reported so far as (kind, rendered message).
    pub fn problems(&self) -> Vec<(ReportKind, String)> {
        self.problems.lock().unwrap().clone()
    }

    pub fn errors_of_kind(&self, kind: ReportKind) -> Vec<String> {
        self.problems
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl ReportSink for CollectSink {
    fn event(&self, event: ReportEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn error(&self, err: &Error) {
        self.problems
            .lock()
            .unwrap()
            .push((err.kind(), err.to_string()));
    }

    fn warning(&self, err: &Error) {
        self.problems
            .lock()
            .unwrap()
            .push((err.kind(), err.to_string()));
    }

    fn count(&self, counter: Counter, increment: usize) {
        self.counters[counter as usize].fetch_add(increment, Relaxed);
    }
}
