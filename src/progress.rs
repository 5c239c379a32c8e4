// Arcvet columnar archive validator.

//! Advisory progress: a lock-free counter updated by workers and a painter
//! worker that polls it and paints percent steps.
//!
//! The model is advisory; disabling it changes no validation outcome.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

/// Painter states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ProgressState {
    Idle = 0,
    Init = 1,
    Running = 2,
    Stop = 3,
    Term = 4,
}

impl ProgressState {
    fn from_u8(value: u8) -> ProgressState {
        match value {
            1 => ProgressState::Init,
            2 => ProgressState::Running,
            3 => ProgressState::Stop,
            4 => ProgressState::Term,
            _ => ProgressState::Idle,
        }
    }
}

/// Shared progress counter with the painter state machine's inputs.
#[derive(Debug, Default)]
pub struct Progress {
    value: AtomicU64,
    max_value: AtomicU64,
    digits: AtomicU32,
    state: AtomicU8,
}

impl Progress {
    pub fn new() -> Arc<Progress> {
        Arc::new(Progress::default())
    }

    /// Begin a painted phase over `max_value` units, with `digits` decimal
    /// digits of percent precision.
    pub fn start(&self, digits: u32, max_value: u64) {
        self.value.store(0, Relaxed);
        self.max_value.store(max_value, Relaxed);
        self.digits.store(digits, Relaxed);
        self.state.store(ProgressState::Init as u8, Relaxed);
    }

    /// Updated after each row batch.
    pub fn update(&self, by: u64) {
        self.value.fetch_add(by, Relaxed);
    }

    pub fn stop(&self) {
        self.state.store(ProgressState::Stop as u8, Relaxed);
    }

    pub fn terminate(&self) {
        self.state.store(ProgressState::Term as u8, Relaxed);
    }

    pub fn state(&self) -> ProgressState {
        ProgressState::from_u8(self.state.load(Relaxed))
    }

    fn set_state(&self, state: ProgressState) {
        self.state.store(state as u8, Relaxed);
    }

    /// Percent scaled by the digit precision: 0..=100, 0..=1000, 0..=10000.
    fn scaled_percent(&self) -> u32 {
        let max = self.max_value.load(Relaxed);
        let value = self.value.load(Relaxed);
        let scale: u64 = match self.digits.load(Relaxed) {
            1 => 1000,
            2 => 10000,
            _ => 100,
        };
        if max > 0 {
            ((value * scale) / max) as u32
        } else {
            0
        }
    }
}

/// Where percent steps are painted; the binary backs this with a terminal
/// progress bar, tests with a vector.
pub trait ProgressView: Send + Sync {
    fn begin(&self, digits: u32);

    fn paint(&self, scaled_percent: u32);

    fn end(&self);
}

/// Polls a [Progress] and drives a [ProgressView] through the state machine.
pub struct Painter {
    progress: Arc<Progress>,
    view: Arc<dyn ProgressView>,
    cur: u32,
    visible: bool,
}

impl Painter {
    pub fn new(progress: Arc<Progress>, view: Arc<dyn ProgressView>) -> Painter {
        Painter {
            progress,
            view,
            cur: 0,
            visible: false,
        }
    }

    fn steps(&mut self) {
        let percent = self.progress.scaled_percent();
        if percent > self.cur {
            for step in self.cur + 1..=percent {
                self.view.paint(step);
            }
            self.cur = percent;
        }
    }

    fn steps_and_hide(&mut self) {
        if self.visible {
            self.steps();
            self.view.end();
            self.visible = false;
        }
    }

    /// One poll of the state machine; false once terminated.
    pub fn step(&mut self) -> bool {
        match self.progress.state() {
            ProgressState::Idle => (),
            ProgressState::Init => {
                self.steps_and_hide();
                self.cur = 0;
                self.view.begin(self.progress.digits.load(Relaxed));
                self.visible = true;
                self.progress.set_state(ProgressState::Running);
            }
            ProgressState::Running => {
                if self.visible {
                    self.steps();
                } else {
                    self.progress.set_state(ProgressState::Idle);
                }
            }
            ProgressState::Stop => {
                self.steps_and_hide();
                self.progress.set_state(ProgressState::Idle);
            }
            ProgressState::Term => {
                self.steps_and_hide();
                return false;
            }
        }
        true
    }

    /// Loop until terminated, sleeping between polls.
    pub fn run(mut self, sleep_time: Duration) {
        while self.step() {
            std::thread::sleep(sleep_time);
        }
    }
}
