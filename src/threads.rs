// Arcvet columnar archive validator.

//! A small runner owning a vector of worker threads.
//!
//! Each worker executes to completion; joining collects the first non-zero
//! return, with cancellation never masking a real failure.

use std::thread::JoinHandle;

use crate::*;

/// Owns spawned workers until they are joined.
#[derive(Debug, Default)]
pub struct ThreadRunner {
    handles: Vec<JoinHandle<Result<()>>>,
}

impl ThreadRunner {
    pub fn new() -> ThreadRunner {
        ThreadRunner::default()
    }

    pub fn add<F>(&mut self, name: &str, work: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(work)
            .expect("spawn worker thread");
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker; the first error wins, except that a plain
    /// cancellation yields to any concrete failure from another worker.
    pub fn join_all(self) -> Result<()> {
        let mut status: Option<Error> = None;
        for handle in self.handles {
            match handle.join() {
                Ok(Ok(())) => (),
                Ok(Err(err)) => match (&status, &err) {
                    (None, _) => status = Some(err),
                    (Some(Error::Cancelled), other) if !matches!(other, Error::Cancelled) => {
                        status = Some(err)
                    }
                    _ => (),
                },
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        match status {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
