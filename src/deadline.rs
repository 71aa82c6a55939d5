use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Wall-time budget for one request, checked between units of work.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn check(&self) -> Result<()> {
        match self.budget {
            Some(budget) if self.elapsed() >= budget => Err(Error::Timeout(budget)),
            _ => Ok(()),
        }
    }
}
