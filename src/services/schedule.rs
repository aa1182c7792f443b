use chrono::Local;
use log::{error, info};
use std::time::Duration;

/// Default pause between two passes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Counts of what a schedule did before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub runs: usize,
    pub published: usize,
    pub idle: usize,
}

/// Runs a job, waits, and runs it again.
///
/// A job returns `Ok(Some(_))` when it produced something, `Ok(None)` when
/// there was nothing to do this cycle, and `Err` to stop the schedule.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    pub interval: Duration,
    /// Stop after this many runs; `None` runs until the job fails.
    pub max_runs: Option<usize>,
}

impl Scheduler {
    pub fn new(interval: Duration, max_runs: Option<usize>) -> Self {
        Self { interval, max_runs }
    }

    pub fn run<T, E, J, S>(&self, sleeper: &mut S, mut job: J) -> Result<ScheduleSummary, E>
    where
        J: FnMut() -> Result<Option<T>, E>,
        S: Sleeper,
        E: std::fmt::Display,
    {
        let mut summary = ScheduleSummary::default();
        loop {
            summary.runs += 1;
            match job() {
                Ok(Some(_)) => summary.published += 1,
                Ok(None) => summary.idle += 1,
                Err(e) => {
                    error!("Run {} failed: {}", summary.runs, e);
                    return Err(e);
                }
            }

            if self.max_runs.is_some_and(|max| summary.runs >= max) {
                return Ok(summary);
            }

            info!(
                "[{}] Waiting {} minutes until the next run...",
                Local::now().format("%-I:%M%p"),
                self.interval.as_secs() / 60
            );
            sleeper.sleep(self.interval);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, None)
    }
}
