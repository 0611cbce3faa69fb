//! Timer scheduling on the tokio runtime
//!
//! Each timer is a spawned task that sleeps, runs its closure, and asks the
//! closure when to run next. A panicking closure is logged and rescheduled
//! with its previous delay so one bad tick never takes the loop down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What a timer wants after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reschedule {
    /// Run again after this delay
    After(Duration),
    /// Stop the timer
    Stop,
}

/// Handle to a registered timer; dropping it cancels the timer
#[derive(Debug)]
pub struct TimerHandle {
    name: &'static str,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Timer name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the timer
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// True once the timer has stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Registers timers on a runtime
#[derive(Debug, Clone)]
pub struct Scheduler {
    runtime: Handle,
}

impl Scheduler {
    /// Scheduler bound to the runtime of the calling task
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Scheduler bound to a specific runtime
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Run `task` after `first_delay`, then as often as it asks
    pub fn register_timer<F>(
        &self,
        name: &'static str,
        first_delay: Duration,
        mut task: F,
    ) -> TimerHandle
    where
        F: FnMut(Instant) -> Reschedule + Send + 'static,
    {
        let handle = self.runtime.spawn(async move {
            let mut delay = first_delay;
            loop {
                tokio::time::sleep(delay).await;
                match catch_unwind(AssertUnwindSafe(|| task(Instant::now()))) {
                    Ok(Reschedule::After(next)) => delay = next,
                    Ok(Reschedule::Stop) => break,
                    Err(_) => tracing::error!("Timer {} panicked, rescheduling", name),
                }
            }
            tracing::trace!("Timer {} stopped", name);
        });
        TimerHandle { name, task: handle }
    }

    /// Run `task` every `interval` until it returns false
    pub fn register_periodic<F>(
        &self,
        name: &'static str,
        interval: Duration,
        mut task: F,
    ) -> TimerHandle
    where
        F: FnMut(Instant) -> bool + Send + 'static,
    {
        self.register_timer(name, interval, move |now| {
            if task(now) {
                Reschedule::After(interval)
            } else {
                Reschedule::Stop
            }
        })
    }
}
