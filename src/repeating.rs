//! Repeating-work builder
//!
//! Produces self-rescheduling series on any scheduler variant: each firing
//! runs the body with its scheduled invocation time, then schedules the
//! next iteration one period later. Cancelling the returned handle prevents
//! every later iteration; a cancel landing while a body runs suppresses the
//! next scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{SchedulerError, SchedulerResult};
use crate::event::EventHandle;
use crate::scheduler::EventScheduler;

/// Cancellation capability for a repeating series.
#[derive(Clone)]
pub struct RepeatingHandle {
    cancelled: Arc<AtomicBool>,
    current: Arc<Mutex<Option<EventHandle>>>,
}

impl std::fmt::Debug for RepeatingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatingHandle")
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}

impl RepeatingHandle {
    /// Stop the series. The current iteration, if running, completes; no
    /// further iteration is scheduled or invoked.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.current.lock().as_ref() {
            handle.cancel();
        }
    }

    /// Whether the series has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct Series<S, F> {
    scheduler: S,
    period: f64,
    description: String,
    daemon: bool,
    body: F,
    cancelled: Arc<AtomicBool>,
    current: Arc<Mutex<Option<EventHandle>>>,
}

impl<S, F> Series<S, F>
where
    S: EventScheduler + Clone + 'static,
    F: Fn(f64) + Send + Sync + 'static,
{
    /// Schedule the iteration at `time`. Returns `Ok(None)` once the
    /// scheduler has stopped, which quietly ends the series.
    fn schedule(self: &Arc<Self>, time: f64) -> SchedulerResult<Option<EventHandle>> {
        let series = self.clone();
        let handle = self.scheduler.do_at_boxed(
            time,
            &self.description,
            self.daemon,
            Box::new(move || series.fire(time)),
        )?;
        if let Some(handle) = &handle {
            *self.current.lock() = Some(handle.clone());
        }
        Ok(handle)
    }

    fn fire(self: Arc<Self>, time: f64) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        (self.body)(time);
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        let _ = self.schedule(time + self.period);
    }
}

/// Entry points for building repeating work.
pub struct Repeating;

impl Repeating {
    /// Schedule `body` to run first at `first_time` and then every `period`
    /// after that. The body receives each iteration's scheduled time.
    /// Returns `Ok(None)` if the scheduler is already stopped.
    pub fn start_at<S, F>(
        scheduler: &S,
        first_time: f64,
        period: f64,
        description: &str,
        body: F,
    ) -> SchedulerResult<Option<RepeatingHandle>>
    where
        S: EventScheduler + Clone + 'static,
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self::start(scheduler, first_time, period, description, false, body)
    }

    /// Daemon variant of [`start_at`](Self::start_at): every iteration is a
    /// daemon event.
    pub fn start_at_daemon<S, F>(
        scheduler: &S,
        first_time: f64,
        period: f64,
        description: &str,
        body: F,
    ) -> SchedulerResult<Option<RepeatingHandle>>
    where
        S: EventScheduler + Clone + 'static,
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self::start(scheduler, first_time, period, description, true, body)
    }

    /// Delay-based form: the series begins after `delay` and the first
    /// invocation runs one period after that, so a series started with zero
    /// delay fires exactly `k` times across the next `k` periods.
    pub fn start_in<S, F>(
        scheduler: &S,
        delay: f64,
        period: f64,
        description: &str,
        body: F,
    ) -> SchedulerResult<Option<RepeatingHandle>>
    where
        S: EventScheduler + Clone + 'static,
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self::start(
            scheduler,
            scheduler.now() + delay + period,
            period,
            description,
            false,
            body,
        )
    }

    /// Daemon variant of [`start_in`](Self::start_in).
    pub fn start_in_daemon<S, F>(
        scheduler: &S,
        delay: f64,
        period: f64,
        description: &str,
        body: F,
    ) -> SchedulerResult<Option<RepeatingHandle>>
    where
        S: EventScheduler + Clone + 'static,
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self::start(
            scheduler,
            scheduler.now() + delay + period,
            period,
            description,
            true,
            body,
        )
    }

    fn start<S, F>(
        scheduler: &S,
        first_time: f64,
        period: f64,
        description: &str,
        daemon: bool,
        body: F,
    ) -> SchedulerResult<Option<RepeatingHandle>>
    where
        S: EventScheduler + Clone + 'static,
        F: Fn(f64) + Send + Sync + 'static,
    {
        if !period.is_finite() || period <= 0.0 {
            return Err(SchedulerError::IllegalArgument(format!(
                "repeating period must be strictly positive, got {period}"
            )));
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        let current = Arc::new(Mutex::new(None));
        let series = Arc::new(Series {
            scheduler: scheduler.clone(),
            period,
            description: description.to_string(),
            daemon,
            body,
            cancelled: cancelled.clone(),
            current: current.clone(),
        });

        Ok(series.schedule(first_time)?.map(|_| RepeatingHandle {
            cancelled,
            current,
        }))
    }
}
