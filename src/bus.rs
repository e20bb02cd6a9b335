//! Execution layer handed to the notification bus
//!
//! The pub-sub bus delivers notifications by posting work onto a specific
//! scheduler. This adapter turns posts into `do_now` events and keeps the
//! quiet post-stop contract: posts to a stopped scheduler are silently
//! dropped.

use std::sync::Arc;

use crate::scheduler::{EventScheduler, SchedulerTag};

/// Thin posting surface over one scheduler.
#[derive(Clone)]
pub struct ExecutionLayer {
    scheduler: Arc<dyn EventScheduler>,
}

impl ExecutionLayer {
    pub fn new(scheduler: Arc<dyn EventScheduler>) -> Self {
        Self { scheduler }
    }

    /// Post `body` to run ahead of any later-timed work on the scheduler.
    /// Returns whether the post was accepted; posts after `stop` are
    /// dropped without error.
    pub fn post<F>(&self, description: &str, body: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        matches!(
            self.scheduler.do_now_boxed(description, Box::new(body)),
            Ok(Some(_))
        )
    }

    /// Tag of the scheduler this layer posts onto
    pub fn scheduler_tag(&self) -> SchedulerTag {
        self.scheduler.tag()
    }
}
