//! Gate host work on the controller's decision

use std::future::Future;
use std::sync::Arc;

use crate::controller::{RedundancyController, RedundancyStatus};
use crate::error::{Result, StandbyError};

/// Standby-aware wrapper that gates operations on activity
#[derive(Clone)]
pub struct StandbyGuard {
    controller: Arc<RedundancyController>,
}

impl StandbyGuard {
    pub fn new(controller: Arc<RedundancyController>) -> Self {
        Self { controller }
    }

    /// Check if we should process (are active)
    pub fn should_process(&self) -> bool {
        self.controller.is_active()
    }

    /// Run a function only if we're active
    pub async fn run_if_active<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.controller.is_active() {
            Some(f().await)
        } else {
            None
        }
    }

    /// Wait until this node becomes active.
    ///
    /// Fails with [`StandbyError::Terminated`] if the controller hits a fatal
    /// policy while waiting.
    pub async fn wait_for_activation(&self) -> Result<()> {
        let mut rx = self.controller.subscribe();

        loop {
            let status = *rx.borrow_and_update();
            match status {
                RedundancyStatus::Active => return Ok(()),
                RedundancyStatus::Terminated(reason) => return Err(StandbyError::Terminated(reason)),
                RedundancyStatus::Starting | RedundancyStatus::Standby => {}
            }

            if rx.changed().await.is_err() {
                return Err(StandbyError::ChannelClosed);
            }
        }
    }
}
