//! Asynchronous redeploy trigger.
//!
//! After a successful allocation, the owning service node may need to be
//! re-provisioned. Invoking the redeploy action synchronously from the
//! reconciliation loop would deadlock: the action reads the same store the
//! loop is mid-transaction against. Each trigger therefore runs as an
//! independent background task on its own management session, polling for
//! the target node to exist before invoking the action.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::keypath::KeyPath;
use crate::store::ManagementAccess;

/// Action invoked on the target node once it exists.
pub const REDEPLOY_ACTION: &str = "redeploy";

/// Delay before the first existence check.
pub const REDEPLOY_INITIAL_DELAY: Duration = Duration::from_millis(50);

/// Delay between existence checks.
pub const REDEPLOY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Existence checks before giving up. The owning node may legitimately
/// never appear, so exceeding the bound is not an error.
pub const REDEPLOY_MAX_ATTEMPTS: u32 = 40;

/// Spawns bounded redeploy tasks. Cheap to clone.
#[derive(Clone)]
pub struct RedeployScheduler {
    management: Arc<dyn ManagementAccess>,
    initial_delay: Duration,
    poll_interval: Duration,
    max_attempts: u32,
}

impl RedeployScheduler {
    pub fn new(management: Arc<dyn ManagementAccess>) -> Self {
        Self {
            management,
            initial_delay: REDEPLOY_INITIAL_DELAY,
            poll_interval: REDEPLOY_POLL_INTERVAL,
            max_attempts: REDEPLOY_MAX_ATTEMPTS,
        }
    }

    /// Spawn a redeploy task for `target`. Returns immediately; the task
    /// never reports back to the caller.
    pub fn schedule(&self, target: KeyPath) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_task(target).await;
        })
    }

    async fn run_task(&self, target: KeyPath) {
        debug!(target = %target, "Redeploy task started");

        let mut session = match self.management.open_session() {
            Ok(session) => session,
            Err(e) => {
                error!(target = %target, error = %e, "Could not open management session for redeploy");
                return;
            }
        };

        tokio::time::sleep(self.initial_delay).await;

        for attempt in 1..=self.max_attempts {
            match session.exists(&target).await {
                Ok(true) => {
                    match session.request_action(&target, REDEPLOY_ACTION).await {
                        Ok(()) => {
                            info!(target = %target, attempt, outcome = "succeeded", "Redeploy invoked")
                        }
                        Err(e) => {
                            error!(target = %target, error = %e, "Redeploy action failed")
                        }
                    }
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(target = %target, error = %e, "Existence check failed, abandoning redeploy");
                    return;
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        info!(
            target = %target,
            attempts = self.max_attempts,
            outcome = "timed-out",
            "Redeploy target never appeared"
        );
    }
}
