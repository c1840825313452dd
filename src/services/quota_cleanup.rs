//! Quota bucket sweeper
//!
//! Drops per-requester quota buckets that have been idle past the retention
//! window so the bucket map tracks only recent submitters.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, instrument};

use crate::execution::ExecutionService;

/// Quota sweeper configuration
#[derive(Debug, Clone)]
pub struct QuotaCleanupConfig {
    /// How often to sweep (in seconds)
    pub check_interval_secs: u64,
}

impl Default for QuotaCleanupConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
        }
    }
}

pub struct QuotaCleanupService {
    executions: Arc<ExecutionService>,
    config: QuotaCleanupConfig,
}

impl QuotaCleanupService {
    pub fn new(executions: Arc<ExecutionService>, config: QuotaCleanupConfig) -> Self {
        Self { executions, config }
    }

    /// Run until the shutdown flag flips to `true`
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.executions.quota().is_enabled() {
            info!("Execution quota disabled, sweeper not started");
            return;
        }

        info!(
            "Starting quota sweeper (every {}s)",
            self.config.check_interval_secs
        );

        let mut sweep_interval = interval(Duration::from_secs(self.config.check_interval_secs));
        sweep_interval.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = sweep_interval.tick() => {
                    self.sweep();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Quota sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Remove idle buckets once, returning how many were dropped
    pub fn sweep(&self) -> usize {
        let quota = self.executions.quota();
        let removed = quota.cleanup();
        if removed > 0 {
            info!(
                removed,
                remaining = quota.tracked_requesters(),
                "Dropped idle quota buckets"
            );
        } else {
            debug!("No idle quota buckets");
        }
        removed
    }
}

/// Handle for stopping the quota sweeper
pub struct QuotaCleanupHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl QuotaCleanupHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for QuotaCleanupHandle {
    fn default() -> Self {
        Self::new().0
    }
}
