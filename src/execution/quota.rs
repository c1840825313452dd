//! Per-requester submission quota
//!
//! One governor token bucket per requester id, refilled per minute with a
//! small burst allowance. Idle buckets are dropped by [`ExecutionQuota::cleanup`],
//! which the quota sweeper service calls periodically.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::error::{ClassroomError, Result};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug)]
struct RequesterBucket {
    limiter: DirectLimiter,
    last_seen_ms: AtomicU64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Submission quota keyed by requester
#[derive(Debug, Clone)]
pub struct ExecutionQuota {
    enabled: bool,
    buckets: Arc<DashMap<String, RequesterBucket>>,
    per_minute: NonZeroU32,
    burst: NonZeroU32,
    max_idle: Duration,
}

impl ExecutionQuota {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        Self {
            enabled: true,
            buckets: Arc::new(DashMap::new()),
            per_minute: NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN),
            burst: NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN),
            max_idle: Duration::from_secs(10 * 60),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.quota_per_minute, config.quota_burst)
    }

    /// A quota that admits everything
    pub fn unlimited() -> Self {
        Self {
            enabled: false,
            ..Self::new(1, 1)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Take one submission token for `requester`
    pub fn check(&self, requester: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let now_ms = now_ms();
        let bucket = self
            .buckets
            .entry(requester.to_string())
            .or_insert_with(|| RequesterBucket {
                limiter: RateLimiter::direct(
                    Quota::per_minute(self.per_minute).allow_burst(self.burst),
                ),
                last_seen_ms: AtomicU64::new(now_ms),
            });
        bucket.last_seen_ms.store(now_ms, Ordering::Relaxed);

        match bucket.limiter.check() {
            Ok(()) => {
                debug!(requester, "Execution quota check passed");
                Ok(())
            }
            Err(_) => {
                warn!(requester, "Execution quota exceeded");
                Err(ClassroomError::QuotaExceeded {
                    requester: requester.to_string(),
                })
            }
        }
    }

    /// Drop buckets idle for longer than the retention window
    pub fn cleanup(&self) -> usize {
        let now_ms = now_ms();
        let max_idle_ms = self.max_idle.as_millis() as u64;
        let before = self.buckets.len();

        self.buckets.retain(|_, bucket| {
            let last_seen = bucket.last_seen_ms.load(Ordering::Relaxed);
            now_ms.saturating_sub(last_seen) <= max_idle_ms
        });

        before.saturating_sub(self.buckets.len())
    }

    pub fn tracked_requesters(&self) -> usize {
        self.buckets.len()
    }

    #[cfg(test)]
    fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }
}
