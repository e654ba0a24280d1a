//! Rate limiting stage.
//!
//! Per-client sliding-window admission control with two ceilings: a short
//! per-second burst limit and a per-minute volume limit.
//!
//! ## Algorithm
//!
//! Each client owns a window of request timestamps. On every admission
//! check:
//!
//! 1. timestamps older than one minute are dropped
//! 2. if the timestamps from the last second reach the per-second limit, reject
//! 3. if the remaining timestamps reach the per-minute limit, reject
//! 4. otherwise record the current instant and admit
//!
//! A rejected request leaves no trace in the window.
//!
//! ## Concurrency
//!
//! Windows live in a [`DashMap`] keyed by client identifier, each behind its
//! own mutex. The map shard is only held long enough to fetch the window
//! handle, so unrelated clients never serialize on each other.
//!
//! ## Example
//!
//! ```
//! use citadel_middleware::stages::rate_limit::{RateLimitConfig, RateLimiter};
//!
//! let limiter = RateLimiter::new(RateLimitConfig { per_second: 2, per_minute: 10 });
//! assert!(limiter.admit("10.0.0.1"));
//! assert!(limiter.admit("10.0.0.1"));
//! assert!(!limiter.admit("10.0.0.1"));
//! assert!(limiter.admit("10.0.0.2"));
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use tracing::info;

use crate::context::GatewayContext;
use crate::error::Rejection;
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::types::BufferedRequest;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Limits applied to every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests within any one-second window.
    pub per_second: usize,
    /// Maximum requests within any one-minute window.
    pub per_minute: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 5,
            per_minute: 100,
        }
    }
}

/// Recent request timestamps of a single client.
#[derive(Debug, Default)]
struct ClientWindow {
    timestamps: VecDeque<Instant>,
    /// Set when the window has been removed from the map; holders of a
    /// stale handle must fetch a fresh one.
    evicted: bool,
}

impl ClientWindow {
    fn purge(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= MINUTE {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_within(&self, now: Instant, span: Duration) -> usize {
        self.timestamps
            .iter()
            .rev()
            .take_while(|t| now.saturating_duration_since(**t) < span)
            .count()
    }
}

/// Per-client sliding-window rate limiter.
#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Arc<Mutex<ClientWindow>>>,
}

impl RateLimiter {
    /// Creates a limiter with the given limits.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Returns the configured limits.
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Decides whether `identifier` may make a request now, recording it if so.
    pub fn admit(&self, identifier: &str) -> bool {
        loop {
            let handle = self.window_for(identifier);
            let mut window = handle.lock();
            if window.evicted {
                continue;
            }

            let now = Instant::now();
            window.purge(now);

            if window.count_within(now, SECOND) >= self.config.per_second {
                return false;
            }
            if window.timestamps.len() >= self.config.per_minute {
                return false;
            }

            window.timestamps.push_back(now);
            return true;
        }
    }

    /// Clears the history of `identifier`.
    pub fn reset(&self, identifier: &str) {
        if let Some((_, handle)) = self.windows.remove(identifier) {
            handle.lock().evicted = true;
        }
    }

    /// Drops windows with no requests in the last minute.
    ///
    /// Returns the number of windows removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, handle| {
            let mut window = handle.lock();
            window.purge(now);
            if window.timestamps.is_empty() {
                window.evicted = true;
                false
            } else {
                true
            }
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    fn window_for(&self, identifier: &str) -> Arc<Mutex<ClientWindow>> {
        if let Some(handle) = self.windows.get(identifier) {
            return Arc::clone(handle.value());
        }
        Arc::clone(self.windows.entry(identifier.to_owned()).or_default().value())
    }
}

/// Pipeline stage wrapping a shared [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    trust_forwarded_for: bool,
}

impl RateLimitStage {
    /// Creates a stage keyed by the connection peer address.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            trust_forwarded_for: false,
        }
    }

    /// Key clients by the first `X-Forwarded-For` entry when present.
    ///
    /// Only enable this behind a proxy that overwrites the header.
    #[must_use]
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// The shared limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn client_key(&self, ctx: &GatewayContext, request: &BufferedRequest) -> String {
        if self.trust_forwarded_for {
            if let Some(first) = request
                .header("x-forwarded-for")
                .and_then(|xff| xff.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
            {
                return first.to_string();
            }
        }
        ctx.client_id().to_string()
    }
}

impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn check<'a>(
        &'a self,
        ctx: &'a mut GatewayContext,
        request: &'a BufferedRequest,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            let key = self.client_key(ctx, request);
            if key != ctx.client_id() {
                ctx.set_client_id(key.clone());
            }

            if self.limiter.admit(&key) {
                StageOutcome::Continue
            } else {
                info!(client = %key, "rate limit exceeded");
                StageOutcome::Reject(Rejection::too_many_requests())
            }
        })
    }
}
