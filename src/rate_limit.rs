//! Sliding-window rate limiter
//!
//! Tracks request timestamps per client key and admits at most
//! `max_requests` calls inside any trailing `window`. A background sweep
//! drops idle keys so the ledger does not grow with the number of distinct
//! callers.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Interval between background sweeps of the ledger
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Maps a caller identifier to the key its history is stored under
pub type KeyGenerator = Arc<dyn Fn(&str) -> String + Send + Sync>;

type Ledger = HashMap<String, VecDeque<Instant>>;

/// Limiter settings. Both limits are mandatory; there are no built-in defaults.
#[derive(Clone)]
pub struct RateLimitOptions {
    pub max_requests: u32,
    pub window: Duration,
    pub key_generator: Option<KeyGenerator>,
}

impl RateLimitOptions {
    pub fn new(max_requests: u32, window_ms: u64) -> Result<Self> {
        if max_requests == 0 {
            return Err(anyhow!("max_requests must be greater than zero"));
        }
        if window_ms == 0 {
            return Err(anyhow!("window_ms must be greater than zero"));
        }

        Ok(Self {
            max_requests,
            window: Duration::from_millis(window_ms),
            key_generator: None,
        })
    }

    pub fn with_key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = Some(key_generator);
        self
    }
}

impl fmt::Debug for RateLimitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitOptions")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("key_generator", &self.key_generator.is_some())
            .finish()
    }
}

/// Outcome of a single admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Capacity left, counting the current call when it was admitted
    pub remaining: u32,
    /// Time until the oldest recorded call leaves the window
    pub reset_after: Duration,
    /// Wall-clock instant matching `reset_after`
    pub reset_time: DateTime<Utc>,
    /// Whole seconds to wait before retrying; only set on denial
    pub retry_after_secs: Option<u64>,
}

/// In-memory sliding-window limiter shared by all requests
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    key_generator: Option<KeyGenerator>,
    ledger: Arc<Mutex<Ledger>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new(options: RateLimitOptions) -> Self {
        Self::with_sweep_interval(options, DEFAULT_SWEEP_INTERVAL)
    }

    /// Create a limiter whose background sweep runs every `sweep_interval`.
    /// The sweep is only started when called from inside a Tokio runtime.
    pub fn with_sweep_interval(options: RateLimitOptions, sweep_interval: Duration) -> Self {
        let ledger = Arc::new(Mutex::new(Ledger::new()));

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(sweep_loop(
                Arc::downgrade(&ledger),
                options.window,
                sweep_interval,
            ))),
            Err(_) => {
                debug!("No Tokio runtime available, rate limit sweep disabled");
                None
            }
        };

        Self {
            max_requests: options.max_requests,
            window: options.window,
            key_generator: options.key_generator,
            ledger,
            sweeper: Mutex::new(sweeper),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether a call from `identifier` is admitted, recording it if so
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        let key = self.key_for(identifier);
        let mut ledger = lock(&self.ledger);
        let now = Instant::now();

        let timestamps = ledger.entry(key).or_default();
        prune(timestamps, now, self.window);

        let count = u32::try_from(timestamps.len()).unwrap_or(u32::MAX);
        let allowed = count < self.max_requests;
        let remaining = self.max_requests.saturating_sub(count);

        let reset_after = match timestamps.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            None => self.window,
        };

        let retry_after_secs = match (allowed, timestamps.front()) {
            (false, Some(_)) => Some(ceil_secs(reset_after).max(1)),
            _ => None,
        };

        if allowed {
            timestamps.push_back(now);
        }

        RateLimitDecision {
            allowed,
            limit: self.max_requests,
            remaining: if allowed { remaining - 1 } else { remaining },
            reset_after,
            reset_time: wall_clock_after(reset_after),
            retry_after_secs,
        }
    }

    /// Forget all history for `identifier`
    pub fn reset(&self, identifier: &str) {
        let key = self.key_for(identifier);
        lock(&self.ledger).remove(&key);
    }

    /// Forget all history for every key
    pub fn clear(&self) {
        lock(&self.ledger).clear();
    }

    /// Drop expired timestamps for every key and evict empty entries.
    /// Returns the number of evicted keys.
    pub fn sweep(&self) -> usize {
        sweep(&mut lock(&self.ledger), Instant::now(), self.window)
    }

    /// Stop the background sweep. Safe to call more than once.
    pub fn destroy(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Rate limit sweep stopped");
        }
    }

    pub fn is_tracked(&self, identifier: &str) -> bool {
        let key = self.key_for(identifier);
        lock(&self.ledger).contains_key(&key)
    }

    pub fn tracked_keys(&self) -> usize {
        lock(&self.ledger).len()
    }

    fn key_for(&self, identifier: &str) -> String {
        match &self.key_generator {
            Some(generate) => generate(identifier),
            None => identifier.to_string(),
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn lock(ledger: &Mutex<Ledger>) -> MutexGuard<'_, Ledger> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove timestamps that are no longer strictly inside the window
fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}

fn sweep(ledger: &mut Ledger, now: Instant, window: Duration) -> usize {
    let before = ledger.len();
    ledger.retain(|_, timestamps| {
        prune(timestamps, now, window);
        !timestamps.is_empty()
    });
    before - ledger.len()
}

async fn sweep_loop(ledger: Weak<Mutex<Ledger>>, window: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        let Some(ledger) = ledger.upgrade() else {
            break;
        };
        let evicted = sweep(&mut lock(&ledger), Instant::now(), window);
        if evicted > 0 {
            debug!("Rate limit sweep evicted {} idle keys", evicted);
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

fn wall_clock_after(delay: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + delta
}
