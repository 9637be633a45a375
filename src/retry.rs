//! Bounded retries with exponential backoff, jitter and proxy rotation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;

use crate::config::RetryConfig;
use crate::error::CaptionError;
use crate::limiter::RateLimiter;
use crate::proxy::ProxyPool;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub jitter: (Duration, Duration),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let defaults = RetryConfig::default();
        let secs = |name: &str, v: f64, fallback: f64| {
            Duration::try_from_secs_f64(v.max(0.0)).unwrap_or_else(|e| {
                warn!("retry.{name} = {v} is out of range ({e}), using {fallback}");
                Duration::from_secs_f64(fallback)
            })
        };
        let lo = secs("jitter_min_secs", config.jitter_min_secs, defaults.jitter_min_secs);
        let hi = secs("jitter_max_secs", config.jitter_max_secs, defaults.jitter_max_secs);
        Self {
            attempts: config.attempts,
            initial_delay: secs("initial_delay_secs", config.initial_delay_secs, defaults.initial_delay_secs),
            jitter: (lo.min(hi), lo.max(hi)),
        }
    }
}

impl RetryPolicy {
    /// Pause before attempt number `attempt` (0-based; attempt 0 never waits)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay.saturating_mul(factor).saturating_add(self.jitter())
    }

    /// Random pause in the jitter range
    pub fn jitter(&self) -> Duration {
        let (lo, hi) = self.jitter;
        if lo == hi {
            return lo;
        }
        rand::thread_rng().gen_range(lo..=hi)
    }
}

/// Runs upstream calls under the retry policy, the global call limiter and
/// proxy rotation. Each attempt is handed the proxy it should egress through.
#[derive(Debug, Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
    proxies: Arc<ProxyPool>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy, limiter: Arc<RateLimiter>, proxies: Arc<ProxyPool>) -> Self {
        Self {
            policy,
            limiter,
            proxies,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run<T, F, Fut>(&self, what: &str, operation: F) -> Result<T, CaptionError>
    where
        F: Fn(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, CaptionError>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt);
                warn!("{what}: retrying in {delay:?} (attempt {}/{attempts})", attempt + 1);
                tokio::time::sleep(delay).await;
            }

            self.limiter.acquire().await;
            let proxy = self.proxies.next_proxy().await;
            debug!("{what}: attempt {} via {}", attempt + 1, proxy.as_deref().unwrap_or("direct"));

            match operation(proxy).await {
                Ok(val) => return Ok(val),
                Err(e) if e.is_retryable() => {
                    warn!("{what}: attempt {}/{attempts} failed: {e}", attempt + 1);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| CaptionError::Unknown(format!("{what}: no attempt made"))))
    }
}
