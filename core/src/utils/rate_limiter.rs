use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{ConsensusError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Requests allowed per actor per window.
    pub max_requests: u32,
    pub window: Duration,
    /// Cool-off applied once an actor exceeds the window budget.
    pub block_duration: Duration,
    /// Blocks after which the actor is banned outright.
    pub ban_threshold: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(300),
            ban_threshold: 10,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    count: u32,
    window_start: Instant,
    blocked_until: Option<Instant>,
    strikes: u32,
    banned: bool,
}

/// Token-bucket limiter keyed by `(category, actor)`.
///
/// Categories partition budgets so e.g. vote submissions and template
/// requests from the same peer are accounted independently.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    buckets: Mutex<HashMap<(String, String), Bucket>>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        Self {
            cfg,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request; `Err(RateLimited)` when over budget or banned.
    pub fn allow(&self, category: &str, actor: &str) -> Result<()> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry((category.to_string(), actor.to_string()))
            .or_insert_with(|| Bucket {
                count: 0,
                window_start: now,
                blocked_until: None,
                strikes: 0,
                banned: false,
            });

        if bucket.banned {
            return Err(ConsensusError::RateLimited {
                actor: actor.to_string(),
            });
        }

        if let Some(until) = bucket.blocked_until {
            if now < until {
                return Err(ConsensusError::RateLimited {
                    actor: actor.to_string(),
                });
            }
            bucket.blocked_until = None;
            bucket.count = 0;
            bucket.window_start = now;
        }

        if now.duration_since(bucket.window_start) >= self.cfg.window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        bucket.count += 1;
        if bucket.count > self.cfg.max_requests {
            bucket.strikes += 1;
            if bucket.strikes >= self.cfg.ban_threshold {
                bucket.banned = true;
                log::warn!("rate limiter banned {category}/{actor} after {} strikes", bucket.strikes);
            } else {
                bucket.blocked_until = Some(now + self.cfg.block_duration);
            }
            return Err(ConsensusError::RateLimited {
                actor: actor.to_string(),
            });
        }

        Ok(())
    }

    pub fn is_banned(&self, category: &str, actor: &str) -> bool {
        self.buckets
            .lock()
            .get(&(category.to_string(), actor.to_string()))
            .map(|b| b.banned)
            .unwrap_or(false)
    }

    /// Drop idle actors so long-lived nodes don't accumulate dead buckets.
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.cfg.window;
        self.buckets.lock().retain(|_, b| {
            b.banned
                || b.blocked_until.map(|u| u > now).unwrap_or(false)
                || now.duration_since(b.window_start) < window * 2
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            max_requests: max,
            window: Duration::from_secs(60),
            block_duration: Duration::from_millis(50),
            ban_threshold: 3,
        })
    }

    #[test]
    fn test_allows_within_budget() {
        let rl = limiter(3);
        for _ in 0..3 {
            assert!(rl.allow("vote", "nvr1a").is_ok());
        }
    }

    #[test]
    fn test_rejects_over_budget() {
        let rl = limiter(2);
        assert!(rl.allow("vote", "nvr1a").is_ok());
        assert!(rl.allow("vote", "nvr1a").is_ok());
        assert!(matches!(
            rl.allow("vote", "nvr1a"),
            Err(ConsensusError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_categories_are_independent() {
        let rl = limiter(1);
        assert!(rl.allow("vote", "nvr1a").is_ok());
        assert!(rl.allow("template", "nvr1a").is_ok());
        assert!(rl.allow("vote", "nvr1b").is_ok());
    }

    #[test]
    fn test_ban_after_repeated_strikes() {
        let rl = limiter(1);
        for _ in 0..8 {
            let _ = rl.allow("vote", "spammer");
            std::thread::sleep(Duration::from_millis(60)); // let blocks lapse
        }
        assert!(rl.is_banned("vote", "spammer"));
        assert!(rl.allow("vote", "spammer").is_err());
    }
}
