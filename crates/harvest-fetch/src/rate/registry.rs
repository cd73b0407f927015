use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::bucket::{Clock, SystemClock, TokenBucket};

/// Capacity and refill rate of one resolver's bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub capacity: u32,
    /// Tokens per second.
    pub refill_rate: f64,
}

impl LimiterConfig {
    pub const fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
        }
    }

    /// Built-in limits for well-known resolvers.
    pub fn default_for(resolver: &str) -> Self {
        match resolver {
            "github" => Self::new(60, 1.0),
            "zenodo" => Self::new(30, 0.5),
            "figshare" => Self::new(30, 1.0),
            "dataverse" => Self::new(30, 1.0),
            "huggingface" => Self::new(60, 2.0),
            _ => Self::new(10, 1.0),
        }
    }
}

/// Lazily creates one shared bucket per resolver name for the run.
#[derive(Debug)]
pub struct LimiterRegistry {
    overrides: HashMap<String, LimiterConfig>,
    limiters: Mutex<HashMap<String, Arc<TokenBucket>>>,
    clock: Arc<dyn Clock>,
}

impl Default for LimiterRegistry {
    fn default() -> Self { Self::new(HashMap::new()) }
}

impl LimiterRegistry {
    pub fn new(overrides: HashMap<String, LimiterConfig>) -> Self {
        Self::with_clock(overrides, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(overrides: HashMap<String, LimiterConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            overrides,
            limiters: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn config_for(&self, resolver: &str) -> LimiterConfig {
        self.overrides
            .get(resolver)
            .copied()
            .unwrap_or_else(|| LimiterConfig::default_for(resolver))
    }

    /// The bucket for `resolver`; every call with the same name returns the same one.
    pub fn get(&self, resolver: &str) -> Arc<TokenBucket> {
        let config = self.config_for(resolver);
        self.get_with(resolver, config)
    }

    /// Like [`get`](Self::get), but `config` is used if the bucket does not exist yet.
    pub fn get_with(&self, resolver: &str, config: LimiterConfig) -> Arc<TokenBucket> {
        let mut limiters = self.limiters.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        limiters
            .entry(resolver.to_string())
            .or_insert_with(|| {
                tracing::debug!(
                    resolver,
                    capacity = config.capacity,
                    refill_rate = config.refill_rate,
                    "creating rate limiter"
                );
                Arc::new(TokenBucket::with_clock(
                    config.capacity,
                    config.refill_rate,
                    self.clock.clone(),
                ))
            })
            .clone()
    }
}
