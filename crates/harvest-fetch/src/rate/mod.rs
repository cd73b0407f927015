//! Shared token-bucket rate limiting per resolver.

mod bucket;
mod registry;

pub use bucket::{Clock, ManualClock, SystemClock, TokenBucket};
pub use registry::{LimiterConfig, LimiterRegistry};
