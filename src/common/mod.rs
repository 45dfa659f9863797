//! Common utilities and types shared across shardkeeper

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{Config, CoordinatorConfig};
pub use error::{Error, Result};
pub use metrics::{CoordinatorMetrics, Counter, Gauge, Histogram};
pub use utils::{
    decode_segment, encode_segment, parse_duration, retry_with_backoff, validate_name,
    Backoff,
};
