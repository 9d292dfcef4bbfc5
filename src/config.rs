//! Validated run configuration.

use std::time::Duration;

use rand::Rng;

use crate::client::RetryPolicy;
use crate::error::{Result, StressError};
use crate::payload::DEFAULT_KEY_LEN;
use crate::stub::GrpcConnector;

/// Largest value the service accepts (4 MiB).
pub const MAX_VALUE_SIZE: usize = 4 * 1024 * 1024;

pub const DEFAULT_ADDR: &str = "http://localhost:5050";

/// Flags shared by every subcommand, before validation.
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Service endpoint
    #[clap(long, env = "KV_STRESS_ADDR", default_value = DEFAULT_ADDR, global = true)]
    pub addr: String,

    /// Maximum attempts per write when the position is locked
    #[clap(long, default_value = "5", global = true)]
    pub max_retries: u32,

    /// Backoff before the first retry; doubles on each further retry
    #[clap(long, default_value = "20", global = true)]
    pub base_delay_ms: u64,

    /// Per-request timeout
    #[clap(long, default_value = "10000", global = true)]
    pub op_timeout_ms: u64,

    /// Connection establishment timeout
    #[clap(long, default_value = "5000", global = true)]
    pub connect_timeout_ms: u64,

    /// Random key length in bytes (hex-encoded)
    #[clap(long, default_value = "16", global = true)]
    pub key_len: usize,

    /// RNG seed (0 = random)
    #[clap(long, default_value = "0", global = true)]
    pub seed: u64,

    /// Progress line every N operations per worker (0 = off)
    #[clap(long, default_value = "100", global = true)]
    pub progress_every: usize,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            max_retries: 5,
            base_delay_ms: 20,
            op_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            key_len: DEFAULT_KEY_LEN,
            seed: 0,
            progress_every: 100,
        }
    }
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub addr: String,
    pub policy: RetryPolicy,
    pub op_timeout: Duration,
    pub connect_timeout: Duration,
    pub key_len: usize,
    /// Resolved seed; never zero.
    pub seed: u64,
    pub progress_every: usize,
}

impl RunConfig {
    /// Validates raw flags. `seed == 0` picks a random seed.
    pub fn from_args(args: &RunArgs) -> Result<Self> {
        if args.addr.trim().is_empty() {
            return Err(StressError::InvalidConfig("address must not be empty".to_string()));
        }
        if args.key_len == 0 {
            return Err(StressError::InvalidConfig("key length must be at least 1 byte".to_string()));
        }
        if args.op_timeout_ms == 0 || args.connect_timeout_ms == 0 {
            return Err(StressError::InvalidConfig("timeouts must be non-zero".to_string()));
        }
        Ok(Self {
            addr: args.addr.clone(),
            policy: RetryPolicy::new(args.max_retries, Duration::from_millis(args.base_delay_ms))?,
            op_timeout: Duration::from_millis(args.op_timeout_ms),
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            key_len: args.key_len,
            seed: resolve_seed(args.seed),
            progress_every: args.progress_every,
        })
    }

    pub fn connector(&self) -> GrpcConnector {
        GrpcConnector::new(self.addr.clone(), self.connect_timeout, self.op_timeout)
    }
}

/// Replaces a zero seed with a random non-zero one.
pub fn resolve_seed(seed: u64) -> u64 {
    if seed != 0 {
        return seed;
    }
    rand::thread_rng().gen_range(1..=u64::MAX)
}

pub fn validate_value_size(value_size: usize) -> Result<usize> {
    if value_size > MAX_VALUE_SIZE {
        return Err(StressError::InvalidConfig(format!(
            "value size {} exceeds the service limit of {} bytes",
            value_size, MAX_VALUE_SIZE
        )));
    }
    Ok(value_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_retries: u32, seed: u64) -> Result<RunConfig> {
        RunConfig::from_args(&RunArgs {
            max_retries,
            seed,
            ..RunArgs::default()
        })
    }

    #[test]
    fn builds_policy_and_timeouts() {
        let config = config(5, 42).unwrap();
        assert_eq!(config.policy.max_retries(), 5);
        assert_eq!(config.policy.base_delay(), Duration::from_millis(20));
        assert_eq!(config.op_timeout, Duration::from_secs(10));
        assert_eq!(config.key_len, 16);
        assert_eq!(config.seed, 42);
        assert_eq!(config.connector().endpoint(), DEFAULT_ADDR);
    }

    #[test]
    fn zero_retries_is_rejected() {
        assert!(matches!(config(0, 1), Err(StressError::InvalidConfig(_))));
    }

    #[test]
    fn zero_timeout_and_key_len_are_rejected() {
        let no_timeout = RunArgs {
            op_timeout_ms: 0,
            ..RunArgs::default()
        };
        assert!(RunConfig::from_args(&no_timeout).is_err());
        let no_key = RunArgs {
            key_len: 0,
            ..RunArgs::default()
        };
        assert!(RunConfig::from_args(&no_key).is_err());
    }

    #[test]
    fn flag_defaults_match_default_impl() {
        use clap::Parser;

        #[derive(Parser)]
        struct Cli {
            #[clap(flatten)]
            run: RunArgs,
        }

        let parsed = Cli::parse_from(["kv-stress", "--max-retries", "7"]).run;
        assert_eq!(parsed.max_retries, 7);
        let defaults = RunArgs::default();
        assert_eq!(parsed.base_delay_ms, defaults.base_delay_ms);
        assert_eq!(parsed.op_timeout_ms, defaults.op_timeout_ms);
        assert_eq!(parsed.connect_timeout_ms, defaults.connect_timeout_ms);
        assert_eq!(parsed.key_len, defaults.key_len);
        assert_eq!(parsed.progress_every, defaults.progress_every);
    }

    #[test]
    fn zero_seed_is_resolved() {
        assert_ne!(config(1, 0).unwrap().seed, 0);
    }

    #[test]
    fn value_size_limit() {
        assert_eq!(validate_value_size(512).unwrap(), 512);
        assert_eq!(validate_value_size(MAX_VALUE_SIZE).unwrap(), MAX_VALUE_SIZE);
        assert!(validate_value_size(MAX_VALUE_SIZE + 1).is_err());
    }
}
