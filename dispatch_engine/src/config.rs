use std::env;

use chrono::Duration;
use log::*;

const DEFAULT_INVITE_TTL_SECS: i64 = 30;
const DEFAULT_BROADCAST_FANOUT: usize = 5;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Engine configuration.
///
/// The invite TTL and broadcast fan-out are business configuration owned by the server side;
/// they are parameters here, never hardcoded at call sites.
#[derive(Clone, Debug)]
pub struct MatchingConfig {
    /// TTL requested for direct invites.
    pub invite_ttl: Duration,
    /// Maximum number of fresh invites created by one escalation broadcast.
    pub broadcast_fanout: usize,
    /// Retry policy for idempotent gateway calls.
    pub retry: RetryPolicy,
    /// Cadence of the invite countdown scan.
    pub tick_interval: std::time::Duration,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            invite_ttl: Duration::seconds(DEFAULT_INVITE_TTL_SECS),
            broadcast_fanout: DEFAULT_BROADCAST_FANOUT,
            retry: RetryPolicy::default(),
            tick_interval: std::time::Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
        }
    }
}

impl MatchingConfig {
    pub fn from_env_or_default() -> Self {
        let invite_ttl = Duration::seconds(parse_var("OKD_INVITE_TTL_SECS", DEFAULT_INVITE_TTL_SECS));
        let broadcast_fanout = parse_var("OKD_BROADCAST_FANOUT", DEFAULT_BROADCAST_FANOUT);
        let retry = RetryPolicy {
            max_attempts: parse_var("OKD_RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS),
            base_delay: std::time::Duration::from_millis(parse_var(
                "OKD_RETRY_BASE_DELAY_MS",
                DEFAULT_RETRY_BASE_DELAY_MS,
            )),
        };
        let tick_interval =
            std::time::Duration::from_millis(parse_var("OKD_TICK_INTERVAL_MS", DEFAULT_TICK_INTERVAL_MS));
        Self { invite_ttl, broadcast_fanout, retry, tick_interval }
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(s) => s.parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => default,
    }
}

//--------------------------------------    RetryPolicy     ----------------------------------------------------------
/// Jittered exponential backoff for idempotent gateway calls. Non-idempotent calls never retry;
/// they surface transport failures to the caller to avoid double-submission ambiguity.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: std::time::Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        use rand::Rng;
        let shift = attempt.saturating_sub(1).min(8);
        let exp = self.base_delay.saturating_mul(1u32 << shift);
        let jitter_cap = (self.base_delay.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_cap);
        exp + std::time::Duration::from_millis(jitter)
    }
}
