//! Config for the league engine
//!
//! This module gathers every tunable the engine consumes: deadlines of the match protocol, retry
//! and circuit breaker policies, scoring and quorum.
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Durations are in milliseconds.
//!
//! - `LEAGUE_ID` — League id (default: `league`)
//! - `LEAGUE_DATA_DIR` — Directory of persisted documents (default: `league_data`)
//! - `LEAGUE_MIN_PLAYERS` — Player quorum (default: `2`)
//! - `LEAGUE_JOIN_TIMEOUT_MS` — Join acknowledgment deadline (default: `5000`)
//! - `LEAGUE_CHOICE_TIMEOUT_MS` — Parity choice deadline (default: `30000`)
//! - `LEAGUE_REQUEST_TIMEOUT_MS` — Per-attempt timeout of other calls (default: `10000`)
//! - `LEAGUE_MATCH_DEADLINE_MS` — Time after which the league settles the unreported matches of
//!   a round from their match documents (default: `120000`)
//! - `LEAGUE_RETRY_ATTEMPTS` — Attempts per call (default: `3`)
//! - `LEAGUE_RETRY_BASE_MS` / `LEAGUE_RETRY_MAX_MS` — Backoff base and cap
//!   (default: `2000` / `10000`)
//! - `LEAGUE_BREAKER_THRESHOLD` — Failures opening a circuit (default: `5`)
//! - `LEAGUE_BREAKER_RESET_MS` — Time a circuit stays open (default: `60000`)
//! - `LEAGUE_POINTS_WIN` / `LEAGUE_POINTS_DRAW` / `LEAGUE_POINTS_LOSS` — Scoring
//!   (default: `3` / `1` / `0`)
//! - `LEAGUE_LOG` — Set to `"true"` to log to a file (default: `false`)

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;

use crate::resilience::{BreakerPolicy, RetryPolicy};
use crate::result_processor::Scoring;

/// Configuration of a league and of the agents taking part in it.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) league_id: String,
    pub(crate) data_dir: PathBuf,
    pub(crate) min_players: usize,
    pub(crate) join_timeout: Duration,
    pub(crate) choice_timeout: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) match_deadline: Duration,
    pub(crate) retry: RetryPolicy,
    pub(crate) breaker: BreakerPolicy,
    pub(crate) scoring: Scoring,
    pub(crate) log: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Two players and one referee make a quorum.
    /// - Players have 5 s to join and 30 s to choose.
    /// - Calls are attempted 3 times, 2 s then 4 s apart.
    /// - Matches still unreported 2 min after their round started are settled from their
    ///   documents.
    /// - A destination is cut off for 60 s after 5 consecutive failures.
    /// - A win is worth 3 points, a draw 1, a loss 0.
    /// - Logging to file is disabled.
    pub fn new() -> Self {
        Self {
            league_id: "league".to_string(),
            data_dir: PathBuf::from("league_data"),
            min_players: 2,
            join_timeout: Duration::from_secs(5),
            choice_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            match_deadline: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            breaker: BreakerPolicy::default(),
            scoring: Scoring::default(),
            log: false,
        }
    }

    /// Create configuration from environment variables (see module documentation).
    ///
    /// Unset or unparsable variables keep their default value.
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(var: &str) -> Option<T> {
            env::var(var).ok()?.trim().parse().ok()
        }

        fn parse_millis(var: &str) -> Option<Duration> {
            parse::<u64>(var).map(Duration::from_millis)
        }

        let defaults = Self::new();
        Self {
            league_id: env::var("LEAGUE_ID").unwrap_or(defaults.league_id),
            data_dir: env::var("LEAGUE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            min_players: parse("LEAGUE_MIN_PLAYERS").unwrap_or(defaults.min_players),
            join_timeout: parse_millis("LEAGUE_JOIN_TIMEOUT_MS").unwrap_or(defaults.join_timeout),
            choice_timeout: parse_millis("LEAGUE_CHOICE_TIMEOUT_MS")
                .unwrap_or(defaults.choice_timeout),
            request_timeout: parse_millis("LEAGUE_REQUEST_TIMEOUT_MS")
                .unwrap_or(defaults.request_timeout),
            match_deadline: parse_millis("LEAGUE_MATCH_DEADLINE_MS")
                .unwrap_or(defaults.match_deadline),
            retry: RetryPolicy {
                max_attempts: parse("LEAGUE_RETRY_ATTEMPTS")
                    .unwrap_or(defaults.retry.max_attempts),
                base_delay: parse_millis("LEAGUE_RETRY_BASE_MS")
                    .unwrap_or(defaults.retry.base_delay),
                max_delay: parse_millis("LEAGUE_RETRY_MAX_MS")
                    .unwrap_or(defaults.retry.max_delay),
            },
            breaker: BreakerPolicy {
                failure_threshold: parse("LEAGUE_BREAKER_THRESHOLD")
                    .unwrap_or(defaults.breaker.failure_threshold),
                reset_timeout: parse_millis("LEAGUE_BREAKER_RESET_MS")
                    .unwrap_or(defaults.breaker.reset_timeout),
            },
            scoring: Scoring {
                win: parse("LEAGUE_POINTS_WIN").unwrap_or(defaults.scoring.win),
                draw: parse("LEAGUE_POINTS_DRAW").unwrap_or(defaults.scoring.draw),
                loss: parse("LEAGUE_POINTS_LOSS").unwrap_or(defaults.scoring.loss),
            },
            log: env::var("LEAGUE_LOG").is_ok_and(|v| v.eq_ignore_ascii_case("true")),
        }
    }

    /// Reject configurations that would make the league hang or never start.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.league_id.is_empty() {
            bail!("league id cannot be empty");
        }
        if self.min_players < 2 {
            bail!(
                "a league needs at least 2 players, quorum is {}",
                self.min_players
            );
        }
        if self.join_timeout.is_zero()
            || self.choice_timeout.is_zero()
            || self.request_timeout.is_zero()
        {
            bail!("timeouts must be positive: {self:?}");
        }
        if self.match_deadline <= self.join_timeout + self.choice_timeout {
            bail!(
                "match deadline ({:?}) leaves no time to play a match",
                self.match_deadline
            );
        }
        if self.retry.max_attempts == 0 {
            bail!("at least one attempt per call is required");
        }
        if self.retry.max_delay < self.retry.base_delay {
            bail!(
                "backoff cap ({:?}) is below its base ({:?})",
                self.retry.max_delay,
                self.retry.base_delay
            );
        }
        if self.breaker.failure_threshold == 0 {
            bail!("circuit breaker threshold must be at least 1");
        }
        Ok(())
    }

    /// League id.
    pub fn league_id(&self) -> &str {
        &self.league_id
    }

    /// Directory of persisted documents.
    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    /// Whether file logging is requested.
    pub fn log(&self) -> bool {
        self.log
    }

    /// Set the league id.
    pub fn with_league_id(mut self, value: impl Into<String>) -> Self {
        self.league_id = value.into();
        self
    }

    /// Set the directory of persisted documents.
    pub fn with_data_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.data_dir = value.into();
        self
    }

    /// Set the player quorum.
    pub fn with_min_players(mut self, value: usize) -> Self {
        self.min_players = value;
        self
    }

    /// Set the join acknowledgment deadline.
    pub fn with_join_timeout(mut self, value: Duration) -> Self {
        self.join_timeout = value;
        self
    }

    /// Set the parity choice deadline.
    pub fn with_choice_timeout(mut self, value: Duration) -> Self {
        self.choice_timeout = value;
        self
    }

    /// Set the per-attempt timeout of dispatch, report and broadcast calls.
    pub fn with_request_timeout(mut self, value: Duration) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set how long after its round started an unreported match is settled from its document.
    pub fn with_match_deadline(mut self, value: Duration) -> Self {
        self.match_deadline = value;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, value: RetryPolicy) -> Self {
        self.retry = value;
        self
    }

    /// Set the circuit breaker policy.
    pub fn with_breaker(mut self, value: BreakerPolicy) -> Self {
        self.breaker = value;
        self
    }

    /// Set the points per outcome.
    pub fn with_scoring(mut self, value: Scoring) -> Self {
        self.scoring = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Configuration::default();
        config.validate().unwrap();
        assert_eq!(config.join_timeout, Duration::from_secs(5));
        assert_eq!(config.choice_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.scoring, Scoring { win: 3, draw: 1, loss: 0 });
    }

    #[test]
    fn builder_overrides() {
        let config = Configuration::new()
            .with_league_id("spring")
            .with_min_players(4)
            .with_join_timeout(Duration::from_millis(50))
            .with_log(true);
        assert_eq!(config.league_id(), "spring");
        assert_eq!(config.min_players, 4);
        assert_eq!(config.join_timeout, Duration::from_millis(50));
        assert!(config.log());
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(Configuration::new().with_min_players(1).validate().is_err());
        assert!(Configuration::new()
            .with_choice_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(Configuration::new()
            .with_match_deadline(Duration::from_secs(35))
            .validate()
            .is_err());
        assert!(Configuration::new()
            .with_retry(RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            })
            .validate()
            .is_err());
        assert!(Configuration::new()
            .with_breaker(BreakerPolicy {
                failure_threshold: 0,
                reset_timeout: Duration::from_secs(1),
            })
            .validate()
            .is_err());
    }
}
