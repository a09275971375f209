//! Run configuration, loaded from JSON. Every field has a default, so `{}` is a
//! valid file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::conflict::ConflictTable;
use crate::error::ConfigError;

/// Agent ids are `u32`, so ids `0..agent_count` must fit.
pub const MAX_AGENTS: usize = u32::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of vehicles taking part
    pub agent_count: usize,
    /// 8x8 rows of 0/1; the standard intersection when absent
    pub conflict_table: Option<Vec<Vec<u8>>>,
    /// How long a vehicle occupies the intersection
    pub crossing_time_ms: u64,
    /// Upper bound for the random delay before a vehicle arrives
    pub max_arrival_delay_ms: u64,
    /// Seed for lane and arrival-delay generation
    pub seed: Option<u64>,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            agent_count: 7,
            conflict_table: None,
            crossing_time_ms: 3000,
            max_arrival_delay_ms: 5000,
            seed: None,
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub snapshot_ms: u64,
    pub grants_ms: u64,
    pub release_ack_ms: u64,
    /// `None` lets the relay wait for its next message forever
    pub relay_idle_ms: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            snapshot_ms: 2000,
            grants_ms: 120_000,
            release_ack_ms: 5000,
            relay_idle_ms: Some(300_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 1000,
        }
    }
}

/// Per-agent timing, derived from [`SimulationConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub crossing_time: Duration,
    pub snapshot_timeout: Duration,
    pub grant_timeout: Duration,
    pub release_ack_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for AgentSettings {
    fn default() -> Self {
        SimulationConfig::default().agent_settings()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub idle_timeout: Option<Duration>,
}

/// Exponential backoff between REQUEST attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl SimulationConfig {
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&input)
    }

    /// Checks every field and returns the effective conflict table.
    pub fn validate(&self) -> Result<ConflictTable, ConfigError> {
        if self.agent_count == 0 {
            return Err(ConfigError::NoAgents);
        }
        if self.agent_count > MAX_AGENTS {
            return Err(ConfigError::TooManyAgents {
                count: self.agent_count,
                max: MAX_AGENTS,
            });
        }

        let non_zero = [
            ("crossing_time_ms", self.crossing_time_ms),
            ("timeouts.snapshot_ms", self.timeouts.snapshot_ms),
            ("timeouts.grants_ms", self.timeouts.grants_ms),
            ("timeouts.release_ack_ms", self.timeouts.release_ack_ms),
            ("timeouts.relay_idle_ms", self.timeouts.relay_idle_ms.unwrap_or(1)),
            ("retry.max_attempts", u64::from(self.retry.max_attempts)),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::ZeroValue(field));
            }
        }

        // The relay hears nothing while a lone agent crosses or before the last one arrives
        if let Some(idle_ms) = self.timeouts.relay_idle_ms {
            let required_ms = self.crossing_time_ms.max(self.max_arrival_delay_ms);
            if idle_ms < required_ms {
                return Err(ConfigError::RelayIdleTooShort {
                    idle_ms,
                    required_ms,
                });
            }
        }

        let worst_case_wait = self.crossing_time_ms.saturating_mul(self.agent_count as u64);
        if self.timeouts.grants_ms < worst_case_wait {
            tracing::warn!(
                grants_ms = self.timeouts.grants_ms,
                worst_case_wait_ms = worst_case_wait,
                "grant timeout is shorter than a full queue of crossings; late agents may time out"
            );
        }

        match &self.conflict_table {
            Some(rows) => ConflictTable::from_rows(rows),
            None => Ok(ConflictTable::standard()),
        }
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            crossing_time: Duration::from_millis(self.crossing_time_ms),
            snapshot_timeout: Duration::from_millis(self.timeouts.snapshot_ms),
            grant_timeout: Duration::from_millis(self.timeouts.grants_ms),
            release_ack_timeout: Duration::from_millis(self.timeouts.release_ack_ms),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            },
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            idle_timeout: self.timeouts.relay_idle_ms.map(Duration::from_millis),
        }
    }

    pub fn max_arrival_delay(&self) -> Duration {
        Duration::from_millis(self.max_arrival_delay_ms)
    }
}
