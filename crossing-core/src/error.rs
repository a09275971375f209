//! Error types for configuration, agents, the relay and whole runs.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{AgentId, AgentStatus, ConnectionState, Lane};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("conflict table must have {expected} rows, got {rows}")]
    TableRows { expected: usize, rows: usize },

    #[error("conflict table row {row} must have {expected} columns, got {len}")]
    TableColumns { row: usize, expected: usize, len: usize },

    #[error("conflict table entry [{row}][{col}] must be 0 or 1, got {value}")]
    TableValue { row: usize, col: usize, value: u8 },

    #[error("conflict table is not symmetric: {a} vs {b}")]
    Asymmetric { a: Lane, b: Lane },

    #[error("lane {0} is marked as conflicting with itself")]
    SelfConflict(Lane),

    #[error("agent_count must be at least 1")]
    NoAgents,

    #[error("agent_count {count} exceeds the largest supported fleet of {max}")]
    TooManyAgents { count: usize, max: usize },

    #[error(
        "timeouts.relay_idle_ms ({idle_ms}) must cover the longest silent stretch of a run ({required_ms} ms)"
    )]
    RelayIdleTooShort { idle_ms: u64, required_ms: u64 },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("arrival plan covers {planned} agents but agent_count is {configured}")]
    PlanSize { planned: usize, configured: usize },

    #[error("arrival plan entry {position} is for {agent}, expected ids 0..agent_count in order")]
    PlanOrder { position: usize, agent: AgentId },
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("relay is unavailable")]
    RelayUnavailable,

    #[error("no connection snapshot after {attempts} request attempts")]
    SnapshotTimeout { attempts: u32 },

    #[error("timed out after {waited:?} waiting for grants from {outstanding:?}")]
    GrantTimeout {
        waited: Duration,
        outstanding: Vec<AgentId>,
    },

    #[error("relay did not acknowledge release within {0:?}")]
    ReleaseAckTimeout(Duration),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: AgentStatus, to: AgentStatus },

    #[error("cannot cross while {0}")]
    NotWaiting(AgentStatus),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("message from or to unknown agent {0}")]
    UnknownAgent(AgentId),

    #[error("{agent} cannot move from {from} to {to}")]
    InvalidTransition {
        agent: AgentId,
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("{0} is no longer reachable")]
    AgentUnreachable(AgentId),

    #[error("relay has terminated")]
    Terminated,

    #[error("relay idle for {0:?}")]
    IdleTimeout(Duration),

    #[error("every agent hung up while {connected} were still connected")]
    AllAgentsGone { connected: usize },
}

impl RelayError {
    /// Whether the relay must stop serving after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Terminated | RelayError::IdleTimeout(_) | RelayError::AllAgentsGone { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{agent} failed: {source}")]
    Agent {
        agent: AgentId,
        #[source]
        source: AgentError,
    },

    #[error("relay failed: {0}")]
    Relay(#[from] RelayError),

    #[error("task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}
