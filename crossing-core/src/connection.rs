use crate::error::RelayError;
use crate::types::{AgentId, ConnectedSnapshot, ConnectionState};

/// Relay-owned record of who is on the network.
///
/// States only move NeverJoined -> Connected -> Disconnected. The snapshot
/// handed to each agent when it joined is kept so a repeated REQUEST gets the
/// same answer.
#[derive(Debug, Clone)]
pub struct ConnectionTable {
    states: Vec<ConnectionState>,
    join_snapshots: Vec<Option<ConnectedSnapshot>>,
}

impl ConnectionTable {
    pub fn new(agent_count: usize) -> Self {
        Self {
            states: vec![ConnectionState::NeverJoined; agent_count],
            join_snapshots: vec![None; agent_count],
        }
    }

    pub fn agent_count(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, agent: AgentId) -> Result<ConnectionState, RelayError> {
        self.states
            .get(agent.index())
            .copied()
            .ok_or(RelayError::UnknownAgent(agent))
    }

    /// Marks `agent` connected and returns the snapshot it joined with.
    pub fn connect(&mut self, agent: AgentId) -> Result<ConnectedSnapshot, RelayError> {
        self.transition(agent, ConnectionState::NeverJoined, ConnectionState::Connected)?;
        let snapshot = self.snapshot();
        self.join_snapshots[agent.index()] = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub fn disconnect(&mut self, agent: AgentId) -> Result<(), RelayError> {
        self.transition(agent, ConnectionState::Connected, ConnectionState::Disconnected)
    }

    pub fn join_snapshot(&self, agent: AgentId) -> Option<&ConnectedSnapshot> {
        self.join_snapshots.get(agent.index()).and_then(Option::as_ref)
    }

    pub fn snapshot(&self) -> ConnectedSnapshot {
        ConnectedSnapshot {
            states: self.states.clone(),
        }
    }

    /// Connected agents other than `except`, in id order.
    pub fn connected_peers(&self, except: AgentId) -> Vec<AgentId> {
        self.states
            .iter()
            .enumerate()
            .filter(|(index, state)| **state == ConnectionState::Connected && *index != except.index())
            .map(|(index, _)| AgentId::from(index))
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s == ConnectionState::Connected)
            .count()
    }

    pub fn all_disconnected(&self) -> bool {
        self.states
            .iter()
            .all(|s| *s == ConnectionState::Disconnected)
    }

    fn transition(
        &mut self,
        agent: AgentId,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), RelayError> {
        let current = self.state(agent)?;
        if current != from {
            return Err(RelayError::InvalidTransition {
                agent,
                from: current,
                to,
            });
        }
        self.states[agent.index()] = to;
        Ok(())
    }
}
