use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::{AgentId, ConnectionState, Heading, Lane};

/// Message kinds on the wire, named after the tags used in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Request,
    PeerRequest,
    ConnectedSnapshot,
    Reply,
    Release,
    ReleaseAck,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Request => write!(f, "REQUEST"),
            MessageKind::PeerRequest => write!(f, "PEER_REQUEST"),
            MessageKind::ConnectedSnapshot => write!(f, "CONNECTED_SNAPSHOT"),
            MessageKind::Reply => write!(f, "REPLY"),
            MessageKind::Release => write!(f, "RELEASE"),
            MessageKind::ReleaseAck => write!(f, "RELEASE_ACK"),
        }
    }
}

/// An agent's announcement that it wants to cross
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRequest {
    pub sender: AgentId,
    pub arrival_lane: Lane,
    pub destination: Heading,
    /// Lamport time at which the request was issued; never recomputed
    pub arrival_timestamp: u64,
    /// Sender's clock when the message left it
    pub lamport_timestamp: u64,
}

/// Permission from `from` to `to`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub from: AgentId,
    pub to: AgentId,
}

/// Connection-state vector, one entry per configured agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedSnapshot {
    pub states: Vec<ConnectionState>,
}

impl ConnectedSnapshot {
    /// Agents connected at snapshot time, not counting `me`.
    pub fn connected_peers(&self, me: AgentId) -> BTreeSet<AgentId> {
        self.states
            .iter()
            .enumerate()
            .filter(|(index, state)| **state == ConnectionState::Connected && *index != me.index())
            .map(|(index, _)| AgentId::from(index))
            .collect()
    }
}

/// Everything an agent can send to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToRelay {
    Request(EntryRequest),
    Reply(Grant),
    Release {
        sender: AgentId,
        deferred: Vec<AgentId>,
    },
}

impl ToRelay {
    pub fn kind(&self) -> MessageKind {
        match self {
            ToRelay::Request(_) => MessageKind::Request,
            ToRelay::Reply(_) => MessageKind::Reply,
            ToRelay::Release { .. } => MessageKind::Release,
        }
    }

    pub fn sender(&self) -> AgentId {
        match self {
            ToRelay::Request(request) => request.sender,
            ToRelay::Reply(grant) => grant.from,
            ToRelay::Release { sender, .. } => *sender,
        }
    }
}

/// Everything the relay can deliver to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FromRelay {
    ConnectedSnapshot(ConnectedSnapshot),
    PeerRequest(EntryRequest),
    Reply { from: AgentId },
    ReleaseAck,
}

impl FromRelay {
    pub fn kind(&self) -> MessageKind {
        match self {
            FromRelay::ConnectedSnapshot(_) => MessageKind::ConnectedSnapshot,
            FromRelay::PeerRequest(_) => MessageKind::PeerRequest,
            FromRelay::Reply { .. } => MessageKind::Reply,
            FromRelay::ReleaseAck => MessageKind::ReleaseAck,
        }
    }
}
