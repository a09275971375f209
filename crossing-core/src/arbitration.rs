use crate::conflict::ConflictTable;
use crate::types::{AgentId, AgentStatus, EntryRequest, Lane};
use std::collections::BTreeSet;

/// Total order over entry requests: earlier arrival first, agent id breaks ties.
/// Lower is older, and older has priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority {
    pub arrival_timestamp: u64,
    pub agent: AgentId,
}

impl EntryRequest {
    pub fn priority(&self) -> Priority {
        Priority {
            arrival_timestamp: self.arrival_timestamp,
            agent: self.sender,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// We are inside the intersection
    Passing,
    /// Our own request is older
    OwnRequestOlder,
    /// The requester was not on the network when we asked, so we hold no grant from it
    RequesterJoinedLater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Grant,
    Defer(DeferReason),
}

/// The deciding agent's side of an arbitration.
#[derive(Debug, Clone)]
pub struct Contender<'a> {
    pub id: AgentId,
    pub lane: Lane,
    pub status: AgentStatus,
    /// Present once the agent has issued its own request
    pub priority: Option<Priority>,
    /// Peers that were connected when the agent issued its request
    pub peers_at_entry: &'a BTreeSet<AgentId>,
}

pub struct Arbiter;

impl Arbiter {
    pub fn decide(me: &Contender<'_>, incoming: &EntryRequest, table: &ConflictTable) -> Verdict {
        // 1. Non-conflicting lanes never block each other
        if !table.conflicts(me.lane, incoming.arrival_lane) {
            return Verdict::Grant;
        }

        match me.status {
            AgentStatus::Idle | AgentStatus::Exited => Verdict::Grant,
            AgentStatus::Passing => Verdict::Defer(DeferReason::Passing),
            AgentStatus::Waiting => {
                // 2. We never asked this peer, so granting would let both of us in
                if !me.peers_at_entry.contains(&incoming.sender) {
                    return Verdict::Defer(DeferReason::RequesterJoinedLater);
                }

                // 3. Priority to the older request
                match me.priority {
                    Some(own) if incoming.priority() < own => Verdict::Grant,
                    _ => Verdict::Defer(DeferReason::OwnRequestOlder),
                }
            }
        }
    }
}
