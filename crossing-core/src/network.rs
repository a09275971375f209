//! In-process stand-in for the shared wireless medium.
//!
//! Every agent shares one channel into the relay and owns one channel out of
//! it. Channels are FIFO and lossless. They are unbounded because the relay
//! and the agents send to each other; bounded queues in both directions could
//! block each side on the other.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::AgentError;
use crate::types::{FromRelay, ToRelay};

/// An agent's only path to the rest of the network.
#[derive(Debug)]
pub struct RelayLink {
    outbound: UnboundedSender<ToRelay>,
    inbox: UnboundedReceiver<FromRelay>,
}

impl RelayLink {
    pub fn new(outbound: UnboundedSender<ToRelay>, inbox: UnboundedReceiver<FromRelay>) -> Self {
        Self { outbound, inbox }
    }

    pub fn send(&self, message: ToRelay) -> Result<(), AgentError> {
        self.outbound
            .send(message)
            .map_err(|_| AgentError::RelayUnavailable)
    }

    /// Next message from the relay; `None` once the relay has hung up.
    pub async fn recv(&mut self) -> Option<FromRelay> {
        self.inbox.recv().await
    }
}

/// The relay's side of the medium.
#[derive(Debug)]
pub struct RelayEndpoint {
    pub inbox: UnboundedReceiver<ToRelay>,
    pub outboxes: Vec<UnboundedSender<FromRelay>>,
}

/// Wires up a relay and `agent_count` agents. Link `i` belongs to agent `i`.
pub fn broadcast_medium(agent_count: usize) -> (RelayEndpoint, Vec<RelayLink>) {
    let (to_relay, relay_inbox) = mpsc::unbounded_channel();

    let mut outboxes = Vec::with_capacity(agent_count);
    let mut links = Vec::with_capacity(agent_count);
    for _ in 0..agent_count {
        let (outbox, agent_inbox) = mpsc::unbounded_channel();
        outboxes.push(outbox);
        links.push(RelayLink::new(to_relay.clone(), agent_inbox));
    }

    (
        RelayEndpoint {
            inbox: relay_inbox,
            outboxes,
        },
        links,
    )
}
