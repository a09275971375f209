//! The relay standing in for the shared wireless medium.
//!
//! A single task owns the [`ConnectionTable`]; request fan-out, reply routing
//! and termination detection all run through its inbox one message at a time,
//! so every fan-out sees a consistent set of connected peers.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::config::RelaySettings;
use crate::connection::ConnectionTable;
use crate::error::RelayError;
use crate::network::RelayEndpoint;
use crate::types::{AgentId, ConnectionState, EntryRequest, FromRelay, Grant, ToRelay};

/// Delivery counters for one relay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReport {
    pub requests_received: u64,
    pub duplicate_requests: u64,
    pub peer_requests_forwarded: u64,
    pub replies_routed: u64,
    pub deferred_grants_flushed: u64,
    pub releases: u64,
    pub skipped_faults: u64,
}

pub struct RelayBroker {
    table: ConnectionTable,
    inbox: UnboundedReceiver<ToRelay>,
    outboxes: Vec<UnboundedSender<FromRelay>>,
    settings: RelaySettings,
    report: RelayReport,
    terminal: bool,
}

impl RelayBroker {
    pub fn new(endpoint: RelayEndpoint, settings: RelaySettings) -> Self {
        let agent_count = endpoint.outboxes.len();
        Self {
            table: ConnectionTable::new(agent_count),
            inbox: endpoint.inbox,
            outboxes: endpoint.outboxes,
            settings,
            report: RelayReport::default(),
            terminal: false,
        }
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.table
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn report(&self) -> &RelayReport {
        &self.report
    }

    /// Serves agents until every one of them has disconnected.
    pub async fn run(mut self) -> Result<RelayReport, RelayError> {
        info!(agents = self.table.agent_count(), "📡 relay online");

        while !self.terminal {
            let next = match self.settings.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, self.inbox.recv())
                    .await
                    .map_err(|_| RelayError::IdleTimeout(limit))?,
                None => self.inbox.recv().await,
            };

            let Some(message) = next else {
                return Err(RelayError::AllAgentsGone {
                    connected: self.table.connected_count(),
                });
            };

            if let Err(e) = self.handle(message) {
                if e.is_fatal() {
                    return Err(e);
                }
                self.report.skipped_faults += 1;
                warn!(error = %e, "skipping message");
            }
        }

        Ok(self.report)
    }

    /// Applies one inbound message.
    pub fn handle(&mut self, message: ToRelay) -> Result<(), RelayError> {
        if self.terminal {
            return Err(RelayError::Terminated);
        }

        debug!(kind = %message.kind(), from = %message.sender(), "relay received");
        match message {
            ToRelay::Request(request) => self.on_request(request),
            ToRelay::Reply(grant) => self.on_reply(grant),
            ToRelay::Release { sender, deferred } => self.on_release(sender, &deferred),
        }
    }

    /// Connects the sender, fans the request out to the other connected agents
    /// and answers the sender with the connection snapshot.
    pub fn on_request(&mut self, request: EntryRequest) -> Result<(), RelayError> {
        let sender = request.sender;
        self.report.requests_received += 1;

        match self.table.state(sender)? {
            ConnectionState::Connected => {
                // Repeat after a lost snapshot: same answer, no second fan-out
                self.report.duplicate_requests += 1;
                let snapshot = self
                    .table
                    .join_snapshot(sender)
                    .cloned()
                    .unwrap_or_else(|| self.table.snapshot());
                debug!(agent = %sender, "repeated REQUEST, resending join snapshot");
                return self.deliver(sender, FromRelay::ConnectedSnapshot(snapshot));
            }
            ConnectionState::Disconnected => {
                return Err(RelayError::InvalidTransition {
                    agent: sender,
                    from: ConnectionState::Disconnected,
                    to: ConnectionState::Connected,
                });
            }
            ConnectionState::NeverJoined => {}
        }

        let snapshot = self.table.connect(sender)?;

        for peer in self.table.connected_peers(sender) {
            match self.deliver(peer, FromRelay::PeerRequest(request.clone())) {
                Ok(()) => self.report.peer_requests_forwarded += 1,
                Err(e) => {
                    self.report.skipped_faults += 1;
                    warn!(error = %e, "could not forward request");
                }
            }
        }

        info!(
            agent = %sender,
            lane = %request.arrival_lane,
            arrival_timestamp = request.arrival_timestamp,
            connected = self.table.connected_count(),
            "agent joined"
        );

        self.deliver(sender, FromRelay::ConnectedSnapshot(snapshot))
    }

    /// Pure pass-through of a grant to its addressee.
    pub fn on_reply(&mut self, grant: Grant) -> Result<(), RelayError> {
        self.table.state(grant.from)?;
        self.deliver(grant.to, FromRelay::Reply { from: grant.from })?;
        self.report.replies_routed += 1;
        Ok(())
    }

    /// Disconnects the sender and hands its deferred grants to the queued peers.
    pub fn on_release(&mut self, sender: AgentId, deferred: &[AgentId]) -> Result<(), RelayError> {
        self.table.disconnect(sender)?;
        self.report.releases += 1;

        for &peer in deferred {
            match self.deliver(peer, FromRelay::Reply { from: sender }) {
                Ok(()) => self.report.deferred_grants_flushed += 1,
                Err(e) => {
                    self.report.skipped_faults += 1;
                    warn!(error = %e, "could not flush deferred grant");
                }
            }
        }

        if let Err(e) = self.deliver(sender, FromRelay::ReleaseAck) {
            // The sender may already be gone; its release still counts
            debug!(error = %e, "release not acknowledged");
        }

        info!(agent = %sender, flushed = deferred.len(), "agent disconnected");

        if self.table.all_disconnected() {
            self.terminal = true;
            info!("🛑 every agent has disconnected, relay terminating");
        }
        Ok(())
    }

    fn deliver(&self, to: AgentId, message: FromRelay) -> Result<(), RelayError> {
        let outbox = self
            .outboxes
            .get(to.index())
            .ok_or(RelayError::UnknownAgent(to))?;
        debug!(kind = %message.kind(), %to, "relay delivering");
        outbox
            .send(message)
            .map_err(|_| RelayError::AgentUnreachable(to))
    }
}
