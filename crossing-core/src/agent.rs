//! One vehicle's side of the protocol.
//!
//! The agent is a single task that owns its status, clock and deferred queue.
//! Answering peer requests is interleaved with its own waits: every wait is a
//! receive on the relay link raced against a deadline, and whatever arrives is
//! dispatched before the wait resumes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::arbitration::{Arbiter, Contender, Priority, Verdict};
use crate::clock::LamportClock;
use crate::config::AgentSettings;
use crate::conflict::ConflictTable;
use crate::error::AgentError;
use crate::network::RelayLink;
use crate::observer::{CrossingObserver, CrossingPhase};
use crate::types::{
    AgentId, AgentStatus, ConnectedSnapshot, EntryRequest, FromRelay, Grant, Lane, ToRelay,
};

/// What an agent did over its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent: AgentId,
    pub lane: Lane,
    pub status: AgentStatus,
    pub arrival_timestamp: u64,
    pub final_clock: u64,
    /// Peers connected when the request went out; one grant was needed from each
    pub awaited: Vec<AgentId>,
    /// Grants handed to the relay at release
    pub deferred_flushed: Vec<AgentId>,
    /// Requests granted as soon as they arrived, including those answered
    /// after exit while the release was still unacknowledged
    pub granted_on_receipt: Vec<AgentId>,
}

pub struct VehicleAgent {
    id: AgentId,
    lane: Lane,
    table: Arc<ConflictTable>,
    settings: AgentSettings,
    link: RelayLink,
    observer: Arc<dyn CrossingObserver>,

    status: AgentStatus,
    clock: LamportClock,
    arrival_timestamp: Option<u64>,
    snapshot_received: bool,
    peers_at_entry: BTreeSet<AgentId>,
    granted_by: BTreeSet<AgentId>,
    deferred: Vec<AgentId>,
    flushed: Vec<AgentId>,
    granted_to: Vec<AgentId>,
    release_acked: bool,
}

impl VehicleAgent {
    pub fn new(
        id: AgentId,
        lane: Lane,
        table: Arc<ConflictTable>,
        settings: AgentSettings,
        link: RelayLink,
        observer: Arc<dyn CrossingObserver>,
    ) -> Self {
        Self {
            id,
            lane,
            table,
            settings,
            link,
            observer,
            status: AgentStatus::Idle,
            clock: LamportClock::new(),
            arrival_timestamp: None,
            snapshot_received: false,
            peers_at_entry: BTreeSet::new(),
            granted_by: BTreeSet::new(),
            deferred: Vec::new(),
            flushed: Vec::new(),
            granted_to: Vec::new(),
            release_acked: false,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn clock(&self) -> u64 {
        self.clock.now()
    }

    pub fn arrival_timestamp(&self) -> Option<u64> {
        self.arrival_timestamp
    }

    pub fn deferred_queue(&self) -> &[AgentId] {
        &self.deferred
    }

    /// Peers that still owe this agent a grant.
    pub fn outstanding_grants(&self) -> Vec<AgentId> {
        self.peers_at_entry
            .difference(&self.granted_by)
            .copied()
            .collect()
    }

    /// Full lifetime: ask to enter, collect grants, cross, release.
    pub async fn run(mut self) -> Result<AgentReport, AgentError> {
        let arrival_timestamp = self.request_entry().await?;
        self.cross_and_release().await?;

        Ok(AgentReport {
            agent: self.id,
            lane: self.lane,
            status: self.status,
            arrival_timestamp,
            final_clock: self.clock.now(),
            awaited: self.peers_at_entry.iter().copied().collect(),
            deferred_flushed: self.flushed,
            granted_on_receipt: self.granted_to,
        })
    }

    /// Issues the entry request and waits for the relay's connection snapshot.
    ///
    /// The REQUEST is re-sent with exponential backoff if the snapshot does
    /// not arrive in time; the relay answers a repeat with the first
    /// snapshot and does not fan it out again.
    pub async fn request_entry(&mut self) -> Result<u64, AgentError> {
        self.transition(AgentStatus::Waiting)?;
        let arrival_timestamp = self.clock.tick();
        self.arrival_timestamp = Some(arrival_timestamp);

        let request = EntryRequest {
            sender: self.id,
            arrival_lane: self.lane,
            destination: self.lane.exit_heading(),
            arrival_timestamp,
            lamport_timestamp: self.clock.now(),
        };

        let retry = self.settings.retry;
        for attempt in 1..=retry.max_attempts {
            debug!(agent = %self.id, lane = %self.lane, arrival_timestamp, attempt, "sending REQUEST");
            self.link.send(ToRelay::Request(request.clone()))?;

            let deadline = Instant::now() + self.settings.snapshot_timeout;
            while !self.snapshot_received {
                if !self.pump_until(deadline).await? {
                    break;
                }
            }

            if self.snapshot_received {
                info!(
                    agent = %self.id,
                    lane = %self.lane,
                    arrival_timestamp,
                    expected_grants = self.peers_at_entry.len(),
                    "joined the network"
                );
                return Ok(arrival_timestamp);
            }

            if attempt < retry.max_attempts {
                let backoff = retry.backoff(attempt);
                warn!(agent = %self.id, attempt, ?backoff, "no connection snapshot yet, retrying REQUEST");
                tokio::time::sleep(backoff).await;
            }
        }

        Err(AgentError::SnapshotTimeout {
            attempts: retry.max_attempts,
        })
    }

    /// Arbitrates one relayed peer request, granting through the relay or
    /// queueing the requester until release.
    pub fn answer_request(&mut self, request: EntryRequest) -> Result<Verdict, AgentError> {
        self.clock.observe(request.lamport_timestamp);

        let verdict = Arbiter::decide(&self.contender(), &request, &self.table);
        match verdict {
            Verdict::Grant => {
                self.link.send(ToRelay::Reply(Grant {
                    from: self.id,
                    to: request.sender,
                }))?;
                self.granted_to.push(request.sender);
                debug!(
                    agent = %self.id,
                    peer = %request.sender,
                    peer_lane = %request.arrival_lane,
                    clock = self.clock.now(),
                    "granted"
                );
            }
            Verdict::Defer(reason) => {
                if !self.deferred.contains(&request.sender) {
                    self.deferred.push(request.sender);
                }
                debug!(
                    agent = %self.id,
                    peer = %request.sender,
                    peer_lane = %request.arrival_lane,
                    ?reason,
                    clock = self.clock.now(),
                    "deferred"
                );
            }
        }

        Ok(verdict)
    }

    /// Waits for every expected grant, crosses, then releases the deferred queue.
    /// Returns the ids whose grants were handed to the relay.
    pub async fn cross_and_release(&mut self) -> Result<Vec<AgentId>, AgentError> {
        if !matches!(self.status, AgentStatus::Waiting | AgentStatus::Passing) {
            return Err(AgentError::NotWaiting(self.status));
        }

        let grant_deadline = Instant::now() + self.settings.grant_timeout;
        while !self.outstanding_grants().is_empty() {
            if !self.pump_until(grant_deadline).await? {
                return Err(AgentError::GrantTimeout {
                    waited: self.settings.grant_timeout,
                    outstanding: self.outstanding_grants(),
                });
            }
        }

        if self.status != AgentStatus::Passing {
            self.transition(AgentStatus::Passing)?;
        }
        let arrival_timestamp = self.arrival_timestamp.unwrap_or_default();
        self.observer
            .record(self.id, self.lane, arrival_timestamp, CrossingPhase::Entered);

        // Keep answering while inside the intersection
        let leave_at = Instant::now() + self.settings.crossing_time;
        while self.pump_until(leave_at).await? {}

        self.observer
            .record(self.id, self.lane, arrival_timestamp, CrossingPhase::Exited);

        let deferred = std::mem::take(&mut self.deferred);
        self.link.send(ToRelay::Release {
            sender: self.id,
            deferred: deferred.clone(),
        })?;
        self.transition(AgentStatus::Exited)?;
        debug!(agent = %self.id, ?deferred, "sent RELEASE");

        // Requests relayed before the relay saw our release still need an answer
        let ack_deadline = Instant::now() + self.settings.release_ack_timeout;
        while !self.release_acked {
            if !self.pump_until(ack_deadline).await? {
                return Err(AgentError::ReleaseAckTimeout(self.settings.release_ack_timeout));
            }
        }

        self.flushed = deferred.clone();
        Ok(deferred)
    }

    /// Handles at most one inbound message. Returns `false` once `deadline` passes.
    async fn pump_until(&mut self, deadline: Instant) -> Result<bool, AgentError> {
        match tokio::time::timeout_at(deadline, self.link.recv()).await {
            Ok(Some(message)) => {
                self.handle_inbound(message)?;
                Ok(true)
            }
            Ok(None) => Err(AgentError::RelayUnavailable),
            Err(_) => Ok(false),
        }
    }

    fn handle_inbound(&mut self, message: FromRelay) -> Result<(), AgentError> {
        match message {
            FromRelay::ConnectedSnapshot(snapshot) => self.accept_snapshot(snapshot),
            FromRelay::PeerRequest(request) => {
                self.answer_request(request)?;
            }
            FromRelay::Reply { from } => self.accept_grant(from),
            FromRelay::ReleaseAck => {
                if self.status == AgentStatus::Exited {
                    self.release_acked = true;
                } else {
                    warn!(agent = %self.id, status = %self.status, "RELEASE_ACK before release, ignoring");
                }
            }
        }
        Ok(())
    }

    fn accept_snapshot(&mut self, snapshot: ConnectedSnapshot) {
        if self.snapshot_received {
            debug!(agent = %self.id, "repeated connection snapshot, ignoring");
            return;
        }
        self.peers_at_entry = snapshot.connected_peers(self.id);
        self.snapshot_received = true;
    }

    fn accept_grant(&mut self, from: AgentId) {
        if self.snapshot_received && !self.peers_at_entry.contains(&from) {
            warn!(agent = %self.id, peer = %from, "grant from a peer we did not ask");
        }
        if !self.granted_by.insert(from) {
            warn!(agent = %self.id, peer = %from, "duplicate grant");
            return;
        }
        debug!(
            agent = %self.id,
            peer = %from,
            outstanding = self.outstanding_grants().len(),
            "received grant"
        );
    }

    fn contender(&self) -> Contender<'_> {
        Contender {
            id: self.id,
            lane: self.lane,
            status: self.status,
            priority: self.arrival_timestamp.map(|arrival_timestamp| Priority {
                arrival_timestamp,
                agent: self.id,
            }),
            peers_at_entry: &self.peers_at_entry,
        }
    }

    fn transition(&mut self, next: AgentStatus) -> Result<(), AgentError> {
        if next <= self.status {
            return Err(AgentError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        debug!(agent = %self.id, from = %self.status, to = %next, "status change");
        self.status = next;
        Ok(())
    }
}
