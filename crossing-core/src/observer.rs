use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::conflict::ConflictTable;
use crate::types::{AgentId, Lane};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossingPhase {
    Entered,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossingEvent {
    pub agent: AgentId,
    pub lane: Lane,
    pub arrival_timestamp: u64,
    pub phase: CrossingPhase,
    /// Milliseconds since the observer was created
    pub elapsed_ms: u64,
}

/// Receives an agent's intersection entry and exit.
///
/// `Entered` is reported after the agent has all of its grants and `Exited`
/// before it sends RELEASE, so the order in which an observer sees events is a
/// valid serialization of who was inside the intersection.
pub trait CrossingObserver: Send + Sync {
    fn record(&self, agent: AgentId, lane: Lane, arrival_timestamp: u64, phase: CrossingPhase);
}

/// Logs crossings through `tracing` and keeps them for the run report.
pub struct CrossingLog {
    started: Instant,
    events: Mutex<Vec<CrossingEvent>>,
}

impl CrossingLog {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<CrossingEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for CrossingLog {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossingObserver for CrossingLog {
    fn record(&self, agent: AgentId, lane: Lane, arrival_timestamp: u64, phase: CrossingPhase) {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let elapsed_ms = self.started.elapsed().as_millis() as u64;

        match phase {
            CrossingPhase::Entered => tracing::info!(
                %agent, %lane, arrival_timestamp, elapsed_ms,
                "🚗 crossing the intersection"
            ),
            CrossingPhase::Exited => tracing::info!(
                %agent, %lane, arrival_timestamp, elapsed_ms,
                "🏁 exited the intersection"
            ),
        }

        events.push(CrossingEvent {
            agent,
            lane,
            arrival_timestamp,
            phase,
            elapsed_ms,
        });
    }
}

/// Pairs of conflicting agents that were inside the intersection together.
pub fn mutual_exclusion_violations(
    events: &[CrossingEvent],
    table: &ConflictTable,
) -> Vec<(AgentId, AgentId)> {
    let mut inside: BTreeMap<AgentId, Lane> = BTreeMap::new();
    let mut violations = Vec::new();

    for event in events {
        match event.phase {
            CrossingPhase::Entered => {
                for (&other, &other_lane) in &inside {
                    if table.conflicts(event.lane, other_lane) {
                        violations.push((other, event.agent));
                    }
                }
                inside.insert(event.agent, event.lane);
            }
            CrossingPhase::Exited => {
                inside.remove(&event.agent);
            }
        }
    }

    violations
}

/// Largest number of agents inside the intersection at the same time.
pub fn peak_occupancy(events: &[CrossingEvent]) -> usize {
    let mut inside = 0usize;
    let mut peak = 0usize;
    for event in events {
        match event.phase {
            CrossingPhase::Entered => {
                inside += 1;
                peak = peak.max(inside);
            }
            CrossingPhase::Exited => inside = inside.saturating_sub(1),
        }
    }
    peak
}
