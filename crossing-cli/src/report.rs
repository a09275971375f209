use std::fmt::Write;

use serde::Serialize;

use crossing_core::conflict::ConflictTable;
use crossing_core::observer::CrossingPhase;
use crossing_core::simulation::SimulationReport;
use crossing_core::types::{AgentId, Lane};

// ─── Summary Types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CrossingLine {
    pub agent: String,
    pub lane: String,
    pub arrival_timestamp: u64,
    pub entered_ms: Option<u64>,
    pub exited_ms: Option<u64>,
    pub waited_for: usize,
    pub deferred: usize,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub crossings: Vec<CrossingLine>,
    pub peak_occupancy: usize,
    pub violations: usize,
    pub relay_messages: u64,
    pub skipped_faults: u64,
}

impl RunSummary {
    pub fn from_report(report: &SimulationReport) -> Self {
        let phase_at = |agent: AgentId, phase: CrossingPhase| {
            report
                .crossings
                .iter()
                .find(|e| e.agent == agent && e.phase == phase)
                .map(|e| e.elapsed_ms)
        };

        let mut crossings: Vec<CrossingLine> = report
            .agents
            .iter()
            .map(|a| CrossingLine {
                agent: a.agent.to_string(),
                lane: a.lane.to_string(),
                arrival_timestamp: a.arrival_timestamp,
                entered_ms: phase_at(a.agent, CrossingPhase::Entered),
                exited_ms: phase_at(a.agent, CrossingPhase::Exited),
                waited_for: a.awaited.len(),
                deferred: a.deferred_flushed.len(),
            })
            .collect();
        crossings.sort_by_key(|line| line.entered_ms);

        let relay = &report.relay;
        Self {
            run_id: report.run_id.clone(),
            crossings,
            peak_occupancy: report.peak_occupancy,
            violations: report.violations.len(),
            relay_messages: relay.requests_received + relay.replies_routed + relay.releases,
            skipped_faults: relay.skipped_faults,
        }
    }
}

// ─── Rendering ──────────────────────────────────────────────────────────────

fn millis(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |ms| ms.to_string())
}

pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run {}", summary.run_id);
    let _ = writeln!(
        out,
        "{:<8} {:<5} {:>6} {:>10} {:>10} {:>7} {:>9}",
        "AGENT", "LANE", "TS", "ENTERED", "EXITED", "WAITED", "DEFERRED"
    );
    for line in &summary.crossings {
        let _ = writeln!(
            out,
            "{:<8} {:<5} {:>6} {:>10} {:>10} {:>7} {:>9}",
            line.agent,
            line.lane,
            line.arrival_timestamp,
            millis(line.entered_ms),
            millis(line.exited_ms),
            line.waited_for,
            line.deferred
        );
    }
    let _ = writeln!(
        out,
        "peak occupancy {}, relay messages {}, skipped faults {}, violations {}",
        summary.peak_occupancy, summary.relay_messages, summary.skipped_faults, summary.violations
    );
    out
}

/// Conflict table as a grid, `X` marking lanes that may not cross together.
pub fn render_table(table: &ConflictTable) -> String {
    let mut out = String::from("    ");
    for lane in Lane::ALL {
        let _ = write!(out, "{:>3}", lane.to_string());
    }
    out.push('\n');
    for row in Lane::ALL {
        let _ = write!(out, "{:<4}", row.to_string());
        for col in Lane::ALL {
            let mark = if table.conflicts(row, col) { "X" } else { "." };
            let _ = write!(out, "{:>3}", mark);
        }
        out.push('\n');
    }
    out
}
