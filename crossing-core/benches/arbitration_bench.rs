use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use crossing_core::arbitration::{Arbiter, Contender, Priority};
use crossing_core::connection::ConnectionTable;
use crossing_core::conflict::ConflictTable;
use crossing_core::observer::{mutual_exclusion_violations, CrossingEvent, CrossingPhase};
use crossing_core::types::*;

use std::collections::BTreeSet;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn make_request(sender: u32, lane: Lane, arrival_timestamp: u64) -> EntryRequest {
    EntryRequest {
        sender: AgentId(sender),
        arrival_lane: lane,
        destination: lane.exit_heading(),
        arrival_timestamp,
        lamport_timestamp: arrival_timestamp,
    }
}

fn make_events(count: u32) -> Vec<CrossingEvent> {
    (0..count)
        .flat_map(|i| {
            let lane = Lane::ALL[i as usize % Lane::COUNT];
            [CrossingPhase::Entered, CrossingPhase::Exited]
                .into_iter()
                .map(move |phase| CrossingEvent {
                    agent: AgentId(i),
                    lane,
                    arrival_timestamp: u64::from(i) + 1,
                    phase,
                    elapsed_ms: u64::from(i),
                })
        })
        .collect()
}

// ─── Benchmarks ─────────────────────────────────────────────────────────────

fn bench_conflict_lookup(c: &mut Criterion) {
    let table = ConflictTable::standard();
    c.bench_function("conflict_lookup_all_pairs", |b| {
        b.iter(|| {
            let mut count = 0;
            for a in Lane::ALL {
                for other in Lane::ALL {
                    if table.conflicts(black_box(a), black_box(other)) {
                        count += 1;
                    }
                }
            }
            count
        })
    });
}

fn bench_arbiter_decide(c: &mut Criterion) {
    let table = ConflictTable::standard();
    let peers: BTreeSet<AgentId> = (1..8).map(AgentId).collect();
    let me = Contender {
        id: AgentId(0),
        lane: Lane::NorthForward,
        status: AgentStatus::Waiting,
        priority: Some(Priority {
            arrival_timestamp: 5,
            agent: AgentId(0),
        }),
        peers_at_entry: &peers,
    };

    let mut group = c.benchmark_group("arbiter_decide");
    for (name, request) in [
        ("no_conflict", make_request(3, Lane::SouthForward, 9)),
        ("older_peer", make_request(2, Lane::EastForward, 3)),
        ("younger_peer", make_request(2, Lane::EastForward, 8)),
        ("late_joiner", make_request(9, Lane::EastForward, 1)),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &request, |b, request| {
            b.iter(|| Arbiter::decide(black_box(&me), black_box(request), black_box(&table)))
        });
    }
    group.finish();
}

fn bench_connection_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection_fan_out");

    for count in [8, 64, 512] {
        let mut connections = ConnectionTable::new(count);
        for id in (0..count).step_by(2) {
            let _ = connections.connect(AgentId::from(id));
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let peers = connections.connected_peers(black_box(AgentId(0)));
                let snapshot = connections.snapshot();
                (peers.len(), snapshot.connected_peers(AgentId(0)).len())
            })
        });
    }

    group.finish();
}

fn bench_violation_scan(c: &mut Criterion) {
    let table = ConflictTable::standard();
    let mut group = c.benchmark_group("violation_scan");

    for count in [10, 100, 1000] {
        let events = make_events(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &events, |b, events| {
            b.iter(|| mutual_exclusion_violations(black_box(events), black_box(&table)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_conflict_lookup,
    bench_arbiter_decide,
    bench_connection_fan_out,
    bench_violation_scan,
);
criterion_main!(benches);
