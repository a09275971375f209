#[cfg(test)]
mod tests {
    use crate::agent::VehicleAgent;
    use crate::arbitration::{DeferReason, Verdict};
    use crate::config::{AgentSettings, RetryPolicy};
    use crate::conflict::ConflictTable;
    use crate::error::AgentError;
    use crate::network::RelayLink;
    use crate::observer::{CrossingLog, CrossingPhase};
    use crate::types::{
        AgentId, AgentStatus, ConnectedSnapshot, ConnectionState, EntryRequest, FromRelay,
        Grant, Heading, Lane, ToRelay,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

    // =========================================================================
    // Helpers
    // =========================================================================

    struct FakeRelay {
        from_agent: UnboundedReceiver<ToRelay>,
        to_agent: UnboundedSender<FromRelay>,
    }

    fn settings() -> AgentSettings {
        AgentSettings {
            crossing_time: Duration::from_millis(10),
            snapshot_timeout: Duration::from_millis(50),
            grant_timeout: Duration::from_millis(200),
            release_ack_timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
            },
        }
    }

    fn new_agent(id: u32, lane: Lane) -> (VehicleAgent, FakeRelay, Arc<CrossingLog>) {
        let (to_relay, from_agent) = mpsc::unbounded_channel();
        let (to_agent, inbox) = mpsc::unbounded_channel();
        let log = Arc::new(CrossingLog::new());
        let agent = VehicleAgent::new(
            AgentId(id),
            lane,
            Arc::new(ConflictTable::standard()),
            settings(),
            RelayLink::new(to_relay, inbox),
            log.clone(),
        );
        (
            agent,
            FakeRelay {
                from_agent,
                to_agent,
            },
            log,
        )
    }

    /// Snapshot of `agent_count` agents where `connected` are on the network.
    fn snapshot(agent_count: usize, connected: &[u32]) -> FromRelay {
        let mut states = vec![ConnectionState::NeverJoined; agent_count];
        for &id in connected {
            states[id as usize] = ConnectionState::Connected;
        }
        FromRelay::ConnectedSnapshot(ConnectedSnapshot { states })
    }

    fn peer_request(sender: u32, lane: Lane, timestamp: u64) -> FromRelay {
        FromRelay::PeerRequest(EntryRequest {
            sender: AgentId(sender),
            arrival_lane: lane,
            destination: lane.exit_heading(),
            arrival_timestamp: timestamp,
            lamport_timestamp: timestamp,
        })
    }

    // =========================================================================
    // request_entry
    // =========================================================================

    #[tokio::test]
    async fn request_entry_stamps_the_request_and_learns_its_peers() {
        let (mut agent, mut relay, _) = new_agent(0, Lane::NorthForward);
        relay.to_agent.send(snapshot(3, &[0, 1, 2])).unwrap();

        let arrival = agent.request_entry().await.unwrap();

        assert_eq!(arrival, 1);
        assert_eq!(agent.status(), AgentStatus::Waiting);
        assert_eq!(agent.outstanding_grants(), vec![AgentId(1), AgentId(2)]);

        let sent = relay.from_agent.try_recv().unwrap();
        assert_eq!(
            sent,
            ToRelay::Request(EntryRequest {
                sender: AgentId(0),
                arrival_lane: Lane::NorthForward,
                destination: Heading::South,
                arrival_timestamp: 1,
                lamport_timestamp: 1,
            })
        );
    }

    #[tokio::test]
    async fn request_entry_can_only_happen_once() {
        let (mut agent, relay, _) = new_agent(0, Lane::NorthForward);
        relay.to_agent.send(snapshot(1, &[0])).unwrap();
        agent.request_entry().await.unwrap();

        let err = agent.request_entry().await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::InvalidTransition {
                from: AgentStatus::Waiting,
                to: AgentStatus::Waiting
            }
        ));
    }

    #[tokio::test]
    async fn request_is_retried_until_the_snapshot_arrives() {
        let (mut agent, relay, _) = new_agent(1, Lane::EastLeft);
        let FakeRelay {
            mut from_agent,
            to_agent,
        } = relay;

        let responder = tokio::spawn(async move {
            // Drop the first attempt on the floor, answer the second
            let first = from_agent.recv().await.unwrap();
            let second = from_agent.recv().await.unwrap();
            to_agent.send(snapshot(2, &[0, 1])).unwrap();
            (first, second, to_agent)
        });

        agent.request_entry().await.unwrap();
        let (first, second, _to_agent) = responder.await.unwrap();

        assert_eq!(first, second);
        assert_eq!(agent.outstanding_grants(), vec![AgentId(0)]);
    }

    #[tokio::test]
    async fn request_entry_gives_up_after_the_last_attempt() {
        let (mut agent, mut relay, _) = new_agent(0, Lane::NorthForward);

        let err = agent.request_entry().await.unwrap_err();

        assert!(matches!(err, AgentError::SnapshotTimeout { attempts: 3 }));
        let mut attempts = 0;
        while let Ok(ToRelay::Request(_)) = relay.from_agent.try_recv() {
            attempts += 1;
        }
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn request_entry_fails_when_the_relay_is_gone() {
        let (mut agent, relay, _) = new_agent(0, Lane::NorthForward);
        drop(relay);

        let err = agent.request_entry().await.unwrap_err();
        assert!(matches!(err, AgentError::RelayUnavailable));
    }

    // =========================================================================
    // answer_request
    // =========================================================================

    #[tokio::test]
    async fn answering_updates_the_lamport_clock() {
        let (mut agent, relay, _) = new_agent(0, Lane::NorthForward);
        relay.to_agent.send(snapshot(3, &[0])).unwrap();
        agent.request_entry().await.unwrap();
        assert_eq!(agent.clock(), 1);

        let FromRelay::PeerRequest(request) = peer_request(1, Lane::SouthForward, 10) else {
            unreachable!()
        };
        agent.answer_request(request).unwrap();

        assert_eq!(agent.clock(), 11);
        assert_eq!(agent.arrival_timestamp(), Some(1));
    }

    #[tokio::test]
    async fn waiting_agent_grants_non_conflicting_and_defers_conflicting_late_joiners() {
        let (mut agent, mut relay, _) = new_agent(0, Lane::NorthForward);
        relay.to_agent.send(snapshot(3, &[0])).unwrap();
        agent.request_entry().await.unwrap();
        relay.from_agent.try_recv().unwrap();

        let FromRelay::PeerRequest(parallel) = peer_request(1, Lane::SouthForward, 1) else {
            unreachable!()
        };
        let FromRelay::PeerRequest(crossing) = peer_request(2, Lane::EastForward, 1) else {
            unreachable!()
        };

        assert_eq!(agent.answer_request(parallel).unwrap(), Verdict::Grant);
        assert_eq!(
            agent.answer_request(crossing).unwrap(),
            Verdict::Defer(DeferReason::RequesterJoinedLater)
        );

        assert_eq!(
            relay.from_agent.try_recv().unwrap(),
            ToRelay::Reply(Grant {
                from: AgentId(0),
                to: AgentId(1),
            })
        );
        assert!(relay.from_agent.try_recv().is_err());
        assert_eq!(agent.deferred_queue(), &[AgentId(2)]);
    }

    // =========================================================================
    // cross_and_release
    // =========================================================================

    #[tokio::test]
    async fn crosses_after_all_grants_and_releases_the_deferred_queue() {
        let (mut agent, relay, log) = new_agent(0, Lane::NorthForward);
        let FakeRelay {
            mut from_agent,
            to_agent,
        } = relay;

        to_agent.send(snapshot(4, &[0, 1])).unwrap();
        agent.request_entry().await.unwrap();

        // Agent 2 joined after us on a conflicting lane; agent 1 grants
        to_agent.send(peer_request(2, Lane::EastForward, 1)).unwrap();
        to_agent.send(FromRelay::Reply { from: AgentId(1) }).unwrap();

        let responder = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(message) = from_agent.recv().await {
                let released = matches!(message, ToRelay::Release { .. });
                seen.push(message);
                if released {
                    // A request relayed before the relay processed our release
                    to_agent.send(peer_request(3, Lane::WestForward, 2)).unwrap();
                    to_agent.send(FromRelay::ReleaseAck).unwrap();
                    break;
                }
            }
            (seen, from_agent)
        });

        let flushed = agent.cross_and_release().await.unwrap();
        let (seen, mut from_agent) = responder.await.unwrap();

        assert_eq!(flushed, vec![AgentId(2)]);
        assert_eq!(agent.status(), AgentStatus::Exited);
        assert!(agent.deferred_queue().is_empty());

        assert_eq!(
            seen.last().unwrap(),
            &ToRelay::Release {
                sender: AgentId(0),
                deferred: vec![AgentId(2)],
            }
        );

        // Once exited, conflicting requests are granted straight away
        assert_eq!(
            from_agent.try_recv().unwrap(),
            ToRelay::Reply(Grant {
                from: AgentId(0),
                to: AgentId(3),
            })
        );

        let phases: Vec<CrossingPhase> = log.events().iter().map(|e| e.phase).collect();
        assert_eq!(phases, vec![CrossingPhase::Entered, CrossingPhase::Exited]);
    }

    #[tokio::test]
    async fn passing_agent_defers_conflicting_requests() {
        let (mut agent, relay, _) = new_agent(0, Lane::NorthForward);
        let FakeRelay {
            mut from_agent,
            to_agent,
        } = relay;
        to_agent.send(snapshot(2, &[0])).unwrap();
        agent.request_entry().await.unwrap();

        let responder = tokio::spawn(async move {
            // The snapshot was empty, so the agent enters at once; ask while it is inside
            let mut release = None;
            to_agent.send(peer_request(1, Lane::EastForward, 1)).unwrap();
            while let Some(message) = from_agent.recv().await {
                if let ToRelay::Release { deferred, .. } = &message {
                    release = Some(deferred.clone());
                    to_agent.send(FromRelay::ReleaseAck).unwrap();
                    break;
                }
            }
            release
        });

        agent.cross_and_release().await.unwrap();
        let release = responder.await.unwrap();
        assert_eq!(release, Some(vec![AgentId(1)]));
    }

    #[tokio::test]
    async fn missing_grant_times_out_naming_the_peer() {
        let (mut agent, relay, log) = new_agent(0, Lane::NorthForward);
        relay.to_agent.send(snapshot(3, &[0, 2])).unwrap();
        agent.request_entry().await.unwrap();

        let err = agent.cross_and_release().await.unwrap_err();

        match err {
            AgentError::GrantTimeout { outstanding, .. } => {
                assert_eq!(outstanding, vec![AgentId(2)])
            }
            other => panic!("expected GrantTimeout, got {:?}", other),
        }
        assert_eq!(agent.status(), AgentStatus::Waiting);
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn cannot_cross_without_requesting() {
        let (mut agent, _relay, _) = new_agent(0, Lane::NorthForward);
        let err = agent.cross_and_release().await.unwrap_err();
        assert!(matches!(err, AgentError::NotWaiting(AgentStatus::Idle)));
    }

    #[tokio::test]
    async fn run_reports_the_whole_lifetime() {
        let (agent, relay, _) = new_agent(1, Lane::SouthLeft);
        let FakeRelay {
            mut from_agent,
            to_agent,
        } = relay;

        let responder = tokio::spawn(async move {
            while let Some(message) = from_agent.recv().await {
                match message {
                    ToRelay::Request(_) => {
                        to_agent.send(snapshot(2, &[0, 1])).unwrap();
                        to_agent.send(FromRelay::Reply { from: AgentId(0) }).unwrap();
                    }
                    ToRelay::Release { .. } => {
                        to_agent.send(FromRelay::ReleaseAck).unwrap();
                        break;
                    }
                    ToRelay::Reply(_) => {}
                }
            }
        });

        let report = agent.run().await.unwrap();
        responder.await.unwrap();

        assert_eq!(report.agent, AgentId(1));
        assert_eq!(report.status, AgentStatus::Exited);
        assert_eq!(report.arrival_timestamp, 1);
        assert_eq!(report.awaited, vec![AgentId(0)]);
        assert!(report.deferred_flushed.is_empty());
        assert!(report.final_clock >= report.arrival_timestamp);
    }

    #[tokio::test]
    async fn requests_arriving_before_the_release_ack_are_granted_on_receipt() {
        let (agent, relay, _) = new_agent(1, Lane::SouthLeft);
        let FakeRelay {
            mut from_agent,
            to_agent,
        } = relay;

        let responder = tokio::spawn(async move {
            let mut late_grant = None;
            while let Some(message) = from_agent.recv().await {
                match message {
                    ToRelay::Request(_) => {
                        to_agent.send(snapshot(3, &[1])).unwrap();
                    }
                    ToRelay::Release { .. } => {
                        // Relayed before the relay processed the release
                        to_agent
                            .send(peer_request(2, Lane::NorthForward, 9))
                            .unwrap();
                    }
                    ToRelay::Reply(grant) => {
                        late_grant = Some(grant);
                        to_agent.send(FromRelay::ReleaseAck).unwrap();
                        break;
                    }
                }
            }
            late_grant
        });

        let report = agent.run().await.unwrap();
        let late_grant = responder.await.unwrap();

        assert_eq!(
            late_grant,
            Some(Grant {
                from: AgentId(1),
                to: AgentId(2)
            })
        );
        assert_eq!(report.status, AgentStatus::Exited);
        assert_eq!(report.granted_on_receipt, vec![AgentId(2)]);
        assert!(report.deferred_flushed.is_empty());
    }
}
