//! Bootstrap for a full run: arrival generation, wiring, and result collection.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};

use crate::agent::{AgentReport, VehicleAgent};
use crate::config::SimulationConfig;
use crate::conflict::ConflictTable;
use crate::error::{ConfigError, RelayError, SimulationError};
use crate::network::broadcast_medium;
use crate::observer::{mutual_exclusion_violations, peak_occupancy, CrossingEvent, CrossingLog};
use crate::relay::{RelayBroker, RelayReport};
use crate::types::{AgentId, Lane};

/// When and where one vehicle shows up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arrival {
    pub agent: AgentId,
    pub lane: Lane,
    pub delay: Duration,
}

/// Random lane and arrival delay for each of `count` agents.
pub fn plan_arrivals<R: Rng + ?Sized>(count: usize, max_delay: Duration, rng: &mut R) -> Vec<Arrival> {
    let max_delay_ms = max_delay.as_millis() as u64;
    (0..count)
        .map(|index| Arrival {
            agent: AgentId::from(index),
            lane: Lane::ALL[rng.gen_range(0..Lane::COUNT)],
            delay: Duration::from_millis(rng.gen_range(0..=max_delay_ms)),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub run_id: String,
    pub agents: Vec<AgentReport>,
    pub relay: RelayReport,
    pub crossings: Vec<CrossingEvent>,
    /// Conflicting pairs seen inside the intersection together; empty on a correct run
    pub violations: Vec<(AgentId, AgentId)>,
    pub peak_occupancy: usize,
}

pub struct Simulation {
    run_id: String,
    config: SimulationConfig,
    table: Arc<ConflictTable>,
    arrivals: Vec<Arrival>,
}

impl Simulation {
    /// Validates `config` and draws lanes and delays from its seed.
    pub fn from_config(config: SimulationConfig) -> Result<Self, SimulationError> {
        let table = config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let arrivals = plan_arrivals(config.agent_count, config.max_arrival_delay(), &mut rng);
        Self::build(config, table, arrivals)
    }

    /// Uses a fixed arrival plan. Entry `i` must be for agent `i`. Delays are
    /// taken as given, even beyond `max_arrival_delay_ms`.
    pub fn with_arrivals(
        config: SimulationConfig,
        arrivals: Vec<Arrival>,
    ) -> Result<Self, SimulationError> {
        let table = config.validate()?;
        Self::build(config, table, arrivals)
    }

    fn build(
        config: SimulationConfig,
        table: ConflictTable,
        arrivals: Vec<Arrival>,
    ) -> Result<Self, SimulationError> {
        if arrivals.len() != config.agent_count {
            return Err(ConfigError::PlanSize {
                planned: arrivals.len(),
                configured: config.agent_count,
            }
            .into());
        }
        if let Some((position, arrival)) = arrivals
            .iter()
            .enumerate()
            .find(|(position, arrival)| arrival.agent.index() != *position)
        {
            return Err(ConfigError::PlanOrder {
                position,
                agent: arrival.agent,
            }
            .into());
        }

        Ok(Self {
            run_id: nanoid::nanoid!(10),
            config,
            table: Arc::new(table),
            arrivals,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn arrivals(&self) -> &[Arrival] {
        &self.arrivals
    }

    pub async fn run(self) -> Result<SimulationReport, SimulationError> {
        let span = info_span!("simulation", run_id = %self.run_id);
        self.execute().instrument(span).await
    }

    async fn execute(self) -> Result<SimulationReport, SimulationError> {
        info!(agents = self.arrivals.len(), "starting simulation");

        let (endpoint, links) = broadcast_medium(self.arrivals.len());
        let relay = RelayBroker::new(endpoint, self.config.relay_settings());
        let relay_task = tokio::spawn(relay.run().in_current_span());

        let log = Arc::new(CrossingLog::new());
        let settings = self.config.agent_settings();

        let mut agent_tasks = JoinSet::new();
        for (arrival, link) in self.arrivals.iter().cloned().zip(links) {
            let agent = VehicleAgent::new(
                arrival.agent,
                arrival.lane,
                Arc::clone(&self.table),
                settings.clone(),
                link,
                log.clone(),
            );
            agent_tasks.spawn(
                async move {
                    tokio::time::sleep(arrival.delay).await;
                    info!(agent = %arrival.agent, lane = %arrival.lane, "🚦 arrived at the intersection");
                    (arrival.agent, agent.run().await)
                }
                .in_current_span(),
            );
        }

        let mut reports: Vec<Option<AgentReport>> = (0..self.arrivals.len()).map(|_| None).collect();
        let mut failure = None;
        while let Some(joined) = agent_tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => {
                    let index = report.agent.index();
                    reports[index] = Some(report);
                }
                Ok((agent, Err(source))) => {
                    failure = Some(SimulationError::Agent { agent, source });
                    break;
                }
                Err(e) => {
                    failure = Some(SimulationError::Join(e));
                    break;
                }
            }
        }

        if let Some(agent_failure) = failure {
            // Dropping the remaining links lets the relay see its inbox close
            agent_tasks.abort_all();
            while agent_tasks.join_next().await.is_some() {}

            let relay_result = relay_task.await;
            warn!(error = %agent_failure, "simulation aborted");
            return Err(match relay_result {
                Ok(Err(e)) if !matches!(e, RelayError::AllAgentsGone { .. }) => e.into(),
                _ => agent_failure,
            });
        }

        let relay = relay_task.await??;
        let agents: Vec<AgentReport> = reports.into_iter().flatten().collect();

        let crossings = log.events();
        let violations = mutual_exclusion_violations(&crossings, &self.table);
        let peak = peak_occupancy(&crossings);
        info!(
            crossings = agents.len(),
            peak_occupancy = peak,
            violations = violations.len(),
            "simulation finished"
        );

        Ok(SimulationReport {
            run_id: self.run_id,
            agents,
            relay,
            crossings,
            violations,
            peak_occupancy: peak,
        })
    }
}
