use std::path::Path;
use std::process::ExitCode;

use crossing_core::config::SimulationConfig;
use crossing_core::error::ConfigError;
use crossing_core::simulation::Simulation;

use crate::report::{render_summary, render_table, RunSummary};

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub agents: Option<usize>,
    pub seed: Option<u64>,
    pub crossing_ms: Option<u64>,
    pub max_arrival_ms: Option<u64>,
}

impl Overrides {
    pub fn apply(self, config: &mut SimulationConfig) {
        if let Some(agents) = self.agents {
            config.agent_count = agents;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(crossing_ms) = self.crossing_ms {
            config.crossing_time_ms = crossing_ms;
        }
        if let Some(max_arrival_ms) = self.max_arrival_ms {
            config.max_arrival_delay_ms = max_arrival_ms;
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<SimulationConfig, ConfigError> {
    match path {
        Some(path) => {
            tracing::info!("📄 Loading configuration from {}", path.display());
            SimulationConfig::load(path)
        }
        None => Ok(SimulationConfig::default()),
    }
}

pub async fn simulate(path: Option<&Path>, overrides: Overrides, json: bool) -> ExitCode {
    let mut config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    overrides.apply(&mut config);

    let simulation = match Simulation::from_config(config) {
        Ok(simulation) => simulation,
        Err(e) => {
            eprintln!("Cannot start simulation: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        "🚗 Simulation {} starting with {} vehicles",
        simulation.run_id(),
        simulation.arrivals().len()
    );

    let report = match simulation.run().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("❌ Simulation failed: {}", e);
            eprintln!("Simulation failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(body) => println!("{}", body),
            Err(e) => {
                eprintln!("Cannot serialize report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", render_summary(&RunSummary::from_report(&report)));
    }

    if report.violations.is_empty() {
        ExitCode::SUCCESS
    } else {
        tracing::error!("❌ {} mutual exclusion violations", report.violations.len());
        ExitCode::FAILURE
    }
}

pub fn check(path: Option<&Path>) -> ExitCode {
    let result = load_config(path).and_then(|config| {
        let table = config.validate()?;
        Ok((config, table))
    });

    match result {
        Ok((config, table)) => {
            println!(
                "Configuration OK: {} agents, {} ms crossing, {} ms max arrival delay",
                config.agent_count, config.crossing_time_ms, config.max_arrival_delay_ms
            );
            print!("{}", render_table(&table));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            ExitCode::FAILURE
        }
    }
}
