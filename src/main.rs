#![warn(clippy::pedantic, rust_2018_idioms)]

mod championship;
mod config;
mod context;
mod database;
mod error;
mod evaluate;
mod features;
mod history;
mod model;
mod race;
mod read_dir;
mod request;
mod server;
mod stats;
mod time;
mod util;

use crate::config::{Cli, Command};
use crate::context::SimulationContext;
use crate::database::Database;
use crate::features::FeatureStore;
use crate::model::{DegradationModel, PointsRegressor};
use crate::race::{Classified, RaceSession};
use crate::request::SimulateRequest;
use crate::server::AppState;
use anyhow::{Context, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(err) = run(Cli::parse()) {
        error!("{:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.simulation_config();
    let limits = cli.request_limits();
    let race = cli.race_params();
    match cli.command {
        Command::Serve { host, port } => {
            let context = load_context(&cli.artifacts, &cli.history)?;
            let state = AppState {
                context: Arc::new(context),
                config,
                race,
                limits,
            };
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(SocketAddr::new(host, port), state))
        }
        Command::Simulate { request } => {
            let context = load_context(&cli.artifacts, &cli.history)?;
            let request: SimulateRequest = read_json(&request)?;
            let (standings, events) = request.into_parts(&limits)?;
            let probabilities = championship::simulate(&context, &standings, &events, &config)?;
            println!("{}", serde_json::to_string_pretty(&probabilities)?);
            Ok(())
        }
        Command::Race {
            session,
            session_key,
        } => {
            let session: RaceSession = match (session, session_key) {
                (Some(path), _) => read_json(&path)?,
                (None, Some(key)) => Database::load(&cli.history)?
                    .tables
                    .race_session(key)
                    .with_context(|| format!("no stints recorded for session {}", key))?,
                (None, None) => {
                    anyhow::bail!("either a session file or --session-key is required")
                }
            };
            let model = DegradationModel::load(&cli.artifacts.join("degradation.json"))?;
            let classification =
                session.simulate(Some(&model), &race, &mut util::rng(config.seed))?;
            print_classification(&classification);
            Ok(())
        }
        Command::Evaluate => {
            let database = Database::load(&cli.history)?;
            let points = PointsRegressor::load(&cli.artifacts)?;
            let accuracy = evaluate::evaluate(&points, &FeatureStore::new(&database), &database);
            println!("{}", accuracy);
            Ok(())
        }
    }
}

fn load_context(artifacts: &Path, history: &Path) -> Result<SimulationContext> {
    let database = Database::load(history)?;
    let context = SimulationContext::load(artifacts, &database)?;
    info!(records = database.records.len(), "simulation context ready");
    Ok(context)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("unable to parse {}", path.display()))
}

fn print_classification(classification: &[Classified]) {
    let leader = match classification.first() {
        Some(leader) => leader,
        None => return,
    };
    for row in classification {
        let time = if row.position == 1 {
            time::race_time(row.total_time)
        } else if row.laps < leader.laps {
            let down = leader.laps - row.laps;
            format!("+{} lap{}", down, if down == 1 { "" } else { "s" })
        } else if row.laps > leader.laps {
            time::race_time(row.total_time)
        } else {
            time::gap(row.total_time - leader.total_time)
        };
        println!(
            "{:>3}  {:<16} {:>4} {:>14} {:>4}",
            row.position, row.driver, row.laps, time, row.points
        );
    }
}
