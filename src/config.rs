use crate::championship::{SimulationConfig, DEFAULT_SIMULATIONS};
use crate::race::RaceParams;
use crate::request::{RequestLimits, DEFAULT_MAX_DRIVERS, DEFAULT_MAX_EVENTS};
use clap::{Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Championship and race outcome simulator
#[derive(Parser, Debug)]
#[command(name = "redline-simulator", version, long_about = None)]
pub struct Cli {
    /// Directory holding the trained model artifacts
    #[arg(
        long,
        global = true,
        env = "REDLINE_ARTIFACTS",
        default_value = "artifacts"
    )]
    pub artifacts: PathBuf,

    /// Directory holding the gzipped history exports
    #[arg(
        long,
        global = true,
        env = "REDLINE_HISTORY",
        default_value = "history-data"
    )]
    pub history: PathBuf,

    /// Monte Carlo trials per championship simulation
    #[arg(
        long,
        global = true,
        env = "REDLINE_SIMULATIONS",
        default_value_t = DEFAULT_SIMULATIONS as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub simulations: u64,

    /// Seed for reproducible runs
    #[arg(long, global = true, env = "REDLINE_SEED")]
    pub seed: Option<u64>,

    /// Most drivers a championship request may list
    #[arg(
        long,
        global = true,
        env = "REDLINE_MAX_DRIVERS",
        default_value_t = DEFAULT_MAX_DRIVERS
    )]
    pub max_drivers: usize,

    /// Most remaining events, sprints included, a championship request may list
    #[arg(
        long,
        global = true,
        env = "REDLINE_MAX_EVENTS",
        default_value_t = DEFAULT_MAX_EVENTS
    )]
    pub max_events: usize,

    /// Classify race results by laps completed before total time
    #[arg(long, global = true, env = "REDLINE_RANK_BY_LAPS")]
    pub rank_by_laps: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
        host: IpAddr,

        #[arg(long, env = "PORT", default_value_t = 5000)]
        port: u16,
    },

    /// Run one championship simulation from a request file and print the result
    Simulate {
        #[arg(value_name = "REQUEST.json")]
        request: PathBuf,
    },

    /// Simulate a race lap by lap
    Race {
        #[arg(value_name = "SESSION.json", required_unless_present = "session_key")]
        session: Option<PathBuf>,

        /// Rebuild a recorded session from the history exports instead
        #[arg(long, conflicts_with = "session")]
        session_key: Option<u32>,
    },

    /// Score the points model against the history exports
    Evaluate,
}

impl Cli {
    #[allow(clippy::cast_possible_truncation)]
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            simulations: self.simulations as usize,
            seed: self.seed,
        }
    }

    pub fn request_limits(&self) -> RequestLimits {
        RequestLimits {
            max_drivers: self.max_drivers,
            max_events: self.max_events,
        }
    }

    pub fn race_params(&self) -> RaceParams {
        RaceParams {
            rank_by_laps: self.rank_by_laps,
            ..RaceParams::default()
        }
    }
}
