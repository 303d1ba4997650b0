use crate::context::SimulationContext;
use crate::error::SimulationError;
use crate::features::DriverFeatures;
use crate::history::SessionKind;
use crate::model::FeatureBatch;
use crate::util::{rng, slot};
use rand::Rng;
use rand_distr::StandardNormal;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

pub const DEFAULT_SIMULATIONS: usize = 50_000;

const GRID_FRONT: f64 = 1.0;
const GRID_BACK: f64 = 20.0;

/// Driver id to championship-win percentage. Drivers who never won a trial are absent.
pub type Probabilities = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub driver: String,
    pub constructor: String,
    pub points: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub round: u32,
    pub kind: SessionKind,
}

#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    pub simulations: usize,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> SimulationConfig {
        SimulationConfig {
            simulations: DEFAULT_SIMULATIONS,
            seed: None,
        }
    }
}

/// Monte Carlo estimate of each driver's chance to win the championship.
///
/// Every (simulation, event, driver) cell gets a sampled qualifying position, all cells go
/// through the points regressor in a single batch, and the predictions are perturbed with
/// Gaussian noise and then knocked out to zero with each driver's DNF rate. Per trial the
/// driver with the highest final total (ties go to the earlier standings entry) wins.
#[instrument(
    name = "championship::simulate",
    skip_all,
    fields(
        drivers = standings.len(),
        events = events.len(),
        simulations = config.simulations
    )
)]
pub fn simulate(
    context: &SimulationContext,
    standings: &[Standing],
    events: &[Event],
    config: &SimulationConfig,
) -> Result<Probabilities, SimulationError> {
    if events.is_empty() {
        return Err(SimulationError::NoRemainingEvents);
    }
    if standings.is_empty() {
        return Err(SimulationError::EmptyStandings);
    }
    if config.simulations == 0 {
        return Err(SimulationError::NoSimulations);
    }
    let mut seen = FxHashSet::default();
    for standing in standings {
        if !seen.insert(standing.driver.as_str()) {
            return Err(SimulationError::DuplicateDriver(standing.driver.clone()));
        }
    }

    // the standings order fixes the driver axis of every array below
    let features = context.features().prepare(
        standings
            .iter()
            .map(|s| (s.driver.as_str(), Some(s.constructor.as_str()))),
    );
    let drivers = features
        .iter()
        .map(|f| context.points().encode_driver(&f.driver))
        .collect::<Result<Vec<_>, _>>()?;
    let constructors = features
        .iter()
        .map(|f| context.points().encode_constructor(&f.constructor))
        .collect::<Result<Vec<_>, _>>()?;

    let cells = config.simulations.checked_mul(events.len());
    let samples = cells
        .and_then(|cells| cells.checked_mul(standings.len()))
        .zip(cells)
        .ok_or_else(|| {
            SimulationError::TooLarge(format!(
                "{} simulations over {} events and {} drivers",
                config.simulations,
                events.len(),
                standings.len()
            ))
        });
    let (samples, cells) = samples?;
    info!(samples, "starting Monte Carlo");

    let mut rng = rng(config.seed);
    let quali = sample_qualifying(&mut rng, &features, cells);
    let batch = assemble_batch(&quali, &features, &drivers, &constructors);
    let mut points = context.points().predict(&batch);
    drop(batch);

    perturb(&mut points, &mut rng, context.noise_factor());
    let dnf_rates: Vec<f64> = features.iter().map(|f| f.dnf_rate).collect();
    knock_out(&mut points, &mut rng, &dnf_rates);

    let current: Vec<f64> = standings.iter().map(|s| s.points).collect();
    let wins = tally(&points, config.simulations, events.len(), &current);
    let probabilities = probabilities(&wins, standings, config.simulations);
    info!(winners = probabilities.len(), "simulation complete");
    Ok(probabilities)
}

/// One qualifying position per driver for each of `cells` (simulation, event) pairs, laid out
/// cell-major.
fn sample_qualifying<R: Rng>(rng: &mut R, features: &[DriverFeatures], cells: usize) -> Vec<f64> {
    let mut quali = Vec::with_capacity(cells * features.len());
    for _ in 0..cells {
        for driver in features {
            let z: f64 = rng.sample(StandardNormal);
            quali.push(slot(driver.q_proxy + driver.q_stdev * z, GRID_FRONT, GRID_BACK));
        }
    }
    quali
}

fn assemble_batch(
    quali: &[f64],
    features: &[DriverFeatures],
    drivers: &[u32],
    constructors: &[u32],
) -> FeatureBatch {
    let mut batch = FeatureBatch::with_capacity(quali.len());
    for (i, q) in quali.iter().enumerate() {
        let d = i % features.len();
        // the sampled position stands in for both grid and qualifying
        batch.push(
            [
                *q,
                *q,
                features[d].driver_points_roll,
                features[d].constructor_points_roll,
            ],
            drivers[d],
            constructors[d],
        );
    }
    debug!(rows = batch.len(), "assembled feature batch");
    batch
}

fn perturb<R: Rng>(points: &mut [f64], rng: &mut R, noise_factor: f64) {
    for p in points.iter_mut() {
        let z: f64 = rng.sample(StandardNormal);
        *p = (*p + noise_factor * z).max(0.0);
    }
}

/// Zeroes a sample when its uniform roll falls under the driver's DNF rate. Runs after the
/// noise, so a retirement always scores exactly nothing.
fn knock_out<R: Rng>(points: &mut [f64], rng: &mut R, dnf_rates: &[f64]) {
    for (i, p) in points.iter_mut().enumerate() {
        let roll: f64 = rng.gen();
        if roll < dnf_rates[i % dnf_rates.len()] {
            *p = 0.0;
        }
    }
}

/// Championship wins per driver across all trials.
fn tally(points: &[f64], simulations: usize, events: usize, current: &[f64]) -> Vec<u32> {
    let drivers = current.len();
    debug_assert_eq!(points.len(), simulations * events * drivers);
    let mut wins = vec![0_u32; drivers];
    let mut totals = vec![0.0; drivers];
    for trial in points.chunks_exact(events * drivers) {
        totals.copy_from_slice(current);
        for event in trial.chunks_exact(drivers) {
            for (total, p) in totals.iter_mut().zip(event) {
                *total += p;
            }
        }
        let mut champion = 0;
        for (d, total) in totals.iter().enumerate() {
            if *total > totals[champion] {
                champion = d;
            }
        }
        wins[champion] += 1;
    }
    wins
}

#[allow(clippy::cast_precision_loss)]
fn probabilities(wins: &[u32], standings: &[Standing], simulations: usize) -> Probabilities {
    wins.iter()
        .zip(standings)
        .filter(|(wins, _)| **wins > 0)
        .map(|(wins, standing)| {
            (
                standing.driver.clone(),
                f64::from(*wins) / simulations as f64 * 100.0,
            )
        })
        .collect()
}
