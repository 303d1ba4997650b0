use crate::database::{Database, RaceRecord};
use crate::history::{EventKey, History, RoundKey};
use crate::model::NUMERIC_FEATURES;
use crate::stats::{mean, sample_std};
use rustc_hash::FxHashMap;
use tracing::{info, instrument};

const POINTS_WINDOW: usize = 5;
const QUALI_WINDOW: usize = 10;

pub const FALLBACK_Q_PROXY: f64 = 10.0;
pub const FALLBACK_Q_STDEV: f64 = 3.0;
pub const FALLBACK_DNF_RATE: f64 = 0.05;

/// Last-observed rolling statistics for one driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverFeatures {
    pub driver: String,
    pub constructor: String,
    pub q_proxy: f64,
    pub q_stdev: f64,
    pub driver_points_roll: f64,
    pub constructor_points_roll: f64,
    pub dnf_rate: f64,
}

#[derive(Debug, Clone)]
struct Outing {
    constructor: String,
    points: f64,
    quali: Option<f64>,
    dnf: bool,
}

/// Per-driver and per-constructor series derived from the history store.
#[derive(Debug, Default)]
pub struct FeatureStore {
    drivers: FxHashMap<String, History<EventKey, Outing>>,
    /// Constructor points summed per race weekend.
    constructors: FxHashMap<String, History<RoundKey, f64>>,
}

impl FeatureStore {
    #[instrument(name = "FeatureStore::new", skip_all, fields(records = database.records.len()))]
    pub fn new(database: &Database) -> FeatureStore {
        let mut store = FeatureStore::default();
        for record in &database.records {
            store.drivers.entry(record.driver.clone()).or_default().insert(
                record.event,
                Outing {
                    constructor: record.constructor.clone(),
                    points: record.points,
                    quali: record.quali_position,
                    dnf: record.dnf,
                },
            );

            let totals = store
                .constructors
                .entry(record.constructor.clone())
                .or_default();
            let round = record.event.round_key();
            match totals.get_mut(&round) {
                Some(total) => *total += record.points,
                None => {
                    totals.insert(round, record.points);
                }
            }
        }
        info!(
            drivers = store.drivers.len(),
            outings = store.drivers.values().map(History::len).sum::<usize>(),
            constructors = store.constructors.len(),
            "built feature store"
        );
        store
    }

    /// Feature rows in exactly the order of `lineup`. A supplied constructor overrides the
    /// most recent one on record.
    pub fn prepare<'a, I>(&self, lineup: I) -> Vec<DriverFeatures>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        lineup
            .into_iter()
            .map(|(driver, constructor)| self.driver(driver, constructor))
            .collect()
    }

    pub fn driver(&self, driver: &str, constructor: Option<&str>) -> DriverFeatures {
        let history = self.drivers.get(driver);

        let constructor = constructor
            .map(str::to_string)
            .or_else(|| history.and_then(|h| h.latest()).map(|o| o.constructor.clone()))
            .unwrap_or_default();

        let driver_points_roll = history
            .and_then(|h| mean(h.trailing(POINTS_WINDOW).map(|o| o.points)))
            .unwrap_or(0.0);
        let constructor_points_roll = self
            .constructors
            .get(&constructor)
            .and_then(|h| mean(h.trailing(POINTS_WINDOW).copied()))
            .unwrap_or(0.0);

        let quali: Vec<Option<f64>> = history
            .map(|h| h.values().map(|o| o.quali).collect())
            .unwrap_or_default();
        let q_proxy = last_defined(&quali, mean).unwrap_or(FALLBACK_Q_PROXY);
        let q_stdev = last_defined(&quali, sample_std).unwrap_or(FALLBACK_Q_STDEV);

        let dnf_rate = history
            .and_then(|h| mean(h.values().map(|o| if o.dnf { 1.0 } else { 0.0 })))
            .unwrap_or(FALLBACK_DNF_RATE);

        DriverFeatures {
            driver: driver.to_string(),
            constructor,
            q_proxy,
            q_stdev,
            driver_points_roll,
            constructor_points_roll,
            dnf_rate,
        }
    }

    /// Numeric model inputs for a historical row, with rolling averages over the events
    /// before it. Missing values become 0.
    pub fn training_row(&self, record: &RaceRecord) -> [f64; NUMERIC_FEATURES] {
        let grid = record.grid.map_or(0.0, f64::from);
        let quali = record.quali_position.unwrap_or(0.0);
        let driver_roll = self
            .drivers
            .get(&record.driver)
            .and_then(|h| mean(h.trailing_before(&record.event, POINTS_WINDOW).map(|o| o.points)))
            .unwrap_or(0.0);
        let constructor_roll = self
            .constructors
            .get(&record.constructor)
            .and_then(|h| {
                mean(
                    h.trailing_before(&record.event.round_key(), POINTS_WINDOW)
                        .copied(),
                )
            })
            .unwrap_or(0.0);
        [grid, quali, driver_roll, constructor_roll]
    }
}

/// A statistic over rolling windows of up to `QUALI_WINDOW` outings, read at the latest
/// window where it is defined. Outings without a qualifying result count toward the window
/// length but not the sample.
fn last_defined<F>(series: &[Option<f64>], stat: F) -> Option<f64>
where
    F: Fn(Vec<f64>) -> Option<f64>,
{
    (1..=series.len()).rev().find_map(|end| {
        let start = end.saturating_sub(QUALI_WINDOW);
        stat(series[start..end].iter().flatten().copied().collect())
    })
}
