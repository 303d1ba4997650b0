use crate::history::{EventKey, SessionKind};
use crate::race::{RaceEntry, RaceSession, Stint};
use crate::read_dir::{read_dir, Entries};
use crate::stats::sample_std;
use anyhow::{Context, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use rustc_hash::{FxHashMap, FxHasher};
use serde::{de::IgnoredAny, Deserialize, Serialize};
use serde_json::Deserializer;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

const DATABASE_VERSION: u64 = 2;

/// Read-only export of the results/telemetry store.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Database {
    /// Points-scoring results, ordered by event then driver.
    pub records: Vec<RaceRecord>,
    pub tables: SessionTables,
}

/// Recorded sessions with their tyre stints and starting grids, keyed by session key.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct SessionTables {
    pub sessions: FxHashMap<u32, Session>,
    pub stints: FxHashMap<u32, Vec<StintRow>>,
    pub grid: FxHashMap<u32, Vec<GridRow>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RaceRecord {
    pub event: EventKey,
    pub driver: String,
    pub constructor: String,
    pub grid: Option<u32>,
    pub position: Option<u32>,
    pub points: f64,
    pub dnf: bool,
    /// Qualifying position for the session, or the grid slot when no qualifying row exists.
    pub quali_position: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultRow {
    race_year: u16,
    race_round: u8,
    session_type: String,
    driver_id: String,
    constructor_id: String,
    grid: Option<u32>,
    position: Option<u32>,
    #[serde(default)]
    points: f64,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QualifyingRow {
    race_year: u16,
    race_round: u8,
    session_type: String,
    driver_id: String,
    position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_key: u32,
    pub circuit_short_name: String,
    pub session_type: String,
    pub year: u16,
    pub total_laps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StintRow {
    pub session_key: u32,
    pub driver_number: u32,
    pub stint_number: u32,
    pub compound: String,
    pub lap_start: u32,
    pub lap_end: u32,
    #[serde(default)]
    pub tyre_age_at_start: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRow {
    pub session_key: u32,
    pub driver_number: u32,
    pub position: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "table")]
#[serde(rename_all = "camelCase")]
enum InputLine {
    Results { data: Vec<ResultRow> },
    Qualifying { data: Vec<QualifyingRow> },
    Sessions { data: Vec<Session> },
    Stints { data: Vec<StintRow> },
    Grid { data: Vec<GridRow> },
    Weather(IgnoredAny),
    Drivers(IgnoredAny),
    Laps(IgnoredAny),
}

#[derive(Debug, Hash)]
struct CacheKey<'a> {
    version: u64,
    entries: &'a Entries,
}

fn result_session(session_type: &str) -> Option<SessionKind> {
    match session_type {
        "R" | "Race" => Some(SessionKind::Race),
        "S" | "Sprint" => Some(SessionKind::Sprint),
        _ => None,
    }
}

/// Qualifying feeds the grid of the session it precedes.
fn qualifying_session(session_type: &str) -> Option<SessionKind> {
    match session_type {
        "Q" | "Qualifying" => Some(SessionKind::Race),
        "SQ" | "Sprint Shootout" | "Sprint Qualifying" => Some(SessionKind::Sprint),
        _ => None,
    }
}

impl Database {
    #[instrument(name = "Database::load", skip(dir), fields(dir = %dir.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = read_dir(dir).with_context(|| format!("unable to list {}", dir.display()))?;
        if let Ok(cache) = Database::load_from_cache(&entries) {
            debug!(records = cache.records.len(), "loaded history from cache");
            return Ok(cache);
        }

        let database = Database::read(dir, &entries)?;
        if let Err(err) = database.save_to_cache(&entries) {
            debug!(%err, "unable to write history cache");
        }
        Ok(database)
    }

    /// Parses every export listed in `entries`, bypassing the cache.
    pub fn read(dir: &Path, entries: &Entries) -> Result<Self> {
        let mut database = Database::default();
        let mut results = Vec::new();
        let mut qualifying: FxHashMap<(EventKey, String), u32> = FxHashMap::default();

        for entry in entries {
            let path = dir.join(&entry.path);
            let reader = GzDecoder::new(
                File::open(&path).with_context(|| format!("unable to open {}", path.display()))?,
            );
            for line in Deserializer::from_reader(reader).into_iter::<InputLine>() {
                match line.with_context(|| format!("malformed record in {}", path.display()))? {
                    InputLine::Results { data } => results.extend(data),
                    InputLine::Qualifying { data } => {
                        for row in data {
                            let (session, position) =
                                match (qualifying_session(&row.session_type), row.position) {
                                    (Some(session), Some(position)) => (session, position),
                                    _ => continue,
                                };
                            let event = EventKey {
                                year: row.race_year,
                                round: row.race_round,
                                session,
                            };
                            qualifying.insert((event, row.driver_id), position);
                        }
                    }
                    InputLine::Sessions { data } => {
                        for session in data {
                            database.tables.sessions.insert(session.session_key, session);
                        }
                    }
                    InputLine::Stints { data } => {
                        for stint in data {
                            database
                                .tables
                                .stints
                                .entry(stint.session_key)
                                .or_default()
                                .push(stint);
                        }
                    }
                    InputLine::Grid { data } => {
                        for slot in data {
                            database.tables.grid.entry(slot.session_key).or_default().push(slot);
                        }
                    }
                    _ => {}
                };
            }
        }

        let mut skipped = 0_usize;
        for row in results {
            let session = match result_session(&row.session_type) {
                Some(session) => session,
                None => {
                    skipped += 1;
                    continue;
                }
            };
            let event = EventKey {
                year: row.race_year,
                round: row.race_round,
                session,
            };
            let quali_position = qualifying
                .get(&(event, row.driver_id.clone()))
                .copied()
                .or(row.grid)
                .map(f64::from);
            database.records.push(RaceRecord {
                event,
                dnf: row.status != "Finished",
                driver: row.driver_id,
                constructor: row.constructor_id,
                grid: row.grid,
                position: row.position,
                points: row.points,
                quali_position,
            });
        }
        if skipped > 0 {
            warn!(skipped, "ignored results with an unknown session type");
        }

        database
            .records
            .sort_by(|a, b| a.event.cmp(&b.event).then_with(|| a.driver.cmp(&b.driver)));
        for stints in database.tables.stints.values_mut() {
            stints.sort_by_key(|s| (s.driver_number, s.stint_number));
        }

        info!(
            records = database.records.len(),
            sessions = database.tables.sessions.len(),
            "parsed history exports"
        );
        Ok(database)
    }

    /// Standard deviation of every recorded points haul; scales the simulator's noise.
    pub fn points_stdev(&self) -> Option<f64> {
        sample_std(self.records.iter().map(|r| r.points))
    }

    fn load_from_cache(entries: &Entries) -> Result<Self> {
        let mut reader = GzDecoder::new(File::open(get_cache_path(entries)?)?);
        Ok(bincode::deserialize_from(&mut reader)?)
    }

    fn save_to_cache(&self, entries: &Entries) -> Result<()> {
        let cache_path = get_cache_path(entries)?;
        let mut writer = GzEncoder::new(Vec::new(), Compression::default());
        bincode::serialize_into(&mut writer, self)?;
        let data = writer.finish()?;
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(cache_path, data)?;
        Ok(())
    }
}

impl SessionTables {
    /// Key of the race held at `circuit` in `year`, matched on the circuit short name. The
    /// latest such session wins when a circuit hosted more than one.
    pub fn find_race(&self, circuit: &str, year: u16) -> Option<u32> {
        self.sessions
            .values()
            .filter(|s| {
                s.year == year
                    && s.session_type.eq_ignore_ascii_case("race")
                    && s.circuit_short_name.eq_ignore_ascii_case(circuit)
            })
            .map(|s| s.session_key)
            .max()
    }

    /// Rebuilds a recorded session as input for the lap simulator.
    pub fn race_session(&self, session_key: u32) -> Option<RaceSession> {
        let session = self.sessions.get(&session_key)?;
        let stints = self.stints.get(&session_key)?;

        let grid: FxHashMap<u32, u32> = self
            .grid
            .get(&session_key)
            .map(|slots| slots.iter().map(|s| (s.driver_number, s.position)).collect())
            .unwrap_or_default();

        let mut entries: Vec<RaceEntry> = Vec::new();
        for stint in stints {
            let driver = stint.driver_number.to_string();
            let index = match entries.iter().position(|e| e.driver == driver) {
                Some(index) => index,
                None => {
                    entries.push(RaceEntry {
                        driver,
                        grid_position: grid.get(&stint.driver_number).copied().unwrap_or(0),
                        stints: Vec::new(),
                    });
                    entries.len() - 1
                }
            };
            entries[index].stints.push(Stint {
                compound: stint.compound.clone(),
                lap_start: stint.lap_start,
                lap_end: stint.lap_end,
                tyre_age_at_start: stint.tyre_age_at_start,
            });
        }

        // drivers without a recorded grid slot start from the back
        let field = u32::try_from(entries.len()).unwrap_or(u32::MAX);
        for entry in &mut entries {
            if entry.grid_position == 0 {
                entry.grid_position = field;
            }
        }

        let total_laps = session
            .total_laps
            .or_else(|| stints.iter().map(|s| s.lap_end).max())?;
        let kind = if session.session_type.eq_ignore_ascii_case("sprint") {
            SessionKind::Sprint
        } else {
            SessionKind::Race
        };

        Some(RaceSession {
            circuit: session.circuit_short_name.clone(),
            total_laps,
            kind,
            entries,
        })
    }
}

fn get_cache_path(entries: &Entries) -> Result<PathBuf> {
    let mut hasher = FxHasher::default();
    let key = CacheKey {
        version: DATABASE_VERSION,
        entries,
    };
    key.hash(&mut hasher);
    Ok(dirs::cache_dir()
        .context("unable to find cache dir")?
        .join(env!("CARGO_PKG_NAME"))
        .join(format!("history-{:x}.bincode.gz", hasher.finish())))
}
