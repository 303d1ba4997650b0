use crate::championship::{Event, Standing};
use crate::database::SessionTables;
use crate::error::SimulationError;
use crate::history::SessionKind;
use crate::race::RaceSession;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_MAX_DRIVERS: usize = 30;
pub const DEFAULT_MAX_EVENTS: usize = 48;

/// Upper bounds on a championship request. The simulation allocates one row per
/// (simulation, event, driver) up front, so both axes are capped.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_drivers: usize,
    pub max_events: usize,
}

impl Default for RequestLimits {
    fn default() -> RequestLimits {
        RequestLimits {
            max_drivers: DEFAULT_MAX_DRIVERS,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

/// Body of a championship simulation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    pub current_standings: Vec<StandingInput>,
    pub remaining_races: Vec<RaceInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StandingInput {
    pub driver: DriverRef,
    pub points: Numeric,
    pub constructor: ConstructorRef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverRef {
    pub driver_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructorRef {
    pub constructor_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaceInput {
    #[serde(default)]
    pub round: Option<Numeric>,
    /// Only its presence matters: a non-null value adds a sprint to the round.
    #[serde(default, rename = "Sprint")]
    pub sprint: Option<Value>,
}

/// Standings feeds send numbers as either JSON numbers or numeric strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn value(&self, field: &str) -> Result<f64, SimulationError> {
        let value = match self {
            Numeric::Number(n) => *n,
            Numeric::Text(s) => s.trim().parse().map_err(|_| {
                SimulationError::Malformed(format!("{} {:?} is not a number", field, s))
            })?,
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(SimulationError::Malformed(format!("{} must be finite", field)))
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn round(&self) -> Result<u32, SimulationError> {
        let value = self.value("round")?;
        if value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
            return Err(SimulationError::Malformed(format!(
                "round {} is not a round number",
                value
            )));
        }
        Ok(value as u32)
    }
}

impl SimulateRequest {
    /// Validates the request and flattens it into standings and the events still to run.
    pub fn into_parts(
        self,
        limits: &RequestLimits,
    ) -> Result<(Vec<Standing>, Vec<Event>), SimulationError> {
        if self.current_standings.is_empty() {
            return Err(SimulationError::EmptyStandings);
        }
        if self.current_standings.len() > limits.max_drivers {
            return Err(SimulationError::TooLarge(format!(
                "{} drivers in the standings, at most {} allowed",
                self.current_standings.len(),
                limits.max_drivers
            )));
        }

        let mut seen = FxHashSet::default();
        let mut standings = Vec::with_capacity(self.current_standings.len());
        for input in self.current_standings {
            if !seen.insert(input.driver.driver_id.clone()) {
                return Err(SimulationError::DuplicateDriver(input.driver.driver_id));
            }
            standings.push(Standing {
                points: input.points.value("points")?,
                driver: input.driver.driver_id,
                constructor: input.constructor.constructor_id,
            });
        }

        let mut events = Vec::with_capacity(self.remaining_races.len() * 2);
        for race in &self.remaining_races {
            let round = match &race.round {
                Some(round) => round.round()?,
                None => {
                    debug!("skipping remaining race without a round");
                    continue;
                }
            };
            events.push(Event {
                round,
                kind: SessionKind::Race,
            });
            if race.sprint.is_some() {
                events.push(Event {
                    round,
                    kind: SessionKind::Sprint,
                });
            }
        }
        if events.len() > limits.max_events {
            return Err(SimulationError::TooLarge(format!(
                "{} remaining events, at most {} allowed",
                events.len(),
                limits.max_events
            )));
        }
        Ok((standings, events))
    }
}

/// Body of a race simulation request: a full session, or a recorded one to replay.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RaceRequest {
    Session(RaceSession),
    Recorded {
        #[serde(alias = "sessionKey")]
        session_key: u32,
    },
    Circuit {
        #[serde(alias = "circuitName")]
        circuit_name: String,
        year: u16,
    },
}

impl RaceRequest {
    pub fn resolve(self, tables: &SessionTables) -> Result<RaceSession, SimulationError> {
        let key = match self {
            RaceRequest::Session(session) => return Ok(session),
            RaceRequest::Recorded { session_key } => session_key,
            RaceRequest::Circuit { circuit_name, year } => tables
                .find_race(&circuit_name, year)
                .ok_or_else(|| {
                    SimulationError::SessionNotFound(format!("{} {}", circuit_name, year))
                })?,
        };
        tables
            .race_session(key)
            .ok_or_else(|| SimulationError::SessionNotFound(format!("session {}", key)))
    }
}

/// One row of a lap duration prediction batch.
#[derive(Debug, Clone, Deserialize)]
pub struct LapRow {
    pub circuit_short_name: String,
    pub compound: String,
    pub current_tyre_age: u32,
}

#[cfg(test)]
mod tests {
    use super::{RaceRequest, RequestLimits, SimulateRequest};
    use crate::championship::Event;
    use crate::database::tests::recorded_tables as tables;
    use crate::error::SimulationError;
    use crate::history::SessionKind::{Race, Sprint};
    use assert_approx_eq::assert_approx_eq;
    use serde_json::{json, Value};

    fn parse(value: Value) -> SimulateRequest {
        serde_json::from_value(value).unwrap()
    }

    fn standing(driver: &str, points: Value) -> Value {
        json!({
            "driver": {"driverId": driver},
            "points": points,
            "constructor": {"constructorId": "mclaren"}
        })
    }

    fn parts(request: SimulateRequest) -> Result<(usize, usize), SimulationError> {
        request
            .into_parts(&RequestLimits::default())
            .map(|(standings, events)| (standings.len(), events.len()))
    }

    #[test]
    fn test_into_parts() {
        let request = parse(json!({
            "currentStandings": [
                standing("max_verstappen", json!("331")),
                standing("norris", json!(279.5))
            ],
            "remainingRaces": [
                {"round": "21", "Sprint": {"date": "2024-11-02"}},
                {"round": 22},
                {"raceName": "TBC"},
                {"round": 23, "Sprint": null}
            ]
        }));
        let (standings, events) = request.into_parts(&RequestLimits::default()).unwrap();

        assert_eq!(standings[0].driver, "max_verstappen");
        assert_eq!(standings[0].constructor, "mclaren");
        assert_approx_eq!(standings[0].points, 331.0);
        assert_approx_eq!(standings[1].points, 279.5);

        let events: Vec<(u32, _)> = events
            .iter()
            .map(|Event { round, kind }| (*round, *kind))
            .collect();
        assert_eq!(events, vec![(21, Race), (21, Sprint), (22, Race), (23, Race)]);
    }

    #[test]
    fn test_rejects_bad_input() {
        let duplicated = parse(json!({
            "currentStandings": [standing("a", json!(1)), standing("a", json!(2))],
            "remainingRaces": [{"round": 1}]
        }));
        assert!(matches!(
            parts(duplicated),
            Err(SimulationError::DuplicateDriver(driver)) if driver == "a"
        ));

        let empty = parse(json!({"currentStandings": [], "remainingRaces": [{"round": 1}]}));
        assert!(matches!(parts(empty), Err(SimulationError::EmptyStandings)));

        let points = parse(json!({
            "currentStandings": [standing("a", json!("lots"))],
            "remainingRaces": []
        }));
        assert!(matches!(parts(points), Err(SimulationError::Malformed(_))));

        let round = parse(json!({
            "currentStandings": [standing("a", json!(0))],
            "remainingRaces": [{"round": 2.5}]
        }));
        assert!(matches!(parts(round), Err(SimulationError::Malformed(_))));
    }

    #[test]
    fn test_limits() {
        let limits = RequestLimits {
            max_drivers: 2,
            max_events: 3,
        };

        let crowded = parse(json!({
            "currentStandings": [
                standing("a", json!(3)),
                standing("b", json!(2)),
                standing("c", json!(1))
            ],
            "remainingRaces": [{"round": 1}]
        }));
        assert!(matches!(
            crowded.into_parts(&limits),
            Err(SimulationError::TooLarge(_))
        ));

        // sprints count against the event limit
        let long_season = parse(json!({
            "currentStandings": [standing("a", json!(3))],
            "remainingRaces": [{"round": 1, "Sprint": {}}, {"round": 2, "Sprint": {}}]
        }));
        assert!(matches!(
            long_season.into_parts(&limits),
            Err(SimulationError::TooLarge(_))
        ));

        let races: Vec<Value> = (1..=5_000).map(|round| json!({"round": round})).collect();
        let huge = parse(json!({
            "currentStandings": [standing("a", json!(3))],
            "remainingRaces": races
        }));
        assert!(matches!(parts(huge), Err(SimulationError::TooLarge(_))));

        let fits = parse(json!({
            "currentStandings": [standing("a", json!(3)), standing("b", json!(2))],
            "remainingRaces": [{"round": 1, "Sprint": {}}, {"round": 2}]
        }));
        assert_eq!(
            fits.into_parts(&limits)
                .map(|(s, e)| (s.len(), e.len()))
                .unwrap(),
            (2, 3)
        );
    }

    #[test]
    fn test_missing_fields_fail_to_parse() {
        let result = serde_json::from_value::<SimulateRequest>(json!({
            "currentStandings": [{"driver": {"driverId": "a"}, "points": 3}],
            "remainingRaces": []
        }));
        assert!(result.is_err());
    }

    fn race(value: Value) -> RaceRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_race_request_forms() {
        let tables = tables();

        let by_circuit = race(json!({"circuit_name": "Sakhir", "year": 2024}));
        let session = by_circuit.resolve(&tables).unwrap();
        assert_eq!(session.circuit, "Sakhir");
        assert_eq!(session.total_laps, 57);
        assert_eq!(session.entries[0].driver, "1");

        let by_key = race(json!({"session_key": 9158}));
        assert_eq!(by_key.resolve(&tables).unwrap().entries.len(), 1);

        let inline = race(json!({
            "circuit": "Jeddah",
            "totalLaps": 3,
            "entries": [
                {"driver": "VER", "gridPosition": 1,
                 "stints": [{"compound": "SOFT", "lapStart": 1, "lapEnd": 3}]}
            ]
        }));
        assert_eq!(inline.resolve(&tables).unwrap().circuit, "Jeddah");

        let missing = race(json!({"circuit_name": "Sakhir", "year": 2019}));
        assert!(matches!(
            missing.resolve(&tables),
            Err(SimulationError::SessionNotFound(_))
        ));
        assert!(matches!(
            race(json!({"session_key": 1})).resolve(&tables),
            Err(SimulationError::SessionNotFound(_))
        ));

        assert!(serde_json::from_value::<RaceRequest>(json!({"circuit_name": "Sakhir"})).is_err());
    }
}
