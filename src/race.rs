use crate::error::SimulationError;
use crate::history::SessionKind;
use crate::model::{DegradationModel, LapQuery};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::{debug, instrument, trace};

pub const RACE_POINTS: [f64; 10] = [25.0, 18.0, 15.0, 12.0, 10.0, 8.0, 6.0, 4.0, 2.0, 1.0];
pub const SPRINT_POINTS: [f64; 8] = [8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0];

#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceSession {
    pub circuit: String,
    pub total_laps: u32,
    #[serde(default)]
    pub kind: SessionKind,
    pub entries: Vec<RaceEntry>,
}

impl fmt::Debug for RaceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaceSession")
            .field("circuit", &self.circuit)
            .field("total_laps", &self.total_laps)
            .field("kind", &self.kind)
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceEntry {
    pub driver: String,
    pub grid_position: u32,
    pub stints: Vec<Stint>,
}

/// Laps `lap_start..=lap_end` on one tyre set.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stint {
    pub compound: String,
    pub lap_start: u32,
    pub lap_end: u32,
    #[serde(default)]
    pub tyre_age_at_start: u32,
}

impl Stint {
    fn covers(&self, lap: u32) -> bool {
        self.lap_start <= lap && lap <= self.lap_end
    }

    fn tyre_age(&self, lap: u32) -> u32 {
        (lap - self.lap_start).saturating_add(self.tyre_age_at_start)
    }
}

/// Heuristic driver-skill terms added to every predicted lap.
#[derive(Debug, Clone, Copy)]
pub struct RaceParams {
    /// Seconds per lap per grid slot.
    pub skill_factor: f64,
    /// Half-width of the uniform per-lap noise, in seconds.
    pub noise: f64,
    /// Classify by laps completed before accumulated time. Off by default: drivers are
    /// ranked on accumulated time alone.
    pub rank_by_laps: bool,
}

impl Default for RaceParams {
    fn default() -> RaceParams {
        RaceParams {
            skill_factor: 0.01,
            noise: 0.15,
            rank_by_laps: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classified {
    pub position: u32,
    pub driver: String,
    pub laps: u32,
    pub total_time: f64,
    pub points: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    total_time: f64,
    laps: u32,
}

impl RaceSession {
    #[instrument(
        name = "RaceSession::simulate",
        skip(self, model, params, rng),
        fields(circuit = %self.circuit, laps = self.total_laps, kind = %self.kind)
    )]
    pub fn simulate<R: Rng>(
        &self,
        model: Option<&DegradationModel>,
        params: &RaceParams,
        rng: &mut R,
    ) -> Result<Vec<Classified>, SimulationError> {
        let model = model.ok_or(SimulationError::ModelNotLoaded("degradation model"))?;
        if self.entries.is_empty() {
            return Err(SimulationError::NoEntries);
        }
        if self.total_laps == 0 {
            return Err(SimulationError::NoLaps);
        }

        let spread = params.noise.abs();
        let mut progress = vec![Progress::default(); self.entries.len()];
        let mut active = Vec::with_capacity(self.entries.len());
        let mut queries = Vec::with_capacity(self.entries.len());

        for lap in 1..=self.total_laps {
            active.clear();
            queries.clear();
            for (i, entry) in self.entries.iter().enumerate() {
                if let Some(stint) = entry.stints.iter().find(|s| s.covers(lap)) {
                    active.push(i);
                    queries.push(LapQuery {
                        circuit: &self.circuit,
                        compound: &stint.compound,
                        tyre_age: stint.tyre_age(lap),
                    });
                }
            }
            if active.is_empty() {
                continue;
            }

            let predicted = model.predict(&queries);
            for ((&i, query), lap_time) in active.iter().zip(&queries).zip(predicted) {
                let entry = &self.entries[i];
                let skill = f64::from(entry.grid_position) * params.skill_factor;
                let noise = rng.gen_range(-spread..=spread);
                let contribution = (lap_time + skill + noise).max(0.0);
                trace!(
                    lap,
                    driver = %entry.driver,
                    compound = query.compound,
                    tyre_age = query.tyre_age,
                    %lap_time,
                    %skill,
                    %noise,
                );
                progress[i].total_time += contribution;
                progress[i].laps += 1;
            }
        }

        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by(|&a, &b| {
            let laps = if params.rank_by_laps {
                progress[b].laps.cmp(&progress[a].laps)
            } else {
                Ordering::Equal
            };
            laps.then_with(|| progress[a].total_time.total_cmp(&progress[b].total_time))
        });

        let table: &[f64] = match self.kind {
            SessionKind::Race => &RACE_POINTS,
            SessionKind::Sprint => &SPRINT_POINTS,
        };
        let classification: Vec<Classified> = order
            .into_iter()
            .enumerate()
            .map(|(rank, i)| Classified {
                position: u32::try_from(rank + 1).unwrap_or(u32::MAX),
                driver: self.entries[i].driver.clone(),
                laps: progress[i].laps,
                total_time: progress[i].total_time,
                points: table.get(rank).copied().unwrap_or(0.0),
            })
            .collect();
        debug!(winner = ?classification.first().map(|c| &c.driver), "race complete");
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::{RaceEntry, RaceParams, RaceSession, Stint, RACE_POINTS};
    use crate::error::SimulationError;
    use crate::history::SessionKind;
    use crate::model::tests::tyre_model;
    use crate::util::rng;
    use assert_approx_eq::assert_approx_eq;

    fn stint(compound: &str, lap_start: u32, lap_end: u32, tyre_age_at_start: u32) -> Stint {
        Stint {
            compound: compound.to_string(),
            lap_start,
            lap_end,
            tyre_age_at_start,
        }
    }

    fn entry(driver: &str, grid_position: u32, stints: Vec<Stint>) -> RaceEntry {
        RaceEntry {
            driver: driver.to_string(),
            grid_position,
            stints,
        }
    }

    #[test]
    fn test_single_stint() {
        let session = RaceSession {
            circuit: "Sakhir".to_string(),
            total_laps: 10,
            kind: SessionKind::Race,
            entries: vec![entry("VER", 1, vec![stint("SOFT", 1, 10, 0)])],
        };
        let model = tyre_model();
        let result = session
            .simulate(Some(&model), &RaceParams::default(), &mut rng(Some(7)))
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].laps, 10);
        assert!(result[0].total_time >= 0.0);
        // 90 + 0.1 * age over ages 0..=9, plus 0.01 per lap, within the noise band
        let expected = 900.0 + 4.5 + 0.1;
        assert!((result[0].total_time - expected).abs() <= 1.5 + 1e-9);
        assert_approx_eq!(result[0].points, 25.0);
    }

    #[test]
    fn test_tyre_age_and_grid_offset() {
        let session = RaceSession {
            circuit: "Sakhir".to_string(),
            total_laps: 2,
            kind: SessionKind::Race,
            entries: vec![
                entry("HAM", 20, vec![stint("SOFT", 1, 2, 0)]),
                entry("LEC", 1, vec![stint("SOFT", 1, 2, 10)]),
            ],
        };
        let params = RaceParams {
            noise: 0.0,
            ..RaceParams::default()
        };
        let result = session
            .simulate(Some(&tyre_model()), &params, &mut rng(Some(1)))
            .unwrap();

        // HAM: 90 + 90.1 + 2 * 0.2; LEC: 91 + 91.1 + 2 * 0.01
        assert_eq!(result[0].driver, "HAM");
        assert_approx_eq!(result[0].total_time, 180.5);
        assert_eq!(result[1].driver, "LEC");
        assert_approx_eq!(result[1].total_time, 182.12);
    }

    #[test]
    fn test_points_by_accumulated_time() {
        let mut entries: Vec<RaceEntry> = (1..=12)
            .map(|grid| entry(&format!("D{}", grid), grid, vec![stint("HARD", 1, 5, 0)]))
            .collect();
        // retires after two laps, with the least accumulated time
        entries.push(entry("SHORT", 1, vec![stint("HARD", 1, 2, 0)]));
        let session = RaceSession {
            circuit: "Sakhir".to_string(),
            total_laps: 5,
            kind: SessionKind::Race,
            entries,
        };
        let params = RaceParams {
            noise: 0.0,
            ..RaceParams::default()
        };
        let result = session
            .simulate(Some(&tyre_model()), &params, &mut rng(Some(3)))
            .unwrap();

        let drivers: Vec<&str> = result.iter().map(|c| c.driver.as_str()).collect();
        assert_eq!(&drivers[..4], &["SHORT", "D1", "D2", "D3"]);
        assert_eq!(result[0].laps, 2);
        assert_approx_eq!(result[0].total_time, 182.12);
        for (classified, points) in result.iter().zip(RACE_POINTS.iter()) {
            assert_approx_eq!(classified.points, *points);
        }
        assert_eq!(result[10].position, 11);
        assert_approx_eq!(result[10].points, 0.0);
    }

    #[test]
    fn test_rank_by_laps() {
        let session = RaceSession {
            circuit: "Sakhir".to_string(),
            total_laps: 5,
            kind: SessionKind::Race,
            entries: vec![
                entry("FULL", 1, vec![stint("HARD", 1, 5, 0)]),
                entry("SHORT", 1, vec![stint("HARD", 1, 2, 0)]),
            ],
        };
        let params = RaceParams {
            noise: 0.0,
            rank_by_laps: true,
            ..RaceParams::default()
        };
        let result = session
            .simulate(Some(&tyre_model()), &params, &mut rng(Some(3)))
            .unwrap();
        assert_eq!(result[0].driver, "FULL");
        assert_eq!(result[0].laps, 5);
        assert_eq!(result[1].driver, "SHORT");
        assert_approx_eq!(result[1].points, 18.0);
    }

    #[test]
    fn test_tyre_age_saturates() {
        let worn = stint("HARD", 3, 10, u32::MAX - 1);
        assert_eq!(worn.tyre_age(3), u32::MAX - 1);
        assert_eq!(worn.tyre_age(10), u32::MAX);

        let session = RaceSession {
            circuit: "Sakhir".to_string(),
            total_laps: 10,
            kind: SessionKind::Race,
            entries: vec![entry("VER", 1, vec![worn])],
        };
        let result = session
            .simulate(Some(&tyre_model()), &RaceParams::default(), &mut rng(Some(2)))
            .unwrap();
        assert_eq!(result[0].laps, 8);
        assert!(result[0].total_time.is_finite());
    }

    #[test]
    fn test_sprint_points() {
        let session = RaceSession {
            circuit: "Sakhir".to_string(),
            total_laps: 3,
            kind: SessionKind::Sprint,
            entries: vec![
                entry("NOR", 1, vec![stint("MEDIUM", 1, 3, 0)]),
                entry("PIA", 2, vec![stint("MEDIUM", 1, 3, 0)]),
            ],
        };
        let params = RaceParams {
            skill_factor: 1.0,
            noise: 0.0,
            ..RaceParams::default()
        };
        let result = session
            .simulate(Some(&tyre_model()), &params, &mut rng(None))
            .unwrap();
        assert_approx_eq!(result[0].points, 8.0);
        assert_approx_eq!(result[1].points, 7.0);
    }

    #[test]
    fn test_requires_model_and_laps() {
        let session = RaceSession {
            circuit: "Sakhir".to_string(),
            total_laps: 0,
            kind: SessionKind::Race,
            entries: vec![entry("VER", 1, vec![stint("SOFT", 1, 10, 0)])],
        };
        let params = RaceParams::default();
        assert!(matches!(
            session.simulate(None, &params, &mut rng(Some(1))),
            Err(SimulationError::ModelNotLoaded(_))
        ));
        assert!(matches!(
            session.simulate(Some(&tyre_model()), &params, &mut rng(Some(1))),
            Err(SimulationError::NoLaps)
        ));
    }

    #[test]
    fn test_seeded_races_repeat() {
        let session = RaceSession {
            circuit: "Sakhir".to_string(),
            total_laps: 20,
            kind: SessionKind::Race,
            entries: vec![
                entry("ALO", 5, vec![stint("SOFT", 1, 10, 0), stint("HARD", 11, 20, 0)]),
                entry("STR", 4, vec![stint("HARD", 1, 20, 0)]),
            ],
        };
        let model = tyre_model();
        let params = RaceParams::default();
        let first = session.simulate(Some(&model), &params, &mut rng(Some(42))).unwrap();
        let second = session.simulate(Some(&model), &params, &mut rng(Some(42))).unwrap();
        assert_eq!(first, second);
    }
}
