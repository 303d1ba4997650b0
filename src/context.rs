use crate::database::{Database, SessionTables};
use crate::features::FeatureStore;
use crate::model::{DegradationModel, PointsRegressor};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, instrument, warn};

/// Everything a simulation reads: loaded once at startup, never mutated afterwards.
#[derive(Debug)]
pub struct SimulationContext {
    points: PointsRegressor,
    degradation: Option<DegradationModel>,
    features: FeatureStore,
    sessions: SessionTables,
    noise_factor: f64,
}

impl SimulationContext {
    /// Loads the artifacts in `artifacts` and derives features from `database`. The lap
    /// duration model is optional; the points regressor and its preprocessing are not.
    #[instrument(
        name = "SimulationContext::load",
        skip_all,
        fields(artifacts = %artifacts.display())
    )]
    pub fn load(artifacts: &Path, database: &Database) -> Result<Self> {
        let points = PointsRegressor::load(artifacts)?;
        let path = artifacts.join("degradation.json");
        let degradation = if path.exists() {
            Some(DegradationModel::load(&path)?)
        } else {
            warn!(path = %path.display(), "no degradation model; race simulation is unavailable");
            None
        };
        SimulationContext::new(points, degradation, database)
    }

    pub fn new(
        points: PointsRegressor,
        degradation: Option<DegradationModel>,
        database: &Database,
    ) -> Result<Self> {
        let noise_factor = database
            .points_stdev()
            .context("history holds fewer than two results, cannot derive the points noise")?;
        info!(
            %noise_factor,
            sessions = database.tables.sessions.len(),
            "points noise loaded"
        );
        Ok(SimulationContext {
            points,
            degradation,
            features: FeatureStore::new(database),
            sessions: database.tables.clone(),
            noise_factor,
        })
    }

    pub fn points(&self) -> &PointsRegressor {
        &self.points
    }

    pub fn degradation(&self) -> Option<&DegradationModel> {
        self.degradation.as_ref()
    }

    pub fn features(&self) -> &FeatureStore {
        &self.features
    }

    /// Recorded sessions the lap simulator can replay.
    pub fn sessions(&self) -> &SessionTables {
        &self.sessions
    }

    /// Standard deviation of historical points hauls.
    pub fn noise_factor(&self) -> f64 {
        self.noise_factor
    }
}

#[cfg(test)]
mod tests {
    use super::SimulationContext;
    use crate::database::tests::record;
    use crate::database::Database;
    use crate::history::SessionKind;
    use crate::model::tests::rolling_points_regressor;

    #[test]
    fn test_requires_history() {
        let database = Database {
            records: vec![record(1, SessionKind::Race, "a", "x", 25.0, None, false)],
            ..Database::default()
        };
        let result =
            SimulationContext::new(rolling_points_regressor(&["a"], &["x"]), None, &database);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_artifacts_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let error = SimulationContext::load(dir.path(), &Database::default()).unwrap_err();
        assert!(error.to_string().contains("model.json"));
    }
}
