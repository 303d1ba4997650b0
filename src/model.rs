//! Inference for the trained regressors.
//!
//! The artifacts are exported from the training pipeline as JSON: a points regressor with
//! driver and constructor embeddings, its feature scaler, the label encoders for both
//! categorical inputs, and optionally the lap duration (tyre degradation) regressor.

use crate::error::{ArtifactError, SimulationError};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, instrument};

/// `[grid, quali_position, driver_points_roll_5, constructor_points_roll_5]`
pub const NUMERIC_FEATURES: usize = 4;

/// Rows per inference chunk.
const CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Linear,
}

/// Fully connected layer; `weights` is `inputs x outputs`.
#[derive(Debug, Clone, Deserialize)]
pub struct Dense {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub activation: Activation,
}

impl Dense {
    fn inputs(&self) -> usize {
        self.weights.len()
    }

    fn outputs(&self) -> usize {
        self.bias.len()
    }

    fn apply(&self, input: &[f64], output: &mut Vec<f64>) {
        debug_assert_eq!(input.len(), self.inputs());
        output.clear();
        output.extend_from_slice(&self.bias);
        for (x, row) in input.iter().zip(&self.weights) {
            for (o, w) in output.iter_mut().zip(row) {
                *o += x * w;
            }
        }
        if self.activation == Activation::Relu {
            for o in output.iter_mut() {
                *o = o.max(0.0);
            }
        }
    }
}

/// Stack of dense layers ending in a single output.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Mlp {
    layers: Vec<Dense>,
}

impl Mlp {
    #[cfg(test)]
    pub fn new(layers: Vec<Dense>) -> Mlp {
        Mlp { layers }
    }

    fn check(&self, inputs: usize, what: &str) -> Result<(), ArtifactError> {
        if self.layers.is_empty() {
            return Err(ArtifactError::Inconsistent(format!("{} has no layers", what)));
        }
        let mut width = inputs;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.inputs() != width {
                return Err(ArtifactError::Inconsistent(format!(
                    "{} layer {} expects {} inputs, got {}",
                    what,
                    i,
                    layer.inputs(),
                    width
                )));
            }
            if layer.weights.iter().any(|row| row.len() != layer.outputs()) {
                return Err(ArtifactError::Inconsistent(format!(
                    "{} layer {} has ragged weights",
                    what, i
                )));
            }
            width = layer.outputs();
        }
        if width != 1 {
            return Err(ArtifactError::Inconsistent(format!(
                "{} produces {} outputs, expected 1",
                what, width
            )));
        }
        Ok(())
    }

    /// Runs `input` through every layer. Both buffers are scratch space.
    fn forward(&self, input: &mut Vec<f64>, scratch: &mut Vec<f64>) -> f64 {
        for layer in &self.layers {
            layer.apply(input, scratch);
            std::mem::swap(input, scratch);
        }
        input[0]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    fn transform(&self, row: &[f64], out: &mut Vec<f64>) {
        for (x, (mean, scale)) in row.iter().zip(self.mean.iter().zip(&self.scale)) {
            // zero variance columns pass through centred only
            let scale = if *scale == 0.0 { 1.0 } else { *scale };
            out.push((x - mean) / scale);
        }
    }
}

/// Sorted class list; the code of an id is its index.
#[derive(Debug, Clone, Deserialize)]
pub struct LabelEncoder {
    pub classes: Vec<String>,
}

impl LabelEncoder {
    #[cfg(test)]
    pub fn new<I, S>(classes: I) -> LabelEncoder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut classes: Vec<String> = classes.into_iter().map(Into::into).collect();
        classes.sort();
        classes.dedup();
        LabelEncoder { classes }
    }

    pub fn encode(&self, id: &str) -> Option<u32> {
        self.classes
            .binary_search_by(|class| class.as_str().cmp(id))
            .ok()
            .and_then(|i| u32::try_from(i).ok())
    }

    fn check(&self, what: &str) -> Result<(), ArtifactError> {
        if self.classes.windows(2).all(|w| w[0] < w[1]) {
            Ok(())
        } else {
            Err(ArtifactError::Inconsistent(format!(
                "{} classes are not sorted and unique",
                what
            )))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointsModel {
    pub driver_embedding: Vec<Vec<f64>>,
    pub constructor_embedding: Vec<Vec<f64>>,
    pub layers: Mlp,
}

/// Flattened inference batch: one row per (simulation, event, driver).
#[derive(Debug, Default)]
pub struct FeatureBatch {
    pub numeric: Vec<[f64; NUMERIC_FEATURES]>,
    pub drivers: Vec<u32>,
    pub constructors: Vec<u32>,
}

impl FeatureBatch {
    pub fn with_capacity(rows: usize) -> FeatureBatch {
        FeatureBatch {
            numeric: Vec::with_capacity(rows),
            drivers: Vec::with_capacity(rows),
            constructors: Vec::with_capacity(rows),
        }
    }

    pub fn push(&mut self, numeric: [f64; NUMERIC_FEATURES], driver: u32, constructor: u32) {
        self.numeric.push(numeric);
        self.drivers.push(driver);
        self.constructors.push(constructor);
    }

    pub fn len(&self) -> usize {
        self.numeric.len()
    }
}

/// Points regressor together with its preprocessing.
#[derive(Debug)]
pub struct PointsRegressor {
    model: PointsModel,
    scaler: Scaler,
    drivers: LabelEncoder,
    constructors: LabelEncoder,
}

impl PointsRegressor {
    #[instrument(name = "PointsRegressor::load", skip(dir), fields(dir = %dir.display()))]
    pub fn load(dir: &Path) -> Result<PointsRegressor, ArtifactError> {
        let regressor = PointsRegressor::new(
            read_json(&dir.join("model.json"))?,
            read_json(&dir.join("scaler.json"))?,
            read_json(&dir.join("driver_encoder.json"))?,
            read_json(&dir.join("constructor_encoder.json"))?,
        )?;
        info!(
            drivers = regressor.drivers.classes.len(),
            constructors = regressor.constructors.classes.len(),
            "loaded points regressor"
        );
        Ok(regressor)
    }

    pub fn new(
        model: PointsModel,
        scaler: Scaler,
        drivers: LabelEncoder,
        constructors: LabelEncoder,
    ) -> Result<PointsRegressor, ArtifactError> {
        if scaler.mean.len() != NUMERIC_FEATURES || scaler.scale.len() != NUMERIC_FEATURES {
            return Err(ArtifactError::Inconsistent(format!(
                "scaler must cover {} features",
                NUMERIC_FEATURES
            )));
        }
        drivers.check("driver encoder")?;
        constructors.check("constructor encoder")?;
        let driver_dim = embedding_dim(&model.driver_embedding, drivers.classes.len(), "driver")?;
        let constructor_dim = embedding_dim(
            &model.constructor_embedding,
            constructors.classes.len(),
            "constructor",
        )?;
        model
            .layers
            .check(NUMERIC_FEATURES + driver_dim + constructor_dim, "points model")?;
        Ok(PointsRegressor {
            model,
            scaler,
            drivers,
            constructors,
        })
    }

    pub fn encode_driver(&self, id: &str) -> Result<u32, SimulationError> {
        self.drivers
            .encode(id)
            .ok_or_else(|| SimulationError::UnknownCategory {
                kind: "driver",
                id: id.to_string(),
            })
    }

    pub fn encode_constructor(&self, id: &str) -> Result<u32, SimulationError> {
        self.constructors
            .encode(id)
            .ok_or_else(|| SimulationError::UnknownCategory {
                kind: "constructor",
                id: id.to_string(),
            })
    }

    /// Predicts every row of `batch` in one pass. Output order matches row order.
    #[instrument(name = "PointsRegressor::predict", skip_all, fields(rows = batch.len()))]
    pub fn predict(&self, batch: &FeatureBatch) -> Vec<f64> {
        let mut out = vec![0.0; batch.len()];
        out.par_chunks_mut(CHUNK)
            .enumerate()
            .for_each(|(chunk, out)| {
                let start = chunk * CHUNK;
                let mut input = Vec::new();
                let mut scratch = Vec::new();
                for (offset, slot) in out.iter_mut().enumerate() {
                    let row = start + offset;
                    self.assemble(
                        &batch.numeric[row],
                        batch.drivers[row],
                        batch.constructors[row],
                        &mut input,
                    );
                    *slot = self.model.layers.forward(&mut input, &mut scratch);
                }
            });
        debug!("batch prediction complete");
        out
    }

    fn assemble(&self, numeric: &[f64], driver: u32, constructor: u32, input: &mut Vec<f64>) {
        input.clear();
        self.scaler.transform(numeric, input);
        input.extend_from_slice(&self.model.driver_embedding[driver as usize]);
        input.extend_from_slice(&self.model.constructor_embedding[constructor as usize]);
    }
}

fn embedding_dim(table: &[Vec<f64>], classes: usize, what: &str) -> Result<usize, ArtifactError> {
    if table.len() != classes {
        return Err(ArtifactError::Inconsistent(format!(
            "{} embedding has {} rows but the encoder knows {} classes",
            what,
            table.len(),
            classes
        )));
    }
    let dim = table.first().map_or(0, Vec::len);
    if table.iter().any(|row| row.len() != dim) {
        return Err(ArtifactError::Inconsistent(format!(
            "{} embedding rows differ in width",
            what
        )));
    }
    Ok(dim)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TyreAgeScaler {
    pub mean: f64,
    pub scale: f64,
}

/// Lap duration regressor over (circuit, compound, tyre age).
#[derive(Debug, Clone, Deserialize)]
pub struct DegradationModel {
    pub tyre_age: TyreAgeScaler,
    pub circuits: Vec<String>,
    pub compounds: Vec<String>,
    pub layers: Mlp,
}

#[derive(Debug, Clone, Copy)]
pub struct LapQuery<'a> {
    pub circuit: &'a str,
    pub compound: &'a str,
    pub tyre_age: u32,
}

impl DegradationModel {
    #[instrument(name = "DegradationModel::load", skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<DegradationModel, ArtifactError> {
        let model: DegradationModel = read_json(path)?;
        model.check()?;
        info!(
            circuits = model.circuits.len(),
            compounds = model.compounds.len(),
            "loaded degradation model"
        );
        Ok(model)
    }

    pub fn check(&self) -> Result<(), ArtifactError> {
        self.layers.check(
            1 + self.circuits.len() + self.compounds.len(),
            "degradation model",
        )
    }

    pub fn predict(&self, queries: &[LapQuery<'_>]) -> Vec<f64> {
        let mut input = Vec::new();
        let mut scratch = Vec::new();
        queries
            .iter()
            .map(|query| {
                self.assemble(query, &mut input);
                self.layers.forward(&mut input, &mut scratch)
            })
            .collect()
    }

    /// Unknown circuits or compounds encode as all zeros.
    fn assemble(&self, query: &LapQuery<'_>, input: &mut Vec<f64>) {
        input.clear();
        let scale = if self.tyre_age.scale == 0.0 {
            1.0
        } else {
            self.tyre_age.scale
        };
        input.push((f64::from(query.tyre_age) - self.tyre_age.mean) / scale);
        input.extend(
            self.circuits
                .iter()
                .map(|c| if c == query.circuit { 1.0 } else { 0.0 }),
        );
        input.extend(
            self.compounds
                .iter()
                .map(|c| if c == query.compound { 1.0 } else { 0.0 }),
        );
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let file = File::open(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
