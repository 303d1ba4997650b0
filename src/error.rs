use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while validating or running a simulation request.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("no remaining events")]
    NoRemainingEvents,

    #[error("current standings are empty")]
    EmptyStandings,

    #[error("driver {0} appears more than once in the current standings")]
    DuplicateDriver(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request too large: {0}")]
    TooLarge(String),

    #[error("no recorded race session for {0}")]
    SessionNotFound(String),

    #[error("simulation count must be at least 1")]
    NoSimulations,

    #[error("unknown {kind} id {id:?}: not seen when the encoders were fitted")]
    UnknownCategory { kind: &'static str, id: String },

    #[error("{0} is not loaded")]
    ModelNotLoaded(&'static str),

    #[error("race session has no laps")]
    NoLaps,

    #[error("race session has no entries")]
    NoEntries,
}

/// Errors raised while loading model artifacts. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("inconsistent artifacts: {0}")]
    Inconsistent(String),
}
