//! Error kinds for every boundary of the core.
//!
//! Geometry and codec failures are values returned to the immediate caller;
//! none of them is fatal, and every one leaves committed state untouched.
//! A contradiction is not an error: it travels as a flag on
//! [`crate::refine::Elimination`].

use thiserror::Error;

use crate::question::QuestionKey;
use crate::stations::StationId;

/// Shape violation in a single question or coordinate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{0} is not a finite number")]
    NonFinite(&'static str),

    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("radius must be positive, got {0}")]
    NonPositiveRadius(f64),

    #[error("thermometer endpoints coincide")]
    CoincidentPoints,
}

/// Constraint store failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("no question with key {0}")]
    UnknownQuestion(QuestionKey),

    #[error("invalid question: {0}")]
    InvalidQuestion(#[from] ValidationError),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Geometry engine failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Base area geometry failed validation; the prior region stays committed.
    #[error("malformed base area: {0}")]
    MalformedBaseArea(String),

    #[error("question {key} is invalid: {source}")]
    InvalidQuestion {
        key: QuestionKey,
        source: ValidationError,
    },
}

/// Station search failures. `Clone` because every waiter of a coalesced
/// request receives its own copy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StationError {
    /// A station search was requested with zero filter criteria.
    #[error("at least one place type must be selected")]
    EmptyConstraintSelection,

    /// The external geodata service failed or timed out.
    #[error("geodata service unavailable: {0}")]
    GeodataUnavailable(String),

    #[error("malformed geodata response: {0}")]
    MalformedResponse(String),
}

/// Selection refiner failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefineError {
    #[error("station {0} is not part of the current station set")]
    UnknownStation(StationId),
}

/// Snapshot decoding failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("invalid hiding zone: {0}")]
    InvalidSnapshot(String),
}

impl SnapshotError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidSnapshot(reason.into())
    }
}

/// Any failure surfaced by a [`crate::session::Session`] operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Station(#[from] StationError),

    #[error(transparent)]
    Refine(#[from] RefineError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The session task has shut down.
    #[error("session closed")]
    Closed,
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
