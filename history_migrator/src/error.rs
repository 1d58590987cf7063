//! Error taxonomy for pipeline history migration.
//!
//! Only [`MigrationError`] aborts a run. Everything else is scoped to one
//! group or one record and ends up in the run summary.

use thiserror::Error;

/// Failure talking to the legacy or target store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("pipeline build {0} already exists")]
    Conflict(i64),
}

/// The raw snapshot is not usable at all.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("snapshot is not a JSON object")]
    NotAnObject,
    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
    #[error("cannot decode build fields: {0}")]
    Skeleton(#[source] serde_json::Error),
}

/// The stage/job payload does not line up with the build it belongs to.
#[derive(Debug, Error)]
pub enum ReconstructionError {
    #[error("stage to update not found: {stage_id}")]
    StageNotFound { stage_id: i64 },
    #[error("stage entry #{index}: {reason}")]
    InvalidStageEntry { index: usize, reason: String },
    #[error("stage {stage_id}, job entry #{index}: {reason}")]
    InvalidJobEntry {
        stage_id: i64,
        index: usize,
        reason: String,
    },
}

#[derive(Debug, Error)]
#[error("cannot decode parameters of {context}: {source}")]
pub struct ParameterDecodeError {
    pub context: String,
    #[source]
    pub source: serde_json::Error,
}

/// Why a single record was not migrated. Never crosses the record boundary.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),
    #[error(transparent)]
    ParameterDecode(#[from] ParameterDecodeError),
    #[error("cannot encode build: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("cannot write build: {0}")]
    Write(#[source] StoreError),
    #[error(transparent)]
    Store(StoreError),
}

impl RecordError {
    /// Short label used for metrics and the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Reconstruction(_) => "reconstruction",
            Self::ParameterDecode(_) => "parameter_decode",
            Self::Encode(_) => "encode",
            Self::Write(_) => "write",
            Self::Store(_) => "store",
        }
    }
}

/// Run-fatal failure.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("cannot list pipeline history groups: {0}")]
    GroupQuery(#[source] StoreError),
}
