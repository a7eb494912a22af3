use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("invalid sample id: {0:?}")]
    InvalidSampleId(String),

    #[error("batch size must be at least 1, got {0}")]
    InvalidBatchSize(usize),

    #[error("context not found: {0}")]
    UnknownContext(String),

    #[error("the following columns were not observed: {}", .0.join(", "))]
    #[diagnostic(help("restrict_to may only name categories stored for at least one sample"))]
    MissingColumns(Vec<String>),

    #[error("invalid filter expression {0:?}, expected COLUMN=VALUE or COLUMN~PATTERN")]
    InvalidFilter(String),

    #[error("a metadata search requires at least one restriction column")]
    MissingRestriction,

    #[error("no metadata category is common to all {samples} samples")]
    EmptyIntersection { samples: usize },

    #[error("context {0} has no observation index")]
    MissingObservationIndex(String),

    #[error("observation index for context {context} is invalid: {message}")]
    ObservationIndex { context: String, message: String },

    #[error("sample {sample} in context {context} references unknown observation id {observation}")]
    UnknownObservation {
        context: String,
        sample: String,
        observation: u64,
    },

    #[error("malformed payload for sample {sample} in context {context}: {message}")]
    MalformedPayload {
        context: String,
        sample: String,
        message: String,
    },

    #[error("malformed category set for sample {sample}: {message}")]
    MalformedCategorySet { sample: String, message: String },

    #[error("malformed tag list for sample {sample} in context {context}: {message}")]
    MalformedTagList {
        context: String,
        sample: String,
        message: String,
    },

    #[error("store request failed: {0}")]
    StoreHttp(String),

    #[error("store returned status {status}: {message}")]
    StoreStatus { status: u16, message: String },

    #[error("unexpected store reply to {verb}: {message}")]
    StoreResponse { verb: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid store hostname: {0}")]
    InvalidHostname(String),

    #[error("io error: {0}")]
    Io(String),
}
