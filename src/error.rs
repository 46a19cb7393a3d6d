//! Crate-wide error type.
//!
//! Only run-fatal conditions are represented here. The failure of an
//! individual simulation trial is not an error: it is recorded on its
//! [crate::jobs::JobOutcome] and the batch continues with partial scores.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    /// The run configuration is absent, unparsable, or invalid.
    /// The run must not start.
    #[error("configuration error: {0}")]
    Config(String),

    /// A member of the previous generation is missing a component that the
    /// active configuration expects. Indicates corrupted lineage.
    #[error("generation {generation_id} member {member_id} is missing component {component:?}")]
    MissingComponent {
        component: String,
        member_id: usize,
        generation_id: i64,
    },

    /// Failed to persist a member or neural weight file. Fatal, because
    /// trial dispatch depends on the artifact existing on disk.
    #[error("failed to write artifact {path:?}: {source}")]
    Artifact {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The trial execution engine is unusable or the batch barrier broke.
    #[error("trial dispatch failed: {0}")]
    Dispatch(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
