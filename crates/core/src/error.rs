//! Pipeline error taxonomy.
//!
//! Most functions return `anyhow::Result`; failures a caller may want to
//! distinguish are wrapped in a [`PipelineError`] so they can be downcast
//! at the job boundary (per-recipient reporting, exit codes).

use thiserror::Error;

/// Failure classes surfaced by the personalization pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The engine could not report silence or volume, or a required
    /// speech segment / placeholder marker count was not met.
    #[error("detection failed: {0}")]
    Detection(String),

    /// Invalid or incomplete configuration: unknown tier or provider,
    /// missing credentials, unsupported tier/position combination.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Batch synthesis produced fewer usable segments than names, even
    /// after retrying with relaxed split thresholds.
    #[error("batch split found {found} segments for {needed} names")]
    BatchSplit { found: usize, needed: usize },

    /// A target slot degenerated below the usable minimum.
    #[error("fit error: {0}")]
    Fit(String),

    /// An external tool exited nonzero.
    #[error("{tool} failed ({status}): {stderr}")]
    Engine {
        tool: String,
        status: String,
        stderr: String,
    },
}
