// ============================================================
// Layer 3 - Domain Errors
// ============================================================
// Typed failures raised by the domain and data layers.
// Everything above these layers wraps them in anyhow with
// context, so these enums only need to name *what* went wrong.
//
// None of these are recoverable: a run either completes or
// stops on the first error and is restarted by hand with
// `load: true` from its last checkpoint.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::batch::BatchOrigin;

/// Problems with the run configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("'mode' is required (train, test or forward)")]
    MissingMode,

    #[error("invalid value for 'mode': {0}")]
    InvalidMode(String),

    #[error("'{field}' must be at least 1")]
    NotPositive { field: &'static str },

    #[error("'{field}' is required when mode is '{mode}'")]
    Missing {
        field: &'static str,
        mode: &'static str,
    },

    #[error("mode '{0}' requires 'load' to be true")]
    LoadRequired(&'static str),

    #[error("'hidden_size' ({hidden_size}) must be divisible by 'num_heads' ({num_heads})")]
    HeadsMismatch { hidden_size: usize, num_heads: usize },
}

/// Problems with the data flowing through the loops.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("{origin} batch source exhausted at step {idx}")]
    Exhausted { origin: BatchOrigin, idx: usize },

    #[error(
        "example '{id}' has gold span [{start}, {end}) outside its {context_len}-token context"
    )]
    MalformedSpan {
        id: String,
        start: usize,
        end: usize,
        context_len: usize,
    },

    #[error("dataset '{0}' has no examples")]
    Empty(String),

    #[error("embedding matrix has {found} values, expected {rows} x {dim}")]
    EmbeddingShape { found: usize, rows: usize, dim: usize },

    #[error("{found} embedding values do not split into rows of {dim}")]
    RowWidth { found: usize, dim: usize },

    #[error("pretrained vector for '{word}' has {found} dims, expected {expected}")]
    VectorSize {
        word: String,
        found: usize,
        expected: usize,
    },
}
