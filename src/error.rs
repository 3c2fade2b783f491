use thiserror::Error;

use crate::CompileError;
use crate::parse::ParseError;

/// Unified error type covering parsing, compilation, decoding, and I/O.
///
/// Returned by convenience methods like
/// [`Compilation::from_yaml()`](crate::Compilation::from_yaml) and
/// [`Compilation::from_file()`](crate::Compilation::from_file).
#[derive(Debug, Error)]
pub enum ScorchError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid document: {0}")]
    Document(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
