use std::io;
use thiserror::Error;

/// Every failure surfaced by the codec, the adapter, the engine backend and the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
  /// Bad magic, unsupported version or malformed header descriptor
  #[error("invalid tensor file: {0}")]
  Format(String),

  /// Open/read/write/permission failures, including truncated payloads
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  /// Element type code outside of the supported set
  #[error("unsupported element type: {0}")]
  UnsupportedType(String),

  /// Element count of a loaded array does not match a tensor slot
  #[error("element count mismatch for '{name}': expected {expected}, got {actual}")]
  SizeMismatch {
    name: String,
    expected: usize,
    actual: usize,
  },

  /// Opaque failure reported by the inference engine or delegate
  #[error("inference engine error: {0}")]
  Engine(String),

  #[error("PNG export failed: {0}")]
  Image(#[from] image::ImageError),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

impl RunnerError {
  /// Wraps any engine-side error into the opaque engine variant, keeping the whole cause chain.
  pub fn engine<E: std::fmt::Display>(err: E) -> Self {
    RunnerError::Engine(format!("{:#}", err))
  }
}
