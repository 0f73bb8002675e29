pub mod config;
pub mod engine;
pub mod error;
pub mod image_export;
pub mod profiling;
pub mod runner;
pub mod tensor_io;

pub use error::{Result, RunnerError};
