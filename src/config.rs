use std::fs;
use std::path::{Path, PathBuf};
use clap::Parser;
use tracing::debug;

use crate::error::{Result, RunnerError};

/// Run an ONNX model on .npy inputs and write its outputs as .npy files
#[derive(Parser, Debug, Clone)]
#[command(name = "onnx_rusty_runner")]
#[command(version)]
pub struct Config {
  /// Path to the .onnx model
  #[arg(long)]
  pub model: PathBuf,

  /// Input .npy file, once per model input in declaration order
  #[arg(long = "input", required = true)]
  pub inputs: Vec<PathBuf>,

  /// Output .npy file, once per model output; auto-named in --output-dir when omitted
  #[arg(long = "output")]
  pub outputs: Vec<PathBuf>,

  /// Directory for auto-named outputs
  #[arg(long, default_value = "outputs")]
  pub output_dir: PathBuf,

  /// Also save the first output as a PNG when its shape looks like an image
  #[arg(long)]
  pub output_png: Option<PathBuf>,

  /// Skip the GPU delegate and run on CPU only
  #[arg(long)]
  pub no_gpu: bool,

  /// Disable memory snapshots
  #[arg(long)]
  pub no_profiling: bool,

  /// Log filter, e.g. "debug" or "onnx_rusty_runner=trace" (overrides RUST_LOG)
  #[arg(long)]
  pub log_level: Option<String>,
}

impl Config {
  pub fn use_gpu(&self) -> bool {
    !self.no_gpu
  }

  pub fn profiling_enabled(&self) -> bool {
    !self.no_profiling
  }

  pub fn validate(&self) -> Result<()> {
    if self.inputs.is_empty() {
      return Err(RunnerError::InvalidArgument("at least one --input is required".to_string()));
    }
    if self.model.as_os_str().is_empty() {
      return Err(RunnerError::InvalidArgument("--model must not be empty".to_string()));
    }
    Ok(())
  }

  /// This function decides where every model output is written
  /// # Arguments
  /// * output_names: tensor names of the model outputs, in order
  /// # Returns
  /// The explicit --output paths when given (their count must match), otherwise
  /// one auto-named file per output inside --output-dir
  pub fn resolve_output_paths(&self, output_names: &[String]) -> Result<Vec<PathBuf>> {
    if !self.outputs.is_empty() {
      if self.outputs.len() != output_names.len() {
        return Err(RunnerError::InvalidArgument(format!(
          "model has {} output(s) but {} --output path(s) were given", output_names.len(), self.outputs.len())));
      }
      return Ok(self.outputs.clone());
    }
    Ok(auto_output_names(output_names).into_iter().map(|name| self.output_dir.join(name)).collect())
  }
}

/// Keeps ASCII alphanumerics, `_`, `-` and `.`; everything else becomes `_`
pub fn sanitize_filename(name: &str) -> String {
  let replaced: String = name.chars()
    .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
    .collect();
  let trimmed = replaced.trim_start_matches('_');
  if trimmed.is_empty() {
    "output".to_string()
  } else {
    trimmed.to_string()
  }
}

pub fn auto_output_names(output_names: &[String]) -> Vec<String> {
  output_names.iter()
    .enumerate()
    .map(|(i, name)| {
      if name.is_empty() {
        format!("output_{}.npy", i)
      } else {
        format!("{}.npy", sanitize_filename(name))
      }
    })
    .collect()
}

/// Creates the parent directory of `path` if it has one
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
      debug!(dir = %parent.display(), "creating output directory");
      fs::create_dir_all(parent)?;
      Ok(())
    }
    _ => Ok(()),
  }
}
