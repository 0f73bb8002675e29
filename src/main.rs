use std::process::ExitCode;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use onnx_rusty_runner::config::{ensure_parent_dir, Config};
use onnx_rusty_runner::error::Result;
use onnx_rusty_runner::image_export::{image_dims, save_png};
use onnx_rusty_runner::runner::TensorRunner;
use onnx_rusty_runner::tensor_io::{read_npy_native, write_npy, TypedArray};

fn main() -> ExitCode {
  let config = match Config::try_parse() {
    Ok(config) => config,
    Err(err) => {
      // --help and --version also land here
      let _ = err.print();
      return if err.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
    }
  };

  init_logging(config.log_level.as_deref());

  match read_and_make_inference(&config) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      error!("{}", err);
      ExitCode::FAILURE
    }
  }
}

fn init_logging(level: Option<&str>) {
  let filter = match level {
    Some(level) => EnvFilter::new(level),
    None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .init();
}

fn read_and_make_inference(config: &Config) -> Result<()> {
  config.validate()?;

  let mut runner = TensorRunner::load(&config.model, config.profiling_enabled())?;
  if config.use_gpu() {
    runner.init_gpu_delegate();
  } else {
    info!("GPU delegate disabled, running on CPU");
  }

  let input_specs = runner.input_specs()?;
  for (i, spec) in input_specs.iter().enumerate() {
    info!("input {}: {}", i, spec);
  }
  if config.inputs.len() != input_specs.len() {
    warn!("model declares {} input(s) but {} were provided", input_specs.len(), config.inputs.len());
  }

  let inputs = config.inputs.iter()
    .map(|path| {
      let array = read_npy_native(path)?;
      info!(path = %path.display(), shape = ?array.shape(), element_type = %array.element_type(), "loaded input");
      Ok(array)
    })
    .collect::<Result<Vec<TypedArray>>>()?;

  let outputs = runner.run(&inputs)?;

  let output_specs = runner.output_specs()?;
  let names: Vec<String> = output_specs.iter().map(|s| s.name.clone()).collect();
  let paths = config.resolve_output_paths(&names)?;
  for ((output, spec), path) in outputs.iter().zip(&output_specs).zip(&paths) {
    ensure_parent_dir(path)?;
    write_npy(path, output)?;
    info!("saved output '{}' {:?} to {}", spec.name, output.shape(), path.display());
  }

  if let (Some(png_path), Some(first)) = (&config.output_png, outputs.first()) {
    export_png(png_path, first);
  }

  runner.report().log();
  Ok(())
}

// PNG export never fails the run
fn export_png(path: &std::path::Path, output: &TypedArray) {
  let dims = match image_dims(output.shape()) {
    Some(dims) => dims,
    None => {
      warn!("output shape {:?} is not image-like, skipping PNG export", output.shape());
      return;
    }
  };
  let saved = ensure_parent_dir(path)
    .and_then(|_| save_png(path, &output.to_vec_as::<f32>(), dims.width, dims.height, dims.channels));
  if let Err(err) = saved {
    warn!("failed to save PNG to {}: {}", path.display(), err);
  }
}
