use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::onnx_engine::OnnxEngine;
use crate::engine::{InferenceEngine, TensorSpec};
use crate::error::{Result, RunnerError};
use crate::profiling::{time_ms, GpuMemorySnapshot, MemorySnapshots, MemoryStats, OpPlacementStats,
                       ProfileReport, TimingStats};
use crate::tensor_io::adapter::{adapt_for_input, adapt_from_output, resolve_input_shape};
use crate::tensor_io::element::TypedArray;

/// Drives one loaded model: delegate, allocation, copy-in, invoke, copy-out, with profiling.
pub struct TensorRunner<E: InferenceEngine> {
  engine: E,
  profiling_enabled: bool,
  gpu_delegate_attached: bool,
  tensors_allocated: bool,
  // last concrete shape given to each dynamic input
  pinned_shapes: Vec<Option<Vec<usize>>>,
  timing: TimingStats,
  memory: MemorySnapshots,
  gpu_memory_after_delegate_init: Option<GpuMemorySnapshot>,
  gpu_memory_after_inference: Option<GpuMemorySnapshot>,
}

impl TensorRunner<OnnxEngine> {
  /// This function loads an ONNX model and wraps it into a runner
  /// # Arguments
  /// * model_path: the .onnx file
  /// * profiling_enabled: whether memory snapshots are taken
  pub fn load<P: AsRef<Path>>(model_path: P, profiling_enabled: bool) -> Result<Self> {
    let model_path = model_path.as_ref();
    info!(model = %model_path.display(), "loading model");
    let (engine, elapsed) = time_ms(|| OnnxEngine::load(model_path));
    let mut runner = TensorRunner::new(engine?, profiling_enabled);
    runner.timing.model_load_ms = elapsed;
    info!("model loaded in {:.2} ms", elapsed);
    Ok(runner)
  }
}

impl<E: InferenceEngine> TensorRunner<E> {
  pub fn new(engine: E, profiling_enabled: bool) -> Self {
    let mut runner = TensorRunner {
      engine,
      profiling_enabled,
      gpu_delegate_attached: false,
      tensors_allocated: false,
      pinned_shapes: Vec::new(),
      timing: TimingStats::default(),
      memory: MemorySnapshots::default(),
      gpu_memory_after_delegate_init: None,
      gpu_memory_after_inference: None,
    };
    runner.memory.after_model_load = runner.memory_snapshot();
    runner
  }

  /// Tries to attach the GPU delegate; on failure the runner keeps going on the CPU path.
  pub fn init_gpu_delegate(&mut self) -> bool {
    if self.gpu_delegate_attached {
      info!("GPU delegate already initialized");
      return true;
    }
    let (result, elapsed) = time_ms(|| self.engine.attach_gpu_delegate());
    self.timing.delegate_init_ms = elapsed;
    match result {
      Ok(()) => {
        info!("GPU delegate initialized in {:.2} ms", elapsed);
        self.gpu_delegate_attached = true;
        self.memory.after_delegate_init = self.memory_snapshot();
        self.gpu_memory_after_delegate_init = self.gpu_snapshot();
        // the delegate rewrites the graph, buffers must be planned again
        self.tensors_allocated = false;
      }
      Err(err) => warn!("GPU delegate initialization failed, falling back to CPU: {}", err),
    }
    self.gpu_delegate_attached
  }

  pub fn gpu_delegate_attached(&self) -> bool {
    self.gpu_delegate_attached
  }

  pub fn input_specs(&self) -> Result<Vec<TensorSpec>> {
    (0..self.engine.input_count()).map(|i| self.engine.input_spec(i)).collect()
  }

  pub fn output_specs(&self) -> Result<Vec<TensorSpec>> {
    (0..self.engine.output_count()).map(|i| self.engine.output_spec(i)).collect()
  }

  /// This function runs the model on the given arrays
  /// # Arguments
  /// * inputs: one array per model input, in declaration order
  /// # Returns
  /// One float32 array per model output, in declaration order
  pub fn run(&mut self, inputs: &[TypedArray]) -> Result<Vec<TypedArray>> {
    let specs = self.input_specs()?;
    if inputs.len() != specs.len() {
      return Err(RunnerError::InvalidArgument(
        format!("model expects {} input(s), {} provided", specs.len(), inputs.len())));
    }

    let total_start = Instant::now();
    info!("running inference with {} input(s)", inputs.len());

    self.pinned_shapes.resize(specs.len(), None);
    for (i, (array, spec)) in inputs.iter().zip(&specs).enumerate() {
      if !spec.is_dynamic() {
        continue;
      }
      let shape = resolve_input_shape(array.shape(), spec);
      if self.pinned_shapes[i].as_ref() == Some(&shape) {
        continue;
      }
      debug!(index = i, shape = ?shape, "pinning dynamic input shape");
      self.engine.resize_input(i, &shape)?;
      self.pinned_shapes[i] = Some(shape);
      self.tensors_allocated = false;
    }

    if !self.tensors_allocated {
      let (allocated, elapsed) = time_ms(|| self.engine.allocate_tensors());
      allocated?;
      self.timing.tensor_allocation_ms = elapsed;
      self.tensors_allocated = true;
      self.memory.after_tensor_allocation = self.memory_snapshot();
    }

    let (copied, elapsed) = time_ms(|| -> Result<()> {
      for (i, (array, spec)) in inputs.iter().zip(&specs).enumerate() {
        let buffer = adapt_for_input(array, spec)?;
        #[cfg(feature = "debug_prints")]{
          dbg!(&buffer);
        }
        self.engine.copy_into_input(i, buffer)?;
      }
      Ok(())
    });
    copied?;
    self.timing.input_copy_ms = elapsed;

    let (invoked, elapsed) = time_ms(|| self.engine.invoke());
    invoked?;
    self.timing.inference_ms = elapsed;

    let (outputs, elapsed) = time_ms(|| -> Result<Vec<TypedArray>> {
      (0..self.engine.output_count())
        .map(|i| {
          let spec = self.engine.output_spec(i)?;
          let buffer = self.engine.copy_from_output(i)?;
          #[cfg(feature = "debug_prints")]{
            dbg!(&buffer);
          }
          adapt_from_output(buffer, &spec)
        })
        .collect()
    });
    let outputs = outputs?;
    if outputs.is_empty() {
      return Err(RunnerError::Engine("model produced no outputs".to_string()));
    }
    self.timing.output_copy_ms = elapsed;

    self.timing.total_ms = total_start.elapsed().as_secs_f64() * 1000.0;
    self.memory.after_inference = self.memory_snapshot();
    self.gpu_memory_after_inference = self.gpu_snapshot();
    info!("inference completed in {:.2} ms", self.timing.inference_ms);
    Ok(outputs)
  }

  pub fn timing(&self) -> &TimingStats {
    &self.timing
  }

  pub fn memory(&self) -> &MemorySnapshots {
    &self.memory
  }

  pub fn gpu_memory_after_inference(&self) -> Option<&GpuMemorySnapshot> {
    self.gpu_memory_after_inference.as_ref()
  }

  pub fn op_placement(&self) -> OpPlacementStats {
    OpPlacementStats::from_plan(&self.engine.execution_plan())
  }

  pub fn report(&self) -> ProfileReport {
    ProfileReport {
      timing: self.timing,
      memory: self.profiling_enabled.then_some(self.memory),
      gpu_after_delegate_init: self.gpu_memory_after_delegate_init.clone(),
      gpu_after_inference: self.gpu_memory_after_inference.clone(),
      placement: self.op_placement(),
    }
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  fn memory_snapshot(&self) -> MemoryStats {
    if self.profiling_enabled {
      MemoryStats::capture()
    } else {
      MemoryStats::default()
    }
  }

  fn gpu_snapshot(&self) -> Option<GpuMemorySnapshot> {
    if self.profiling_enabled {
      GpuMemorySnapshot::capture()
    } else {
      None
    }
  }
}
