//! The narrow contract between the runner and an inference engine.
//!
//! Everything numeric (graph compilation, kernels, delegates) happens behind `InferenceEngine`;
//! the runner only moves `TensorBuffer`s in and out of numbered tensor slots.

pub mod onnx_engine;

use std::fmt;

use crate::error::Result;
use crate::tensor_io::element::ElementType;

/// One dimension of a declared tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
  Fixed(usize),
  /// Symbolic or unknown extent (e.g. an ONNX `dim_param` batch dimension)
  Dynamic,
}

impl fmt::Display for Dim {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Dim::Fixed(d) => write!(f, "{}", d),
      Dim::Dynamic => f.write_str("?"),
    }
  }
}

/// Read-only description of one input or output slot of a loaded model
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
  pub name: String,
  pub shape: Vec<Dim>,
  pub dtype: ElementType,
}

impl TensorSpec {
  pub fn new(name: impl Into<String>, shape: Vec<Dim>, dtype: ElementType) -> TensorSpec {
    TensorSpec { name: name.into(), shape, dtype }
  }

  /// A spec whose every dimension is known
  pub fn fixed(name: impl Into<String>, shape: &[usize], dtype: ElementType) -> TensorSpec {
    TensorSpec::new(name, shape.iter().map(|&d| Dim::Fixed(d)).collect(), dtype)
  }

  /// The concrete shape, or None when at least one dimension is dynamic
  pub fn fixed_shape(&self) -> Option<Vec<usize>> {
    self.shape.iter()
      .map(|d| match d {
        Dim::Fixed(v) => Some(*v),
        Dim::Dynamic => None,
      })
      .collect()
  }

  pub fn is_dynamic(&self) -> bool {
    self.shape.iter().any(|d| *d == Dim::Dynamic)
  }
}

impl fmt::Display for TensorSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
    write!(f, "'{}' [{}] {}", self.name, dims.join(", "), self.dtype)
  }
}

/// Row-major data handed to or copied out of an engine tensor slot
#[derive(Debug, Clone, PartialEq)]
pub enum TensorBuffer {
  F32(Vec<f32>),
  I8(Vec<i8>),
  U8(Vec<u8>),
}

impl TensorBuffer {
  pub fn element_type(&self) -> ElementType {
    match self {
      TensorBuffer::F32(_) => ElementType::F32,
      TensorBuffer::I8(_) => ElementType::I8,
      TensorBuffer::U8(_) => ElementType::U8,
    }
  }

  pub fn len(&self) -> usize {
    match self {
      TensorBuffer::F32(v) => v.len(),
      TensorBuffer::I8(v) => v.len(),
      TensorBuffer::U8(v) => v.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// One entry of the engine's execution plan, used for reporting only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStep {
  pub delegated: bool,
  pub op_name: String,
}

/// Operations the runner needs from a loaded model.
///
/// Implementations own their native resources and release them on drop.
pub trait InferenceEngine {
  /// Best-effort: an error here means execution stays on the CPU path.
  fn attach_gpu_delegate(&mut self) -> Result<()>;

  fn allocate_tensors(&mut self) -> Result<()>;

  fn input_count(&self) -> usize;

  fn output_count(&self) -> usize;

  fn input_spec(&self, index: usize) -> Result<TensorSpec>;

  /// After a successful `invoke`, reports the concrete shape of the produced tensor.
  fn output_spec(&self, index: usize) -> Result<TensorSpec>;

  /// Pins the concrete shape of an input slot; takes effect at the next allocation.
  fn resize_input(&mut self, index: usize, shape: &[usize]) -> Result<()>;

  /// The engine copies the buffer into its own tensor storage.
  fn copy_into_input(&mut self, index: usize, buffer: TensorBuffer) -> Result<()>;

  fn invoke(&mut self) -> Result<()>;

  /// Returns an owned copy; engine memory may be reused by the next `invoke`.
  fn copy_from_output(&self, index: usize) -> Result<TensorBuffer>;

  fn execution_plan(&self) -> Vec<ExecutionStep>;
}
