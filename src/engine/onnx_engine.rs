use std::io::Cursor;
use std::path::Path;
use onnx_protobuf::{ModelProto, TensorProto, ValueInfoProto};
use onnx_protobuf::type_proto::Value;
use onnx_protobuf::tensor_shape_proto::dimension::Value::DimValue;
use protobuf::Message;
use tracing::{debug, info};
use tract_onnx::model::Onnx;
use tract_onnx::prelude::*;

use crate::engine::{Dim, ExecutionStep, InferenceEngine, TensorBuffer, TensorSpec};
use crate::error::{Result, RunnerError};
use crate::tensor_io::element::{element_count, ElementType};

type Plan = TypedRunnableModel<TypedModel>;

/// An ONNX model executed on the CPU by tract.
///
/// Tensor declarations come from the `ModelProto` itself; the runnable plan is built by
/// `allocate_tensors` once every input has a concrete shape.
pub struct OnnxEngine {
  model: InferenceModel,
  inputs: Vec<TensorSpec>,
  outputs: Vec<TensorSpec>,
  input_shapes: Vec<Vec<usize>>,
  plan: Option<Plan>,
  pending_inputs: Vec<Option<Tensor>>,
  results: Vec<TValue>,
}

impl OnnxEngine {
  /// Loads a model with the default tract operator registry
  pub fn load<P: AsRef<Path>>(path: P) -> Result<OnnxEngine> {
    OnnxEngine::load_with(&tract_onnx::onnx(), path)
  }

  /// This function loads an ONNX model with an explicit operator registry
  /// # Arguments
  /// * framework: tract ONNX framework holding the operator registry
  /// * path: the .onnx file
  /// # Returns
  /// The engine, with input/output declarations read from the model graph
  pub fn load_with<P: AsRef<Path>>(framework: &Onnx, path: P) -> Result<OnnxEngine> {
    let path = path.as_ref();
    let onnx_bytes = std::fs::read(path)?;
    let proto = ModelProto::parse_from_bytes(&onnx_bytes)
      .map_err(|e| RunnerError::Engine(format!("{} is not an ONNX model: {}", path.display(), e)))?;

    let inputs = proto.graph.input.iter()
      .filter(|inp| !already_into_initializer(&proto.graph.initializer, &inp.name))
      .map(declared_tensor)
      .collect::<Result<Vec<_>>>()?;
    let outputs = proto.graph.output.iter()
      .map(declared_tensor)
      .collect::<Result<Vec<_>>>()?;

    let model = framework.model_for_read(&mut Cursor::new(&onnx_bytes))
      .map_err(RunnerError::engine)?;

    info!(model = %path.display(), nodes = proto.graph.node.len(), inputs = inputs.len(),
          outputs = outputs.len(), "model parsed");
    for (i, spec) in inputs.iter().enumerate() {
      debug!("input[{}]: {}", i, spec);
    }
    for (i, spec) in outputs.iter().enumerate() {
      debug!("output[{}]: {}", i, spec);
    }

    let input_shapes = inputs.iter()
      .map(|spec| spec.shape.iter().map(|d| match d {
        Dim::Fixed(v) => *v,
        Dim::Dynamic => 1,
      }).collect())
      .collect();
    let pending_inputs = vec![None; inputs.len()];

    Ok(OnnxEngine {
      model,
      inputs,
      outputs,
      input_shapes,
      plan: None,
      pending_inputs,
      results: Vec::new(),
    })
  }

  fn input_slot(&self, index: usize) -> Result<&TensorSpec> {
    self.inputs.get(index).ok_or_else(|| RunnerError::InvalidArgument(
      format!("input index {} out of range, model has {} input(s)", index, self.inputs.len())))
  }
}

impl InferenceEngine for OnnxEngine {
  fn attach_gpu_delegate(&mut self) -> Result<()> {
    Err(RunnerError::Engine("the tract backend executes on the CPU only, no GPU delegate available".to_string()))
  }

  fn allocate_tensors(&mut self) -> Result<()> {
    let mut model = self.model.clone();
    for (i, (spec, shape)) in self.inputs.iter().zip(&self.input_shapes).enumerate() {
      let fact = InferenceFact::dt_shape(datum_type(spec.dtype), shape.clone());
      model = model.with_input_fact(i, fact).map_err(RunnerError::engine)?;
    }
    let plan = model.into_optimized()
      .and_then(|typed| typed.into_runnable())
      .map_err(RunnerError::engine)?;
    debug!(nodes = plan.model().nodes().len(), "runnable plan built");

    self.plan = Some(plan);
    self.results.clear();
    Ok(())
  }

  fn input_count(&self) -> usize {
    self.inputs.len()
  }

  fn output_count(&self) -> usize {
    self.outputs.len()
  }

  fn input_spec(&self, index: usize) -> Result<TensorSpec> {
    self.input_slot(index).cloned()
  }

  fn output_spec(&self, index: usize) -> Result<TensorSpec> {
    let declared = self.outputs.get(index).ok_or_else(|| RunnerError::InvalidArgument(
      format!("output index {} out of range, model has {} output(s)", index, self.outputs.len())))?;
    match self.results.get(index) {
      Some(tensor) => Ok(TensorSpec::fixed(declared.name.clone(), tensor.shape(),
                                           element_type(tensor.datum_type()).unwrap_or(declared.dtype))),
      None => Ok(declared.clone()),
    }
  }

  fn resize_input(&mut self, index: usize, shape: &[usize]) -> Result<()> {
    let spec = self.input_slot(index)?;
    let compatible = spec.shape.len() == shape.len()
      && spec.shape.iter().zip(shape).all(|(d, s)| match d {
        Dim::Fixed(v) => v == s,
        Dim::Dynamic => true,
      });
    if !compatible {
      return Err(RunnerError::InvalidArgument(format!("cannot resize {} to {:?}", spec, shape)));
    }
    if self.input_shapes[index] != shape {
      self.input_shapes[index] = shape.to_vec();
      self.plan = None;
    }
    Ok(())
  }

  fn copy_into_input(&mut self, index: usize, buffer: TensorBuffer) -> Result<()> {
    let spec = self.input_slot(index)?;
    if buffer.element_type() != spec.dtype {
      return Err(RunnerError::UnsupportedType(
        format!("input {} expects {}, got {}", spec, spec.dtype, buffer.element_type())));
    }
    let shape = &self.input_shapes[index];
    let expected = element_count(shape);
    if buffer.len() != expected {
      return Err(RunnerError::SizeMismatch { name: spec.name.clone(), expected, actual: buffer.len() });
    }

    let tensor = match &buffer {
      TensorBuffer::F32(v) => Tensor::from_shape(shape, v.as_slice()),
      TensorBuffer::I8(v) => Tensor::from_shape(shape, v.as_slice()),
      TensorBuffer::U8(v) => Tensor::from_shape(shape, v.as_slice()),
    }.map_err(RunnerError::engine)?;
    self.pending_inputs[index] = Some(tensor);
    Ok(())
  }

  fn invoke(&mut self) -> Result<()> {
    if self.plan.is_none() {
      self.allocate_tensors()?;
    }
    let inputs: TVec<TValue> = self.pending_inputs.iter()
      .enumerate()
      .map(|(i, t)| t.clone().map(TValue::from).ok_or_else(|| RunnerError::InvalidArgument(
        format!("input {} was not provided before invoke", i))))
      .collect::<Result<TVec<TValue>>>()?;

    let plan = self.plan.as_ref()
      .ok_or_else(|| RunnerError::Engine("tensors are not allocated".to_string()))?;
    let outputs = plan.run(inputs).map_err(RunnerError::engine)?;
    self.results = outputs.into_iter().collect();
    Ok(())
  }

  fn copy_from_output(&self, index: usize) -> Result<TensorBuffer> {
    let tensor = self.results.get(index).ok_or_else(|| RunnerError::Engine(
      format!("no output {} available, invoke must succeed first", index)))?;
    let buffer = match tensor.datum_type() {
      DatumType::F32 => TensorBuffer::F32(tensor.as_slice::<f32>().map_err(RunnerError::engine)?.to_vec()),
      DatumType::I8 => TensorBuffer::I8(tensor.as_slice::<i8>().map_err(RunnerError::engine)?.to_vec()),
      DatumType::U8 => TensorBuffer::U8(tensor.as_slice::<u8>().map_err(RunnerError::engine)?.to_vec()),
      other => return Err(RunnerError::UnsupportedType(format!("output {} has datum type {:?}", index, other))),
    };
    Ok(buffer)
  }

  fn execution_plan(&self) -> Vec<ExecutionStep> {
    match &self.plan {
      Some(plan) => plan.model().nodes().iter()
        .map(|node| node.op.name().to_string())
        .filter(|op_name| op_name != "Source")
        .map(|op_name| ExecutionStep { delegated: false, op_name })
        .collect(),
      None => Vec::new(),
    }
  }
}

fn datum_type(element_type: ElementType) -> DatumType {
  match element_type {
    ElementType::F32 => DatumType::F32,
    ElementType::I8 => DatumType::I8,
    ElementType::U8 => DatumType::U8,
  }
}

fn element_type(datum_type: DatumType) -> Option<ElementType> {
  match datum_type {
    DatumType::F32 => Some(ElementType::F32),
    DatumType::I8 => Some(ElementType::I8),
    DatumType::U8 => Some(ElementType::U8),
    _ => None,
  }
}

/// This function searches if a graph input is in fact one of the model's initializers
/// # Arguments
/// * model_initializers: model's tensor initializers
/// * input_name: input to look for
/// # Returns
/// It returns true if it's present, false otherwise
fn already_into_initializer(model_initializers: &[TensorProto], input_name: &str) -> bool {
  model_initializers.iter().any(|init| init.name == input_name)
}

/// ONNX `TensorProto.DataType` codes this runner can exchange
fn onnx_element_type(elem_type: i32, tensor_name: &str) -> Result<ElementType> {
  match elem_type {
    1 => Ok(ElementType::F32),
    2 => Ok(ElementType::U8),
    3 => Ok(ElementType::I8),
    other => Err(RunnerError::UnsupportedType(
      format!("tensor '{}' has ONNX element type {}", tensor_name, other))),
  }
}

/// This function reads name, element type and dimensions of a graph input/output
/// # Arguments
/// * info: the graph's value info for the tensor
/// # Returns
/// The tensor spec; symbolic or missing dimensions become Dim::Dynamic
fn declared_tensor(info: &ValueInfoProto) -> Result<TensorSpec> {
  let name = info.name.as_str();
  match info.type_.value.as_ref() {
    Some(Value::TensorType(t)) => {
      let dtype = onnx_element_type(t.elem_type, name)?;
      let shape = match t.shape.as_ref() {
        Some(shape) => shape.dim.iter()
          .map(|el| match el.value.as_ref() {
            Some(DimValue(v)) if *v >= 0 => Dim::Fixed(*v as usize),
            _ => Dim::Dynamic,
          })
          .collect(),
        None => Vec::new(),
      };
      Ok(TensorSpec::new(name, shape, dtype))
    }
    Some(_) => Err(RunnerError::UnsupportedType(format!("tensor '{}' is not a dense tensor", name))),
    None => Err(RunnerError::Engine(format!("unable to retrieve type of tensor '{}'", name))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use onnx_protobuf::{TensorShapeProto, TypeProto};
  use onnx_protobuf::tensor_shape_proto::Dimension;
  use onnx_protobuf::tensor_shape_proto::dimension::Value::DimParam;
  use onnx_protobuf::type_proto::Tensor as TensorTypeProto;

  fn value_info(name: &str, elem_type: i32, dims: Vec<Option<i64>>) -> ValueInfoProto {
    let mut shape = TensorShapeProto::new();
    for d in dims {
      let mut dim = Dimension::new();
      dim.value = Some(match d {
        Some(v) => DimValue(v),
        None => DimParam("batch".to_string()),
      });
      shape.dim.push(dim);
    }
    let mut tensor = TensorTypeProto::new();
    tensor.elem_type = elem_type;
    tensor.shape = protobuf::MessageField::some(shape);
    let mut type_ = TypeProto::new();
    type_.value = Some(Value::TensorType(tensor));
    let mut info = ValueInfoProto::new();
    info.name = name.to_string();
    info.type_ = protobuf::MessageField::some(type_);
    info
  }

  #[test]
  fn reads_declared_dims_and_types() {
    let spec = declared_tensor(&value_info("images", 1, vec![None, Some(224), Some(224), Some(3)])).unwrap();
    assert_eq!(spec.name, "images");
    assert_eq!(spec.dtype, ElementType::F32);
    assert_eq!(spec.shape, vec![Dim::Dynamic, Dim::Fixed(224), Dim::Fixed(224), Dim::Fixed(3)]);

    let quantized = declared_tensor(&value_info("q", 2, vec![Some(1), Some(10)])).unwrap();
    assert_eq!(quantized.dtype, ElementType::U8);
  }

  #[test]
  fn rejects_unsupported_element_types() {
    // 7 = INT64
    assert!(matches!(declared_tensor(&value_info("ids", 7, vec![Some(1)])),
                     Err(RunnerError::UnsupportedType(_))));
  }

  #[test]
  fn initializers_are_not_inputs() {
    let mut weight = TensorProto::new();
    weight.name = "conv.weight".to_string();
    let initializers = vec![weight];
    assert!(already_into_initializer(&initializers, "conv.weight"));
    assert!(!already_into_initializer(&initializers, "images"));
  }

  #[test]
  fn loading_garbage_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.onnx");
    std::fs::write(&path, b"definitely not protobuf").unwrap();
    assert!(OnnxEngine::load(&path).is_err());
    assert!(matches!(OnnxEngine::load(dir.path().join("missing.onnx")), Err(RunnerError::Io(_))));
  }
}
