use tracing::debug;

use crate::engine::{Dim, TensorBuffer, TensorSpec};
use crate::error::{Result, RunnerError};
use crate::tensor_io::element::{element_count, ElementType, TypedArray};

/// This function gives a concrete shape to the dynamic dimensions of an input slot
/// # Arguments
/// * loaded_shape: shape of the array read from disk
/// * spec: declared input slot
/// # Returns
/// With equal ranks, dynamic dimensions take the loaded extent at the same position;
/// otherwise every dynamic dimension defaults to 1 (batch defaulting).
pub fn resolve_input_shape(loaded_shape: &[usize], spec: &TensorSpec) -> Vec<usize> {
  let same_rank = loaded_shape.len() == spec.shape.len();
  spec.shape.iter()
    .enumerate()
    .map(|(i, dim)| match dim {
      Dim::Fixed(d) => *d,
      Dim::Dynamic if same_rank => loaded_shape[i],
      Dim::Dynamic => 1,
    })
    .collect()
}

/// This function prepares a loaded array for an engine input slot
/// # Arguments
/// * loaded: array read from disk
/// * spec: declared input slot
/// # Returns
/// A buffer in the slot's element type and the array's stored order. Only flattened
/// element counts are compared; float to 8-bit conversion truncates toward zero and
/// saturates at the type bounds (the host `as` cast).
pub fn adapt_for_input(loaded: &TypedArray, spec: &TensorSpec) -> Result<TensorBuffer> {
  let target_shape = resolve_input_shape(loaded.shape(), spec);
  let expected = element_count(&target_shape);
  if expected != loaded.len() {
    return Err(RunnerError::SizeMismatch {
      name: spec.name.clone(),
      expected,
      actual: loaded.len(),
    });
  }

  if loaded.shape() != target_shape.as_slice() {
    debug!(tensor = %spec.name, file_shape = ?loaded.shape(), model_shape = ?target_shape,
           "reinterpreting input with equal element count");
  }

  let buffer = match spec.dtype {
    ElementType::F32 => TensorBuffer::F32(loaded.to_vec_as::<f32>()),
    ElementType::I8 => TensorBuffer::I8(loaded.to_vec_as::<i8>()),
    ElementType::U8 => TensorBuffer::U8(loaded.to_vec_as::<u8>()),
  };
  Ok(buffer)
}

/// This function turns an engine output into a float32 array ready for serialization
/// # Arguments
/// * buffer: owned copy of the engine output
/// * spec: output slot, ideally with the concrete shape of the last run
/// # Returns
/// A float32 array; 8-bit outputs are widened without de-quantization. The slot shape is
/// used when it is fully known and matches the buffer length, a flat shape otherwise.
pub fn adapt_from_output(buffer: TensorBuffer, spec: &TensorSpec) -> Result<TypedArray> {
  if buffer.element_type() != spec.dtype {
    debug!(tensor = %spec.name, declared = %spec.dtype, produced = %buffer.element_type(),
           "output element type differs from declaration");
  }

  let values: Vec<f32> = match buffer {
    TensorBuffer::F32(v) => v,
    TensorBuffer::I8(v) => v.into_iter().map(f32::from).collect(),
    TensorBuffer::U8(v) => v.into_iter().map(f32::from).collect(),
  };

  let shape = match spec.fixed_shape() {
    Some(shape) if element_count(&shape) == values.len() => shape,
    _ => vec![values.len()],
  };
  TypedArray::from_shape_vec(shape, values)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn floats(shape: Vec<usize>, values: Vec<f32>) -> TypedArray {
    TypedArray::from_shape_vec(shape, values).unwrap()
  }

  #[test]
  fn rejects_element_count_mismatch() {
    let loaded = floats(vec![1, 10], (0..10).map(|v| v as f32).collect());
    let err = adapt_for_input(&loaded, &TensorSpec::fixed("in", &[1, 5], ElementType::F32)).unwrap_err();
    assert!(matches!(err, RunnerError::SizeMismatch { expected: 5, actual: 10, .. }));
  }

  #[test]
  fn accepts_equal_count_with_different_dims() {
    let loaded = floats(vec![1, 10], (0..10).map(|v| v as f32).collect());
    let buffer = adapt_for_input(&loaded, &TensorSpec::fixed("in", &[10], ElementType::F32)).unwrap();
    assert_eq!(buffer, TensorBuffer::F32((0..10).map(|v| v as f32).collect()));
  }

  #[test]
  fn float_to_int8_truncates_and_saturates() {
    let loaded = floats(vec![6], vec![1.9, -1.9, 127.4, 300.0, -300.0, f32::NAN]);
    let buffer = adapt_for_input(&loaded, &TensorSpec::fixed("q", &[6], ElementType::I8)).unwrap();
    assert_eq!(buffer, TensorBuffer::I8(vec![1, -1, 127, 127, -128, 0]));

    let buffer = adapt_for_input(&loaded, &TensorSpec::fixed("q", &[6], ElementType::U8)).unwrap();
    assert_eq!(buffer, TensorBuffer::U8(vec![1, 0, 127, 255, 0, 0]));
  }

  #[test]
  fn integer_inputs_pass_through_or_widen() {
    let loaded = TypedArray::from_shape_vec(vec![3], vec![0u8, 128, 255]).unwrap();
    let same = adapt_for_input(&loaded, &TensorSpec::fixed("u", &[3], ElementType::U8)).unwrap();
    assert_eq!(same, TensorBuffer::U8(vec![0, 128, 255]));
    let widened = adapt_for_input(&loaded, &TensorSpec::fixed("f", &[3], ElementType::F32)).unwrap();
    assert_eq!(widened, TensorBuffer::F32(vec![0.0, 128.0, 255.0]));
  }

  #[test]
  fn dynamic_dims_follow_the_loaded_array_or_default_to_one() {
    let spec = TensorSpec::new("in", vec![Dim::Dynamic, Dim::Fixed(3)], ElementType::F32);
    assert_eq!(resolve_input_shape(&[4, 3], &spec), vec![4, 3]);
    assert_eq!(resolve_input_shape(&[3], &spec), vec![1, 3]);

    let loaded = floats(vec![4, 3], vec![0.0; 12]);
    assert!(adapt_for_input(&loaded, &spec).is_ok());
    let loaded = floats(vec![2, 2, 3], vec![0.0; 12]);
    assert!(matches!(adapt_for_input(&loaded, &spec), Err(RunnerError::SizeMismatch { expected: 3, .. })));
  }

  #[test]
  fn outputs_are_widened_to_float() {
    let spec = TensorSpec::fixed("out", &[2, 2], ElementType::I8);
    let array = adapt_from_output(TensorBuffer::I8(vec![-128, -1, 0, 127]), &spec).unwrap();
    assert_eq!(array.shape(), &[2, 2]);
    assert_eq!(array.as_f32().unwrap().iter().copied().collect::<Vec<_>>(), vec![-128.0, -1.0, 0.0, 127.0]);
  }

  #[test]
  fn unknown_output_shape_falls_back_to_flat() {
    let spec = TensorSpec::new("out", vec![Dim::Dynamic, Dim::Fixed(2)], ElementType::U8);
    let array = adapt_from_output(TensorBuffer::U8(vec![1, 2, 3, 4]), &spec).unwrap();
    assert_eq!(array.shape(), &[4]);
    assert_eq!(array.element_type(), ElementType::F32);
  }
}
