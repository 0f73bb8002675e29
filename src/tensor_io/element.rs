use std::fmt;
use ndarray::{ArrayD, IxDyn};
use ndarray_npy::{ReadableElement, WritableElement};
use num_traits::AsPrimitive;

use crate::error::{Result, RunnerError};

/// In-memory element types handled by the codec and the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
  F32,
  I8,
  U8,
}

impl ElementType {
  /// Width of a single element in bytes
  pub fn width(self) -> usize {
    match self {
      ElementType::F32 => 4,
      ElementType::I8 | ElementType::U8 => 1,
    }
  }

  pub fn is_float(self) -> bool {
    matches!(self, ElementType::F32)
  }

  pub fn name(self) -> &'static str {
    match self {
      ElementType::F32 => "float32",
      ElementType::I8 => "int8",
      ElementType::U8 => "uint8",
    }
  }
}

impl fmt::Display for ElementType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Number of elements described by a shape; the empty shape is a scalar.
pub fn element_count(shape: &[usize]) -> usize {
  shape.iter().product()
}

/// A shaped, row-major array of one of the supported element types.
///
/// Built on `ndarray::ArrayD`, so the buffer length always equals the product of the shape.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
  F32(ArrayD<f32>),
  I8(ArrayD<i8>),
  U8(ArrayD<u8>),
}

/// Scalar types that can live inside a `TypedArray` and go through the `.npy` codec
pub trait Element: Copy + fmt::Debug + ReadableElement + WritableElement + 'static {
  const ELEMENT_TYPE: ElementType;

  fn wrap(array: ArrayD<Self>) -> TypedArray;
}

impl Element for f32 {
  const ELEMENT_TYPE: ElementType = ElementType::F32;

  fn wrap(array: ArrayD<f32>) -> TypedArray {
    TypedArray::F32(array)
  }
}

impl Element for i8 {
  const ELEMENT_TYPE: ElementType = ElementType::I8;

  fn wrap(array: ArrayD<i8>) -> TypedArray {
    TypedArray::I8(array)
  }
}

impl Element for u8 {
  const ELEMENT_TYPE: ElementType = ElementType::U8;

  fn wrap(array: ArrayD<u8>) -> TypedArray {
    TypedArray::U8(array)
  }
}

impl TypedArray {
  /// This function builds a typed array from a shape and a row-major buffer
  /// # Arguments
  /// * shape: dimension sizes, empty for a scalar
  /// * data: elements in row-major order
  /// # Returns
  /// The array, or SizeMismatch when data.len() differs from the product of the shape
  pub fn from_shape_vec<T: Element>(shape: Vec<usize>, data: Vec<T>) -> Result<TypedArray> {
    let expected = element_count(&shape);
    let actual = data.len();
    ArrayD::from_shape_vec(IxDyn(&shape), data)
      .map(T::wrap)
      .map_err(|_| RunnerError::SizeMismatch {
        name: format!("{} array of shape {:?}", T::ELEMENT_TYPE, shape),
        expected,
        actual,
      })
  }

  pub fn element_type(&self) -> ElementType {
    match self {
      TypedArray::F32(_) => ElementType::F32,
      TypedArray::I8(_) => ElementType::I8,
      TypedArray::U8(_) => ElementType::U8,
    }
  }

  pub fn shape(&self) -> &[usize] {
    match self {
      TypedArray::F32(a) => a.shape(),
      TypedArray::I8(a) => a.shape(),
      TypedArray::U8(a) => a.shape(),
    }
  }

  pub fn len(&self) -> usize {
    match self {
      TypedArray::F32(a) => a.len(),
      TypedArray::I8(a) => a.len(),
      TypedArray::U8(a) => a.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
    match self {
      TypedArray::F32(a) => Some(a),
      _ => None,
    }
  }

  pub fn as_i8(&self) -> Option<&ArrayD<i8>> {
    match self {
      TypedArray::I8(a) => Some(a),
      _ => None,
    }
  }

  pub fn as_u8(&self) -> Option<&ArrayD<u8>> {
    match self {
      TypedArray::U8(a) => Some(a),
      _ => None,
    }
  }

  /// Row-major copy of the elements converted with the host `as` cast.
  pub fn to_vec_as<D>(&self) -> Vec<D>
  where
    D: Copy + 'static,
    f32: AsPrimitive<D>,
    i8: AsPrimitive<D>,
    u8: AsPrimitive<D>,
  {
    match self {
      TypedArray::F32(a) => a.iter().map(|&v| v.as_()).collect(),
      TypedArray::I8(a) => a.iter().map(|&v| v.as_()).collect(),
      TypedArray::U8(a) => a.iter().map(|&v| v.as_()).collect(),
    }
  }

  /// False for column-major data, e.g. a `.npy` file saved with `fortran_order: True`
  pub fn is_standard_layout(&self) -> bool {
    match self {
      TypedArray::F32(a) => a.is_standard_layout(),
      TypedArray::I8(a) => a.is_standard_layout(),
      TypedArray::U8(a) => a.is_standard_layout(),
    }
  }
}

impl<T: Element> From<ArrayD<T>> for TypedArray {
  fn from(array: ArrayD<T>) -> Self {
    T::wrap(array)
  }
}
