use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::Path;
use ndarray::ArrayD;
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement};
use tracing::debug;

use crate::error::{Result, RunnerError};
use crate::tensor_io::element::{ElementType, TypedArray};

/// This function loads a `.npy` file as an array of the requested element type
/// # Arguments
/// * path: file to read
/// * requested: element type of the returned array
/// # Returns
/// The array; float64 files requested as float32 are narrowed element-wise and
/// 1-byte files are reinterpreted between int8 and uint8
pub fn read_npy<P: AsRef<Path>>(path: P, requested: ElementType) -> Result<TypedArray> {
  let path = path.as_ref();
  let mut reader = BufReader::new(File::open(path)?);
  let array = read_from(&mut reader, requested)?;
  debug!(path = %path.display(), shape = ?array.shape(), element_type = %array.element_type(),
         "loaded tensor file");
  Ok(array)
}

/// Loads a `.npy` file in its own element type; float64 is narrowed to float32.
pub fn read_npy_native<P: AsRef<Path>>(path: P) -> Result<TypedArray> {
  let path = path.as_ref();
  let bytes = read_all(&mut BufReader::new(File::open(path)?))?;
  let array = match try_read::<f32>(&bytes)? {
    Some(a) => TypedArray::F32(a),
    None => match try_read::<f64>(&bytes)? {
      Some(a) => TypedArray::F32(a.mapv(|v| v as f32)),
      None => match try_read::<i8>(&bytes)? {
        Some(a) => TypedArray::I8(a),
        None => try_read::<u8>(&bytes)?.map(TypedArray::U8).ok_or_else(|| RunnerError::UnsupportedType(
          format!("{}: element type is not float32, float64, int8 or uint8", path.display())))?,
      },
    },
  };
  let array = row_major(array)?;
  debug!(path = %path.display(), shape = ?array.shape(), element_type = %array.element_type(),
         "loaded tensor file");
  Ok(array)
}

/// Same as `read_npy`, from any byte source positioned at the magic string
pub fn read_from<R: Read>(reader: &mut R, requested: ElementType) -> Result<TypedArray> {
  let bytes = read_all(reader)?;
  let array = match requested {
    ElementType::F32 => match try_read::<f32>(&bytes)? {
      Some(a) => Some(TypedArray::F32(a)),
      None => try_read::<f64>(&bytes)?.map(|a| TypedArray::F32(a.mapv(|v| v as f32))),
    },
    ElementType::I8 => match try_read::<i8>(&bytes)? {
      Some(a) => Some(TypedArray::I8(a)),
      None => try_read::<u8>(&bytes)?.map(|a| TypedArray::I8(a.mapv(|v| v as i8))),
    },
    ElementType::U8 => match try_read::<u8>(&bytes)? {
      Some(a) => Some(TypedArray::U8(a)),
      None => try_read::<i8>(&bytes)?.map(|a| TypedArray::U8(a.mapv(|v| v as u8))),
    },
  };
  let array = array.ok_or_else(|| RunnerError::UnsupportedType(
    format!("stored element type cannot be loaded as {}", requested)))?;
  row_major(array)
}

fn read_all<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
  let mut bytes = Vec::new();
  reader.read_to_end(&mut bytes)?;
  Ok(bytes)
}

// None when the header describes another element type
fn try_read<T: ReadableElement>(bytes: &[u8]) -> Result<Option<ArrayD<T>>> {
  match ArrayD::<T>::read_npy(bytes) {
    Ok(array) => Ok(Some(array)),
    Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
    Err(err) => Err(read_error(err)),
  }
}

fn row_major(array: TypedArray) -> Result<TypedArray> {
  if !array.is_standard_layout() {
    return Err(RunnerError::Format("column-major (fortran_order) arrays are not supported".to_string()));
  }
  Ok(array)
}

/// This function classifies a codec error
/// # Arguments
/// * err: error returned by ndarray-npy while decoding an in-memory file
/// # Returns
/// Io for a payload shorter than the header declares, Format for everything else.
/// The whole file is already in memory, so an io error here means the header itself is cut short.
fn read_error(err: ReadNpyError) -> RunnerError {
  match err {
    ReadNpyError::MissingData => RunnerError::Io(io::Error::new(
      ErrorKind::UnexpectedEof, "payload is shorter than the header declares")),
    other => RunnerError::Format(format!("invalid .npy file: {}", other)),
  }
}
