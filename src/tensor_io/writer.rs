use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use ndarray_npy::{WriteNpyError, WriteNpyExt};
use tracing::debug;

use crate::error::{Result, RunnerError};
use crate::tensor_io::element::TypedArray;

/// This function saves an array as a row-major `.npy` file
/// # Arguments
/// * path: destination, overwritten if it exists; its directory must already exist
/// * array: array to serialize
pub fn write_npy<P: AsRef<Path>>(path: P, array: &TypedArray) -> Result<()> {
  let path = path.as_ref();
  let mut writer = BufWriter::new(File::create(path)?);
  write_to(&mut writer, array)?;
  // dropping a BufWriter swallows the last write error
  writer.flush()?;
  debug!(path = %path.display(), shape = ?array.shape(), element_type = %array.element_type(),
         "saved tensor file");
  Ok(())
}

/// Writes header and payload to any byte sink
pub fn write_to<W: Write>(writer: &mut W, array: &TypedArray) -> Result<()> {
  let written = match array {
    TypedArray::F32(a) => a.write_npy(&mut *writer),
    TypedArray::I8(a) => a.write_npy(&mut *writer),
    TypedArray::U8(a) => a.write_npy(&mut *writer),
  };
  written.map_err(write_error)
}

pub fn to_bytes(array: &TypedArray) -> Result<Vec<u8>> {
  let mut bytes = Vec::new();
  write_to(&mut bytes, array)?;
  Ok(bytes)
}

fn write_error(err: WriteNpyError) -> RunnerError {
  match err {
    WriteNpyError::Io(e) => RunnerError::Io(e),
    other => RunnerError::Format(format!("cannot encode .npy file: {}", other)),
  }
}
