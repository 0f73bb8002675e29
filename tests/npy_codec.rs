use ndarray::{ArrayD, IxDyn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use onnx_rusty_runner::tensor_io::{read_npy, read_npy_native, write_npy, ElementType, TypedArray};
use onnx_rusty_runner::tensor_io::writer::to_bytes;
use onnx_rusty_runner::RunnerError;

const ARRAY_ALIGN: usize = 64;
const SHAPES: [&[usize]; 4] = [&[], &[5], &[2, 3], &[1, 4, 4, 3]];

fn random_arrays(rng: &mut SmallRng, shape: &[usize]) -> Vec<TypedArray> {
  let n: usize = shape.iter().product();
  vec![
    TypedArray::from_shape_vec(shape.to_vec(), (0..n).map(|_| rng.gen_range(-1000.0f32..1000.0)).collect()).unwrap(),
    TypedArray::from_shape_vec(shape.to_vec(), (0..n).map(|_| rng.gen::<i8>()).collect()).unwrap(),
    TypedArray::from_shape_vec(shape.to_vec(), (0..n).map(|_| rng.gen::<u8>()).collect()).unwrap(),
  ]
}

#[test]
fn round_trips_every_type_and_shape() {
  let dir = tempfile::tempdir().unwrap();
  let mut rng = SmallRng::seed_from_u64(17);

  for shape in SHAPES {
    for array in random_arrays(&mut rng, shape) {
      let path = dir.path().join(format!("{}_{}.npy", array.element_type(), shape.len()));
      write_npy(&path, &array).unwrap();

      let back = read_npy(&path, array.element_type()).unwrap();
      assert_eq!(back, array);
      assert_eq!(back.shape(), shape);
      assert_eq!(read_npy_native(&path).unwrap(), array);

      // writing what was read gives the same bytes
      let bytes = std::fs::read(&path).unwrap();
      assert_eq!(to_bytes(&back).unwrap(), bytes);
      let payload = array.len() * array.element_type().width();
      assert_eq!((bytes.len() - payload) % ARRAY_ALIGN, 0);
    }
  }
}

#[test]
fn reads_files_written_by_ndarray_npy() {
  let dir = tempfile::tempdir().unwrap();
  let mut rng = SmallRng::seed_from_u64(3);

  let floats = ArrayD::from_shape_fn(IxDyn(&[2, 3, 4]), |_| rng.gen::<f32>());
  let path = dir.path().join("floats.npy");
  ndarray_npy::write_npy(&path, &floats).unwrap();
  assert_eq!(read_npy(&path, ElementType::F32).unwrap(), TypedArray::F32(floats));

  let doubles = ArrayD::from_shape_fn(IxDyn(&[7]), |i| i[0] as f64 / 3.0);
  let path = dir.path().join("doubles.npy");
  ndarray_npy::write_npy(&path, &doubles).unwrap();
  let narrowed = read_npy(&path, ElementType::F32).unwrap();
  assert_eq!(narrowed, TypedArray::F32(doubles.mapv(|v| v as f32)));

  let bytes = ArrayD::from_shape_fn(IxDyn(&[4, 4]), |i| (i[0] * 4 + i[1]) as u8);
  let path = dir.path().join("bytes.npy");
  ndarray_npy::write_npy(&path, &bytes).unwrap();
  assert_eq!(read_npy_native(&path).unwrap(), TypedArray::U8(bytes));
}

#[test]
fn ndarray_npy_reads_our_files() {
  let dir = tempfile::tempdir().unwrap();
  let array = TypedArray::from_shape_vec(vec![1, 4, 4, 3], (0..48).map(|v| v as f32 * 0.25).collect()).unwrap();
  let path = dir.path().join("ours.npy");
  write_npy(&path, &array).unwrap();

  let read: ArrayD<f32> = ndarray_npy::read_npy(&path).unwrap();
  assert_eq!(Some(&read), array.as_f32());

  let signed = TypedArray::from_shape_vec(vec![3], vec![-128i8, 0, 127]).unwrap();
  let path = dir.path().join("signed.npy");
  write_npy(&path, &signed).unwrap();
  let read: ArrayD<i8> = ndarray_npy::read_npy(&path).unwrap();
  assert_eq!(read.into_raw_vec(), vec![-128, 0, 127]);
}

#[test]
fn rejects_files_that_are_not_npy() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("bogus.npy");
  std::fs::write(&path, b"PK\x03\x04 definitely a zip archive").unwrap();
  assert!(matches!(read_npy(&path, ElementType::F32), Err(RunnerError::Format(_))));

  std::fs::write(&path, b"\x93NUM").unwrap();
  assert!(matches!(read_npy(&path, ElementType::F32), Err(RunnerError::Format(_))));
}

#[test]
fn truncated_payload_is_an_io_error() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("short.npy");
  let array = TypedArray::from_shape_vec(vec![8], vec![1.0f32; 8]).unwrap();
  let mut bytes = to_bytes(&array).unwrap();
  bytes.truncate(bytes.len() - 3);
  std::fs::write(&path, bytes).unwrap();
  assert!(matches!(read_npy(&path, ElementType::F32), Err(RunnerError::Io(_))));
}
