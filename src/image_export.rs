use std::path::Path;
use image::{ColorType, ImageFormat};
use tracing::info;

use crate::error::{Result, RunnerError};

/// Extents of an image-like tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDims {
  pub width: usize,
  pub height: usize,
  pub channels: usize,
}

/// This function maps float values to 8-bit pixels
/// # Arguments
/// * data: the values of a float32 tensor
/// # Returns
/// A constant tensor becomes mid-gray (128). Otherwise values already in [0, 1] are
/// scaled by 255, values in [0, 255] are rounded and anything else is min-max scaled.
pub fn normalize_to_u8(data: &[f32]) -> Vec<u8> {
  if data.is_empty() {
    return Vec::new();
  }

  let (min, max) = data.iter()
    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

  let range = max - min;
  if range < 1e-6 {
    return vec![128; data.len()];
  }
  if min >= 0.0 && max <= 1.0 {
    return data.iter().map(|&v| (v * 255.0) as u8).collect();
  }
  if min >= 0.0 && max <= 255.0 {
    return data.iter().map(|&v| v.round() as u8).collect();
  }
  data.iter().map(|&v| ((v - min) / range * 255.0) as u8).collect()
}

/// Reads width, height and channels out of an NHWC (batch 1), HWC or HW shape.
/// None when the shape does not look like an image.
pub fn image_dims(shape: &[usize]) -> Option<ImageDims> {
  let (height, width, channels) = match *shape {
    [1, h, w, c] => (h, w, c),
    [h, w, c] => (h, w, c),
    [h, w] => (h, w, 1),
    _ => return None,
  };
  if !matches!(channels, 1 | 3 | 4) {
    return None;
  }
  Some(ImageDims { width, height, channels })
}

/// This function writes a float tensor as a PNG image
/// # Arguments
/// * path: destination file
/// * data: row-major HWC values
/// * width, height, channels: image extents, channels in {1, 3, 4}
pub fn save_png<P: AsRef<Path>>(path: P, data: &[f32], width: usize, height: usize, channels: usize) -> Result<()> {
  let path = path.as_ref();
  if width == 0 || height == 0 {
    return Err(RunnerError::InvalidArgument(format!("invalid image size {}x{}", width, height)));
  }
  let color = match channels {
    1 => ColorType::L8,
    3 => ColorType::Rgb8,
    4 => ColorType::Rgba8,
    c => return Err(RunnerError::InvalidArgument(format!("unsupported channel count {}", c))),
  };
  let expected = width * height * channels;
  if data.len() != expected {
    return Err(RunnerError::InvalidArgument(
      format!("image data has {} values, {}x{}x{} needs {}", data.len(), width, height, channels, expected)));
  }
  let (w, h) = match (u32::try_from(width), u32::try_from(height)) {
    (Ok(w), Ok(h)) => (w, h),
    _ => return Err(RunnerError::InvalidArgument(format!("image size {}x{} too large", width, height))),
  };

  let pixels = normalize_to_u8(data);
  image::save_buffer_with_format(path, &pixels, w, h, color, ImageFormat::Png)?;
  info!(path = %path.display(), width, height, channels, "saved PNG");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn constant_tensor_becomes_mid_gray() {
    assert_eq!(normalize_to_u8(&[7.0; 4]), vec![128; 4]);
    assert_eq!(normalize_to_u8(&[0.25; 3]), vec![128; 3]);
    assert_eq!(normalize_to_u8(&[-40.0; 2]), vec![128; 2]);
    assert!(normalize_to_u8(&[]).is_empty());
  }

  #[test]
  fn min_max_scaling_spans_the_full_range() {
    assert_eq!(normalize_to_u8(&[-2.0, 3.0]), vec![0, 255]);
    assert_eq!(normalize_to_u8(&[-1.0, 0.0, 1.0]), vec![0, 127, 255]);
  }

  #[test]
  fn unit_and_byte_ranges_are_kept() {
    assert_eq!(normalize_to_u8(&[0.0, 0.5, 1.0]), vec![0, 127, 255]);
    assert_eq!(normalize_to_u8(&[0.0, 10.4, 10.6, 255.0]), vec![0, 10, 11, 255]);
  }

  #[test]
  fn derives_dims_from_common_layouts() {
    assert_eq!(image_dims(&[1, 4, 6, 3]), Some(ImageDims { width: 6, height: 4, channels: 3 }));
    assert_eq!(image_dims(&[4, 6, 4]), Some(ImageDims { width: 6, height: 4, channels: 4 }));
    assert_eq!(image_dims(&[4, 6]), Some(ImageDims { width: 6, height: 4, channels: 1 }));
    assert_eq!(image_dims(&[1, 1000]), Some(ImageDims { width: 1000, height: 1, channels: 1 }));
    assert_eq!(image_dims(&[2, 4, 6, 3]), None);
    assert_eq!(image_dims(&[4, 6, 2]), None);
    assert_eq!(image_dims(&[10]), None);
  }

  #[test]
  fn writes_a_readable_png() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.png");
    let data: Vec<f32> = (0..2 * 3 * 3).map(|v| v as f32 / 17.0).collect();
    save_png(&path, &data, 3, 2, 3).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
  }

  #[test]
  fn rejects_bad_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.png");
    assert!(matches!(save_png(&path, &[], 0, 2, 1), Err(RunnerError::InvalidArgument(_))));
    assert!(matches!(save_png(&path, &[0.0; 5], 2, 2, 1), Err(RunnerError::InvalidArgument(_))));
    assert!(matches!(save_png(&path, &[0.0; 4], 2, 1, 2), Err(RunnerError::InvalidArgument(_))));
    assert!(!path.exists());
  }
}
