//! Image loading, tensor conversion, and stylized output export
//!
//! Pixels travel as `[1, height, width, 3]` tensors of `f32` in `[0, 1]`.
//! Both inputs are resized to a common working resolution on load; export
//! clamps before quantizing so an optimizer overshoot can never wrap.

use crate::io::error::{Result, StyleError};
use image::imageops::FilterType;
use image::{ImageBuffer, Rgb};
use ndarray::Array4;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Mean of the Gaussian noise used to seed a fresh canvas
const NOISE_MEAN: f32 = 0.5;
/// Standard deviation of the canvas seeding noise
const NOISE_STDDEV: f32 = 1.0;

/// Load an image and convert it to a normalized feature tensor
///
/// The image is resized to exactly `height` by `width` with triangle
/// filtering, discarding aspect ratio so every tensor in a run shares one
/// shape.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or decoded.
pub fn load_image_tensor(path: &Path, height: usize, width: usize) -> Result<Array4<f32>> {
    let decoded = image::open(path).map_err(|e| StyleError::ImageLoad {
        path: path.to_path_buf(),
        source: e,
    })?;
    let resized = decoded
        .resize_exact(width as u32, height as u32, FilterType::Triangle)
        .to_rgb8();

    let mut tensor = Array4::zeros((1, height, width, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for (channel, &value) in pixel.0.iter().enumerate() {
            if let Some(slot) = tensor.get_mut([0, y as usize, x as usize, channel]) {
                *slot = f32::from(value) / 255.0;
            }
        }
    }
    Ok(tensor)
}

/// Export a canvas tensor as an image file, creating parent directories
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created or the image
/// cannot be encoded and written.
pub fn export_image_tensor(canvas: &Array4<f32>, output_path: &Path) -> Result<()> {
    let (_, height, width, _) = canvas.dim();
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            let channel = |c: usize| {
                let value = canvas
                    .get([0, y as usize, x as usize, c])
                    .copied()
                    .unwrap_or(0.0);
                (value.clamp(0.0, 1.0) * 255.0).round() as u8
            };
            Rgb([channel(0), channel(1), channel(2)])
        });

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StyleError::FileSystem {
                path: parent.to_path_buf(),
                operation: "create directory",
                source: e,
            })?;
        }
    }

    img.save(output_path).map_err(|e| StyleError::ImageExport {
        path: output_path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

/// Seed a fresh canvas with clamped Gaussian noise around mid-gray
///
/// Uses the Box-Muller transform over a seeded generator so identical seeds
/// reproduce identical canvases.
pub fn noise_canvas(height: usize, width: usize, seed: u64) -> Array4<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array4::from_shape_simple_fn((1, height, width, 3), move || {
        let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
        let u2: f64 = rng.random();
        let sample = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        NOISE_STDDEV.mul_add(sample as f32, NOISE_MEAN).clamp(0.0, 1.0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use tempfile::tempdir;

    fn scratch_dir() -> tempfile::TempDir {
        tempdir().unwrap_or_else(|e| unreachable!("tempdir failed: {e}"))
    }

    #[test]
    fn test_export_then_load_round_trips_within_quantization() {
        let dir = scratch_dir();
        let path = dir.path().join("canvas.png");

        let mut canvas = Array4::zeros((1, 6, 8, 3));
        canvas.indexed_iter_mut().for_each(|((_, y, x, c), v)| {
            *v = ((y * 8 + x + c) as f32 / 160.0).clamp(0.0, 1.0);
        });

        export_image_tensor(&canvas, &path)
            .unwrap_or_else(|e| unreachable!("export failed: {e}"));
        let reloaded =
            load_image_tensor(&path, 6, 8).unwrap_or_else(|e| unreachable!("load failed: {e}"));

        assert_eq!(reloaded.dim(), canvas.dim());
        let max_error = (&reloaded - &canvas)
            .mapv(f32::abs)
            .iter()
            .fold(0.0_f32, |acc, &v| acc.max(v));
        // One quantization step of headroom
        assert!(max_error <= 1.5 / 255.0, "round trip error {max_error}");
    }

    #[test]
    fn test_export_clamps_out_of_range_values() {
        let dir = scratch_dir();
        let path = dir.path().join("clamped.png");

        let mut canvas = Array4::zeros((1, 2, 2, 3));
        canvas.fill(2.0);
        export_image_tensor(&canvas, &path)
            .unwrap_or_else(|e| unreachable!("export failed: {e}"));

        let reloaded =
            load_image_tensor(&path, 2, 2).unwrap_or_else(|e| unreachable!("load failed: {e}"));
        assert!(reloaded.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_export_creates_missing_parent_directories() {
        let dir = scratch_dir();
        let path = dir.path().join("nested").join("deep").join("out.png");
        let canvas = Array4::from_elem((1, 2, 2, 3), 0.5);
        export_image_tensor(&canvas, &path)
            .unwrap_or_else(|e| unreachable!("export failed: {e}"));
        assert!(path.exists());
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let result = load_image_tensor(Path::new("/nonexistent/missing.png"), 4, 4);
        assert!(matches!(result, Err(StyleError::ImageLoad { .. })));
    }

    #[test]
    fn test_noise_canvas_is_seeded_and_in_range() {
        let a = noise_canvas(16, 16, 42);
        let b = noise_canvas(16, 16, 42);
        let c = noise_canvas(16, 16, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|&v| (0.0..=1.0).contains(&v)));
        let mean = a.sum() / a.len() as f32;
        assert!((mean - 0.5).abs() < 0.1, "noise mean drifted: {mean}");
    }
}
