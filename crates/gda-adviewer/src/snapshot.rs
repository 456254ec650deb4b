//! PNG snapshots of the displayed frame.

use gda_core::{GdaError, Result};
use image::{GrayImage, Luma};
use ndarray::Array2;
use std::path::Path;
use tracing::info;

use crate::range::DisplayRange;

/// Maps `[range.min, range.max]` onto 0..=255, clamping values outside it.
/// Non-finite pixels render black.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn to_gray_image(grid: &Array2<f64>, range: DisplayRange) -> Result<GrayImage> {
    let (rows, cols) = grid.dim();
    let width = u32::try_from(cols).map_err(|_| GdaError::Processing("frame too wide".into()))?;
    let height = u32::try_from(rows).map_err(|_| GdaError::Processing("frame too tall".into()))?;
    let lo = range.min as f64;
    let span = (range.max - range.min) as f64;

    Ok(GrayImage::from_fn(width, height, |x, y| {
        let v = grid[[y as usize, x as usize]];
        if !v.is_finite() {
            return Luma([0]);
        }
        let scaled = ((v - lo) / span * 255.0).round().clamp(0.0, 255.0);
        Luma([scaled as u8])
    }))
}

/// Writes the frame as an 8-bit grayscale PNG.
pub fn save_png(grid: &Array2<f64>, range: DisplayRange, path: &Path) -> Result<()> {
    let image = to_gray_image(grid, range)?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| GdaError::Storage(format!("cannot write {}: {e}", path.display())))?;
    info!(path = %path.display(), width = image.width(), height = image.height(), "saved snapshot");
    Ok(())
}
