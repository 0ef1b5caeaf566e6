use std::io::Cursor;
use std::time::Instant;

use engine_logging::{engine_debug, engine_warn};
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("cannot crop {source_width}x{source_height} raster to {width}x{height}")]
    Crop {
        width: u32,
        height: u32,
        source_width: u32,
        source_height: u32,
    },
    #[error("failed to encode image: {0}")]
    Encode(String),
}

/// Decode, fill-resize, center-crop, and re-encode one image.
///
/// Cancellation is checked before every stage; `None` means the owning token
/// closed and the remaining stages were skipped. CPU-bound, so call it from
/// the blocking pool.
pub fn transform_image(
    bytes: &[u8],
    target_width: u32,
    target_height: u32,
    cancel: &CancellationToken,
) -> Option<Result<Vec<u8>, TransformError>> {
    if cancel.is_cancelled() {
        return None;
    }
    let decode_started = Instant::now();
    let decoded = match image::load_from_memory(bytes) {
        Ok(raster) => raster,
        Err(err) => return Some(Err(TransformError::Decode(err.to_string()))),
    };
    let decode_elapsed = decode_started.elapsed();

    if cancel.is_cancelled() {
        return None;
    }
    let resize_started = Instant::now();
    let resized = if target_width == 0 || target_height == 0 {
        engine_warn!("skipping resize, invalid target {target_width}x{target_height}");
        decoded
    } else {
        let (fill_width, fill_height) = fill_dimensions(
            decoded.width(),
            decoded.height(),
            target_width,
            target_height,
        );
        decoded.resize_exact(fill_width, fill_height, FilterType::Triangle)
    };
    let resize_elapsed = resize_started.elapsed();

    if cancel.is_cancelled() {
        return None;
    }
    let crop_started = Instant::now();
    let cropped = match center_crop(&resized, target_width, target_height) {
        Ok(raster) => raster,
        Err(err) => return Some(Err(err)),
    };
    let crop_elapsed = crop_started.elapsed();

    if cancel.is_cancelled() {
        return None;
    }
    let encode_started = Instant::now();
    let mut encoded = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        Cursor::new(&mut encoded),
        CompressionType::Fast,
        PngFilter::NoFilter,
    );
    if let Err(err) = cropped.write_with_encoder(encoder) {
        return Some(Err(TransformError::Encode(err.to_string())));
    }
    engine_debug!(
        "transform decode/resize/crop/encode took {decode_elapsed:?}/{resize_elapsed:?}/{crop_elapsed:?}/{:?}",
        encode_started.elapsed()
    );

    Some(Ok(encoded))
}

/// Scale so the larger target dimension is met exactly and the other floats,
/// overflowing the target box rather than fitting inside it.
fn fill_dimensions(
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
) -> (u32, u32) {
    if target_width > target_height {
        let height =
            ((source_height as u64 * target_width as u64) / source_width as u64).max(1) as u32;
        (target_width, height)
    } else {
        let width =
            ((source_width as u64 * target_height as u64) / source_height as u64).max(1) as u32;
        (width, target_height)
    }
}

fn center_crop(raster: &DynamicImage, width: u32, height: u32) -> Result<DynamicImage, TransformError> {
    if width == 0 || height == 0 || width > raster.width() || height > raster.height() {
        return Err(TransformError::Crop {
            width,
            height,
            source_width: raster.width(),
            source_height: raster.height(),
        });
    }
    let x = (raster.width() - width) / 2;
    let y = (raster.height() - height) / 2;
    Ok(raster.crop_imm(x, y, width, height))
}
