//! Turning a captured frame into classifier payload.

use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::models::FrameSample;
use crate::sensing::phash::compute_phash;

#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub png: Vec<u8>,
    pub phash: String,
    pub width: u32,
    pub height: u32,
}

/// Downscale to at most `max_width` (aspect kept), fingerprint and
/// PNG-encode. The frame is consumed so its pixel buffer is freed here.
///
/// CPU bound: run it on the blocking pool.
pub fn prepare_frame(
    frame: FrameSample,
    max_width: u32,
) -> Result<PreparedFrame, image::ImageError> {
    let original = DynamicImage::ImageRgba8(frame.pixels);
    let (width, height) = (original.width(), original.height());

    let scaled = if max_width > 0 && width > max_width {
        let scaled_height = ((u64::from(height) * u64::from(max_width)) / u64::from(width.max(1)))
            .clamp(1, u64::from(u32::MAX)) as u32;
        original.resize_exact(max_width, scaled_height, FilterType::Triangle)
    } else {
        original
    };

    let phash = compute_phash(&scaled);
    let rgb = DynamicImage::ImageRgb8(scaled.to_rgb8());
    drop(scaled);

    let mut png = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    Ok(PreparedFrame {
        png,
        phash,
        width: rgb.width(),
        height: rgb.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::RgbaImage;

    #[test]
    fn downscales_wide_frames_keeping_aspect() {
        let frame = FrameSample::new(RgbaImage::new(1440, 900), Utc::now());
        let prepared = prepare_frame(frame, 720).unwrap();
        assert_eq!((prepared.width, prepared.height), (720, 450));
        assert!(prepared.png.starts_with(&[0x89, b'P', b'N', b'G']));
        assert!(!prepared.phash.is_empty());
    }

    #[test]
    fn leaves_small_frames_alone() {
        let frame = FrameSample::new(RgbaImage::new(320, 200), Utc::now());
        let prepared = prepare_frame(frame, 720).unwrap();
        assert_eq!((prepared.width, prepared.height), (320, 200));
    }
}
