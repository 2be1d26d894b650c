use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

/// Perceptual fingerprint of a frame, base64 encoded.
pub fn compute_phash(image: &DynamicImage) -> String {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();

    hasher.hash_image(image).to_base64()
}

/// Bit distance between two fingerprints; `u32::MAX` if either is unreadable.
pub fn compute_hamming_distance(lhs: &str, rhs: &str) -> u32 {
    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(lhs) else {
        return u32::MAX;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(rhs) else {
        return u32::MAX;
    };
    h1.dist(&h2)
}

/// Remembers the fingerprint of the last classified frame so an unchanged
/// screen is not sent again while its verdict is still fresh.
#[derive(Debug)]
pub struct UnchangedFrameFilter {
    threshold: u32,
    reuse_for: std::time::Duration,
    last: Option<(String, std::time::Instant)>,
}

impl UnchangedFrameFilter {
    pub fn new(threshold: u32, reuse_for: std::time::Duration) -> Self {
        Self {
            threshold,
            reuse_for,
            last: None,
        }
    }

    pub fn is_unchanged(&self, phash: &str, now: std::time::Instant) -> bool {
        match &self.last {
            Some((previous, at)) => {
                now.saturating_duration_since(*at) < self.reuse_for
                    && compute_hamming_distance(previous, phash) <= self.threshold
            }
            None => false,
        }
    }

    pub fn remember(&mut self, phash: String, now: std::time::Instant) {
        self.last = Some((phash, now));
    }

    pub fn forget(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::time::{Duration, Instant};

    fn checkerboard(cell: u32) -> DynamicImage {
        let img = RgbaImage::from_fn(64, 64, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn identical_frames_have_zero_distance() {
        let a = compute_phash(&checkerboard(8));
        let b = compute_phash(&checkerboard(8));
        assert_eq!(compute_hamming_distance(&a, &b), 0);
        assert_eq!(compute_hamming_distance(&a, "not base64!"), u32::MAX);
    }

    #[test]
    fn unchanged_filter_expires() {
        let mut filter = UnchangedFrameFilter::new(4, Duration::from_secs(30));
        let hash = compute_phash(&checkerboard(8));
        let t0 = Instant::now();
        assert!(!filter.is_unchanged(&hash, t0));

        filter.remember(hash.clone(), t0);
        assert!(filter.is_unchanged(&hash, t0 + Duration::from_secs(5)));
        assert!(!filter.is_unchanged(&hash, t0 + Duration::from_secs(31)));

        filter.forget();
        assert!(!filter.is_unchanged(&hash, t0 + Duration::from_secs(5)));
    }
}
