//! Image-processing boundary: bit-depth normalization, demosaic and resize.

use std::io::Cursor;

use bayer::{BayerDepth, Demosaic, RasterDepth, RasterMut};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::trace;

use crate::error::GrabError;
use crate::format::CfaPattern;

/// Color conversion and resampling used to derive the preview product.
pub trait ImageProcessor {
    /// Demosaic an 8-bit single-channel CFA buffer into RGB.
    fn demosaic(
        &self,
        cfa: &[u8],
        width: u32,
        height: u32,
        pattern: CfaPattern,
    ) -> Result<RgbImage, GrabError>;

    /// Resize to exactly `width` x `height` with nearest-neighbor sampling.
    fn resize_nearest(&self, image: &RgbImage, width: u32, height: u32)
        -> Result<RgbImage, GrabError>;
}

/// CPU implementation backed by the `bayer` and `image` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct BayerProcessor;

impl ImageProcessor for BayerProcessor {
    fn demosaic(
        &self,
        cfa: &[u8],
        width: u32,
        height: u32,
        pattern: CfaPattern,
    ) -> Result<RgbImage, GrabError> {
        if width < 2 || height < 2 {
            return Err(GrabError::Processing(format!(
                "cannot demosaic a {width}x{height} frame"
            )));
        }

        let w = width as usize;
        let h = height as usize;
        if cfa.len() < w * h {
            return Err(GrabError::IncompleteBuffer {
                expected: w * h,
                actual: cfa.len(),
            });
        }

        trace!(width, height, ?pattern, "demosaicing preview");

        let mut rgb = vec![0u8; w * h * 3];
        let mut raster = RasterMut::new(w, h, RasterDepth::Depth8, &mut rgb);
        bayer::run_demosaic(
            &mut Cursor::new(cfa),
            BayerDepth::Depth8,
            pattern.to_bayer(),
            Demosaic::Linear,
            &mut raster,
        )
        .map_err(|err| GrabError::Processing(format!("demosaic failed: {err:?}")))?;

        RgbImage::from_raw(width, height, rgb)
            .ok_or_else(|| GrabError::Processing("demosaic output size mismatch".to_owned()))
    }

    fn resize_nearest(
        &self,
        image: &RgbImage,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, GrabError> {
        if width == 0 || height == 0 {
            return Err(GrabError::Processing(format!(
                "cannot resize to {width}x{height}"
            )));
        }
        Ok(imageops::resize(image, width, height, FilterType::Nearest))
    }
}

/// Divide 16-bit samples down to 8 bits, saturating at 255.
#[must_use]
pub fn normalize_to_8bit(samples: &[u16], divisor: u16) -> Vec<u8> {
    let divisor = divisor.max(1);
    samples
        .iter()
        .map(|&sample| u8::try_from(sample / divisor).unwrap_or(u8::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_twelve_bit() {
        let samples = [0u16, 16, 4095, 2048];
        assert_eq!(normalize_to_8bit(&samples, 16), vec![0, 1, 255, 128]);
    }

    #[test]
    fn test_normalize_saturates() {
        // A 16-bit value through a 12-bit divisor would overflow a byte.
        assert_eq!(normalize_to_8bit(&[u16::MAX], 16), vec![255]);
    }

    #[test]
    fn test_normalize_zero_divisor_is_identity() {
        assert_eq!(normalize_to_8bit(&[7, 200], 0), vec![7, 200]);
    }

    #[test]
    fn test_demosaic_output_shape() {
        let cfa = vec![128u8; 8 * 6];
        let rgb = BayerProcessor
            .demosaic(&cfa, 8, 6, CfaPattern::Rggb)
            .expect("demosaic failed");
        assert_eq!(rgb.dimensions(), (8, 6));
        assert_eq!(rgb.as_raw().len(), 8 * 6 * 3);
    }

    #[test]
    fn test_demosaic_flat_field_stays_flat() {
        let cfa = vec![100u8; 16 * 16];
        let rgb = BayerProcessor
            .demosaic(&cfa, 16, 16, CfaPattern::Gbrg)
            .expect("demosaic failed");
        let center = rgb.get_pixel(8, 8);
        assert_eq!(center.0, [100, 100, 100]);
    }

    #[test]
    fn test_demosaic_rejects_short_buffer() {
        let result = BayerProcessor.demosaic(&[0u8; 10], 8, 6, CfaPattern::Bggr);
        assert!(matches!(
            result,
            Err(GrabError::IncompleteBuffer {
                expected: 48,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_resize_exact_dimensions() {
        let image = RgbImage::from_pixel(2048, 1108, image::Rgb([1, 2, 3]));
        let resized = BayerProcessor
            .resize_nearest(&image, 1024, 600)
            .expect("resize failed");
        assert_eq!(resized.dimensions(), (1024, 600));
        assert_eq!(resized.get_pixel(0, 0).0, [1, 2, 3]);
    }

    #[test]
    fn test_resize_upscales_small_input() {
        let image = RgbImage::from_pixel(4, 4, image::Rgb([9, 9, 9]));
        let resized = BayerProcessor
            .resize_nearest(&image, 1024, 600)
            .expect("resize failed");
        assert_eq!(resized.dimensions(), (1024, 600));
    }
}
