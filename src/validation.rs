//! Frame product validation.
//!
//! Checks that acquired products have the shape the session was configured for. Used by
//! the integration tests and by the binary's self-check after the first frame.

use image::{Rgb, RgbImage};
use thiserror::Error;

use crate::config::CameraConfig;
use crate::format::BitDepth;
use crate::pipeline::{FramePair, RawFrame, RawSamples};

/// Why a product failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Preview dimensions differ from the configured display size.
    #[error("preview is {actual:?}, expected {expected:?}")]
    PreviewGeometry {
        /// Configured width and height.
        expected: (u32, u32),
        /// Delivered width and height.
        actual: (u32, u32),
    },

    /// Raw dimensions or sample count differ from the configured sensor size.
    #[error("raw frame is {width}x{height} with {samples} samples, expected {expected:?}")]
    RawGeometry {
        /// Configured width and height.
        expected: (u32, u32),
        /// Delivered width.
        width: u32,
        /// Delivered height.
        height: u32,
        /// Delivered sample count.
        samples: usize,
    },

    /// A raw sample exceeds the bit depth's range.
    #[error("sample {index} is {value}, above the {max} limit")]
    SampleOutOfRange {
        /// Position in the sample buffer.
        index: usize,
        /// Offending value.
        value: u16,
        /// Largest representable value.
        max: u16,
    },

    /// The raw container does not match the bit depth.
    #[error("raw container does not hold {0:?} samples")]
    ContainerMismatch(BitDepth),

    /// A preview pixel differs from the expected color.
    #[error("pixel ({x}, {y}) is {actual:?}, expected {expected:?}")]
    ColorMismatch {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Expected color.
        expected: [u8; 3],
        /// Actual color.
        actual: [u8; 3],
    },

    /// The configuration holds a negative dimension.
    #[error("configured geometry is not representable")]
    InvalidConfiguration,
}

/// Validate the preview size.
///
/// # Errors
///
/// [`ValidationError::PreviewGeometry`] if the preview is not `width` x `height`.
pub fn validate_preview(
    preview: &RgbImage,
    width: u32,
    height: u32,
) -> Result<(), ValidationError> {
    let actual = preview.dimensions();
    if actual == (width, height) {
        Ok(())
    } else {
        Err(ValidationError::PreviewGeometry {
            expected: (width, height),
            actual,
        })
    }
}

/// Validate raw dimensions and that exactly one sample exists per pixel.
pub fn validate_raw_geometry(
    raw: &RawFrame,
    width: u32,
    height: u32,
) -> Result<(), ValidationError> {
    let pixels = width as usize * height as usize;
    if raw.width() == width && raw.height() == height && raw.len() == pixels {
        Ok(())
    } else {
        Err(ValidationError::RawGeometry {
            expected: (width, height),
            width: raw.width(),
            height: raw.height(),
            samples: raw.len(),
        })
    }
}

/// Validate that every raw sample fits in `depth` and sits in the matching container.
pub fn validate_sample_range(raw: &RawFrame, depth: BitDepth) -> Result<(), ValidationError> {
    match (raw.samples(), depth) {
        (RawSamples::Eight(_), BitDepth::Eight) => Ok(()),
        (RawSamples::Sixteen(samples), BitDepth::Ten | BitDepth::Twelve) => {
            let max = depth.white_level();
            samples
                .iter()
                .position(|&value| value > max)
                .map_or(Ok(()), |index| {
                    Err(ValidationError::SampleOutOfRange {
                        index,
                        value: samples.get(index).copied().unwrap_or_default(),
                        max,
                    })
                })
        }
        _ => Err(ValidationError::ContainerMismatch(depth)),
    }
}

/// Validate both products of a grab against the session configuration.
pub fn validate_pair(pair: &FramePair, config: &CameraConfig) -> Result<(), ValidationError> {
    let raw_width = u32::try_from(config.width).map_err(|_| ValidationError::InvalidConfiguration)?;
    let raw_height =
        u32::try_from(config.height).map_err(|_| ValidationError::InvalidConfiguration)?;

    validate_preview(&pair.preview, config.preview_width, config.preview_height)?;
    validate_raw_geometry(&pair.raw, raw_width, raw_height)
}

/// Validate that every preview pixel matches `expected` within `tolerance` per channel.
pub fn validate_flat_preview(
    preview: &RgbImage,
    expected: Rgb<u8>,
    tolerance: u8,
) -> Result<(), ValidationError> {
    match preview
        .enumerate_pixels()
        .find(|(_, _, pixel)| !colors_match(**pixel, expected, tolerance))
    {
        None => Ok(()),
        Some((x, y, pixel)) => Err(ValidationError::ColorMismatch {
            x,
            y,
            expected: expected.0,
            actual: pixel.0,
        }),
    }
}

fn colors_match(actual: Rgb<u8>, expected: Rgb<u8>, tolerance: u8) -> bool {
    actual
        .0
        .iter()
        .zip(expected.0)
        .all(|(&a, e)| a.abs_diff(e) <= tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CfaPattern, PixelFormat};
    use crate::imaging::BayerProcessor;
    use crate::pipeline::render_preview;

    fn twelve_bit(width: u32, height: u32, value: u16) -> RawFrame {
        let bytes: Vec<u8> = std::iter::repeat(value.to_le_bytes())
            .take(width as usize * height as usize)
            .flatten()
            .collect();
        RawFrame::copy_from(&bytes, width, height, BitDepth::Twelve).expect("copy failed")
    }

    #[test]
    fn test_validate_pair_success() {
        let config = CameraConfig {
            width: 32,
            height: 16,
            ..CameraConfig::default()
        };
        let raw = twelve_bit(32, 16, 2048);
        let format = PixelFormat {
            pattern: CfaPattern::Gbrg,
            depth: BitDepth::Twelve,
        };
        let preview = render_preview(&raw, format, &BayerProcessor, 1024, 600)
            .expect("render failed");
        let pair = FramePair { preview, raw };

        let result = validate_pair(&pair, &config);
        assert!(result.is_ok(), "pair validation should succeed: {result:?}");
    }

    #[test]
    fn test_validate_preview_wrong_size() {
        let preview = RgbImage::new(640, 480);

        let result = validate_preview(&preview, 1024, 600);
        assert_eq!(
            result,
            Err(ValidationError::PreviewGeometry {
                expected: (1024, 600),
                actual: (640, 480),
            })
        );
    }

    #[test]
    fn test_validate_raw_geometry_mismatch() {
        let raw = twelve_bit(16, 8, 0);

        assert!(validate_raw_geometry(&raw, 16, 8).is_ok());
        assert!(validate_raw_geometry(&raw, 8, 16).is_err());
        assert!(validate_raw_geometry(&RawFrame::empty(), 16, 8).is_err());
    }

    #[test]
    fn test_validate_sample_range() {
        assert!(validate_sample_range(&twelve_bit(4, 4, 4095), BitDepth::Twelve).is_ok());
        assert_eq!(
            validate_sample_range(&twelve_bit(4, 4, 4096), BitDepth::Twelve),
            Err(ValidationError::SampleOutOfRange {
                index: 0,
                value: 4096,
                max: 4095,
            })
        );
        assert!(validate_sample_range(&twelve_bit(4, 4, 1024), BitDepth::Ten).is_err());
        assert_eq!(
            validate_sample_range(&twelve_bit(4, 4, 0), BitDepth::Eight),
            Err(ValidationError::ContainerMismatch(BitDepth::Eight))
        );
    }

    #[test]
    fn test_validate_pair_negative_configuration() {
        let config = CameraConfig {
            width: -1,
            ..CameraConfig::default()
        };

        let result = validate_pair(&FramePair::empty(), &config);
        assert_eq!(result, Err(ValidationError::InvalidConfiguration));
    }

    #[test]
    fn test_validate_flat_preview() {
        let preview = RgbImage::from_pixel(8, 8, Rgb([250, 250, 250]));

        assert!(validate_flat_preview(&preview, Rgb([255, 255, 255]), 5).is_ok());
        assert!(validate_flat_preview(&preview, Rgb([255, 255, 255]), 4).is_err());
    }

    #[test]
    fn test_colors_match_within_tolerance() {
        assert!(colors_match(Rgb([100, 150, 200]), Rgb([105, 155, 205]), 10));
        assert!(!colors_match(Rgb([100, 150, 200]), Rgb([120, 150, 200]), 10));
    }
}
