//! Frame acquisition: one grab result in, a raw product and a preview product out.

use std::borrow::Cow;

use image::RgbImage;
use tracing::debug;

use crate::error::GrabError;
use crate::format::{BitDepth, PixelFormat};
use crate::imaging::{normalize_to_8bit, ImageProcessor};
use crate::session::DeviceSession;
use crate::traits::{params, CameraDevice, SdkError, Transport};

/// Sample storage of a raw frame, in the container the sensor format declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSamples {
    /// One byte per sample.
    Eight(Vec<u8>),
    /// One 16-bit word per sample, bit pattern as delivered.
    Sixteen(Vec<u16>),
}

/// Full-resolution single-channel CFA data, never rescaled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    width: u32,
    height: u32,
    samples: RawSamples,
}

impl RawFrame {
    /// A frame with no samples.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            samples: RawSamples::Eight(Vec::new()),
        }
    }

    /// Copy `width` x `height` samples out of a device buffer.
    ///
    /// Rows must be packed back to back; backends strip any row padding before handing
    /// the buffer over. Multi-byte samples are read little-endian and kept bit for bit.
    /// Trailing bytes after the last row are ignored.
    ///
    /// # Errors
    ///
    /// [`GrabError::IncompleteBuffer`] if the buffer is shorter than the frame.
    pub fn copy_from(
        buffer: &[u8],
        width: u32,
        height: u32,
        depth: BitDepth,
    ) -> Result<Self, GrabError> {
        let expected = width as usize * height as usize * depth.container_bytes();
        let bytes = buffer.get(..expected).ok_or(GrabError::IncompleteBuffer {
            expected,
            actual: buffer.len(),
        })?;

        let samples = match depth {
            BitDepth::Eight => RawSamples::Eight(bytes.to_vec()),
            BitDepth::Ten | BitDepth::Twelve => RawSamples::Sixteen(
                bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect(),
            ),
        };

        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Sample storage.
    #[must_use]
    pub const fn samples(&self) -> &RawSamples {
        &self.samples
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.samples {
            RawSamples::Eight(data) => data.len(),
            RawSamples::Sixteen(data) => data.len(),
        }
    }

    /// Whether the frame holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The samples re-serialized exactly as the device delivered them.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.samples {
            RawSamples::Eight(data) => data.clone(),
            RawSamples::Sixteen(data) => data.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }
}

/// The two products of one acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePair {
    /// Resized 8-bit RGB image for live display.
    pub preview: RgbImage,
    /// Unscaled sensor data for storage.
    pub raw: RawFrame,
}

impl FramePair {
    /// The "no frame" pair returned on every acquisition failure.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            preview: RgbImage::new(0, 0),
            raw: RawFrame::empty(),
        }
    }

    /// Whether both products are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.preview.is_empty() && self.raw.is_empty()
    }
}

/// Grab one frame from a streaming session and derive both products.
///
/// Blocks for at most the configured grab timeout. Each call is independent; a failure
/// leaves the session ready for the next call.
///
/// # Arguments
///
/// * `session` - Session that must be open and streaming
/// * `processor` - Demosaic and resize implementation used for the preview
///
/// # Returns
///
/// The unscaled raw frame and the preview at the configured display size.
///
/// # Errors
///
/// * [`GrabError::NotStreaming`] - The session is closed or not streaming
/// * [`GrabError::Timeout`] - No frame arrived within the grab timeout
/// * [`GrabError::DeviceReportedFailure`] - The device flagged the grab as failed
/// * [`GrabError::UnsupportedFormat`] - The pixel format is not 8, 10 or 12-bit Bayer
/// * [`GrabError::IncompleteBuffer`] - The buffer is shorter than the frame
/// * Any processing or SDK error raised while rendering the preview
pub fn acquire<T, P>(
    session: &mut DeviceSession<T>,
    processor: &P,
) -> Result<FramePair, GrabError>
where
    T: Transport,
    P: ImageProcessor + ?Sized,
{
    if !session.is_streaming() {
        return Err(GrabError::NotStreaming);
    }

    let config = session.config();
    let timeout = config.grab_timeout();
    let (preview_width, preview_height) = (config.preview_width, config.preview_height);

    let device = session.open_device_mut().ok_or(GrabError::NotStreaming)?;
    // Pixel format is locked while streaming, so reading it ahead of the grab is equivalent.
    let identifier = device.get_enum(params::PIXEL_FORMAT)?;

    let result = device.retrieve_result(timeout).map_err(|err| match err {
        SdkError::Timeout(_) => GrabError::Timeout,
        other => GrabError::Sdk(other),
    })?;

    if !result.succeeded {
        return Err(GrabError::DeviceReportedFailure {
            code: result.error_code,
            description: result.error_description,
        });
    }

    let format = PixelFormat::resolve(&identifier)?;
    let raw = RawFrame::copy_from(result.buffer, result.width, result.height, format.depth)?;
    let preview = render_preview(&raw, format, processor, preview_width, preview_height)?;

    debug!(
        width = raw.width(),
        height = raw.height(),
        format = %identifier,
        "frame acquired"
    );
    Ok(FramePair { preview, raw })
}

/// Normalize to 8 bits, demosaic and resize a raw frame for display.
///
/// # Errors
///
/// Whatever the processor reports for the demosaic or the resize.
pub fn render_preview<P>(
    raw: &RawFrame,
    format: PixelFormat,
    processor: &P,
    width: u32,
    height: u32,
) -> Result<RgbImage, GrabError>
where
    P: ImageProcessor + ?Sized,
{
    let cfa: Cow<'_, [u8]> = match raw.samples() {
        RawSamples::Eight(data) => Cow::Borrowed(data.as_slice()),
        RawSamples::Sixteen(data) => {
            Cow::Owned(normalize_to_8bit(data, format.depth.normalization_divisor()))
        }
    };

    let rgb = processor.demosaic(&cfa, raw.width(), raw.height(), format.pattern)?;
    processor.resize_nearest(&rgb, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use crate::format::CfaPattern;
    use crate::imaging::BayerProcessor;
    use crate::mock::{MockGrab, MockHandle, MockParam, MockTransport, TestPattern};
    use serial_test::serial;

    fn streaming_session(width: i64, height: i64) -> (DeviceSession<MockTransport>, MockHandle) {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let config = CameraConfig {
            width,
            height,
            ..CameraConfig::default()
        };
        let mut session = DeviceSession::new(transport, config).expect("new failed");
        session.initialize().expect("initialize failed");
        (session, handle)
    }

    fn twelve_bit_ramp(width: usize, height: usize) -> Vec<u8> {
        (0..width * height)
            .flat_map(|i| {
                #[allow(clippy::cast_possible_truncation)]
                let sample = ((i * 37) % 4096) as u16;
                sample.to_le_bytes()
            })
            .collect()
    }

    #[test]
    fn test_raw_copy_is_bit_identical() {
        let input = twelve_bit_ramp(16, 8);
        let raw = RawFrame::copy_from(&input, 16, 8, BitDepth::Twelve).expect("copy failed");

        assert_eq!(raw.len(), 16 * 8);
        assert_eq!(raw.to_bytes(), input);
    }

    #[test]
    fn test_raw_copy_keeps_eight_bit_container() {
        let input: Vec<u8> = (0..=255).collect();
        let raw = RawFrame::copy_from(&input, 16, 16, BitDepth::Eight).expect("copy failed");
        assert_eq!(raw.samples(), &RawSamples::Eight(input));
    }

    #[test]
    fn test_raw_copy_rejects_short_buffer() {
        let result = RawFrame::copy_from(&[0u8; 100], 16, 8, BitDepth::Ten);
        assert!(matches!(
            result,
            Err(GrabError::IncompleteBuffer {
                expected: 256,
                actual: 100
            })
        ));
    }

    #[test]
    fn test_preview_size_independent_of_sensor_size() {
        for (width, height) in [(64u32, 48u32), (2048, 1108), (1500, 1500)] {
            let input = vec![0u8; width as usize * height as usize * 2];
            let raw = RawFrame::copy_from(&input, width, height, BitDepth::Twelve)
                .expect("copy failed");
            let format = PixelFormat {
                pattern: CfaPattern::Gbrg,
                depth: BitDepth::Twelve,
            };
            let preview = render_preview(&raw, format, &BayerProcessor, 1024, 600)
                .expect("preview failed");
            assert_eq!(preview.dimensions(), (1024, 600));
            assert_eq!(preview.as_raw().len(), 1024 * 600 * 3);
        }
    }

    #[test]
    fn test_preview_scales_twelve_bit_to_eight() {
        let input: Vec<u8> = std::iter::repeat(4000u16.to_le_bytes())
            .take(32 * 32)
            .flatten()
            .collect();
        let raw = RawFrame::copy_from(&input, 32, 32, BitDepth::Twelve).expect("copy failed");
        let format = PixelFormat {
            pattern: CfaPattern::Rggb,
            depth: BitDepth::Twelve,
        };
        let preview =
            render_preview(&raw, format, &BayerProcessor, 1024, 600).expect("preview failed");
        // 4000 / 16 = 250 on every channel of a flat field.
        assert_eq!(preview.get_pixel(512, 300).0, [250, 250, 250]);
    }

    #[test]
    #[serial]
    fn test_acquire_produces_both_products() {
        let (mut session, _handle) = streaming_session(128, 96);

        let pair = acquire(&mut session, &BayerProcessor).expect("acquire failed");

        assert_eq!(pair.preview.dimensions(), (1024, 600));
        assert_eq!((pair.raw.width(), pair.raw.height()), (128, 96));
        assert!(matches!(pair.raw.samples(), RawSamples::Sixteen(_)));
    }

    #[test]
    #[serial]
    fn test_acquire_raw_matches_device_payload() {
        let (mut session, handle) = streaming_session(32, 16);
        let payload = twelve_bit_ramp(32, 16);
        handle.set_payload(payload.clone());

        let pair = acquire(&mut session, &BayerProcessor).expect("acquire failed");

        assert_eq!(pair.raw.to_bytes(), payload);
    }

    #[test]
    #[serial]
    fn test_acquire_eight_bit_format() {
        let (mut session, handle) = streaming_session(64, 48);
        handle.force(
            params::PIXEL_FORMAT,
            MockParam::Enum {
                value: "BayerRG8".to_owned(),
                entries: vec!["BayerRG8".to_owned()],
            },
        );
        handle.set_pattern(TestPattern::Solid(77));

        let pair = acquire(&mut session, &BayerProcessor).expect("acquire failed");

        assert_eq!(pair.raw.samples(), &RawSamples::Eight(vec![77; 64 * 48]));
        assert_eq!(pair.preview.get_pixel(10, 10).0, [77, 77, 77]);
    }

    #[test]
    #[serial]
    fn test_acquire_failures_leave_session_usable() {
        let (mut session, handle) = streaming_session(64, 48);
        handle.push_grabs([
            MockGrab::Timeout,
            MockGrab::Failure {
                code: 3,
                description: "buffer underrun".to_owned(),
            },
        ]);

        assert!(matches!(
            acquire(&mut session, &BayerProcessor),
            Err(GrabError::Timeout)
        ));
        assert!(matches!(
            acquire(&mut session, &BayerProcessor),
            Err(GrabError::DeviceReportedFailure { code: 3, .. })
        ));
        assert!(acquire(&mut session, &BayerProcessor).is_ok());
    }

    #[test]
    #[serial]
    fn test_acquire_unsupported_format() {
        let (mut session, handle) = streaming_session(64, 48);
        handle.force(
            params::PIXEL_FORMAT,
            MockParam::Enum {
                value: "Mono8".to_owned(),
                entries: vec!["Mono8".to_owned()],
            },
        );

        assert!(matches!(
            acquire(&mut session, &BayerProcessor),
            Err(GrabError::UnsupportedFormat(ref id)) if id == "Mono8"
        ));
    }

    #[test]
    #[serial]
    fn test_acquire_requires_streaming() {
        let mut session = DeviceSession::new(MockTransport::new(), CameraConfig::default())
            .expect("new failed");

        assert!(matches!(
            acquire(&mut session, &BayerProcessor),
            Err(GrabError::NotStreaming)
        ));
    }

    #[test]
    fn test_empty_pair() {
        let pair = FramePair::empty();
        assert!(pair.is_empty());
        assert_eq!(pair.preview.dimensions(), (0, 0));
    }
}
