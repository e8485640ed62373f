//! Host-facing camera operations.
//!
//! Every call here is non-failing from the caller's point of view: errors are logged and
//! collapsed into `false`, `-1`, an empty frame pair, or a sentinel gain pair, so a host
//! loop can call them unconditionally.

use tracing::{error, warn};

use crate::config::CameraConfig;
use crate::control::{gains_or_sentinel, shutter_angle_degrees, trigger_white_balance};
use crate::error::{ControlError, GrabError, InitError};
use crate::format::PixelFormat;
use crate::imaging::{BayerProcessor, ImageProcessor};
use crate::pipeline::{acquire, FramePair};
use crate::recorder::RecordingMetadata;
use crate::session::DeviceSession;
use crate::traits::{params, CameraDevice, Transport};

/// Sentinel returned by the integer accessors on failure.
pub const CONTROL_FAILURE: i64 = -1;

/// One camera session plus the image processor used for previews.
pub struct Camera<T: Transport, P: ImageProcessor = BayerProcessor> {
    session: DeviceSession<T>,
    processor: P,
}

impl<T: Transport> Camera<T> {
    /// Claim the process-wide session slot with the default CPU processor.
    pub fn new(transport: T, config: CameraConfig) -> Result<Self, InitError> {
        Self::with_processor(transport, config, BayerProcessor)
    }
}

impl<T: Transport, P: ImageProcessor> Camera<T, P> {
    /// Claim the process-wide session slot with a custom image processor.
    ///
    /// # Errors
    ///
    /// [`InitError::SessionAlreadyActive`] while another session exists in this process.
    pub fn with_processor(
        transport: T,
        config: CameraConfig,
        processor: P,
    ) -> Result<Self, InitError> {
        Ok(Self {
            session: DeviceSession::new(transport, config)?,
            processor,
        })
    }

    /// Open, configure and start the camera. `true` if it is streaming afterwards.
    pub fn initialize_camera(&mut self) -> bool {
        match self.session.initialize() {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "camera initialization failed");
                false
            }
        }
    }

    /// Grab one frame. Both products are empty when no frame could be produced.
    pub fn grab_preview_and_raw(&mut self) -> FramePair {
        match acquire(&mut self.session, &self.processor) {
            Ok(pair) => pair,
            Err(GrabError::NotStreaming) => FramePair::empty(),
            Err(err) => {
                warn!(error = %err, "frame dropped");
                FramePair::empty()
            }
        }
    }

    /// Stop and release the camera. Always `true`.
    pub fn shutdown_camera(&mut self) -> bool {
        self.session.shutdown();
        true
    }

    /// Change the raw gain by `delta`; the new value or [`CONTROL_FAILURE`].
    pub fn set_gain(&mut self, delta: i64) -> i64 {
        control_or_sentinel("set gain", self.session.set_gain(delta))
    }

    /// Current raw gain or [`CONTROL_FAILURE`].
    pub fn get_gain(&self) -> i64 {
        control_or_sentinel("read gain", self.session.get_gain())
    }

    /// Current exposure in microseconds or [`CONTROL_FAILURE`].
    pub fn get_exposure(&self) -> i64 {
        control_or_sentinel("read exposure", self.session.get_exposure())
    }

    /// Trigger one-shot white balance and return `(red, blue)`.
    ///
    /// `(-1, -1)` without an open camera, `(1, 1)` if the gains could not be obtained.
    pub fn trigger_wb_and_get_gains(&mut self) -> (f64, f64) {
        let gains = gains_or_sentinel(trigger_white_balance(&mut self.session));
        (gains.red, gains.blue)
    }

    /// Shutter angle of the current exposure at the configured frame rate.
    pub fn shutter_angle(&self) -> Option<f64> {
        let exposure = self.session.get_exposure().ok()?;
        shutter_angle_degrees(exposure, self.session.config().target_fps)
    }

    /// Sensor description for stamping recordings, taken from the open camera.
    ///
    /// `None` without an open camera or when it streams a format that is not Bayer.
    pub fn recording_metadata(&self) -> Option<RecordingMetadata> {
        let device = self.session.open_device()?;
        let info = self.session.device_info()?;
        let format = device
            .get_enum(params::PIXEL_FORMAT)
            .ok()
            .and_then(|name| PixelFormat::resolve(&name).ok())?;

        // The device's level wins over the configured one, which it may have clamped.
        let black_level = device
            .get_integer(params::BLACK_LEVEL_RAW)
            .unwrap_or(self.session.config().black_level);

        Some(RecordingMetadata {
            pattern: format.pattern,
            depth: format.depth,
            black_level: u32::try_from(black_level).unwrap_or_default(),
            exposure_us: self
                .session
                .get_exposure()
                .ok()
                .and_then(|us| u32::try_from(us).ok())
                .filter(|&us| us > 0),
            make: info.model_name.clone(),
            model: format!("{} ({})", info.model_name, info.serial_number),
        })
    }

    /// The underlying session.
    pub const fn session(&self) -> &DeviceSession<T> {
        &self.session
    }
}

fn control_or_sentinel(action: &str, outcome: Result<i64, ControlError>) -> i64 {
    outcome.unwrap_or_else(|err| {
        match err {
            ControlError::SessionNotOpen => warn!(action, "camera not open"),
            ControlError::ParameterReadWriteFailure { .. } => {
                warn!(action, error = %err, "control failed");
            }
        }
        CONTROL_FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{BitDepth, CfaPattern};
    use crate::mock::{MockHandle, MockTransport};
    use serial_test::serial;

    fn camera() -> (Camera<MockTransport>, MockHandle) {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let config = CameraConfig {
            width: 96,
            height: 64,
            white_balance_settle_ms: 0,
            ..CameraConfig::default()
        };
        (Camera::new(transport, config).expect("new failed"), handle)
    }

    #[test]
    #[serial]
    fn test_grab_before_initialize_is_empty() {
        let (mut camera, handle) = camera();

        let pair = camera.grab_preview_and_raw();

        assert!(pair.is_empty());
        assert_eq!(handle.frames_delivered(), 0);
    }

    #[test]
    #[serial]
    fn test_sentinels_when_closed() {
        let (mut camera, _handle) = camera();

        assert_eq!(camera.get_gain(), CONTROL_FAILURE);
        assert_eq!(camera.get_exposure(), CONTROL_FAILURE);
        assert_eq!(camera.set_gain(5), CONTROL_FAILURE);
        assert_eq!(camera.trigger_wb_and_get_gains(), (-1.0, -1.0));
        assert_eq!(camera.shutter_angle(), None);
    }

    #[test]
    #[serial]
    fn test_initialize_twice_returns_true() {
        let (mut camera, handle) = camera();

        assert!(camera.initialize_camera());
        assert!(camera.initialize_camera());
        assert_eq!(handle.devices_created(), 1);
    }

    #[test]
    #[serial]
    fn test_failed_initialize_returns_false() {
        let (mut camera, handle) = camera();
        handle.set_device_count(0);

        assert!(!camera.initialize_camera());
        assert!(camera.grab_preview_and_raw().is_empty());
    }

    #[test]
    #[serial]
    fn test_controls_when_open() {
        let (mut camera, handle) = camera();
        assert!(camera.initialize_camera());
        handle.set_integer_range(params::GAIN_RAW, 0, 320);

        assert_eq!(camera.get_gain(), 300);
        assert_eq!(camera.set_gain(100), 320);
        assert_eq!(camera.get_exposure(), 20833);
        let angle = camera.shutter_angle().expect("angle expected");
        assert!((angle - 180.0).abs() < 0.01);

        handle.fail_writes(params::GAIN_RAW);
        assert_eq!(camera.set_gain(-1), CONTROL_FAILURE);
    }

    #[test]
    #[serial]
    fn test_white_balance_through_camera() {
        let (mut camera, handle) = camera();
        assert!(camera.initialize_camera());
        handle.set_white_balance_result(2.5, 0.9);

        assert_eq!(camera.trigger_wb_and_get_gains(), (2.5, 0.9));

        handle.fail_reads(params::BALANCE_RATIO);
        assert_eq!(camera.trigger_wb_and_get_gains(), (1.0, 1.0));
    }

    #[test]
    #[serial]
    fn test_recording_metadata_follows_open_device() {
        let (mut camera, handle) = camera();
        assert_eq!(camera.recording_metadata(), None);

        assert!(camera.initialize_camera());
        let metadata = camera.recording_metadata().expect("metadata expected");

        assert_eq!(metadata.pattern, CfaPattern::Gbrg);
        assert_eq!(metadata.depth, BitDepth::Twelve);
        assert_eq!(metadata.black_level, 32);
        assert_eq!(metadata.exposure_us, Some(20833));
        assert_eq!(metadata.make, "Mock Camera");
        assert_eq!(metadata.model, "Mock Camera (MOCK0000)");

        handle.fail_reads(params::EXPOSURE_TIME_RAW);
        assert_eq!(
            camera.recording_metadata().and_then(|m| m.exposure_us),
            None
        );
    }

    #[test]
    #[serial]
    fn test_shutdown_always_true() {
        let (mut camera, _handle) = camera();
        assert!(camera.shutdown_camera());
        assert!(camera.initialize_camera());
        assert!(camera.shutdown_camera());
        assert!(camera.shutdown_camera());
        assert!(camera.grab_preview_and_raw().is_empty());
    }
}
