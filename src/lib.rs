//! Raw-Cam-Capture: single-camera raw acquisition for Bayer machine-vision sensors
//!
//! This library opens one camera through a trait-based SDK boundary, applies a fixed
//! acquisition configuration, and turns every grab into a full-resolution raw frame
//! plus a demosaiced preview. The same code runs against V4L2 hardware and the
//! simulated device in [`mock`].

pub mod camera;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod format;
pub mod imaging;
pub mod logger;
pub mod mock;
pub mod pipeline;
pub mod preview;
pub mod recorder;
pub mod session;
pub mod traits;
pub mod validation;

pub use camera::{Camera, CONTROL_FAILURE};
pub use config::{CameraConfig, ConfigError};
pub use control::{shutter_angle_degrees, WhiteBalanceGains};
pub use device::{V4l2Camera, V4l2Transport};
pub use error::{ControlError, GrabError, InitError, WhiteBalanceError};
pub use format::{BitDepth, CfaPattern, PixelFormat};
pub use imaging::{BayerProcessor, ImageProcessor};
pub use pipeline::{FramePair, RawFrame, RawSamples};
pub use recorder::{Recorder, RecordingMetadata, RecordingSummary};
pub use session::DeviceSession;
pub use traits::{CameraDevice, DeviceInfo, GrabResult, GrabStrategy, SdkError, Transport};
