//! Core traits and types for the camera-control SDK boundary.
//!
//! The session and pipeline only ever talk to a camera through these traits, so the
//! same code drives a V4L2 device, the simulated device, or any other vendor backend.

use std::time::Duration;

/// Identity of an enumerated device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Model name reported by the device.
    pub model_name: String,
    /// Serial number or bus location, whichever the transport can report.
    pub serial_number: String,
    /// Transport-specific address (device index, path, IP).
    pub address: String,
}

/// Buffering policy used while the device is streaming.
///
/// Acquisition always serves the freshest frame, so this is the only policy a backend
/// has to honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabStrategy {
    /// Keep only the most recently completed frame; older undelivered frames are dropped.
    LatestImageOnly,
}

/// Outcome of one retrieve call.
///
/// The buffer is owned by the device and is only valid until the next call on it,
/// which the borrow enforces.
#[derive(Debug)]
pub struct GrabResult<'a> {
    /// Whether the device delivered a complete frame.
    pub succeeded: bool,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw sensor bytes, little-endian for multi-byte containers.
    pub buffer: &'a [u8],
    /// Device error code, zero on success.
    pub error_code: u32,
    /// Device error description, empty on success.
    pub error_description: String,
}

impl<'a> GrabResult<'a> {
    /// A successful result over `buffer`.
    #[must_use]
    pub const fn success(width: u32, height: u32, buffer: &'a [u8]) -> Self {
        Self {
            succeeded: true,
            width,
            height,
            buffer,
            error_code: 0,
            error_description: String::new(),
        }
    }

    /// A failed result carrying the device's diagnosis.
    #[must_use]
    pub fn failure<S: Into<String>>(error_code: u32, error_description: S) -> Self {
        Self {
            succeeded: false,
            width: 0,
            height: 0,
            buffer: &[],
            error_code,
            error_description: error_description.into(),
        }
    }
}

/// Error type for SDK boundary calls.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// The transport runtime could not be brought up.
    #[error("runtime unavailable: {0}")]
    Runtime(String),
    /// Failed to open or close the device.
    #[error("device access failed: {0}")]
    DeviceAccess(String),
    /// Device is not open.
    #[error("device is not open")]
    NotOpen,
    /// The named parameter does not exist on this device.
    #[error("parameter {0} is not available")]
    ParameterNotAvailable(String),
    /// The device rejected a value for a parameter.
    #[error("parameter {name}: {reason}")]
    Parameter {
        /// Parameter name.
        name: String,
        /// Device-reported description.
        reason: String,
    },
    /// Error during streaming operation.
    #[error("stream error: {0}")]
    Stream(String),
    /// No frame arrived within the allotted wait.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SdkError {
    /// Shorthand for a rejected parameter access.
    pub fn parameter<S: Into<String>>(name: &str, reason: S) -> Self {
        Self::Parameter {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Result type for SDK boundary calls.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Process-wide transport runtime: bring-up, enumeration and device creation.
pub trait Transport {
    /// Device handle created by this transport.
    type Device: CameraDevice;

    /// Bring up the runtime. Called before any enumeration.
    fn initialize(&mut self) -> Result<()>;

    /// Release the runtime. Must be safe to call repeatedly.
    fn terminate(&mut self);

    /// List reachable devices.
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>>;

    /// Bind a handle to an enumerated device. The device is not opened.
    fn create_device(&mut self, info: &DeviceInfo) -> Result<Self::Device>;
}

/// Abstraction over one camera: lifecycle, streaming and named parameters.
pub trait CameraDevice {
    /// Identity of the bound device.
    fn info(&self) -> &DeviceInfo;

    /// Open the device for configuration and streaming.
    fn open(&mut self) -> Result<()>;

    /// Close the device.
    fn close(&mut self) -> Result<()>;

    /// Whether the device is currently open.
    fn is_open(&self) -> bool;

    /// Start continuous streaming with the given buffering policy.
    fn start_grabbing(&mut self, strategy: GrabStrategy) -> Result<()>;

    /// Stop streaming.
    fn stop_grabbing(&mut self) -> Result<()>;

    /// Whether the device is currently streaming.
    fn is_grabbing(&self) -> bool;

    /// Wait up to `timeout` for the next frame.
    ///
    /// Exceeding the wait is reported as [`SdkError::Timeout`].
    fn retrieve_result(&mut self, timeout: Duration) -> Result<GrabResult<'_>>;

    /// Read an integer parameter.
    fn get_integer(&self, name: &str) -> Result<i64>;

    /// Write an integer parameter.
    fn set_integer(&mut self, name: &str, value: i64) -> Result<()>;

    /// Legal `[min, max]` range of an integer parameter.
    fn integer_range(&self, name: &str) -> Result<(i64, i64)>;

    /// Read a float parameter.
    fn get_float(&self, name: &str) -> Result<f64>;

    /// Write a float parameter.
    fn set_float(&mut self, name: &str, value: f64) -> Result<()>;

    /// Read a boolean parameter.
    fn get_boolean(&self, name: &str) -> Result<bool>;

    /// Write a boolean parameter.
    fn set_boolean(&mut self, name: &str, value: bool) -> Result<()>;

    /// Read an enumeration parameter as its symbolic name.
    fn get_enum(&self, name: &str) -> Result<String>;

    /// Write an enumeration parameter by symbolic name.
    fn set_enum(&mut self, name: &str, value: &str) -> Result<()>;
}

/// Names of the device parameters this crate reads and writes.
pub mod params {
    /// Sensor pixel format (enumeration).
    pub const PIXEL_FORMAT: &str = "PixelFormat";
    /// Sensor-side pre-processing of raw data (boolean).
    pub const PROCESSED_RAW_ENABLE: &str = "ProcessedRawEnable";
    /// Automatic gain (enumeration).
    pub const GAIN_AUTO: &str = "GainAuto";
    /// Raw gain (integer).
    pub const GAIN_RAW: &str = "GainRaw";
    /// Network packet size in bytes (integer).
    pub const PACKET_SIZE: &str = "GevSCPSPacketSize";
    /// ROI width (integer).
    pub const WIDTH: &str = "Width";
    /// ROI height (integer).
    pub const HEIGHT: &str = "Height";
    /// Center the ROI horizontally (boolean).
    pub const CENTER_X: &str = "CenterX";
    /// Center the ROI vertically (boolean).
    pub const CENTER_Y: &str = "CenterY";
    /// Black-level channel selector (enumeration).
    pub const BLACK_LEVEL_SELECTOR: &str = "BlackLevelSelector";
    /// Raw black level (integer).
    pub const BLACK_LEVEL_RAW: &str = "BlackLevelRaw";
    /// Auto-function optimization profile (enumeration).
    pub const AUTO_FUNCTION_PROFILE: &str = "AutoFunctionProfile";
    /// Exposure mode (enumeration).
    pub const EXPOSURE_MODE: &str = "ExposureMode";
    /// Automatic exposure (enumeration).
    pub const EXPOSURE_AUTO: &str = "ExposureAuto";
    /// Exposure time in microseconds (integer).
    pub const EXPOSURE_TIME_RAW: &str = "ExposureTimeRaw";
    /// Frame-rate limiter switch (boolean).
    pub const FRAME_RATE_ENABLE: &str = "AcquisitionFrameRateEnable";
    /// Frame-rate limit in frames per second (float).
    pub const FRAME_RATE: &str = "AcquisitionFrameRateAbs";
    /// Automatic white balance (enumeration).
    pub const BALANCE_WHITE_AUTO: &str = "BalanceWhiteAuto";
    /// Channel selector for the balance ratio register (enumeration).
    pub const BALANCE_RATIO_SELECTOR: &str = "BalanceRatioSelector";
    /// Balance ratio of the selected channel relative to green (float).
    pub const BALANCE_RATIO: &str = "BalanceRatioAbs";
}
