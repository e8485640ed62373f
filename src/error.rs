//! Error taxonomy for the session, the acquisition pipeline and the control surface.

use thiserror::Error;

use crate::traits::SdkError;

/// Failures that abort [`DeviceSession::initialize`](crate::DeviceSession::initialize).
#[derive(Error, Debug)]
pub enum InitError {
    /// Another session object is alive in this process.
    #[error("a camera session is already active in this process")]
    SessionAlreadyActive,

    /// The transport runtime could not be brought up.
    #[error("camera runtime unavailable: {0}")]
    RuntimeUnavailable(SdkError),

    /// Enumeration returned no devices.
    #[error("no camera devices found")]
    NoDeviceFound,

    /// The device could not be bound or opened.
    #[error("failed to open device: {0}")]
    DeviceOpenFailed(SdkError),

    /// A configuration step the session cannot run without was rejected.
    #[error("failed to configure {parameter}: {source}")]
    ParameterConfigFailure {
        /// Parameter name.
        parameter: &'static str,
        /// Device-reported cause.
        source: SdkError,
    },

    /// Continuous streaming could not be started.
    #[error("failed to start streaming: {0}")]
    StreamStartFailed(SdkError),
}

/// Per-frame acquisition failures. None of these invalidate the session.
#[derive(Error, Debug)]
pub enum GrabError {
    /// The session is closed or not streaming.
    #[error("camera is not streaming")]
    NotStreaming,

    /// No frame arrived within the grab timeout.
    #[error("no frame within the grab timeout")]
    Timeout,

    /// The device delivered a failed grab result.
    #[error("grab failed with code {code}: {description}")]
    DeviceReportedFailure {
        /// Device error code.
        code: u32,
        /// Device error description.
        description: String,
    },

    /// The pixel format has no demosaic pattern or normalization divisor.
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// The delivered buffer is shorter than the reported geometry requires.
    #[error("incomplete frame buffer: expected {expected} bytes, got {actual}")]
    IncompleteBuffer {
        /// Bytes required by width, height and container size.
        expected: usize,
        /// Bytes delivered.
        actual: usize,
    },

    /// Demosaic or resize failed.
    #[error("image processing failed: {0}")]
    Processing(String),

    /// Any other SDK call failed while grabbing.
    #[error(transparent)]
    Sdk(#[from] SdkError),
}

/// Failures of gain and exposure accessors.
#[derive(Error, Debug)]
pub enum ControlError {
    /// The session is not open.
    #[error("camera session is not open")]
    SessionNotOpen,

    /// The device rejected the read or write.
    #[error("failed to access {parameter}: {source}")]
    ParameterReadWriteFailure {
        /// Parameter name.
        parameter: &'static str,
        /// Device-reported cause.
        source: SdkError,
    },
}

/// Failures of the one-shot white-balance protocol.
#[derive(Error, Debug)]
pub enum WhiteBalanceError {
    /// The session is not open.
    #[error("camera session is not open")]
    SessionNotOpen,

    /// The Off/Once trigger sequence was rejected.
    #[error("failed to trigger white balance: {0}")]
    TriggerFailure(SdkError),

    /// Selecting a channel or reading its ratio failed.
    #[error("failed to read balance ratio: {0}")]
    ReadFailure(SdkError),

    /// The device reported a non-positive or non-finite ratio.
    #[error("invalid white-balance gains: red={red}, blue={blue}")]
    InvalidGainValue {
        /// Red ratio as read.
        red: f64,
        /// Blue ratio as read.
        blue: f64,
    },
}
