//! Device session: the lifetime of one camera connection.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::error::{ControlError, InitError};
use crate::traits::{params, CameraDevice, DeviceInfo, GrabStrategy, SdkError, Transport};

/// Set while a [`DeviceSession`] object exists in this process.
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// A configuration step the device rejected without aborting initialization.
#[derive(Debug)]
pub struct ConfigWarning {
    /// Parameter that could not be applied.
    pub parameter: &'static str,
    /// Device-reported cause.
    pub error: SdkError,
}

/// Owns the transport runtime and at most one bound device.
///
/// Only one session may exist per process; [`DeviceSession::new`] fails while another
/// is alive. Dropping the session shuts it down.
pub struct DeviceSession<T: Transport> {
    transport: T,
    config: CameraConfig,
    device: Option<T::Device>,
    runtime_active: bool,
    warnings: Vec<ConfigWarning>,
}

impl<T: Transport> DeviceSession<T> {
    /// Create a closed session over `transport`.
    ///
    /// # Errors
    ///
    /// [`InitError::SessionAlreadyActive`] while another session exists in this process.
    pub fn new(transport: T, config: CameraConfig) -> Result<Self, InitError> {
        if SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(InitError::SessionAlreadyActive);
        }

        Ok(Self {
            transport,
            config,
            device: None,
            runtime_active: false,
            warnings: Vec::new(),
        })
    }

    /// Bring up the runtime, bind the first device, configure it and start streaming.
    ///
    /// Calling this on an open session is a no-op that succeeds. On failure everything
    /// acquired so far is released before the error is returned.
    ///
    /// # Errors
    ///
    /// * [`InitError::RuntimeUnavailable`] - The transport could not start or enumerate
    /// * [`InitError::NoDeviceFound`] - Enumeration came back empty
    /// * [`InitError::DeviceOpenFailed`] - The first device could not be bound or opened
    /// * [`InitError::ParameterConfigFailure`] - The exposure mode was rejected
    /// * [`InitError::StreamStartFailed`] - Streaming did not start
    pub fn initialize(&mut self) -> Result<(), InitError> {
        if self.is_open() {
            warn!("camera already initialized, keeping current configuration");
            return Ok(());
        }

        info!("initializing camera");
        match self.try_initialize() {
            Ok(()) => {
                info!(
                    warnings = self.warnings.len(),
                    "camera initialized and streaming"
                );
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "camera initialization failed, tearing down");
                self.teardown();
                Err(err)
            }
        }
    }

    fn try_initialize(&mut self) -> Result<(), InitError> {
        if !self.runtime_active {
            self.transport
                .initialize()
                .map_err(InitError::RuntimeUnavailable)?;
            self.runtime_active = true;
            debug!("transport runtime initialized");
        }

        let devices = self
            .transport
            .enumerate_devices()
            .map_err(InitError::RuntimeUnavailable)?;
        let info = devices.first().ok_or(InitError::NoDeviceFound)?;
        info!(
            model = %info.model_name,
            address = %info.address,
            found = devices.len(),
            "binding first device"
        );

        let device = self
            .transport
            .create_device(info)
            .map_err(InitError::DeviceOpenFailed)?;
        let device = self.device.insert(device);
        device.open().map_err(InitError::DeviceOpenFailed)?;

        self.warnings.clear();
        let mut configurator = Configurator {
            device: &mut *device,
            warnings: &mut self.warnings,
        };
        configurator.apply(&self.config)?;

        device
            .start_grabbing(GrabStrategy::LatestImageOnly)
            .map_err(InitError::StreamStartFailed)?;
        Ok(())
    }

    /// Stop streaming, close the device and release the runtime.
    ///
    /// Safe to call in any state and any number of times; teardown errors are logged
    /// and swallowed.
    pub fn shutdown(&mut self) {
        info!("shutting down camera");
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(mut device) = self.device.take() {
            if device.is_grabbing() {
                if let Err(err) = device.stop_grabbing() {
                    warn!(error = %err, "failed to stop streaming");
                }
            }
            if device.is_open() {
                if let Err(err) = device.close() {
                    warn!(error = %err, "failed to close device");
                }
            }
            debug!("device released");
        }

        if self.runtime_active {
            self.transport.terminate();
            self.runtime_active = false;
            debug!("transport runtime released");
        }
    }

    /// Whether a device is bound and open.
    pub fn is_open(&self) -> bool {
        self.device.as_ref().is_some_and(CameraDevice::is_open)
    }

    /// Whether the bound device is open and streaming.
    pub fn is_streaming(&self) -> bool {
        self.device
            .as_ref()
            .is_some_and(|device| device.is_open() && device.is_grabbing())
    }

    /// Configuration this session applies.
    pub const fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Non-fatal configuration failures from the last successful initialization.
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }

    /// Identity of the bound device, if any.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device.as_ref().map(CameraDevice::info)
    }

    /// The bound device, if it is open.
    pub fn open_device(&self) -> Option<&T::Device> {
        self.device.as_ref().filter(|device| device.is_open())
    }

    /// The bound device, mutably, if it is open.
    pub fn open_device_mut(&mut self) -> Option<&mut T::Device> {
        self.device.as_mut().filter(|device| device.is_open())
    }

    /// Current raw gain.
    pub fn get_gain(&self) -> Result<i64, ControlError> {
        self.read_integer(params::GAIN_RAW)
    }

    /// Current exposure time in microseconds.
    pub fn get_exposure(&self) -> Result<i64, ControlError> {
        self.read_integer(params::EXPOSURE_TIME_RAW)
    }

    /// Add `delta` to the raw gain, clamped to the device's legal range.
    ///
    /// Returns the value written.
    pub fn set_gain(&mut self, delta: i64) -> Result<i64, ControlError> {
        let device = self.open_device_mut().ok_or(ControlError::SessionNotOpen)?;
        let failure = |source| ControlError::ParameterReadWriteFailure {
            parameter: params::GAIN_RAW,
            source,
        };

        let current = device.get_integer(params::GAIN_RAW).map_err(failure)?;
        let (min, max) = device.integer_range(params::GAIN_RAW).map_err(failure)?;
        let value = current.saturating_add(delta).max(min).min(max);

        device.set_integer(params::GAIN_RAW, value).map_err(failure)?;
        info!(gain = value, delta, "gain updated");
        Ok(value)
    }

    fn read_integer(&self, parameter: &'static str) -> Result<i64, ControlError> {
        self.open_device()
            .ok_or(ControlError::SessionNotOpen)?
            .get_integer(parameter)
            .map_err(|source| ControlError::ParameterReadWriteFailure { parameter, source })
    }
}

impl<T: Transport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        self.teardown();
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

/// Applies the fixed startup sequence, recording non-essential failures.
struct Configurator<'a, D> {
    device: &'a mut D,
    warnings: &'a mut Vec<ConfigWarning>,
}

impl<D: CameraDevice> Configurator<'_, D> {
    fn apply(&mut self, config: &CameraConfig) -> Result<(), InitError> {
        self.best_effort(params::PIXEL_FORMAT, |d| {
            d.set_enum(params::PIXEL_FORMAT, &config.pixel_format)
        });
        self.best_effort(params::PROCESSED_RAW_ENABLE, |d| {
            d.set_boolean(params::PROCESSED_RAW_ENABLE, false)
        });
        self.best_effort(params::GAIN_AUTO, |d| d.set_enum(params::GAIN_AUTO, "Off"));
        self.best_effort(params::GAIN_RAW, |d| {
            d.set_integer(params::GAIN_RAW, config.gain_raw)
        });
        self.best_effort(params::PACKET_SIZE, |d| {
            d.set_integer(params::PACKET_SIZE, config.packet_size)
        });
        self.best_effort(params::WIDTH, |d| d.set_integer(params::WIDTH, config.width));
        self.best_effort(params::HEIGHT, |d| {
            d.set_integer(params::HEIGHT, config.height)
        });
        self.best_effort(params::CENTER_X, |d| d.set_boolean(params::CENTER_X, true));
        self.best_effort(params::CENTER_Y, |d| d.set_boolean(params::CENTER_Y, true));

        // Not every model has a selector; the level itself is what matters.
        if let Err(err) = self.device.set_enum(params::BLACK_LEVEL_SELECTOR, "All") {
            debug!(error = %err, "black level selector not set");
        }
        self.best_effort(params::BLACK_LEVEL_RAW, |d| {
            d.set_integer(params::BLACK_LEVEL_RAW, config.black_level)
        });
        self.best_effort(params::AUTO_FUNCTION_PROFILE, |d| {
            d.set_enum(params::AUTO_FUNCTION_PROFILE, &config.auto_function_profile)
        });

        self.device
            .set_enum(params::EXPOSURE_MODE, "Timed")
            .map_err(|source| InitError::ParameterConfigFailure {
                parameter: params::EXPOSURE_MODE,
                source,
            })?;
        debug!(parameter = params::EXPOSURE_MODE, "configured");

        self.best_effort(params::EXPOSURE_AUTO, |d| {
            d.set_enum(params::EXPOSURE_AUTO, "Off")
        });
        let exposure_us = config.exposure_time_us();
        self.best_effort(params::EXPOSURE_TIME_RAW, |d| {
            d.set_integer(params::EXPOSURE_TIME_RAW, exposure_us)
        });
        self.best_effort(params::FRAME_RATE_ENABLE, |d| {
            d.set_boolean(params::FRAME_RATE_ENABLE, true)
        });
        self.best_effort(params::FRAME_RATE, |d| {
            d.set_float(params::FRAME_RATE, config.target_fps)
        });

        Ok(())
    }

    fn best_effort<F>(&mut self, parameter: &'static str, step: F)
    where
        F: FnOnce(&mut D) -> crate::traits::Result<()>,
    {
        match step(&mut *self.device) {
            Ok(()) => debug!(parameter, "configured"),
            Err(error) => {
                warn!(parameter, error = %error, "configuration step failed, continuing");
                self.warnings.push(ConfigWarning { parameter, error });
            }
        }
    }
}
