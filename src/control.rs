//! Control surface: one-shot white balance and exposure helpers.

use std::thread;

use tracing::{info, warn};

use crate::error::WhiteBalanceError;
use crate::session::DeviceSession;
use crate::traits::{params, CameraDevice, Transport};

/// Per-channel multipliers relative to green.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WhiteBalanceGains {
    /// Red multiplier.
    pub red: f64,
    /// Blue multiplier.
    pub blue: f64,
}

impl WhiteBalanceGains {
    /// No correction.
    pub const NEUTRAL: Self = Self {
        red: 1.0,
        blue: 1.0,
    };

    /// Returned when no session is open.
    pub const NOT_CONNECTED: Self = Self {
        red: -1.0,
        blue: -1.0,
    };

    fn validated(red: f64, blue: f64) -> Result<Self, WhiteBalanceError> {
        let valid = |gain: f64| gain.is_finite() && gain > 0.0;
        if valid(red) && valid(blue) {
            Ok(Self { red, blue })
        } else {
            Err(WhiteBalanceError::InvalidGainValue { red, blue })
        }
    }
}

/// Run the device's one-shot white balance and read back the red and blue ratios.
///
/// The auto mode is always driven through `Off` before `Once`, then the session's
/// configured settle delay elapses before the ratios are read. The two channels share a
/// single value register behind a selector, so they are read strictly in sequence.
pub fn trigger_white_balance<T: Transport>(
    session: &mut DeviceSession<T>,
) -> Result<WhiteBalanceGains, WhiteBalanceError> {
    let settle = session.config().white_balance_settle();
    let device = session
        .open_device_mut()
        .ok_or(WhiteBalanceError::SessionNotOpen)?;

    device
        .set_enum(params::BALANCE_WHITE_AUTO, "Off")
        .and_then(|()| device.set_enum(params::BALANCE_WHITE_AUTO, "Once"))
        .map_err(WhiteBalanceError::TriggerFailure)?;
    info!(settle_ms = settle.as_millis(), "one-shot white balance triggered");

    thread::sleep(settle);

    let red = read_ratio(device, "Red")?;
    let blue = read_ratio(device, "Blue")?;

    let gains = WhiteBalanceGains::validated(red, blue)?;
    info!(red = gains.red, blue = gains.blue, "white balance gains read");
    Ok(gains)
}

fn read_ratio<D: CameraDevice>(device: &mut D, channel: &str) -> Result<f64, WhiteBalanceError> {
    device
        .set_enum(params::BALANCE_RATIO_SELECTOR, channel)
        .and_then(|()| device.get_float(params::BALANCE_RATIO))
        .map_err(WhiteBalanceError::ReadFailure)
}

/// Collapse a white-balance outcome into the caller-facing pair.
///
/// `(-1, -1)` means no session was open; `(1, 1)` means the session was fine but no
/// usable gains were produced.
#[must_use]
pub fn gains_or_sentinel(
    outcome: Result<WhiteBalanceGains, WhiteBalanceError>,
) -> WhiteBalanceGains {
    match outcome {
        Ok(gains) => gains,
        Err(WhiteBalanceError::SessionNotOpen) => {
            warn!("white balance requested without an open camera");
            WhiteBalanceGains::NOT_CONNECTED
        }
        Err(err) => {
            warn!(error = %err, "white balance failed, using neutral gains");
            WhiteBalanceGains::NEUTRAL
        }
    }
}

/// Shutter angle in degrees for an exposure at a frame rate.
///
/// `None` when the exposure is unknown (non-positive) or the rate is unusable.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn shutter_angle_degrees(exposure_us: i64, fps: f64) -> Option<f64> {
    (exposure_us > 0 && fps.is_finite() && fps > 0.0)
        .then(|| exposure_us as f64 / 1_000_000.0 * fps * 360.0)
}
