//! V4L2 transport implementation using the v4l crate.
//!
//! Named camera parameters are mapped onto V4L2 format fields, stream parameters and
//! user controls. Parameters with no V4L2 counterpart report
//! [`SdkError::ParameterNotAvailable`], which the session records as a configuration
//! warning.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};
use v4l::buffer::{Flags as BufferFlags, Type};
use v4l::capability::Flags as CapabilityFlags;
use v4l::control::{Control, Description, Type as ControlType, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::format::PixelFormat;
use crate::traits::{
    params, CameraDevice, DeviceInfo, GrabResult, GrabStrategy, Result, SdkError, Transport,
};

/// V4L2 user-class control identifiers.
mod cid {
    pub const BLACK_LEVEL: u32 = 0x0098_090b;
    pub const AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
    pub const DO_WHITE_BALANCE: u32 = 0x0098_090d;
    pub const RED_BALANCE: u32 = 0x0098_090e;
    pub const BLUE_BALANCE: u32 = 0x0098_090f;
    pub const AUTOGAIN: u32 = 0x0098_0912;
    pub const GAIN: u32 = 0x0098_0913;
    pub const EXPOSURE_AUTO: u32 = 0x009a_0901;
    pub const EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
}

/// `V4L2_EXPOSURE_AUTO` menu entries.
const EXPOSURE_AUTO_ON: i64 = 0;
const EXPOSURE_MANUAL: i64 = 1;

/// `V4L2_CID_EXPOSURE_ABSOLUTE` counts in 100 µs units.
const EXPOSURE_UNIT_US: i64 = 100;

/// Unpacked Bayer formats and their GenICam names.
const BAYER_FORMATS: [(&str, &[u8; 4]); 12] = [
    ("BayerBG8", b"BA81"),
    ("BayerGB8", b"GBRG"),
    ("BayerGR8", b"GRBG"),
    ("BayerRG8", b"RGGB"),
    ("BayerBG10", b"BG10"),
    ("BayerGB10", b"GB10"),
    ("BayerGR10", b"BA10"),
    ("BayerRG10", b"RG10"),
    ("BayerBG12", b"BG12"),
    ("BayerGB12", b"GB12"),
    ("BayerGR12", b"BA12"),
    ("BayerRG12", b"RG12"),
];

fn fourcc_for(name: &str) -> Option<FourCC> {
    BAYER_FORMATS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, code)| FourCC::new(code))
}

fn name_for(fourcc: FourCC) -> String {
    BAYER_FORMATS
        .iter()
        .find(|(_, code)| **code == fourcc.repr)
        .map_or_else(|| fourcc.to_string(), |(name, _)| (*name).to_owned())
}

fn stream_error(err: &io::Error) -> SdkError {
    SdkError::Stream(err.to_string())
}

/// Geometry of the buffers the active stream delivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FrameLayout {
    width: u32,
    height: u32,
    /// Pixel bytes per row.
    row_bytes: usize,
    /// Distance between row starts in the driver buffer.
    stride: usize,
}

impl FrameLayout {
    fn new(width: u32, height: u32, fourcc: FourCC, stride: u32) -> Self {
        let stride = stride as usize;
        // Formats outside the Bayer table are passed through and rejected downstream.
        let row_bytes = PixelFormat::resolve(&name_for(fourcc))
            .map_or(stride, |format| width as usize * format.depth.container_bytes());
        Self {
            width,
            height,
            row_bytes,
            stride,
        }
    }

    const fn is_packed(self) -> bool {
        self.stride <= self.row_bytes
    }
}

/// Copy the pixel bytes of every row out of a buffer with padded rows.
///
/// Returns `false` if the buffer ends before the last row is complete.
fn pack_rows(buffer: &[u8], layout: FrameLayout, packed: &mut Vec<u8>) -> bool {
    packed.clear();
    for row in buffer.chunks(layout.stride.max(1)).take(layout.height as usize) {
        match row.get(..layout.row_bytes) {
            Some(pixels) => packed.extend_from_slice(pixels),
            None => return false,
        }
    }
    packed.len() == layout.row_bytes * layout.height as usize
}

/// Enumerates `/dev/video*` capture nodes.
#[derive(Debug, Clone)]
pub struct V4l2Transport {
    device_path: Option<PathBuf>,
    latest_only_buffers: u32,
    active: bool,
}

impl V4l2Transport {
    /// Transport over every capture node, with the given buffer count for
    /// [`GrabStrategy::LatestImageOnly`].
    #[must_use]
    pub fn new(latest_only_buffers: u32) -> Self {
        Self {
            device_path: None,
            latest_only_buffers: latest_only_buffers.max(1),
            active: false,
        }
    }

    /// Restrict enumeration to one device node.
    #[must_use]
    pub fn with_device<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.device_path = Some(path.into());
        self
    }

    fn describe(path: PathBuf) -> Option<DeviceInfo> {
        let device = Device::with_path(&path).ok()?;
        let caps = device.query_caps().ok()?;
        caps.capabilities
            .contains(CapabilityFlags::VIDEO_CAPTURE)
            .then(|| DeviceInfo {
                model_name: caps.card,
                serial_number: caps.bus,
                address: path.display().to_string(),
            })
    }
}

impl Transport for V4l2Transport {
    type Device = V4l2Camera;

    fn initialize(&mut self) -> Result<()> {
        self.active = true;
        Ok(())
    }

    fn terminate(&mut self) {
        self.active = false;
    }

    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        if !self.active {
            return Err(SdkError::Runtime("transport not initialized".to_owned()));
        }

        let candidates: Vec<PathBuf> = match &self.device_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut nodes: Vec<_> = v4l::context::enum_devices();
                nodes.sort_by_key(v4l::context::Node::index);
                nodes.iter().map(|node| node.path().to_path_buf()).collect()
            }
        };

        let devices: Vec<_> = candidates.into_iter().filter_map(Self::describe).collect();
        debug!(count = devices.len(), "V4L2 capture devices enumerated");
        Ok(devices)
    }

    fn create_device(&mut self, info: &DeviceInfo) -> Result<Self::Device> {
        Ok(V4l2Camera {
            info: info.clone(),
            path: PathBuf::from(&info.address),
            latest_only_buffers: self.latest_only_buffers,
            device: None,
            controls: HashMap::new(),
            stream: None,
            layout: FrameLayout::default(),
            packed: Vec::new(),
            ratio_channel: None,
            auto_balance_once: false,
        })
    }
}

/// A V4L2 capture device addressed by node path.
pub struct V4l2Camera {
    info: DeviceInfo,
    path: PathBuf,
    latest_only_buffers: u32,
    device: Option<Device>,
    controls: HashMap<u32, Description>,
    stream: Option<Stream<'static>>,
    layout: FrameLayout,
    packed: Vec<u8>,
    ratio_channel: Option<u32>,
    /// Automatic balance is running in place of a one-shot trigger.
    auto_balance_once: bool,
}

impl V4l2Camera {
    fn device(&self) -> Result<&Device> {
        self.device.as_ref().ok_or(SdkError::NotOpen)
    }

    fn control_description(&self, name: &str, id: u32) -> Result<&Description> {
        self.controls
            .get(&id)
            .ok_or_else(|| SdkError::ParameterNotAvailable(name.to_owned()))
    }

    fn read_control(&self, name: &str, id: u32) -> Result<i64> {
        self.control_description(name, id)?;
        let control = self
            .device()?
            .control(id)
            .map_err(|err| SdkError::parameter(name, err.to_string()))?;
        match control.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(value) => Ok(i64::from(value)),
            other => Err(SdkError::parameter(name, format!("unexpected value {other:?}"))),
        }
    }

    fn write_control(&self, name: &str, id: u32, value: i64) -> Result<()> {
        let value = match self.control_description(name, id)?.typ {
            ControlType::Boolean => Value::Boolean(value != 0),
            ControlType::Button => Value::None,
            _ => Value::Integer(value),
        };
        self.device()?
            .set_control(Control { id, value })
            .map_err(|err| SdkError::parameter(name, err.to_string()))
    }

    fn control_range(&self, name: &str, id: u32) -> Result<(i64, i64)> {
        let description = self.control_description(name, id)?;
        Ok((description.minimum, description.maximum))
    }

    fn set_geometry(&self, name: &str, width: Option<u32>, height: Option<u32>) -> Result<()> {
        let device = self.device()?;
        let mut format = device.format().map_err(|err| stream_error(&err))?;
        let requested = (width.unwrap_or(format.width), height.unwrap_or(format.height));
        format.width = requested.0;
        format.height = requested.1;
        let applied = device
            .set_format(&format)
            .map_err(|err| SdkError::parameter(name, err.to_string()))?;
        if (applied.width, applied.height) == requested {
            Ok(())
        } else {
            Err(SdkError::parameter(
                name,
                format!("driver adjusted to {}x{}", applied.width, applied.height),
            ))
        }
    }

    fn balance_control(&self) -> Result<(&'static str, u32)> {
        match self.ratio_channel {
            Some(cid::RED_BALANCE) => Ok(("Red", cid::RED_BALANCE)),
            Some(cid::BLUE_BALANCE) => Ok(("Blue", cid::BLUE_BALANCE)),
            _ => Err(SdkError::parameter(params::BALANCE_RATIO, "no channel selected")),
        }
    }

    /// Freeze the gains of an automatic run that stood in for a one-shot balance.
    fn end_auto_balance_once(&mut self) {
        if mem::take(&mut self.auto_balance_once) {
            match self.write_control(params::BALANCE_WHITE_AUTO, cid::AUTO_WHITE_BALANCE, 0) {
                Ok(()) => debug!("automatic white balance stopped after one-shot run"),
                Err(err) => warn!(error = %err, "failed to stop automatic white balance"),
            }
        }
    }

    /// Balance controls have driver-specific units; ratios are taken relative to the
    /// control's default, which drivers set to unity gain.
    fn balance_unity(&self, id: u32) -> Result<f64> {
        let default = self.control_description(params::BALANCE_RATIO, id)?.default;
        if default > 0 {
            #[allow(clippy::cast_precision_loss)]
            let unity = default as f64;
            Ok(unity)
        } else {
            Err(SdkError::parameter(params::BALANCE_RATIO, "control has no unity default"))
        }
    }
}

impl CameraDevice for V4l2Camera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&mut self) -> Result<()> {
        let device = Device::with_path(&self.path)
            .map_err(|err| SdkError::DeviceAccess(format!("{}: {err}", self.path.display())))?;

        let controls = device
            .query_controls()
            .map_err(|err| SdkError::DeviceAccess(err.to_string()))?;
        self.controls = controls.into_iter().map(|desc| (desc.id, desc)).collect();
        debug!(
            path = %self.path.display(),
            controls = self.controls.len(),
            "V4L2 device opened"
        );

        self.device = Some(device);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stream = None;
        self.device = None;
        self.controls.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn start_grabbing(&mut self, strategy: GrabStrategy) -> Result<()> {
        let device = self.device()?;
        let format = device.format().map_err(|err| stream_error(&err))?;
        let buffers = match strategy {
            GrabStrategy::LatestImageOnly => self.latest_only_buffers,
        };

        let stream = Stream::with_buffers(device, Type::VideoCapture, buffers)
            .map_err(|err| stream_error(&err))?;
        debug!(
            width = format.width,
            height = format.height,
            stride = format.stride,
            fourcc = %format.fourcc,
            buffers,
            "V4L2 stream created"
        );

        self.layout = FrameLayout::new(format.width, format.height, format.fourcc, format.stride);
        self.stream = Some(stream);
        Ok(())
    }

    fn stop_grabbing(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }

    fn is_grabbing(&self) -> bool {
        self.stream.is_some()
    }

    fn retrieve_result(&mut self, timeout: Duration) -> Result<GrabResult<'_>> {
        let layout = self.layout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SdkError::Stream("not grabbing".to_owned()))?;
        stream.set_timeout(timeout);

        match stream.next() {
            Ok((buffer, meta)) => {
                if meta.flags.contains(BufferFlags::ERROR) {
                    return Ok(GrabResult::failure(
                        meta.sequence,
                        "driver flagged the buffer as corrupted",
                    ));
                }
                let used = buffer.get(..meta.bytesused as usize).unwrap_or(buffer);
                if layout.is_packed() {
                    return Ok(GrabResult::success(layout.width, layout.height, used));
                }
                if !pack_rows(used, layout, &mut self.packed) {
                    return Ok(GrabResult::failure(
                        meta.sequence,
                        format!(
                            "{} bytes do not hold {} rows of stride {}",
                            used.len(),
                            layout.height,
                            layout.stride
                        ),
                    ));
                }
                Ok(GrabResult::success(layout.width, layout.height, &self.packed))
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Err(SdkError::Timeout(timeout)),
            Err(err) => Err(stream_error(&err)),
        }
    }

    fn get_integer(&self, name: &str) -> Result<i64> {
        match name {
            params::GAIN_RAW => self.read_control(name, cid::GAIN),
            params::BLACK_LEVEL_RAW => self.read_control(name, cid::BLACK_LEVEL),
            params::EXPOSURE_TIME_RAW => {
                Ok(self.read_control(name, cid::EXPOSURE_ABSOLUTE)? * EXPOSURE_UNIT_US)
            }
            params::WIDTH | params::HEIGHT => {
                let format = self.device()?.format().map_err(|err| stream_error(&err))?;
                Ok(i64::from(if name == params::WIDTH {
                    format.width
                } else {
                    format.height
                }))
            }
            _ => Err(SdkError::ParameterNotAvailable(name.to_owned())),
        }
    }

    fn set_integer(&mut self, name: &str, value: i64) -> Result<()> {
        let dimension = || {
            u32::try_from(value).map_err(|_| SdkError::parameter(name, "out of range"))
        };
        match name {
            params::GAIN_RAW => self.write_control(name, cid::GAIN, value),
            params::BLACK_LEVEL_RAW => self.write_control(name, cid::BLACK_LEVEL, value),
            params::EXPOSURE_TIME_RAW => {
                let units = (value + EXPOSURE_UNIT_US / 2) / EXPOSURE_UNIT_US;
                self.write_control(name, cid::EXPOSURE_ABSOLUTE, units.max(1))
            }
            params::WIDTH => self.set_geometry(name, Some(dimension()?), None),
            params::HEIGHT => self.set_geometry(name, None, Some(dimension()?)),
            _ => Err(SdkError::ParameterNotAvailable(name.to_owned())),
        }
    }

    fn integer_range(&self, name: &str) -> Result<(i64, i64)> {
        match name {
            params::GAIN_RAW => self.control_range(name, cid::GAIN),
            params::BLACK_LEVEL_RAW => self.control_range(name, cid::BLACK_LEVEL),
            params::EXPOSURE_TIME_RAW => {
                let (min, max) = self.control_range(name, cid::EXPOSURE_ABSOLUTE)?;
                Ok((min * EXPOSURE_UNIT_US, max * EXPOSURE_UNIT_US))
            }
            _ => Err(SdkError::ParameterNotAvailable(name.to_owned())),
        }
    }

    fn get_float(&self, name: &str) -> Result<f64> {
        match name {
            params::FRAME_RATE => {
                let interval = self
                    .device()?
                    .params()
                    .map_err(|err| stream_error(&err))?
                    .interval;
                if interval.numerator == 0 {
                    return Err(SdkError::parameter(name, "driver reports no frame interval"));
                }
                Ok(f64::from(interval.denominator) / f64::from(interval.numerator))
            }
            params::BALANCE_RATIO => {
                let (_, id) = self.balance_control()?;
                #[allow(clippy::cast_precision_loss)]
                let raw = self.read_control(name, id)? as f64;
                Ok(raw / self.balance_unity(id)?)
            }
            _ => Err(SdkError::ParameterNotAvailable(name.to_owned())),
        }
    }

    fn set_float(&mut self, name: &str, value: f64) -> Result<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(SdkError::parameter(name, format!("invalid value {value}")));
        }
        match name {
            params::FRAME_RATE => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let fps = value.round().max(1.0) as u32;
                let applied = self
                    .device()?
                    .set_params(&Parameters::with_fps(fps))
                    .map_err(|err| SdkError::parameter(name, err.to_string()))?;
                debug!(
                    numerator = applied.interval.numerator,
                    denominator = applied.interval.denominator,
                    "frame interval applied"
                );
                Ok(())
            }
            params::BALANCE_RATIO => {
                let (_, id) = self.balance_control()?;
                #[allow(clippy::cast_possible_truncation)]
                let raw = (value * self.balance_unity(id)?).round() as i64;
                self.write_control(name, id, raw)
            }
            _ => Err(SdkError::ParameterNotAvailable(name.to_owned())),
        }
    }

    fn get_boolean(&self, name: &str) -> Result<bool> {
        match name {
            // The interval set through the stream parameters always limits the rate.
            params::FRAME_RATE_ENABLE => Ok(true),
            _ => Err(SdkError::ParameterNotAvailable(name.to_owned())),
        }
    }

    fn set_boolean(&mut self, name: &str, value: bool) -> Result<()> {
        match (name, value) {
            (params::FRAME_RATE_ENABLE, true) => Ok(()),
            (params::FRAME_RATE_ENABLE, false) => {
                Err(SdkError::parameter(name, "frame interval cannot be released"))
            }
            _ => Err(SdkError::ParameterNotAvailable(name.to_owned())),
        }
    }

    fn get_enum(&self, name: &str) -> Result<String> {
        let on_off = |enabled: bool| (if enabled { "Continuous" } else { "Off" }).to_owned();
        match name {
            params::PIXEL_FORMAT => {
                let format = self.device()?.format().map_err(|err| stream_error(&err))?;
                Ok(name_for(format.fourcc))
            }
            params::EXPOSURE_MODE => Ok("Timed".to_owned()),
            params::GAIN_AUTO => Ok(on_off(self.read_control(name, cid::AUTOGAIN)? != 0)),
            params::BALANCE_WHITE_AUTO => {
                Ok(on_off(self.read_control(name, cid::AUTO_WHITE_BALANCE)? != 0))
            }
            params::EXPOSURE_AUTO => Ok(on_off(
                self.read_control(name, cid::EXPOSURE_AUTO)? != EXPOSURE_MANUAL,
            )),
            params::BALANCE_RATIO_SELECTOR => Ok(self.balance_control()?.0.to_owned()),
            _ => Err(SdkError::ParameterNotAvailable(name.to_owned())),
        }
    }

    fn set_enum(&mut self, name: &str, value: &str) -> Result<()> {
        let invalid = || SdkError::parameter(name, format!("unsupported value {value}"));
        match (name, value) {
            (params::PIXEL_FORMAT, _) => {
                let fourcc = fourcc_for(value).ok_or_else(invalid)?;
                let device = self.device()?;
                let mut format = device.format().map_err(|err| stream_error(&err))?;
                format.fourcc = fourcc;
                let applied = device
                    .set_format(&format)
                    .map_err(|err| SdkError::parameter(name, err.to_string()))?;
                if applied.fourcc == fourcc {
                    Ok(())
                } else {
                    Err(SdkError::parameter(
                        name,
                        format!("driver selected {}", applied.fourcc),
                    ))
                }
            }
            (params::EXPOSURE_MODE, "Timed") => Ok(()),
            (params::GAIN_AUTO, "Off") => self.write_control(name, cid::AUTOGAIN, 0),
            (params::GAIN_AUTO, "Continuous") => self.write_control(name, cid::AUTOGAIN, 1),
            (params::EXPOSURE_AUTO, "Off") => {
                self.write_control(name, cid::EXPOSURE_AUTO, EXPOSURE_MANUAL)
            }
            (params::EXPOSURE_AUTO, "Continuous") => {
                self.write_control(name, cid::EXPOSURE_AUTO, EXPOSURE_AUTO_ON)
            }
            (params::BALANCE_WHITE_AUTO, "Off") => {
                self.auto_balance_once = false;
                self.write_control(name, cid::AUTO_WHITE_BALANCE, 0)
            }
            (params::BALANCE_WHITE_AUTO, "Continuous") => {
                self.auto_balance_once = false;
                self.write_control(name, cid::AUTO_WHITE_BALANCE, 1)
            }
            (params::BALANCE_WHITE_AUTO, "Once") => {
                if self.controls.contains_key(&cid::DO_WHITE_BALANCE) {
                    self.write_control(name, cid::DO_WHITE_BALANCE, 1)
                } else {
                    // Without a one-shot button, an automatic run converges during the
                    // settle delay and is switched off when the ratios are read back.
                    warn!("no one-shot white balance control, running automatic balance");
                    self.write_control(name, cid::AUTO_WHITE_BALANCE, 1)?;
                    self.auto_balance_once = true;
                    Ok(())
                }
            }
            (params::BALANCE_RATIO_SELECTOR, "Red") => {
                self.end_auto_balance_once();
                self.ratio_channel = Some(cid::RED_BALANCE);
                Ok(())
            }
            (params::BALANCE_RATIO_SELECTOR, "Blue") => {
                self.end_auto_balance_once();
                self.ratio_channel = Some(cid::BLUE_BALANCE);
                Ok(())
            }
            (
                params::EXPOSURE_MODE
                | params::GAIN_AUTO
                | params::EXPOSURE_AUTO
                | params::BALANCE_WHITE_AUTO
                | params::BALANCE_RATIO_SELECTOR,
                _,
            ) => Err(invalid()),
            _ => Err(SdkError::ParameterNotAvailable(name.to_owned())),
        }
    }
}
