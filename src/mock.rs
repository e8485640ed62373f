//! Simulated transport and device for running without hardware.
//!
//! State lives behind a shared handle so a test can inspect and script the device after
//! the session has taken ownership of it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::format::{BitDepth, PixelFormat};
use crate::traits::{
    params, CameraDevice, DeviceInfo, GrabResult, GrabStrategy, Result, SdkError, Transport,
};

/// One simulated device parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum MockParam {
    /// Integer with inclusive range.
    Integer {
        /// Current value.
        value: i64,
        /// Smallest legal value.
        min: i64,
        /// Largest legal value.
        max: i64,
    },
    /// Floating-point value.
    Float(f64),
    /// Boolean value.
    Boolean(bool),
    /// Enumeration with its legal entries.
    Enum {
        /// Current entry.
        value: String,
        /// Legal entries.
        entries: Vec<String>,
    },
}

impl MockParam {
    fn integer(value: i64, min: i64, max: i64) -> Self {
        Self::Integer { value, min, max }
    }

    fn enumeration(value: &str, entries: &[&str]) -> Self {
        Self::Enum {
            value: value.to_owned(),
            entries: entries.iter().map(|&entry| entry.to_owned()).collect(),
        }
    }
}

/// Scripted outcome for one retrieve call.
#[derive(Debug, Clone)]
pub enum MockGrab {
    /// Deliver a frame from the current pattern or payload.
    Frame,
    /// Deliver a failed grab result.
    Failure {
        /// Device error code.
        code: u32,
        /// Device error description.
        description: String,
    },
    /// Report that no frame arrived in time.
    Timeout,
}

/// Synthetic sensor content.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Diagonal ramp that moves by one step per frame.
    Ramp,
    /// Every sample holds the same value.
    Solid(u16),
}

/// Device lifecycle calls that report failure.
#[derive(Debug, Clone, Copy, Default)]
struct LifecycleFailures {
    start: bool,
    stop: bool,
    close: bool,
}

#[derive(Debug)]
struct MockState {
    params: HashMap<String, MockParam>,
    balance_ratios: HashMap<String, f64>,
    white_balance_result: (f64, f64),
    failing_writes: HashSet<String>,
    failing_reads: HashSet<String>,
    lifecycle_failures: LifecycleFailures,
    write_log: Vec<(String, String)>,
    device_count: usize,
    runtime_available: bool,
    runtime_active: bool,
    devices_created: usize,
    open: bool,
    strategy: Option<GrabStrategy>,
    scripted: VecDeque<MockGrab>,
    pattern: TestPattern,
    payload: Option<Vec<u8>>,
    frames_delivered: u32,
}

impl Default for MockState {
    fn default() -> Self {
        let parameters = [
            (
                params::PIXEL_FORMAT,
                MockParam::enumeration(
                    "BayerGB12",
                    &[
                        "BayerGB8", "BayerGB10", "BayerGB12", "BayerRG8", "BayerRG10",
                        "BayerRG12", "BayerGR12", "BayerBG12", "Mono8",
                    ],
                ),
            ),
            (params::PROCESSED_RAW_ENABLE, MockParam::Boolean(true)),
            (
                params::GAIN_AUTO,
                MockParam::enumeration("Continuous", &["Off", "Once", "Continuous"]),
            ),
            (params::GAIN_RAW, MockParam::integer(0, 0, 1023)),
            (params::PACKET_SIZE, MockParam::integer(1500, 220, 9000)),
            (params::WIDTH, MockParam::integer(640, 16, 2048)),
            (params::HEIGHT, MockParam::integer(480, 16, 1108)),
            (params::CENTER_X, MockParam::Boolean(false)),
            (params::CENTER_Y, MockParam::Boolean(false)),
            (
                params::BLACK_LEVEL_SELECTOR,
                MockParam::enumeration("All", &["All", "Red", "Green", "Blue"]),
            ),
            (params::BLACK_LEVEL_RAW, MockParam::integer(0, 0, 511)),
            (
                params::AUTO_FUNCTION_PROFILE,
                MockParam::enumeration("GainMinimum", &["GainMinimum", "ExposureMinimum"]),
            ),
            (
                params::EXPOSURE_MODE,
                MockParam::enumeration("Timed", &["Timed", "TriggerWidth"]),
            ),
            (
                params::EXPOSURE_AUTO,
                MockParam::enumeration("Continuous", &["Off", "Once", "Continuous"]),
            ),
            (params::EXPOSURE_TIME_RAW, MockParam::integer(10_000, 35, 999_985)),
            (params::FRAME_RATE_ENABLE, MockParam::Boolean(false)),
            (params::FRAME_RATE, MockParam::Float(30.0)),
            (
                params::BALANCE_WHITE_AUTO,
                MockParam::enumeration("Off", &["Off", "Once", "Continuous"]),
            ),
            (
                params::BALANCE_RATIO_SELECTOR,
                MockParam::enumeration("Red", &["Red", "Green", "Blue"]),
            ),
        ]
        .into_iter()
        .map(|(name, param)| (name.to_owned(), param))
        .collect();

        let balance_ratios = ["Red", "Green", "Blue"]
            .into_iter()
            .map(|channel| (channel.to_owned(), 1.0))
            .collect();

        Self {
            params: parameters,
            balance_ratios,
            white_balance_result: (1.0, 1.0),
            failing_writes: HashSet::new(),
            failing_reads: HashSet::new(),
            lifecycle_failures: LifecycleFailures::default(),
            write_log: Vec::new(),
            device_count: 1,
            runtime_available: true,
            runtime_active: false,
            devices_created: 0,
            open: false,
            strategy: None,
            scripted: VecDeque::new(),
            pattern: TestPattern::Ramp,
            payload: None,
            frames_delivered: 0,
        }
    }
}

impl MockState {
    fn check_read(&self, name: &str) -> Result<()> {
        if !self.open {
            return Err(SdkError::NotOpen);
        }
        if self.failing_reads.contains(name) {
            return Err(SdkError::parameter(name, "simulated read failure"));
        }
        Ok(())
    }

    fn param(&self, name: &str) -> Result<&MockParam> {
        self.check_read(name)?;
        if name == params::BALANCE_RATIO {
            return Err(SdkError::parameter(name, "read through the selector"));
        }
        self.params
            .get(name)
            .ok_or_else(|| SdkError::ParameterNotAvailable(name.to_owned()))
    }

    fn param_mut(&mut self, name: &str, logged: String) -> Result<&mut MockParam> {
        if !self.open {
            return Err(SdkError::NotOpen);
        }
        if self.failing_writes.contains(name) {
            return Err(SdkError::parameter(name, "simulated write failure"));
        }
        if !self.params.contains_key(name) {
            return Err(SdkError::ParameterNotAvailable(name.to_owned()));
        }
        self.write_log.push((name.to_owned(), logged));
        self.params
            .get_mut(name)
            .ok_or_else(|| SdkError::ParameterNotAvailable(name.to_owned()))
    }

    fn integer(&self, name: &str) -> Option<i64> {
        match self.params.get(name)? {
            MockParam::Integer { value, .. } => Some(*value),
            _ => None,
        }
    }

    fn enumeration(&self, name: &str) -> Option<&str> {
        match self.params.get(name)? {
            MockParam::Enum { value, .. } => Some(value.as_str()),
            _ => None,
        }
    }

    fn geometry(&self) -> (u32, u32) {
        let dimension = |name| {
            self.integer(name)
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(0)
        };
        (dimension(params::WIDTH), dimension(params::HEIGHT))
    }

    fn next_frame(&mut self) -> Vec<u8> {
        let sequence = self.frames_delivered;
        self.frames_delivered = self.frames_delivered.wrapping_add(1);

        if let Some(payload) = &self.payload {
            return payload.clone();
        }

        let (width, height) = self.geometry();
        let depth = self
            .enumeration(params::PIXEL_FORMAT)
            .and_then(|format| PixelFormat::resolve(format).ok())
            .map_or(BitDepth::Eight, |format| format.depth);
        generate_test_frame(width, height, depth, self.pattern, sequence)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn generate_test_frame(
    width: u32,
    height: u32,
    depth: BitDepth,
    pattern: TestPattern,
    sequence: u32,
) -> Vec<u8> {
    let max = (1u32 << depth.bits()) - 1;
    let mut data = Vec::with_capacity(width as usize * height as usize * depth.container_bytes());

    for y in 0..height {
        for x in 0..width {
            let sample = match pattern {
                TestPattern::Ramp => (x.wrapping_mul(7) + y.wrapping_mul(13) + sequence) & max,
                TestPattern::Solid(value) => u32::from(value).min(max),
            };
            match depth {
                BitDepth::Eight => data.push(sample as u8),
                BitDepth::Ten | BitDepth::Twelve => {
                    data.extend_from_slice(&(sample as u16).to_le_bytes());
                }
            }
        }
    }

    data
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated transport runtime.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: SharedState,
}

impl MockTransport {
    /// Create a transport with one simulated device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for inspecting and scripting the simulated device.
    #[must_use]
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Transport for MockTransport {
    type Device = MockDevice;

    fn initialize(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.runtime_available {
            return Err(SdkError::Runtime("simulated runtime unavailable".to_owned()));
        }
        state.runtime_active = true;
        Ok(())
    }

    fn terminate(&mut self) {
        lock(&self.state).runtime_active = false;
    }

    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        let state = lock(&self.state);
        if !state.runtime_active {
            return Err(SdkError::Runtime("runtime not initialized".to_owned()));
        }
        Ok((0..state.device_count)
            .map(|index| DeviceInfo {
                model_name: "Mock Camera".to_owned(),
                serial_number: format!("MOCK{index:04}"),
                address: format!("mock:{index}"),
            })
            .collect())
    }

    fn create_device(&mut self, info: &DeviceInfo) -> Result<Self::Device> {
        lock(&self.state).devices_created += 1;
        Ok(MockDevice {
            state: Arc::clone(&self.state),
            info: info.clone(),
            frame: Vec::new(),
        })
    }
}

/// Simulated camera bound by [`MockTransport`].
#[derive(Debug)]
pub struct MockDevice {
    state: SharedState,
    info: DeviceInfo,
    frame: Vec<u8>,
}

impl CameraDevice for MockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&mut self) -> Result<()> {
        lock(&self.state).open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.lifecycle_failures.close {
            return Err(SdkError::DeviceAccess("simulated close failure".to_owned()));
        }
        state.open = false;
        state.strategy = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn start_grabbing(&mut self, strategy: GrabStrategy) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(SdkError::NotOpen);
        }
        if state.lifecycle_failures.start {
            return Err(SdkError::Stream("simulated stream start failure".to_owned()));
        }
        state.strategy = Some(strategy);
        Ok(())
    }

    fn stop_grabbing(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.lifecycle_failures.stop {
            return Err(SdkError::Stream("simulated stream stop failure".to_owned()));
        }
        state.strategy = None;
        Ok(())
    }

    fn is_grabbing(&self) -> bool {
        lock(&self.state).strategy.is_some()
    }

    fn retrieve_result(&mut self, timeout: Duration) -> Result<GrabResult<'_>> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(SdkError::NotOpen);
        }
        if state.strategy.is_none() {
            return Err(SdkError::Stream("device is not grabbing".to_owned()));
        }

        let next = state.scripted.pop_front().unwrap_or(MockGrab::Frame);
        match next {
            MockGrab::Frame => {
                let (width, height) = state.geometry();
                self.frame = state.next_frame();
                drop(state);
                Ok(GrabResult::success(width, height, &self.frame))
            }
            MockGrab::Failure { code, description } => Ok(GrabResult::failure(code, description)),
            MockGrab::Timeout => Err(SdkError::Timeout(timeout)),
        }
    }

    fn get_integer(&self, name: &str) -> Result<i64> {
        match lock(&self.state).param(name)? {
            MockParam::Integer { value, .. } => Ok(*value),
            _ => Err(SdkError::parameter(name, "not an integer")),
        }
    }

    fn set_integer(&mut self, name: &str, value: i64) -> Result<()> {
        let mut state = lock(&self.state);
        match state.param_mut(name, value.to_string())? {
            MockParam::Integer {
                value: current,
                min,
                max,
            } => {
                if value < *min || value > *max {
                    return Err(SdkError::parameter(
                        name,
                        format!("{value} outside [{min}, {max}]"),
                    ));
                }
                *current = value;
                Ok(())
            }
            _ => Err(SdkError::parameter(name, "not an integer")),
        }
    }

    fn integer_range(&self, name: &str) -> Result<(i64, i64)> {
        match lock(&self.state).param(name)? {
            MockParam::Integer { min, max, .. } => Ok((*min, *max)),
            _ => Err(SdkError::parameter(name, "not an integer")),
        }
    }

    fn get_float(&self, name: &str) -> Result<f64> {
        let state = lock(&self.state);
        if name == params::BALANCE_RATIO {
            state.check_read(name)?;
            let channel = state.enumeration(params::BALANCE_RATIO_SELECTOR).unwrap_or("Red");
            return state
                .balance_ratios
                .get(channel)
                .copied()
                .ok_or_else(|| SdkError::parameter(name, format!("no ratio for {channel}")));
        }
        match state.param(name)? {
            MockParam::Float(value) => Ok(*value),
            _ => Err(SdkError::parameter(name, "not a float")),
        }
    }

    fn set_float(&mut self, name: &str, value: f64) -> Result<()> {
        let mut state = lock(&self.state);
        match state.param_mut(name, value.to_string())? {
            MockParam::Float(current) => {
                *current = value;
                Ok(())
            }
            _ => Err(SdkError::parameter(name, "not a float")),
        }
    }

    fn get_boolean(&self, name: &str) -> Result<bool> {
        match lock(&self.state).param(name)? {
            MockParam::Boolean(value) => Ok(*value),
            _ => Err(SdkError::parameter(name, "not a boolean")),
        }
    }

    fn set_boolean(&mut self, name: &str, value: bool) -> Result<()> {
        let mut state = lock(&self.state);
        match state.param_mut(name, value.to_string())? {
            MockParam::Boolean(current) => {
                *current = value;
                Ok(())
            }
            _ => Err(SdkError::parameter(name, "not a boolean")),
        }
    }

    fn get_enum(&self, name: &str) -> Result<String> {
        match lock(&self.state).param(name)? {
            MockParam::Enum { value, .. } => Ok(value.clone()),
            _ => Err(SdkError::parameter(name, "not an enumeration")),
        }
    }

    fn set_enum(&mut self, name: &str, value: &str) -> Result<()> {
        let mut state = lock(&self.state);
        match state.param_mut(name, value.to_owned())? {
            MockParam::Enum {
                value: current,
                entries,
            } => {
                if !entries.iter().any(|entry| entry == value) {
                    return Err(SdkError::parameter(name, format!("no entry {value}")));
                }
                value.clone_into(current);
            }
            _ => return Err(SdkError::parameter(name, "not an enumeration")),
        }

        // One-shot balance completes immediately and the node falls back to Off.
        if name == params::BALANCE_WHITE_AUTO && value == "Once" {
            let (red, blue) = state.white_balance_result;
            state.balance_ratios.insert("Red".to_owned(), red);
            state.balance_ratios.insert("Blue".to_owned(), blue);
            if let Some(MockParam::Enum { value: current, .. }) =
                state.params.get_mut(params::BALANCE_WHITE_AUTO)
            {
                "Off".clone_into(current);
            }
        }
        Ok(())
    }
}

/// Inspection and scripting handle shared with a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: SharedState,
}

impl MockHandle {
    /// Number of devices enumeration reports.
    pub fn set_device_count(&self, count: usize) {
        lock(&self.state).device_count = count;
    }

    /// Make runtime bring-up fail or succeed.
    pub fn set_runtime_available(&self, available: bool) {
        lock(&self.state).runtime_available = available;
    }

    /// Reject every write to `name`.
    pub fn fail_writes(&self, name: &str) {
        lock(&self.state).failing_writes.insert(name.to_owned());
    }

    /// Reject every read of `name`.
    pub fn fail_reads(&self, name: &str) {
        lock(&self.state).failing_reads.insert(name.to_owned());
    }

    /// Accept reads and writes of `name` again.
    pub fn clear_failures(&self, name: &str) {
        let mut state = lock(&self.state);
        state.failing_reads.remove(name);
        state.failing_writes.remove(name);
    }

    /// Make starting the stream fail.
    pub fn fail_start(&self) {
        lock(&self.state).lifecycle_failures.start = true;
    }

    /// Make stopping the stream fail; the device keeps streaming.
    pub fn fail_stop(&self) {
        lock(&self.state).lifecycle_failures.stop = true;
    }

    /// Make closing the device fail; the device stays open.
    pub fn fail_close(&self) {
        lock(&self.state).lifecycle_failures.close = true;
    }

    /// Let every lifecycle call succeed again.
    pub fn clear_lifecycle_failures(&self) {
        lock(&self.state).lifecycle_failures = LifecycleFailures::default();
    }

    /// Drop `name` from the device, as on a model that lacks it.
    pub fn remove_parameter(&self, name: &str) {
        lock(&self.state).params.remove(name);
    }

    /// Replace the legal range of an integer parameter.
    pub fn set_integer_range(&self, name: &str, min: i64, max: i64) {
        if let Some(MockParam::Integer {
            value,
            min: current_min,
            max: current_max,
        }) = lock(&self.state).params.get_mut(name)
        {
            *current_min = min;
            *current_max = max;
            *value = (*value).max(min).min(max);
        }
    }

    /// Ratios the next one-shot white balance will produce.
    pub fn set_white_balance_result(&self, red: f64, blue: f64) {
        lock(&self.state).white_balance_result = (red, blue);
    }

    /// Queue outcomes for upcoming retrieve calls; frames are delivered once the queue is empty.
    pub fn push_grabs<I>(&self, grabs: I)
    where
        I: IntoIterator<Item = MockGrab>,
    {
        lock(&self.state).scripted.extend(grabs);
    }

    /// Deliver exactly these bytes for every frame.
    pub fn set_payload(&self, payload: Vec<u8>) {
        lock(&self.state).payload = Some(payload);
    }

    /// Synthetic content for generated frames.
    pub fn set_pattern(&self, pattern: TestPattern) {
        lock(&self.state).pattern = pattern;
    }

    /// Force a parameter value regardless of ranges or open state.
    pub fn force(&self, name: &str, param: MockParam) {
        lock(&self.state).params.insert(name.to_owned(), param);
    }

    /// Current integer value of `name`.
    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        lock(&self.state).integer(name)
    }

    /// Current enumeration entry of `name`.
    #[must_use]
    pub fn enumeration(&self, name: &str) -> Option<String> {
        lock(&self.state).enumeration(name).map(str::to_owned)
    }

    /// Current boolean value of `name`.
    #[must_use]
    pub fn boolean(&self, name: &str) -> Option<bool> {
        match lock(&self.state).params.get(name)? {
            MockParam::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// Every write that reached an existing parameter, as `(name, value)`, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(String, String)> {
        lock(&self.state).write_log.clone()
    }

    /// How many devices have been bound.
    #[must_use]
    pub fn devices_created(&self) -> usize {
        lock(&self.state).devices_created
    }

    /// How many frames have been delivered.
    #[must_use]
    pub fn frames_delivered(&self) -> u32 {
        lock(&self.state).frames_delivered
    }

    /// Whether the runtime is up.
    #[must_use]
    pub fn runtime_active(&self) -> bool {
        lock(&self.state).runtime_active
    }

    /// Whether the device is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Whether the device is streaming.
    #[must_use]
    pub fn is_grabbing(&self) -> bool {
        lock(&self.state).strategy.is_some()
    }

    /// Buffering policy of the active stream.
    #[must_use]
    pub fn strategy(&self) -> Option<GrabStrategy> {
        lock(&self.state).strategy
    }
}
