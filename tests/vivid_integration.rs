//! Integration tests using the vivid virtual camera in a Bayer format.
//!
//! These tests require:
//! - The `integration` feature flag: `cargo test --features integration`
//! - The vivid kernel module loaded
//! - Access to /dev/video* devices (may require sudo or video group membership)
//!
//! vivid accepts the unpacked Bayer formats at arbitrary sizes on its webcam input, so
//! the session can be configured exactly as for a sensor, minus the GigE-only nodes.
//!
//! Tests will fail if vivid is not available.

#![cfg(feature = "integration")]

use raw_cam_capture::traits::params;
use raw_cam_capture::validation::{validate_pair, validate_sample_range};
use raw_cam_capture::{
    BitDepth, Camera, CameraConfig, CameraDevice, DeviceSession, RawSamples, Transport,
    V4l2Transport,
};
use serial_test::serial;
use std::fs;
use std::path::{Path, PathBuf};

/// Find the first vivid capture node through sysfs.
fn find_vivid_device() -> Option<PathBuf> {
    let video4linux = Path::new("/sys/class/video4linux");
    (0..10).find_map(|index| {
        let name = fs::read_to_string(video4linux.join(format!("video{index}")).join("name")).ok()?;
        name.to_lowercase()
            .contains("vivid")
            .then(|| PathBuf::from(format!("/dev/video{index}")))
    })
}

/// Integration tests MUST have vivid loaded - they fail rather than silently skip.
macro_rules! require_vivid {
    () => {
        match find_vivid_device() {
            Some(path) => path,
            None => {
                panic!(
                    "vivid virtual camera not available.\n\
                     Load the vivid kernel module first.\n\
                     Or run unit tests only: cargo test --lib"
                );
            }
        }
    };
}

fn vivid_config(pixel_format: &str) -> CameraConfig {
    CameraConfig {
        pixel_format: pixel_format.to_owned(),
        width: 640,
        height: 480,
        target_fps: 25.0,
        grab_timeout_ms: 2000,
        white_balance_settle_ms: 0,
        ..CameraConfig::default()
    }
}

fn vivid_camera(config: CameraConfig) -> Camera<V4l2Transport> {
    let path = require_vivid!();
    let transport = V4l2Transport::new(config.stream_buffers).with_device(path);
    Camera::new(transport, config).expect("Failed to claim session")
}

#[test]
#[serial]
fn test_vivid_enumeration() {
    let path = require_vivid!();
    let mut transport = V4l2Transport::new(1).with_device(&path);
    transport.initialize().expect("Failed to initialize transport");

    let devices = transport.enumerate_devices().expect("Failed to enumerate");

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address, path.display().to_string());
    println!("vivid: {} at {}", devices[0].model_name, devices[0].serial_number);
}

#[test]
#[serial]
fn test_vivid_twelve_bit_acquisition() {
    let config = vivid_config("BayerGB12");
    let mut camera = vivid_camera(config.clone());

    assert!(camera.initialize_camera(), "vivid should stream BayerGB12");
    for warning in camera.session().warnings() {
        println!("not applied: {} ({})", warning.parameter, warning.error);
    }

    let pair = camera.grab_preview_and_raw();
    assert!(!pair.is_empty(), "vivid should deliver a frame");
    let result = validate_pair(&pair, &config);
    assert!(result.is_ok(), "products should match configuration: {result:?}");
    assert!(matches!(pair.raw.samples(), RawSamples::Sixteen(_)));
    let result = validate_sample_range(&pair.raw, BitDepth::Twelve);
    assert!(result.is_ok(), "samples should fit 12 bits: {result:?}");

    assert!(camera.shutdown_camera());
}

#[test]
#[serial]
fn test_vivid_eight_bit_acquisition() {
    let config = vivid_config("BayerRG8");
    let mut camera = vivid_camera(config.clone());

    assert!(camera.initialize_camera(), "vivid should stream BayerRG8");

    for _ in 0..5 {
        let pair = camera.grab_preview_and_raw();
        let result = validate_pair(&pair, &config);
        assert!(result.is_ok(), "products should match configuration: {result:?}");
        assert!(matches!(pair.raw.samples(), RawSamples::Eight(_)));
    }

    assert!(camera.shutdown_camera());
}

#[test]
#[serial]
fn test_vivid_pixel_format_readback() {
    let path = require_vivid!();
    let transport = V4l2Transport::new(1).with_device(path);
    let mut session =
        DeviceSession::new(transport, vivid_config("BayerBG10")).expect("Failed to claim session");

    session.initialize().expect("Failed to initialize");
    let device = session.open_device().expect("device should be open");

    assert_eq!(
        device
            .get_enum(params::PIXEL_FORMAT)
            .expect("Failed to read format"),
        "BayerBG10"
    );
    assert_eq!(
        device
            .get_enum(params::EXPOSURE_MODE)
            .expect("Failed to read exposure mode"),
        "Timed"
    );
}

#[test]
#[serial]
fn test_vivid_gain_control() {
    let mut camera = vivid_camera(vivid_config("BayerGB12"));
    assert!(camera.initialize_camera());

    let gain = camera.get_gain();
    println!("vivid gain: {gain}");
    assert!(gain >= 0, "vivid exposes a gain control");

    let lowered = camera.set_gain(-1_000_000);
    assert!(lowered >= 0, "gain should clamp to the control minimum");
    assert_eq!(camera.get_gain(), lowered);
}

#[test]
#[serial]
fn test_vivid_shutdown_stops_grabbing() {
    let mut camera = vivid_camera(vivid_config("BayerGB12"));
    assert!(camera.initialize_camera());
    assert!(!camera.grab_preview_and_raw().is_empty());

    assert!(camera.shutdown_camera());
    assert!(camera.grab_preview_and_raw().is_empty());
    assert!(camera.shutdown_camera());
}
