//! Raw-cam-capture binary: live acquisition loop with optional raw recording.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use raw_cam_capture::mock::MockTransport;
use raw_cam_capture::preview::{
    highlight_clipping, DEFAULT_CLIPPING_COLOR, DEFAULT_CLIPPING_THRESHOLD,
};
use raw_cam_capture::recorder::{RecorderError, DEFAULT_MAX_FRAMES};
use raw_cam_capture::validation::validate_pair;
use raw_cam_capture::{
    logger, Camera, CameraConfig, ConfigError, InitError, Recorder, Transport, V4l2Transport,
};
use thiserror::Error;
use tracing::{error, info, warn};

/// Acquire frames from a Bayer camera and optionally record them as CFA DNG sequences.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON file overriding the default acquisition settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the simulated camera instead of V4L2 hardware.
    #[arg(long)]
    simulate: bool,

    /// V4L2 device node to bind instead of the first capture device.
    #[arg(long)]
    device: Option<PathBuf>,

    /// Number of frames to grab before exiting.
    #[arg(long, default_value_t = 240)]
    frames: u32,

    /// Record raw frames into a timestamped folder under this directory.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Frames per recording before it stops on its own.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAMES)]
    max_record_frames: usize,

    /// Run one-shot white balance after startup.
    #[arg(long)]
    white_balance: bool,

    /// Raw gain change applied after startup.
    #[arg(long, allow_negative_numbers = true)]
    gain_delta: Option<i64>,

    /// Paint clipped highlights in each preview and report their count.
    #[arg(long)]
    clipping: bool,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Error)]
enum AppError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("camera: {0}")]
    Init(#[from] InitError),

    #[error("camera did not start")]
    NotStarted,

    #[error("camera format cannot be recorded")]
    Unrecordable,

    #[error("recorder: {0}")]
    Recorder(#[from] RecorderError),
}

fn main() -> ExitCode {
    let args = Args::parse();
    logger::init(&args.log_level);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "capture aborted");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), AppError> {
    let config = match &args.config {
        Some(path) => CameraConfig::from_json_file(path)?,
        None => CameraConfig::default(),
    };
    config.validate()?;

    if args.simulate {
        info!("using simulated camera");
        capture(MockTransport::new(), config, args)
    } else {
        let mut transport = V4l2Transport::new(config.stream_buffers);
        if let Some(path) = &args.device {
            transport = transport.with_device(path);
        }
        capture(transport, config, args)
    }
}

fn capture<T: Transport>(
    transport: T,
    config: CameraConfig,
    args: &Args,
) -> Result<(), AppError> {
    let mut camera = Camera::new(transport, config)?;
    if !camera.initialize_camera() {
        return Err(AppError::NotStarted);
    }
    for warning in camera.session().warnings() {
        warn!(parameter = warning.parameter, error = %warning.error, "parameter not applied");
    }

    if let Some(delta) = args.gain_delta {
        info!(gain = camera.set_gain(delta), "gain adjusted");
    }
    if args.white_balance {
        let (red, blue) = camera.trigger_wb_and_get_gains();
        info!(red, blue, "white balance gains");
    }
    info!(
        gain = camera.get_gain(),
        exposure_us = camera.get_exposure(),
        shutter_angle = camera.shutter_angle(),
        "acquisition settings"
    );

    let mut recorder = match &args.record {
        Some(root) => {
            let metadata = camera
                .recording_metadata()
                .ok_or(AppError::Unrecordable)?;
            let mut recorder = Recorder::new(root, args.max_record_frames)?;
            recorder.start(metadata)?;
            Some(recorder)
        }
        None => None,
    };

    let started = Instant::now();
    let mut delivered = 0u32;
    for index in 0..args.frames {
        let mut pair = camera.grab_preview_and_raw();
        if pair.is_empty() {
            continue;
        }
        if delivered == 0 {
            if let Err(err) = validate_pair(&pair, camera.session().config()) {
                warn!(error = %err, "first frame does not match the configuration");
            }
        }
        delivered += 1;

        if args.clipping {
            let clipped = highlight_clipping(
                &mut pair.preview,
                DEFAULT_CLIPPING_THRESHOLD,
                DEFAULT_CLIPPING_COLOR,
            );
            if clipped > 0 {
                info!(frame = index, clipped, "highlights clipped");
            }
        }

        if let Some(active) = recorder.as_mut() {
            active.add_frame(pair.raw);
        }

        if delivered % 24 == 0 {
            let fps = f64::from(delivered) / started.elapsed().as_secs_f64();
            info!(
                delivered,
                fps,
                queued = recorder.as_ref().map_or(0, Recorder::queue_len),
                "capturing"
            );
        }
    }

    if let Some(summary) = recorder.as_mut().and_then(Recorder::stop) {
        info!(
            folder = %summary.folder.display(),
            saved = summary.saved,
            errors = summary.errors,
            "recording finished"
        );
    }

    info!(requested = args.frames, delivered, "capture finished");
    camera.shutdown_camera();
    Ok(())
}
