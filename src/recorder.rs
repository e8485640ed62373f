//! Raw frame recording to numbered CFA DNG files.
//!
//! A recording owns one timestamped folder under the storage root. Frames are handed to
//! a save worker over a channel so that queueing never waits on disk I/O. Every file
//! carries the sensor's CFA layout and levels, so a recording can be developed without
//! knowing which camera mode produced it.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use chrono::Local;
use dng::ifd::{Ifd, IfdValue, Offsets};
use dng::tags::ifd as tags;
use dng::{DngWriter, FileType};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::format::{BitDepth, CfaPattern};
use crate::pipeline::{RawFrame, RawSamples};

/// Frames accepted per recording unless configured otherwise.
pub const DEFAULT_MAX_FRAMES: usize = 3000;

/// `PhotometricInterpretation` value for colour-filter-array data.
const PHOTOMETRIC_CFA: u16 = 32803;

/// Recorder failures.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// A recording is already running.
    #[error("a recording is already in progress")]
    AlreadyRecording,

    /// Storage could not be prepared or written.
    #[error("storage error: {0}")]
    Io(#[from] io::Error),

    /// DNG encoding failed.
    #[error("DNG encoding failed: {0}")]
    Encode(String),

    /// A frame's geometry differs from the first frame of the recording.
    #[error("frame is {actual:?}, recording started at {expected:?}")]
    GeometryMismatch {
        /// Width and height of the first frame.
        expected: (u32, u32),
        /// Width and height of the rejected frame.
        actual: (u32, u32),
    },

    /// A frame's sample container does not match the recording's bit depth.
    #[error("frame samples do not hold {0:?} data")]
    DepthMismatch(BitDepth),

    /// The save worker panicked.
    #[error("save worker terminated abnormally")]
    WorkerPanicked,
}

/// Sensor description written into every file of a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingMetadata {
    /// CFA layout of the sensor format.
    pub pattern: CfaPattern,
    /// Declared bits per sample.
    pub depth: BitDepth,
    /// Raw black level.
    pub black_level: u32,
    /// Exposure time in microseconds, when known.
    pub exposure_us: Option<u32>,
    /// Camera maker.
    pub make: String,
    /// Camera model.
    pub model: String,
}

/// Outcome of one finished recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    /// Folder holding the recording.
    pub folder: PathBuf,
    /// Frames accepted by [`Recorder::add_frame`].
    pub frames_added: usize,
    /// Frames written to disk.
    pub saved: usize,
    /// Frames that failed to save.
    pub errors: usize,
}

struct ActiveRecording {
    folder: PathBuf,
    sender: mpsc::Sender<RawFrame>,
    worker: JoinHandle<(usize, usize)>,
    frames_added: usize,
    pending: Arc<AtomicUsize>,
}

/// Records raw frames into `frame_NNNNNN.dng` files.
pub struct Recorder {
    storage_root: PathBuf,
    max_frames: usize,
    active: Option<ActiveRecording>,
    finished: Option<RecordingSummary>,
}

impl Recorder {
    /// Create a recorder, creating `storage_root` if needed.
    ///
    /// # Errors
    ///
    /// [`RecorderError::Io`] if the storage root cannot be created.
    pub fn new<P: Into<PathBuf>>(
        storage_root: P,
        max_frames: usize,
    ) -> Result<Self, RecorderError> {
        let storage_root = storage_root.into();
        fs::create_dir_all(&storage_root)?;
        Ok(Self {
            storage_root,
            max_frames,
            active: None,
            finished: None,
        })
    }

    /// Start a new recording in a fresh timestamped folder and return its path.
    ///
    /// # Arguments
    ///
    /// * `metadata` - Sensor description stamped into every frame of this recording
    ///
    /// # Errors
    ///
    /// [`RecorderError::AlreadyRecording`] while a recording runs, and
    /// [`RecorderError::Io`] if the folder or the save worker cannot be created.
    pub fn start(&mut self, metadata: RecordingMetadata) -> Result<PathBuf, RecorderError> {
        if self.active.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let folder = create_recording_folder(&self.storage_root)?;
        let (sender, receiver) = mpsc::channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = {
            let folder = folder.clone();
            let pending = Arc::clone(&pending);
            thread::Builder::new()
                .name("frame-saver".into())
                .spawn(move || save_worker(&folder, &metadata, &receiver, &pending))?
        };

        info!(folder = %folder.display(), max_frames = self.max_frames, "recording started");
        self.finished = None;
        self.active = Some(ActiveRecording {
            folder: folder.clone(),
            sender,
            worker,
            frames_added: 0,
            pending,
        });
        Ok(folder)
    }

    /// Queue a frame for saving. `false` if it was not accepted.
    ///
    /// Empty frames are ignored. Once the frame limit has been reached the recording stops
    /// on its own and its summary is kept for the next [`Recorder::stop`].
    pub fn add_frame(&mut self, frame: RawFrame) -> bool {
        if frame.is_empty() {
            return false;
        }
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        if active.frames_added >= self.max_frames {
            info!(max_frames = self.max_frames, "frame limit reached");
            self.finished = self.finish();
            return false;
        }

        active.pending.fetch_add(1, Ordering::SeqCst);
        if active.sender.send(frame).is_err() {
            active.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("save worker is gone, stopping recording");
            self.finished = self.finish();
            return false;
        }
        active.frames_added += 1;
        true
    }

    /// Stop recording and wait for every queued frame to be saved.
    ///
    /// `None` if no recording was running or has finished since the last call.
    pub fn stop(&mut self) -> Option<RecordingSummary> {
        self.finish().or_else(|| self.finished.take())
    }

    /// Whether a recording is running.
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Frames queued but not yet written.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.active
            .as_ref()
            .map_or(0, |active| active.pending.load(Ordering::SeqCst))
    }

    fn finish(&mut self) -> Option<RecordingSummary> {
        let ActiveRecording {
            folder,
            sender,
            worker,
            frames_added,
            ..
        } = self.active.take()?;

        // Closing the channel lets the worker drain the queue and exit.
        drop(sender);
        let (saved, errors) = worker.join().unwrap_or_else(|_| {
            error!(error = %RecorderError::WorkerPanicked, "recording incomplete");
            (0, frames_added)
        });

        info!(folder = %folder.display(), frames_added, saved, errors, "recording stopped");
        Some(RecordingSummary {
            folder,
            frames_added,
            saved,
            errors,
        })
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.finish();
    }
}

fn create_recording_folder(root: &Path) -> io::Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut folder = root.join(&stamp);
    let mut attempt = 1;
    loop {
        match fs::create_dir(&folder) {
            Ok(()) => return Ok(folder),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => {
                folder = root.join(format!("{stamp}_{attempt}"));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn save_worker(
    folder: &Path,
    metadata: &RecordingMetadata,
    receiver: &mpsc::Receiver<RawFrame>,
    pending: &AtomicUsize,
) -> (usize, usize) {
    let mut geometry = None;
    let mut saved = 0;
    let mut errors = 0;

    for frame in receiver {
        let path = folder.join(format!("frame_{saved:06}.dng"));
        let expected = *geometry.get_or_insert((frame.width(), frame.height()));
        match write_frame(&path, &frame, expected, metadata) {
            Ok(()) => {
                debug!(path = %path.display(), "frame saved");
                saved += 1;
            }
            Err(err) => {
                error!(path = %path.display(), error = %err, "frame not saved");
                errors += 1;
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }

    (saved, errors)
}

/// Sample bytes of one frame, written as a single strip.
struct StripData(Vec<u8>);

impl Offsets for StripData {
    fn size(&self) -> u32 {
        u32::try_from(self.0.len()).unwrap_or(u32::MAX)
    }

    fn write(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(&self.0)
    }
}

fn write_frame(
    path: &Path,
    frame: &RawFrame,
    expected: (u32, u32),
    metadata: &RecordingMetadata,
) -> Result<(), RecorderError> {
    let actual = (frame.width(), frame.height());
    if actual != expected {
        return Err(RecorderError::GeometryMismatch { expected, actual });
    }

    let ifd = frame_ifd(frame, metadata)?;
    let mut file = BufWriter::new(File::create(path)?);
    DngWriter::write_dng(&mut file, true, FileType::Dng, vec![ifd])
        .map_err(|err| RecorderError::Encode(format!("{err:?}")))?;
    file.flush()?;
    Ok(())
}

fn frame_ifd(frame: &RawFrame, metadata: &RecordingMetadata) -> Result<Ifd, RecorderError> {
    let container_bits: u16 = match (frame.samples(), metadata.depth) {
        (RawSamples::Eight(_), BitDepth::Eight) => 8,
        (RawSamples::Sixteen(_), BitDepth::Ten | BitDepth::Twelve) => 16,
        _ => return Err(RecorderError::DepthMismatch(metadata.depth)),
    };
    // Samples stay in the order and byte layout the sensor delivered them.
    let data = frame.to_bytes();
    let byte_count = u32::try_from(data.len())
        .map_err(|_| RecorderError::Encode("frame exceeds one strip".to_owned()))?;

    let mut ifd = Ifd::default();
    ifd.insert(tags::NewSubfileType, IfdValue::Long(0));
    ifd.insert(tags::ImageWidth, IfdValue::Long(frame.width()));
    ifd.insert(tags::ImageLength, IfdValue::Long(frame.height()));
    ifd.insert(tags::BitsPerSample, IfdValue::Short(container_bits));
    ifd.insert(tags::Compression, IfdValue::Short(1));
    ifd.insert(tags::PhotometricInterpretation, IfdValue::Short(PHOTOMETRIC_CFA));
    ifd.insert(tags::SamplesPerPixel, IfdValue::Short(1));
    ifd.insert(tags::RowsPerStrip, IfdValue::Long(frame.height()));
    ifd.insert(tags::PlanarConfiguration, IfdValue::Short(1));
    ifd.insert(tags::Orientation, IfdValue::Short(1));

    ifd.insert(
        tags::CFARepeatPatternDim,
        IfdValue::List(vec![IfdValue::Short(2), IfdValue::Short(2)]),
    );
    ifd.insert(
        tags::CFAPattern,
        IfdValue::List(
            metadata
                .pattern
                .dng_codes()
                .into_iter()
                .map(IfdValue::Byte)
                .collect(),
        ),
    );
    ifd.insert(tags::BlackLevel, IfdValue::Long(metadata.black_level));
    ifd.insert(
        tags::WhiteLevel,
        IfdValue::Long(u32::from(metadata.depth.white_level())),
    );

    ifd.insert(
        tags::DNGVersion,
        IfdValue::List([1, 4, 0, 0].into_iter().map(IfdValue::Byte).collect()),
    );
    ifd.insert(
        tags::DNGBackwardVersion,
        IfdValue::List([1, 2, 0, 0].into_iter().map(IfdValue::Byte).collect()),
    );
    ifd.insert(tags::Make, IfdValue::Ascii(metadata.make.clone()));
    ifd.insert(tags::Model, IfdValue::Ascii(metadata.model.clone()));
    ifd.insert(tags::UniqueCameraModel, IfdValue::Ascii(metadata.model.clone()));
    ifd.insert(
        tags::Software,
        IfdValue::Ascii(format!("raw-cam-capture v{}", env!("CARGO_PKG_VERSION"))),
    );

    if let Some(exposure_us) = metadata.exposure_us {
        let divisor = gcd(exposure_us, 1_000_000);
        ifd.insert(
            tags::ExposureTime,
            IfdValue::Rational(exposure_us / divisor, 1_000_000 / divisor),
        );
    }

    ifd.insert(
        tags::StripOffsets,
        IfdValue::Offsets(Arc::new(StripData(data))),
    );
    ifd.insert(tags::StripByteCounts, IfdValue::Long(byte_count));
    Ok(ifd)
}

const fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let rest = a % b;
        a = b;
        b = rest;
    }
    if a == 0 {
        1
    } else {
        a
    }
}
