//! Frame capture module.
//! Three sources behind one `FrameSource` trait:
//! - live: re-reads the spool image an external camera process keeps overwriting
//! - video: replays a directory of recorded frames in file-name order
//! - record: live feed that also saves every frame into the recording directory
//!
//! The external writer should replace the spool file by rename. A frame read half-written
//! fails to decode and is retried on the next poll, up to `SPOOL_RETRIES` times in a row.
//! Debug: demo mode (or `DEBUG_CAPTURE=1`) saves intermediate images to the debug dir.
//! Future: direct V4L2 capture instead of the spool file.

use crate::config::CaptureConfig;
use crate::error::{Result, VisionError};
use image::{DynamicImage, RgbImage};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

/// Consecutive unreadable spool frames tolerated before live capture gives up
const SPOOL_RETRIES: u32 = 10;
/// Extensions picked up when replaying a recording
const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaptureMode {
    /// Live feed, every frame saved for later replay
    Record,
    /// Replay of a recorded directory
    Video,
    /// Live feed
    #[default]
    Live,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Record => write!(f, "record"),
            CaptureMode::Video => write!(f, "video"),
            CaptureMode::Live => write!(f, "live"),
        }
    }
}

impl FromStr for CaptureMode {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "record" => Ok(CaptureMode::Record),
            "video" => Ok(CaptureMode::Video),
            "live" => Ok(CaptureMode::Live),
            other => Err(VisionError::invalid_config("mode", other)),
        }
    }
}

pub trait FrameSource {
    /// Next raw frame, `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Latest frame from a spool file, at most one read per `interval`.
pub struct LiveFeed {
    path: PathBuf,
    interval: Duration,
    last: Option<Instant>,
}

impl LiveFeed {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            last: None,
        }
    }

    fn wait_for_poll(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

impl FrameSource for LiveFeed {
    /// A frame caught mid-write is skipped and read again on the next poll.
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut failures = 0;
        loop {
            self.wait_for_poll();
            match read_frame(&self.path) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) if failures < SPOOL_RETRIES => {
                    failures += 1;
                    warn!("Unreadable live frame ({}), retrying", e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Frames from a directory, sorted by file name.
pub struct RecordedVideo {
    frames: VecDeque<PathBuf>,
}

impl RecordedVideo {
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| VisionError::io(dir, e))?;
        let mut frames = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| VisionError::io(dir, e))?.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if is_frame {
                frames.push(path);
            }
        }
        frames.sort();

        if frames.is_empty() {
            warn!("No frames found in {}", dir.display());
        } else {
            info!("Replaying {} frames from {}", frames.len(), dir.display());
        }
        Ok(Self {
            frames: frames.into(),
        })
    }
}

impl FrameSource for RecordedVideo {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match self.frames.pop_front() {
            Some(path) => read_frame(&path).map(Some),
            None => Ok(None),
        }
    }
}

/// Passes frames through from `source` and saves each one as `frame_NNNNNN.png`.
pub struct Recorder<S> {
    source: S,
    dir: PathBuf,
    count: usize,
}

impl<S: FrameSource> Recorder<S> {
    pub fn new(source: S, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| VisionError::io(&dir, e))?;
        info!("Recording frames to {}", dir.display());
        Ok(Self {
            source,
            dir,
            count: 0,
        })
    }
}

impl<S: FrameSource> FrameSource for Recorder<S> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };
        let path = self.dir.join(format!("frame_{:06}.png", self.count));
        frame.save(&path).map_err(|e| VisionError::image(&path, e))?;
        self.count += 1;
        Ok(Some(frame))
    }
}

/// Frame source for `mode`.
pub fn open_source(mode: CaptureMode, config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    let live = || {
        LiveFeed::new(
            &config.live_frame,
            Duration::from_millis(config.poll_interval_ms),
        )
    };
    Ok(match mode {
        CaptureMode::Live => Box::new(live()),
        CaptureMode::Video => Box::new(RecordedVideo::open(&config.video_dir)?),
        CaptureMode::Record => Box::new(Recorder::new(live(), &config.video_dir)?),
    })
}

fn read_frame(path: &Path) -> Result<RgbImage> {
    let start = Instant::now();
    let frame = image::open(path)
        .map_err(|e| VisionError::image(path, e))?
        .to_rgb8();
    debug!("Read {} in {:?}", path.display(), start.elapsed());
    Ok(frame)
}

/// True when debug images should be written even outside demo mode.
pub fn debug_capture_enabled() -> bool {
    env::var_os("DEBUG_CAPTURE").is_some()
}

/// Writes debug views as `<dir>/<name>.png`.
pub struct DebugWriter {
    dir: PathBuf,
}

impl DebugWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| VisionError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn save(&self, name: &str, image: impl Into<DynamicImage>) -> Result<()> {
        let path = self.dir.join(format!("{}.png", name));
        let image: DynamicImage = image.into();
        image.save(&path).map_err(|e| VisionError::image(&path, e))
    }
}
