// THEORY:
// A frame source is the per-zone "camera". The occupancy loop only needs three
// things from it: the next frame, a way back to the first frame when a recorded
// clip runs out, and a way to let go of the underlying device or file.
//
// End of stream is not an error. `read_next` returns `Ok(None)` and the loop
// decides whether to wrap around. An `Err` is a single failed read that the loop
// may skip past.

use crate::core_modules::mask::Frame;
use crate::core_modules::occupancy::ZoneId;
use crate::error::FrameSourceError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "ppm"];

/// A sequential producer of frames for one zone.
pub trait FrameSource: Send {
    /// Reads the next frame. `Ok(None)` signals the end of the stream.
    fn read_next(&mut self) -> Result<Option<Frame>, FrameSourceError>;

    /// Rewinds to the first frame.
    fn seek_to_start(&mut self) -> Result<(), FrameSourceError>;

    /// Releases the underlying resource. Called once when the loop stops.
    fn close(&mut self) {}
}

/// Opens the frame source of a zone.
pub trait FrameSourceProvider: Send + Sync {
    fn open(&self, zone_id: ZoneId) -> Result<Box<dyn FrameSource>, FrameSourceError>;
}

/// Plays back a directory of still frames in file-name order.
pub struct ImageSequenceSource {
    frames: Vec<PathBuf>,
    position: usize,
}

impl ImageSequenceSource {
    pub fn open(directory: &Path) -> Result<Self, FrameSourceError> {
        let entries = std::fs::read_dir(directory).map_err(|e| FrameSourceError::Open {
            path: directory.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_frame_file(path))
            .collect();
        frames.sort();

        if frames.is_empty() {
            return Err(FrameSourceError::Open {
                path: directory.to_path_buf(),
                reason: "directory contains no frames".to_string(),
            });
        }

        Ok(Self { frames, position: 0 })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn read_next(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        let Some(path) = self.frames.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;

        let image = image::open(path).map_err(|source| FrameSourceError::Decode {
            path: path.clone(),
            source,
        })?;
        Ok(Some(image.to_rgb8()))
    }

    fn seek_to_start(&mut self) -> Result<(), FrameSourceError> {
        self.position = 0;
        Ok(())
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

/// An in-memory frame source. Entries set to `None` fail when read, which models
/// a dropped frame. Sources built with `without_seek` behave like a live device
/// that cannot rewind.
#[derive(Clone)]
pub struct MemoryFrameSource {
    frames: Vec<Option<Frame>>,
    position: usize,
    seekable: bool,
    closed: Arc<AtomicBool>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into_iter().map(Some).collect(),
            position: 0,
            seekable: true,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Appends a frame slot that fails to read.
    pub fn with_read_failure(mut self) -> Self {
        self.frames.push(None);
        self
    }

    /// Appends a readable frame.
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frames.push(Some(frame));
        self
    }

    pub fn without_seek(mut self) -> Self {
        self.seekable = false;
        self
    }

    /// A flag that flips to `true` once `close` has been called on this source or
    /// any of its clones.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

impl FrameSource for MemoryFrameSource {
    fn read_next(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        let Some(entry) = self.frames.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;

        match entry {
            Some(frame) => Ok(Some(frame.clone())),
            None => Err(FrameSourceError::Read(format!(
                "frame {} unavailable",
                self.position - 1
            ))),
        }
    }

    fn seek_to_start(&mut self) -> Result<(), FrameSourceError> {
        if !self.seekable {
            return Err(FrameSourceError::SeekUnsupported);
        }
        self.position = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Opens file-backed sources: a directory of frames, or a video file when the
/// `video` feature is enabled.
#[derive(Debug, Default, Clone)]
pub struct FileFrameProvider {
    paths: HashMap<ZoneId, PathBuf>,
}

impl FileFrameProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, zone_id: ZoneId, path: impl Into<PathBuf>) {
        self.paths.insert(zone_id, path.into());
    }
}

impl FrameSourceProvider for FileFrameProvider {
    fn open(&self, zone_id: ZoneId) -> Result<Box<dyn FrameSource>, FrameSourceError> {
        let path = self
            .paths
            .get(&zone_id)
            .ok_or(FrameSourceError::Unavailable(zone_id))?;

        if path.is_dir() {
            return Ok(Box::new(ImageSequenceSource::open(path)?));
        }

        #[cfg(feature = "video")]
        {
            if path.is_file() {
                return Ok(Box::new(video::VideoFileSource::open(path)?));
            }
        }

        Err(FrameSourceError::Open {
            path: path.clone(),
            reason: "not a frame directory".to_string(),
        })
    }
}

/// Serves clones of preloaded in-memory sources.
#[derive(Default, Clone)]
pub struct MemoryFrameProvider {
    sources: HashMap<ZoneId, MemoryFrameSource>,
}

impl MemoryFrameProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, zone_id: ZoneId, source: MemoryFrameSource) {
        self.sources.insert(zone_id, source);
    }
}

impl FrameSourceProvider for MemoryFrameProvider {
    fn open(&self, zone_id: ZoneId) -> Result<Box<dyn FrameSource>, FrameSourceError> {
        self.sources
            .get(&zone_id)
            .map(|source| Box::new(source.clone()) as Box<dyn FrameSource>)
            .ok_or(FrameSourceError::Unavailable(zone_id))
    }
}

#[cfg(feature = "video")]
pub mod video {
    use super::*;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture},
    };

    fn read_error(e: opencv::Error) -> FrameSourceError {
        FrameSourceError::Read(e.to_string())
    }

    /// A recorded video decoded through OpenCV.
    pub struct VideoFileSource {
        capture: VideoCapture,
    }

    impl VideoFileSource {
        pub fn open(path: &Path) -> Result<Self, FrameSourceError> {
            let open_error = |reason: String| FrameSourceError::Open {
                path: path.to_path_buf(),
                reason,
            };
            let capture = VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)
                .map_err(|e| open_error(e.to_string()))?;
            if !capture.is_opened().map_err(|e| open_error(e.to_string()))? {
                return Err(open_error("video could not be opened".to_string()));
            }
            Ok(Self { capture })
        }
    }

    impl FrameSource for VideoFileSource {
        fn read_next(&mut self) -> Result<Option<Frame>, FrameSourceError> {
            let position = self.capture.get(videoio::CAP_PROP_POS_FRAMES).map_err(read_error)?;
            let count = self.capture.get(videoio::CAP_PROP_FRAME_COUNT).map_err(read_error)?;
            if count > 0.0 && position >= count {
                return Ok(None);
            }

            let mut frame = Mat::default();
            if !self.capture.read(&mut frame).map_err(read_error)? || frame.empty() {
                return Ok(None);
            }

            // OpenCV decodes to BGR; frames are RGB everywhere else.
            let mut rgb = Mat::default();
            imgproc::cvt_color(&frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(read_error)?;
            let size = rgb.size().map_err(read_error)?;
            let bytes = rgb.data_bytes().map_err(read_error)?.to_vec();

            Frame::from_raw(size.width as u32, size.height as u32, bytes)
                .map(Some)
                .ok_or_else(|| FrameSourceError::Read("frame buffer size mismatch".to_string()))
        }

        fn seek_to_start(&mut self) -> Result<(), FrameSourceError> {
            if self.capture.set(videoio::CAP_PROP_POS_FRAMES, 0.0).map_err(read_error)? {
                Ok(())
            } else {
                Err(FrameSourceError::SeekUnsupported)
            }
        }

        fn close(&mut self) {
            let _ = self.capture.release();
        }
    }
}
