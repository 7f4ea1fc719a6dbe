//! Camera-side half of the pipeline: pooled RGB565 frames and the capture
//! backends that fill them.

use std::sync::Arc;

use thiserror::Error;

pub mod pixel;
mod pool;
mod still;
#[cfg(feature = "v4l2")]
mod v4l2;

pub use pool::{FramePool, PoolPlan};
pub use still::StillSource;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;

/// Raw RGB565 frame drawn from a [`FramePool`].
///
/// Dropping the frame hands its buffer back to the pool, so a successfully
/// acquired frame is released exactly once no matter which path the pipeline
/// iteration exits through.
pub struct RawFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    timestamp_ms: i64,
    pool: Option<Arc<FramePool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb565,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565 => 2,
        }
    }
}

impl RawFrame {
    /// Builds a standalone frame that owns its buffer outright (no pool).
    ///
    /// # Panics
    /// Panics if `data` is not exactly `width * height * 2` bytes.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            width as usize * height as usize * PixelFormat::Rgb565.bytes_per_pixel(),
            "pixel buffer does not match {width}x{height} RGB565"
        );
        Self {
            data,
            width,
            height,
            format: PixelFormat::Rgb565,
            timestamp_ms: 0,
            pool: None,
        }
    }

    pub(crate) fn pooled(data: Vec<u8>, width: u32, height: u32, pool: Arc<FramePool>) -> Self {
        Self {
            data,
            width,
            height,
            format: PixelFormat::Rgb565,
            timestamp_ms: 0,
            pool: Some(pool),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Capture timestamp in UTC milliseconds; zero for standalone frames.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn set_timestamp_ms(&mut self, timestamp_ms: i64) {
        self.timestamp_ms = timestamp_ms;
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.recycle(std::mem::take(&mut self.data));
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture source {uri:?}")]
    Open { uri: String },
    #[error("no frame available from the capture source")]
    Unavailable,
    #[error("{frames} {width}x{height} frame buffers need {required} bytes, pool budget is {budget}")]
    PoolBudget {
        frames: usize,
        width: u32,
        height: u32,
        required: usize,
        budget: usize,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A capture device that fills pool buffers on demand.
///
/// `acquire` is pull-based and may block briefly for the next hardware frame
/// interval. [`CaptureError::Unavailable`] is transient: the caller should
/// skip the iteration and try again, not tear the session down.
pub trait FrameSource: Send {
    fn acquire(&mut self) -> Result<RawFrame, CaptureError>;

    /// Capture resolution settled at startup.
    fn resolution(&self) -> (u32, u32);

    /// Pool the source draws its buffers from.
    fn pool(&self) -> &Arc<FramePool>;
}

/// Capture backends selectable from a source URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    V4l2,
    Still,
}

/// Decides which backend a source URI refers to: `/dev/video*` and `v4l2://`
/// select the camera, image files become a paced still source.
pub fn sniff_source(uri: &str) -> SourceKind {
    if uri.starts_with("/dev/video") || uri.starts_with("v4l2://") {
        return SourceKind::V4l2;
    }
    let lower = uri.to_ascii_lowercase();
    if [".jpg", ".jpeg", ".png"].iter().any(|ext| lower.ends_with(ext)) {
        SourceKind::Still
    } else {
        SourceKind::V4l2
    }
}

/// Opens the capture source for `uri` with buffers sized by `plan`.
pub fn open_source(
    uri: &str,
    plan: PoolPlan,
    still_fps: f32,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    match sniff_source(uri) {
        SourceKind::Still => Ok(Box::new(StillSource::open(uri, plan, still_fps)?)),
        SourceKind::V4l2 => open_v4l2(uri, plan),
    }
}

#[cfg(feature = "v4l2")]
fn open_v4l2(uri: &str, plan: PoolPlan) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(V4l2Source::open(uri, plan)?))
}

#[cfg(not(feature = "v4l2"))]
fn open_v4l2(uri: &str, _plan: PoolPlan) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::Other(anyhow::anyhow!(
        "camera source {uri} requires the v4l2 feature"
    )))
}
