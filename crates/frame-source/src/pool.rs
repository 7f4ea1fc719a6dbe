use std::sync::{Arc, Mutex};

use crate::{CaptureError, PixelFormat, RawFrame};

/// Capture geometry settled once at startup.
///
/// The camera prefers the primary resolution; when the configured pool budget
/// cannot hold the buffers at that size, the plan drops to the reduced
/// fallback resolution instead. Neither fitting fails startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPlan {
    pub width: u32,
    pub height: u32,
    pub frames: usize,
}

impl PoolPlan {
    /// Picks the largest configured resolution whose pool fits `budget` bytes.
    pub fn select(
        frames: usize,
        primary: (u32, u32),
        fallback: (u32, u32),
        budget: usize,
    ) -> Result<Self, CaptureError> {
        for (width, height) in [primary, fallback] {
            if pool_bytes(frames, width, height) <= budget {
                return Ok(Self {
                    width,
                    height,
                    frames,
                });
            }
        }
        let (width, height) = fallback;
        Err(CaptureError::PoolBudget {
            frames,
            width,
            height,
            required: pool_bytes(frames, width, height),
            budget,
        })
    }

    /// Total bytes the pool reserves under this plan.
    pub fn bytes(&self) -> usize {
        pool_bytes(self.frames, self.width, self.height)
    }
}

fn pool_bytes(frames: usize, width: u32, height: u32) -> usize {
    frames * width as usize * height as usize * PixelFormat::Rgb565.bytes_per_pixel()
}

/// Fixed set of pre-allocated RGB565 buffers recycled across captures.
///
/// Checkout hands a buffer out as a [`RawFrame`]; dropping the frame returns
/// it. Nothing ever allocates per capture once the pool is built.
pub struct FramePool {
    width: u32,
    height: u32,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

impl FramePool {
    pub fn new(frames: usize, width: u32, height: u32) -> Arc<Self> {
        let frame_bytes =
            width as usize * height as usize * PixelFormat::Rgb565.bytes_per_pixel();
        let free = (0..frames).map(|_| vec![0u8; frame_bytes]).collect();
        Arc::new(Self {
            width,
            height,
            inner: Mutex::new(PoolInner {
                free,
                outstanding: 0,
            }),
        })
    }

    pub fn for_plan(plan: PoolPlan) -> Arc<Self> {
        Self::new(plan.frames, plan.width, plan.height)
    }

    /// Takes a free buffer as a writable frame; `None` when every buffer is
    /// still checked out.
    pub fn checkout(self: &Arc<Self>) -> Option<RawFrame> {
        let buf = {
            let mut inner = self.inner.lock().unwrap();
            let buf = inner.free.pop()?;
            inner.outstanding += 1;
            buf
        };
        Some(RawFrame::pooled(buf, self.width, self.height, Arc::clone(self)))
    }

    /// Buffers currently held by live frames.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().unwrap().outstanding
    }

    /// Buffers ready for checkout.
    pub fn available(&self) -> usize {
        self.inner.lock().unwrap().free.len()
    }

    pub(crate) fn recycle(&self, buf: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.outstanding = inner.outstanding.saturating_sub(1);
        inner.free.push(buf);
    }
}
