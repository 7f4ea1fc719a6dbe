use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;
use image::{RgbImage, imageops};

use crate::{CaptureError, FramePool, FrameSource, PoolPlan, RawFrame, pixel};

/// Development source that replays one decoded image as if it were a camera,
/// pacing `acquire` to a fixed frame interval.
pub struct StillSource {
    pool: Arc<FramePool>,
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    interval: Duration,
    next_due: Instant,
}

impl StillSource {
    /// Decodes `path` and scales it to the planned capture resolution.
    pub fn open(path: &str, plan: PoolPlan, fps: f32) -> Result<Self, CaptureError> {
        let image = image::open(path)
            .map_err(|_| CaptureError::Open {
                uri: path.to_string(),
            })?
            .to_rgb8();
        Ok(Self::from_image(&image, plan, fps))
    }

    /// Builds the source from an already-decoded image.
    pub fn from_image(image: &RgbImage, plan: PoolPlan, fps: f32) -> Self {
        let scaled = if image.dimensions() == (plan.width, plan.height) {
            image.clone()
        } else {
            imageops::resize(image, plan.width, plan.height, imageops::FilterType::Triangle)
        };
        let mut pixels =
            vec![0u8; plan.width as usize * plan.height as usize * 2];
        for (index, rgb) in scaled.pixels().enumerate() {
            pixel::put(&mut pixels, index, pixel::pack(rgb[0], rgb[1], rgb[2]));
        }
        Self {
            pool: FramePool::for_plan(plan),
            pixels,
            width: plan.width,
            height: plan.height,
            interval: Duration::from_secs_f32(1.0 / fps.max(0.01)),
            next_due: Instant::now(),
        }
    }
}

impl FrameSource for StillSource {
    fn acquire(&mut self) -> Result<RawFrame, CaptureError> {
        let now = Instant::now();
        if now < self.next_due {
            thread::sleep(self.next_due - now);
        }
        self.next_due = Instant::now() + self.interval;

        let mut frame = self.pool.checkout().ok_or(CaptureError::Unavailable)?;
        frame.data_mut().copy_from_slice(&self.pixels);
        frame.set_timestamp_ms(Utc::now().timestamp_millis());
        Ok(frame)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pool(&self) -> &Arc<FramePool> {
        &self.pool
    }
}
