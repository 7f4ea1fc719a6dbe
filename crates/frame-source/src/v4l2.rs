use std::{pin::Pin, sync::Arc};

use anyhow::{Context, anyhow};
use chrono::Utc;
use tracing::{debug, warn};
use v4l::{
    Device, FourCC, buffer::Type, io::traits::CaptureStream, prelude::MmapStream, video::Capture,
};

use crate::{CaptureError, FramePool, FrameSource, PoolPlan, RawFrame, pixel};

/// Video4Linux capture backend.
///
/// Negotiates YUYV at the planned resolution and repacks every dequeued
/// frame to RGB565 in a pool buffer. The driver keeps its own mmap ring;
/// the pool is what bounds frames in flight downstream.
pub struct V4l2Source {
    // The stream borrows the pinned device; declared first so it drops first.
    stream: MmapStream<'static>,
    _device: Pin<Box<Device>>,
    pool: Arc<FramePool>,
    width: u32,
    height: u32,
}

impl V4l2Source {
    /// Opens `uri` (a `/dev/video*` path or `v4l2://` URI) for capture.
    pub fn open(uri: &str, plan: PoolPlan) -> Result<Self, CaptureError> {
        let path = uri.strip_prefix("v4l2://").unwrap_or(uri);
        let device = Device::with_path(path).map_err(|_| CaptureError::Open {
            uri: uri.to_string(),
        })?;

        let mut format = device.format().context("query capture format")?;
        format.width = plan.width;
        format.height = plan.height;
        format.fourcc = FourCC::new(b"YUYV");
        let format = device.set_format(&format).context("set capture format")?;
        if format.fourcc != FourCC::new(b"YUYV") {
            return Err(CaptureError::Other(anyhow!(
                "device {path} cannot capture YUYV (driver offered {})",
                format.fourcc
            )));
        }
        if (format.width, format.height) != (plan.width, plan.height) {
            warn!(
                requested_width = plan.width,
                requested_height = plan.height,
                granted_width = format.width,
                granted_height = format.height,
                "driver adjusted the capture resolution"
            );
        }

        let device = Box::pin(device);
        // The mmap ring borrows the device. The device is pinned on the heap
        // and outlives the stream by field order, so promoting the borrow to
        // 'static stays sound.
        let device_ref: &'static Device =
            unsafe { std::mem::transmute::<&Device, &'static Device>(device.as_ref().get_ref()) };
        let stream =
            MmapStream::with_buffers(device_ref, Type::VideoCapture, plan.frames.max(2) as u32)
                .context("map capture buffers")?;

        debug!(
            width = format.width,
            height = format.height,
            "v4l2 capture ready"
        );
        Ok(Self {
            stream,
            _device: device,
            pool: FramePool::new(plan.frames, format.width, format.height),
            width: format.width,
            height: format.height,
        })
    }
}

impl FrameSource for V4l2Source {
    fn acquire(&mut self) -> Result<RawFrame, CaptureError> {
        let mut frame = self.pool.checkout().ok_or(CaptureError::Unavailable)?;
        let (width, height) = (self.width, self.height);
        let (buf, _meta) = match self.stream.next() {
            Ok(captured) => captured,
            Err(err) => {
                warn!(error = %err, "v4l2 dequeue failed");
                return Err(CaptureError::Unavailable);
            }
        };
        repack_yuyv(buf, frame.data_mut(), width, height);
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

fn repack_yuyv(src: &[u8], dst: &mut [u8], width: u32, height: u32) {
    let pairs = width as usize * height as usize / 2;
    for pair in 0..pairs {
        let offset = pair * 4;
        if offset + 4 > src.len() {
            break;
        }
        let [y0, u, y1, v] = [src[offset], src[offset + 1], src[offset + 2], src[offset + 3]];
        let (r, g, b) = pixel::yuv_to_rgb(y0, u, v);
        pixel::put(dst, pair * 2, pixel::pack(r, g, b));
        let (r, g, b) = pixel::yuv_to_rgb(y1, u, v);
        pixel::put(dst, pair * 2 + 1, pixel::pack(r, g, b));
    }
}
