//! JPEG transcoding behind the stream server.

use frame_source::{RawFrame, pixel};
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;

/// Encoded JPEG ready to be written as one multipart part.
#[derive(Debug)]
pub(crate) struct CompressedFrame {
    data: Vec<u8>,
}

impl CompressedFrame {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    #[cfg(test)]
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Debug, Error)]
pub(crate) enum EncodeError {
    #[error("JPEG encode failed: {0}")]
    Codec(String),
    #[error("encoder produced an empty payload")]
    Empty,
}

/// Codec seam between the pipeline and the stream server. Implementations
/// turn one annotated frame into one compressed image.
pub(crate) trait Transcoder: Send {
    fn encode(&self, frame: &RawFrame) -> Result<CompressedFrame, EncodeError>;
}

/// JPEG at a fixed quality. The encoder is stateless, so identical frames
/// yield identical bytes.
pub(crate) struct JpegTranscoder {
    quality: u8,
}

impl JpegTranscoder {
    pub(crate) fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Transcoder for JpegTranscoder {
    fn encode(&self, frame: &RawFrame) -> Result<CompressedFrame, EncodeError> {
        let rgb = expand_rgb888(frame)?;
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.quality)
            .encode_image(&rgb)
            .map_err(|err| EncodeError::Codec(err.to_string()))?;
        if buffer.is_empty() {
            return Err(EncodeError::Empty);
        }
        Ok(CompressedFrame::new(buffer))
    }
}

fn expand_rgb888(frame: &RawFrame) -> Result<RgbImage, EncodeError> {
    let pixels = frame.width() as usize * frame.height() as usize;
    let mut rgb = Vec::with_capacity(pixels * 3);
    let data = frame.data();
    for index in 0..pixels {
        let (r, g, b) = pixel::unpack(pixel::get(data, index));
        rgb.extend_from_slice(&[r, g, b]);
    }
    RgbImage::from_raw(frame.width(), frame.height(), rgb)
        .ok_or_else(|| EncodeError::Codec("frame buffer does not fit its dimensions".into()))
}
