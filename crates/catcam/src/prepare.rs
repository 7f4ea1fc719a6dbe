//! Frame-to-tensor conversion in front of the detector.

use frame_source::{RawFrame, pixel};
use infer_core::{Tensor, TensorShape};

/// Converts captured frames into the detector's fixed square input.
///
/// Crops to the largest centered square, then nearest-neighbor resamples to
/// the target size while expanding RGB565 to 8-bit RGB. The source frame is
/// never modified.
pub(crate) struct Preprocessor {
    shape: TensorShape,
}

impl Preprocessor {
    pub(crate) fn new(size: u32) -> Self {
        Self {
            shape: TensorShape::square(size),
        }
    }

    pub(crate) fn prepare(&self, frame: &RawFrame) -> Tensor {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let size = self.shape.width as usize;
        let mut data = vec![0u8; self.shape.volume()];
        if width == 0 || height == 0 {
            return Tensor::new(self.shape, data);
        }

        let side = width.min(height);
        let x0 = (width - side) / 2;
        let y0 = (height - side) / 2;
        let src = frame.data();
        for ty in 0..size {
            let sy = y0 + ty * side / size;
            for tx in 0..size {
                let sx = x0 + tx * side / size;
                let (r, g, b) = pixel::unpack(pixel::get(src, sy * width + sx));
                let at = (ty * size + tx) * 3;
                data[at] = r;
                data[at + 1] = g;
                data[at + 2] = b;
            }
        }
        Tensor::new(self.shape, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, fill: u16) -> RawFrame {
        let mut data = vec![0u8; (width * height) as usize * 2];
        for index in 0..(width * height) as usize {
            pixel::put(&mut data, index, fill);
        }
        RawFrame::new(width, height, data)
    }

    #[test]
    fn output_shape_is_fixed_for_any_input() {
        let preprocessor = Preprocessor::new(96);
        for (width, height) in [(320, 240), (800, 600), (96, 96), (50, 40), (100, 300)] {
            let tensor = preprocessor.prepare(&frame(width, height, 0x0000));
            assert_eq!(tensor.shape(), TensorShape::square(96));
            assert_eq!(tensor.data().len(), 96 * 96 * 3);
        }
    }

    #[test]
    fn solid_color_survives_conversion() {
        let preprocessor = Preprocessor::new(8);
        let tensor = preprocessor.prepare(&frame(32, 24, 0x07E0));
        for rgb in tensor.data().chunks_exact(3) {
            assert_eq!(rgb, &[0, 255, 0]);
        }
    }

    #[test]
    fn crop_is_centered_on_the_wide_axis() {
        // 320x240: the square is 240 wide starting at x=40. Columns left of
        // the crop are red, the rest green; no red may reach the tensor.
        let mut source = frame(320, 240, 0x07E0);
        for y in 0..240usize {
            for x in 0..40usize {
                pixel::put(source.data_mut(), y * 320 + x, 0xF800);
            }
        }
        let preprocessor = Preprocessor::new(16);
        let tensor = preprocessor.prepare(&source);
        for rgb in tensor.data().chunks_exact(3) {
            assert_eq!(rgb, &[0, 255, 0]);
        }
    }

    #[test]
    fn source_frame_is_untouched() {
        let source = frame(64, 48, 0x001F);
        let before = source.data().to_vec();
        let preprocessor = Preprocessor::new(96);
        let _ = preprocessor.prepare(&source);
        assert_eq!(source.data(), before.as_slice());
    }

    #[test]
    fn upscaling_small_frames_is_supported() {
        let preprocessor = Preprocessor::new(96);
        let tensor = preprocessor.prepare(&frame(10, 10, 0xFFFF));
        assert_eq!(tensor.data().len(), 96 * 96 * 3);
        assert_eq!(&tensor.data()[..3], &[255, 255, 255]);
    }
}
