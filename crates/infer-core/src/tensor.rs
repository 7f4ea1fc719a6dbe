use std::fmt;

/// Fixed NHWC u8 geometry the engine accepts, constant for the process
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl TensorShape {
    /// Square RGB input, the shape this family of detectors uses.
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
            channels: 3,
        }
    }

    pub fn volume(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Owned NHWC u8 input buffer, derived from one frame and dropped after one
/// inference call.
pub struct Tensor {
    shape: TensorShape,
    data: Vec<u8>,
}

impl Tensor {
    /// # Panics
    /// Panics if `data` does not hold exactly `shape.volume()` bytes.
    pub fn new(shape: TensorShape, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            shape.volume(),
            "tensor buffer does not match shape {shape}"
        );
        Self { shape, data }
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
