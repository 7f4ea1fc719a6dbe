//! Fixed-shape detector engine: pixel tensors in, threshold-filtered
//! detections out, with the model's working set validated up front.

mod engine;
mod tensor;
mod tflite;

pub use engine::{
    BoundingBox, Detection, Engine, EngineConfig, Executor, InferenceFault, ModelError,
};
pub use tensor::{Tensor, TensorShape};
pub use tflite::TfliteExecutor;
