use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::tensor::{Tensor, TensorShape};

/// Single detection surfaced by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: i64,
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Corner-format box in normalized [0,1] coordinates, fractions of frame
/// width and height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

/// Model executor behind the engine.
///
/// Reports its fixed input contract and resident scratch requirement once,
/// then turns one tensor into raw candidates per call. Implementations must
/// be deterministic for identical input.
pub trait Executor: Send {
    fn input_shape(&self) -> TensorShape;

    /// Bytes of staging the executor keeps resident across calls.
    fn arena_requirement(&self) -> usize;

    fn invoke(&mut self, input: &Tensor) -> Result<Vec<Detection>, InferenceFault>;
}

/// Startup-time model problems; any of these halts the process before the
/// server comes up.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to load detection model")]
    Load(#[source] anyhow::Error),
    #[error("model input {model} does not match configured input {configured}")]
    InputShape {
        configured: TensorShape,
        model: TensorShape,
    },
    #[error("model input contract not usable: {0}")]
    InputContract(String),
    #[error("model needs {required} bytes of scratch, arena budget is {budget}")]
    ArenaTooSmall { required: usize, budget: usize },
    #[error("unsupported model output layout: {0}")]
    OutputLayout(String),
}

/// Per-call fault. Fatal to the frame that produced it, never to the session.
#[derive(Debug, Error)]
pub enum InferenceFault {
    #[error("model execution failed: {0}")]
    Execution(String),
    #[error("unexpected model output: {0}")]
    Output(String),
    #[error("input shape {got} does not match engine input {want}")]
    Input { want: TensorShape, got: TensorShape },
}

/// Detector policy, resolved once at startup.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub input: TensorShape,
    pub arena_budget: usize,
    pub threshold: f32,
    pub target_class: i64,
}

/// Threshold-and-class gate over a fixed-arena executor.
///
/// Construction validates the executor against the configured contract and
/// fails fast; nothing downstream ever sees a sub-threshold or off-class
/// detection.
pub struct Engine {
    executor: Box<dyn Executor>,
    config: EngineConfig,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

const MAX_DETECTIONS: usize = 64;

impl Engine {
    pub fn new(executor: Box<dyn Executor>, config: EngineConfig) -> Result<Self, ModelError> {
        let model = executor.input_shape();
        if model != config.input {
            return Err(ModelError::InputShape {
                configured: config.input,
                model,
            });
        }
        let required = executor.arena_requirement();
        if required > config.arena_budget {
            return Err(ModelError::ArenaTooSmall {
                required,
                budget: config.arena_budget,
            });
        }
        debug!(
            arena_required = required,
            arena_budget = config.arena_budget,
            "detection engine ready"
        );
        Ok(Self { executor, config })
    }

    pub fn input_shape(&self) -> TensorShape {
        self.config.input
    }

    /// Runs one forward pass and keeps detections whose score strictly
    /// exceeds the threshold and whose class is the configured target.
    pub fn infer(&mut self, input: &Tensor) -> Result<Vec<Detection>, InferenceFault> {
        if input.shape() != self.config.input {
            return Err(InferenceFault::Input {
                want: self.config.input,
                got: input.shape(),
            });
        }

        let candidates = self.executor.invoke(input)?;

        let mut detections = Vec::new();
        for candidate in candidates {
            if candidate.score <= self.config.threshold {
                continue;
            }
            if candidate.class_id != self.config.target_class {
                continue;
            }
            detections.push(candidate);
            if detections.len() >= MAX_DETECTIONS {
                break;
            }
        }
        Ok(detections)
    }
}
