//! Fixtures shared by the pipeline, session, and server tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use frame_source::{CaptureError, FramePool, FrameSource, RawFrame, pixel};
use infer_core::{
    BoundingBox, Detection, Engine, EngineConfig, Executor, InferenceFault, Tensor, TensorShape,
};

use crate::encode::{CompressedFrame, EncodeError, Transcoder};

/// Detector input size used throughout the tests; small keeps them fast.
pub(crate) const TEST_INPUT: u32 = 8;

const FAKE_JPEG: &[u8] = &[0xFF, 0xD8, 0x01, 0x02, 0x03, 0xFF, 0xD9];

#[derive(Clone, Copy)]
pub(crate) enum Step {
    Frame,
    Miss,
}

/// Scripted capture source backed by a real frame pool. Once the script runs
/// out it keeps producing frames.
pub(crate) struct ScriptedSource {
    pool: Arc<FramePool>,
    width: u32,
    height: u32,
    fill: u16,
    script: VecDeque<Step>,
}

impl ScriptedSource {
    pub(crate) fn new(width: u32, height: u32, script: Vec<Step>) -> Self {
        Self {
            pool: FramePool::new(2, width, height),
            width,
            height,
            fill: 0x0000,
            script: script.into(),
        }
    }

    pub(crate) fn with_fill(mut self, fill: u16) -> Self {
        self.fill = fill;
        self
    }
}

impl FrameSource for ScriptedSource {
    fn acquire(&mut self) -> Result<RawFrame, CaptureError> {
        match self.script.pop_front().unwrap_or(Step::Frame) {
            Step::Miss => Err(CaptureError::Unavailable),
            Step::Frame => {
                let mut frame = self.pool.checkout().ok_or(CaptureError::Unavailable)?;
                for index in 0..(self.width * self.height) as usize {
                    pixel::put(frame.data_mut(), index, self.fill);
                }
                Ok(frame)
            }
        }
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pool(&self) -> &Arc<FramePool> {
        &self.pool
    }
}

/// Executor stub reporting a fixed candidate list.
pub(crate) struct StubExecutor {
    candidates: Vec<Detection>,
    fail: bool,
}

impl StubExecutor {
    /// One class-1 candidate at (0.1, 0.1)-(0.5, 0.5) with the given score.
    pub(crate) fn detecting(score: f32) -> Self {
        Self {
            candidates: vec![Detection {
                class_id: 1,
                score,
                bbox: BoundingBox {
                    x_min: 0.1,
                    y_min: 0.1,
                    x_max: 0.5,
                    y_max: 0.5,
                },
            }],
            fail: false,
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            fail: false,
        }
    }

    pub(crate) fn faulting() -> Self {
        Self {
            candidates: Vec::new(),
            fail: true,
        }
    }
}

impl Executor for StubExecutor {
    fn input_shape(&self) -> TensorShape {
        TensorShape::square(TEST_INPUT)
    }

    fn arena_requirement(&self) -> usize {
        512
    }

    fn invoke(&mut self, _input: &Tensor) -> Result<Vec<Detection>, InferenceFault> {
        if self.fail {
            return Err(InferenceFault::Execution("injected fault".into()));
        }
        Ok(self.candidates.clone())
    }
}

/// Engine over a stub executor with the default cutoff and target class.
pub(crate) fn engine(executor: StubExecutor) -> Engine {
    Engine::new(
        Box::new(executor),
        EngineConfig {
            input: TensorShape::square(TEST_INPUT),
            arena_budget: 64 * 1024,
            threshold: 0.6,
            target_class: 1,
        },
    )
    .unwrap()
}

/// Emits placeholder JPEG bytes and fails exactly once, on the call after
/// `ok_frames` successes.
pub(crate) struct FlakyTranscoder {
    calls: AtomicUsize,
    fail_on: usize,
}

impl FlakyTranscoder {
    pub(crate) fn failing_after(ok_frames: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: ok_frames,
        }
    }
}

impl Transcoder for FlakyTranscoder {
    fn encode(&self, _frame: &RawFrame) -> Result<CompressedFrame, EncodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.fail_on {
            return Err(EncodeError::Codec("injected failure".into()));
        }
        Ok(CompressedFrame::new(FAKE_JPEG.to_vec()))
    }
}

/// Keeps a copy of every pixel buffer that reaches the encoder, so tests can
/// check what was drawn before compression.
pub(crate) struct CapturingTranscoder {
    seen: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl CapturingTranscoder {
    pub(crate) fn new() -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Self { seen: seen.clone() }, seen)
    }
}

impl Transcoder for CapturingTranscoder {
    fn encode(&self, frame: &RawFrame) -> Result<CompressedFrame, EncodeError> {
        self.seen.lock().unwrap().push(frame.data().to_vec());
        Ok(CompressedFrame::new(FAKE_JPEG.to_vec()))
    }
}
