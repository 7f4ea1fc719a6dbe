//! The capture → infer → annotate → encode loop.

use std::time::Instant;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use frame_source::{CaptureError, FrameSource, PoolPlan, open_source};
use infer_core::{Detection, Engine, EngineConfig, TensorShape, TfliteExecutor};

use crate::annotate::annotate;
use crate::config::StreamConfig;
use crate::data::{DetectionSummary, Snapshot};
use crate::encode::{CompressedFrame, EncodeError, JpegTranscoder, Transcoder};
use crate::prepare::Preprocessor;

const HEARTBEAT_FRAMES: u64 = 30;
const STILL_ATTEMPTS: usize = 10;

/// One encoded frame with everything the serving side needs to describe it.
pub(crate) struct PipelineFrame {
    pub(crate) jpeg: CompressedFrame,
    pub(crate) detections: Vec<Detection>,
    pub(crate) timestamp_ms: i64,
    pub(crate) frame_number: u64,
    pub(crate) fps: f32,
}

impl From<&PipelineFrame> for Snapshot {
    fn from(frame: &PipelineFrame) -> Self {
        Self {
            timestamp_ms: frame.timestamp_ms,
            frame_number: frame.frame_number,
            fps: frame.fps,
            detections: frame.detections.iter().map(DetectionSummary::from).collect(),
        }
    }
}

/// What one pipeline iteration produced.
pub(crate) enum StageOutcome {
    /// Encoded frame, detections already drawn in.
    Frame(PipelineFrame),
    /// Transient capture miss; try again next iteration.
    CaptureMissed,
    /// The detector faulted on this frame; the frame was dropped.
    InferenceSkipped,
}

/// Why a single-shot capture produced no image.
#[derive(Debug, Error)]
pub(crate) enum StillError {
    #[error("no frame available")]
    Unavailable,
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// One-frame-in-flight pipeline. Owned by at most one session at a time; the
/// pipeline lock in the server is what enforces that.
pub(crate) struct Pipeline {
    source: Box<dyn FrameSource>,
    engine: Engine,
    preprocessor: Preprocessor,
    transcoder: Box<dyn Transcoder>,
    frame_number: u64,
    smoothed_fps: f32,
    last_frame_at: Option<Instant>,
}

impl Pipeline {
    /// Builds every stage from the resolved configuration. Failures here are
    /// fatal to the process; nothing network-facing has started yet.
    pub(crate) fn build(config: &StreamConfig) -> Result<Self> {
        let plan = PoolPlan::select(
            config.pool_frames,
            (config.capture_width, config.capture_height),
            (config.fallback_width, config.fallback_height),
            config.pool_budget,
        )?;
        info!(
            width = plan.width,
            height = plan.height,
            frames = plan.frames,
            pool_bytes = plan.bytes(),
            "capture plan settled"
        );
        let source = open_source(&config.source_uri, plan, config.still_fps)
            .with_context(|| format!("open capture source {}", config.source_uri))?;

        let blob = std::fs::read(&config.model_path)
            .with_context(|| format!("read model {}", config.model_path.display()))?;
        let executor = TfliteExecutor::from_bytes(&blob)
            .with_context(|| format!("load model {}", config.model_path.display()))?;
        let engine = Engine::new(
            Box::new(executor),
            EngineConfig {
                input: TensorShape::square(config.input_size),
                arena_budget: config.arena_budget,
                threshold: config.threshold,
                target_class: config.target_class,
            },
        )?;

        Ok(Self::assemble(
            source,
            engine,
            Preprocessor::new(config.input_size),
            Box::new(JpegTranscoder::new(config.jpeg_quality)),
        ))
    }

    /// Wires already-built stages together.
    pub(crate) fn assemble(
        source: Box<dyn FrameSource>,
        engine: Engine,
        preprocessor: Preprocessor,
        transcoder: Box<dyn Transcoder>,
    ) -> Self {
        Self {
            source,
            engine,
            preprocessor,
            transcoder,
            frame_number: 0,
            smoothed_fps: 0.0,
            last_frame_at: None,
        }
    }

    /// Runs one iteration. `Err` is fatal to the calling session; the skip
    /// outcomes are not. The frame buffer is back in the pool by the time
    /// this returns, whichever path it took.
    pub(crate) fn run_once(&mut self) -> Result<StageOutcome, EncodeError> {
        let iteration_started = Instant::now();

        let mut frame = match self.source.acquire() {
            Ok(frame) => frame,
            Err(CaptureError::Unavailable) => {
                debug!("capture unavailable, skipping iteration");
                metrics::counter!("catcam_capture_missed_total").increment(1);
                return Ok(StageOutcome::CaptureMissed);
            }
            Err(err) => {
                warn!(error = %err, "capture failed, skipping iteration");
                metrics::counter!("catcam_capture_missed_total").increment(1);
                return Ok(StageOutcome::CaptureMissed);
            }
        };
        let timestamp_ms = frame.timestamp_ms();
        metrics::histogram!("catcam_stage_latency_seconds", "stage" => "capture")
            .record(iteration_started.elapsed().as_secs_f64());

        let infer_started = Instant::now();
        let tensor = self.preprocessor.prepare(&frame);
        let detections = match self.engine.infer(&tensor) {
            Ok(detections) => detections,
            Err(fault) => {
                warn!(error = %fault, "inference fault, dropping frame");
                metrics::counter!("catcam_frames_dropped_total", "reason" => "inference")
                    .increment(1);
                return Ok(StageOutcome::InferenceSkipped);
            }
        };
        metrics::histogram!("catcam_stage_latency_seconds", "stage" => "infer")
            .record(infer_started.elapsed().as_secs_f64());

        if !detections.is_empty() {
            annotate(&mut frame, &detections);
            metrics::counter!("catcam_detections_total").increment(detections.len() as u64);
        }

        let encode_started = Instant::now();
        let jpeg = self.transcoder.encode(&frame)?;
        drop(frame);
        metrics::histogram!("catcam_stage_latency_seconds", "stage" => "encode")
            .record(encode_started.elapsed().as_secs_f64());

        self.frame_number += 1;
        self.observe_frame_interval();
        Ok(StageOutcome::Frame(PipelineFrame {
            jpeg,
            detections,
            timestamp_ms,
            frame_number: self.frame_number,
            fps: self.smoothed_fps,
        }))
    }

    /// Captures and encodes a single frame, tolerating a bounded number of
    /// transient misses.
    pub(crate) fn capture_still(&mut self) -> Result<PipelineFrame, StillError> {
        for _ in 0..STILL_ATTEMPTS {
            match self.run_once()? {
                StageOutcome::Frame(frame) => return Ok(frame),
                StageOutcome::CaptureMissed | StageOutcome::InferenceSkipped => {}
            }
        }
        Err(StillError::Unavailable)
    }

    /// Buffers currently checked out of the frame pool.
    pub(crate) fn frames_in_flight(&self) -> usize {
        self.source.pool().outstanding()
    }

    fn observe_frame_interval(&mut self) {
        let now = Instant::now();
        if let Some(previous) = self.last_frame_at {
            let elapsed = now.duration_since(previous).as_secs_f32();
            if elapsed > 0.0 {
                let instant_fps = 1.0 / elapsed;
                self.smoothed_fps = if self.smoothed_fps == 0.0 {
                    instant_fps
                } else {
                    self.smoothed_fps * 0.9 + instant_fps * 0.1
                };
                metrics::gauge!("catcam_pipeline_fps").set(self.smoothed_fps as f64);
            }
        }
        self.last_frame_at = Some(now);

        if self.frame_number % HEARTBEAT_FRAMES == 0 {
            debug!(
                frame = self.frame_number,
                fps = self.smoothed_fps,
                "pipeline heartbeat"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        CapturingTranscoder, FlakyTranscoder, ScriptedSource, Step, StubExecutor, TEST_INPUT,
        engine,
    };
    use frame_source::pixel;

    fn pipeline_with(
        source: ScriptedSource,
        executor: StubExecutor,
        transcoder: Box<dyn Transcoder>,
    ) -> Pipeline {
        Pipeline::assemble(
            Box::new(source),
            engine(executor),
            Preprocessor::new(TEST_INPUT),
            transcoder,
        )
    }

    #[test]
    fn confident_detection_is_annotated_and_encoded() {
        let source = ScriptedSource::new(64, 64, vec![]);
        let (transcoder, seen) = CapturingTranscoder::new();
        let mut pipeline =
            pipeline_with(source, StubExecutor::detecting(0.8), Box::new(transcoder));

        let outcome = pipeline.run_once().unwrap();
        let StageOutcome::Frame(frame) = outcome else {
            panic!("expected an encoded frame");
        };
        assert_eq!(frame.detections.len(), 1);
        assert_eq!(frame.frame_number, 1);

        // The stub reports (0.1, 0.1)-(0.5, 0.5); over 64x64 the outline
        // corner lands on pixel (6, 6) and must be green before encoding.
        let captured = seen.lock().unwrap();
        let pixels = captured.last().unwrap();
        assert_eq!(pixel::get(pixels, 6 * 64 + 6), 0x07E0);
        assert_eq!(pipeline.frames_in_flight(), 0);
    }

    #[test]
    fn low_confidence_frame_passes_through_unmarked() {
        let source = ScriptedSource::new(64, 64, vec![]).with_fill(0x001F);
        let (transcoder, seen) = CapturingTranscoder::new();
        let mut pipeline =
            pipeline_with(source, StubExecutor::detecting(0.4), Box::new(transcoder));

        let StageOutcome::Frame(frame) = pipeline.run_once().unwrap() else {
            panic!("expected an encoded frame");
        };
        assert!(frame.detections.is_empty());

        let captured = seen.lock().unwrap();
        let pixels = captured.last().unwrap();
        for index in 0..64 * 64 {
            assert_eq!(pixel::get(pixels, index), 0x001F);
        }
    }

    #[test]
    fn capture_miss_skips_the_iteration() {
        let source = ScriptedSource::new(32, 32, vec![Step::Miss]);
        let mut pipeline = pipeline_with(
            source,
            StubExecutor::empty(),
            Box::new(FlakyTranscoder::failing_after(usize::MAX)),
        );
        assert!(matches!(
            pipeline.run_once().unwrap(),
            StageOutcome::CaptureMissed
        ));
        assert_eq!(pipeline.frames_in_flight(), 0);
    }

    #[test]
    fn inference_fault_drops_the_frame_only() {
        let source = ScriptedSource::new(32, 32, vec![]);
        let mut pipeline = pipeline_with(
            source,
            StubExecutor::faulting(),
            Box::new(FlakyTranscoder::failing_after(usize::MAX)),
        );
        assert!(matches!(
            pipeline.run_once().unwrap(),
            StageOutcome::InferenceSkipped
        ));
        assert_eq!(pipeline.frames_in_flight(), 0);

        // The pipeline stays usable afterwards.
        assert!(matches!(
            pipeline.run_once().unwrap(),
            StageOutcome::InferenceSkipped
        ));
    }

    #[test]
    fn encode_failure_surfaces_and_releases_the_frame() {
        let source = ScriptedSource::new(32, 32, vec![]);
        let mut pipeline = pipeline_with(
            source,
            StubExecutor::empty(),
            Box::new(FlakyTranscoder::failing_after(0)),
        );
        assert!(pipeline.run_once().is_err());
        assert_eq!(pipeline.frames_in_flight(), 0);
    }

    #[test]
    fn still_capture_retries_past_transient_misses() {
        let source = ScriptedSource::new(32, 32, vec![Step::Miss, Step::Miss, Step::Miss]);
        let mut pipeline = pipeline_with(
            source,
            StubExecutor::detecting(0.9),
            Box::new(FlakyTranscoder::failing_after(usize::MAX)),
        );
        let frame = pipeline.capture_still().unwrap();
        assert_eq!(frame.frame_number, 1);
        assert_eq!(pipeline.frames_in_flight(), 0);
    }

    #[test]
    fn still_capture_gives_up_after_bounded_attempts() {
        let script = (0..STILL_ATTEMPTS + 2).map(|_| Step::Miss).collect();
        let source = ScriptedSource::new(32, 32, script);
        let mut pipeline = pipeline_with(
            source,
            StubExecutor::empty(),
            Box::new(FlakyTranscoder::failing_after(usize::MAX)),
        );
        assert!(matches!(
            pipeline.capture_still(),
            Err(StillError::Unavailable)
        ));
    }
}
