//! Per-connection streaming session.

use bytes::Bytes;
use tracing::{debug, info, info_span, warn};

use crate::data::{SharedSnapshot, publish};
use crate::pipeline::{Pipeline, PipelineFrame, StageOutcome};

/// Multipart boundary for the MJPEG response.
pub(crate) const BOUNDARY: &str = "frame";

/// Lifecycle of one streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Idle,
    Streaming,
    /// The peer went away; the pipeline is fine.
    Closed,
    /// The pipeline broke mid-session.
    Failed,
}

/// Where encoded parts go. The HTTP layer bridges this into the chunked
/// response body; tests substitute buffers.
pub(crate) trait PartSink {
    /// Delivers one chunk in order; `Err` means the peer is gone.
    fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed>;
}

#[derive(Debug)]
pub(crate) struct SinkClosed;

/// Bridges parts into the bounded channel the response body drains.
/// Capacity one on the channel means a slow reader stalls the loop here
/// instead of queueing stale frames.
pub(crate) struct ChannelSink {
    tx: tokio::sync::mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub(crate) fn new(tx: tokio::sync::mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

impl PartSink for ChannelSink {
    fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.tx.blocking_send(chunk).map_err(|_| SinkClosed)
    }
}

/// Terminal report for one session.
#[derive(Debug)]
pub(crate) struct SessionEnd {
    pub(crate) state: SessionState,
    pub(crate) frames_sent: u64,
}

/// Drives the pipeline for one connected client.
///
/// Starts Idle, runs Streaming, and ends Closed when the peer disconnects or
/// Failed when the encoder does. Transient capture misses and per-frame
/// inference faults never end it.
pub(crate) struct StreamSession<'a, S> {
    pipeline: &'a mut Pipeline,
    sink: S,
    snapshot: SharedSnapshot,
    state: SessionState,
    frames_sent: u64,
}

impl<'a, S: PartSink> StreamSession<'a, S> {
    pub(crate) fn new(pipeline: &'a mut Pipeline, sink: S, snapshot: SharedSnapshot) -> Self {
        Self {
            pipeline,
            sink,
            snapshot,
            state: SessionState::Idle,
            frames_sent: 0,
        }
    }

    pub(crate) fn run(mut self) -> SessionEnd {
        let span = info_span!("stream_session");
        let _guard = span.enter();
        debug!("session streaming");
        self.state = SessionState::Streaming;

        while self.state == SessionState::Streaming {
            match self.pipeline.run_once() {
                Ok(StageOutcome::Frame(frame)) => self.send_frame(frame),
                Ok(StageOutcome::CaptureMissed | StageOutcome::InferenceSkipped) => {}
                Err(err) => {
                    warn!(error = %err, "encode failed, ending session");
                    metrics::counter!("catcam_sessions_failed_total").increment(1);
                    self.state = SessionState::Failed;
                }
            }
        }

        info!(
            state = ?self.state,
            frames_sent = self.frames_sent,
            frames_in_flight = self.pipeline.frames_in_flight(),
            "stream session ended"
        );
        SessionEnd {
            state: self.state,
            frames_sent: self.frames_sent,
        }
    }

    fn send_frame(&mut self, frame: PipelineFrame) {
        publish(&self.snapshot, (&frame).into());

        let header = part_header(frame.jpeg.len());
        let mut payload = frame.jpeg.into_bytes();
        payload.extend_from_slice(b"\r\n");
        if self.sink.send(header).is_err() || self.sink.send(Bytes::from(payload)).is_err() {
            debug!("peer went away, closing session");
            self.state = SessionState::Closed;
            return;
        }
        self.frames_sent += 1;
        metrics::counter!("catcam_frames_streamed_total").increment(1);
    }
}

/// One part's preamble: boundary line, part headers, blank line. The JPEG
/// payload follows, terminated by CRLF before the next boundary.
pub(crate) fn part_header(len: usize) -> Bytes {
    Bytes::from(format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {len}\r\n\r\n"
    ))
}
