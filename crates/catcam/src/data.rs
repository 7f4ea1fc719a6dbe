//! Shared state passed between the pipeline thread and the HTTP handlers.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use infer_core::Detection;

/// Wire form of one detection, normalized coordinates as `[x_min, y_min,
/// x_max, y_max]`.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct DetectionSummary {
    pub(crate) class_id: i64,
    pub(crate) score: f32,
    pub(crate) bbox: [f32; 4],
}

impl From<&Detection> for DetectionSummary {
    fn from(detection: &Detection) -> Self {
        Self {
            class_id: detection.class_id,
            score: detection.score,
            bbox: [
                detection.bbox.x_min,
                detection.bbox.y_min,
                detection.bbox.x_max,
                detection.bbox.y_max,
            ],
        }
    }
}

/// What the most recently processed frame looked like.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct Snapshot {
    pub(crate) timestamp_ms: i64,
    pub(crate) frame_number: u64,
    pub(crate) fps: f32,
    pub(crate) detections: Vec<DetectionSummary>,
}

pub(crate) type SharedSnapshot = Arc<Mutex<Option<Snapshot>>>;

/// Replaces the shared snapshot. A poisoned slot is left as-is; the stream
/// itself does not depend on it.
pub(crate) fn publish(slot: &SharedSnapshot, snapshot: Snapshot) {
    if let Ok(mut guard) = slot.lock() {
        *guard = Some(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infer_core::BoundingBox;

    #[test]
    fn summary_carries_detection_fields() {
        let detection = Detection {
            class_id: 1,
            score: 0.87,
            bbox: BoundingBox {
                x_min: 0.1,
                y_min: 0.2,
                x_max: 0.5,
                y_max: 0.6,
            },
        };
        let summary = DetectionSummary::from(&detection);
        assert_eq!(summary.class_id, 1);
        assert_eq!(summary.bbox, [0.1, 0.2, 0.5, 0.6]);
    }

    #[test]
    fn publish_replaces_previous_snapshot() {
        let slot = SharedSnapshot::default();
        for frame_number in 1..=2 {
            publish(
                &slot,
                Snapshot {
                    timestamp_ms: 0,
                    frame_number,
                    fps: 0.0,
                    detections: Vec::new(),
                },
            );
        }
        let guard = slot.lock().unwrap();
        assert_eq!(guard.as_ref().unwrap().frame_number, 2);
    }
}
