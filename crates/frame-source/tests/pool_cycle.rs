//! Pool planning and the buffer cycle, exercised through the public API.

use frame_source::{CaptureError, FrameSource, PoolPlan, SourceKind, StillSource, sniff_source};
use image::RgbImage;

#[test]
fn plan_prefers_the_primary_resolution() {
    let plan = PoolPlan::select(2, (800, 600), (320, 240), 4 << 20).unwrap();
    assert_eq!((plan.width, plan.height), (800, 600));
    assert_eq!(plan.bytes(), 2 * 800 * 600 * 2);
}

#[test]
fn plan_falls_back_when_the_budget_is_tight() {
    // Two 800x600 buffers need about 1.9 MiB; 512 KiB only fits 320x240.
    let plan = PoolPlan::select(2, (800, 600), (320, 240), 512 * 1024).unwrap();
    assert_eq!((plan.width, plan.height), (320, 240));
    assert_eq!(plan.frames, 2);
}

#[test]
fn plan_rejects_a_budget_too_small_for_either_tier() {
    let err = PoolPlan::select(2, (800, 600), (320, 240), 64 * 1024).unwrap_err();
    assert!(matches!(err, CaptureError::PoolBudget { .. }));
}

#[test]
fn buffers_cycle_back_through_acquire_and_drop() {
    let plan = PoolPlan {
        width: 8,
        height: 6,
        frames: 2,
    };
    let image = RgbImage::from_pixel(8, 6, image::Rgb([0, 255, 0]));
    let mut source = StillSource::from_image(&image, plan, 1000.0);

    for _ in 0..5 {
        let frame = source.acquire().unwrap();
        assert_eq!(source.pool().outstanding(), 1);
        drop(frame);
        assert_eq!(source.pool().outstanding(), 0);
    }

    let held = source.acquire().unwrap();
    let also_held = source.acquire().unwrap();
    assert!(matches!(source.acquire(), Err(CaptureError::Unavailable)));
    drop(held);
    drop(also_held);
    assert_eq!(source.pool().available(), 2);
    assert_eq!(source.pool().outstanding(), 0);
}

#[test]
fn source_kind_follows_the_uri() {
    assert_eq!(sniff_source("v4l2:///dev/video0"), SourceKind::V4l2);
    assert_eq!(sniff_source("/dev/video1"), SourceKind::V4l2);
    assert_eq!(sniff_source("lounge.jpg"), SourceKind::Still);
}
