//! Actix surface: index page, MJPEG stream, stills, detections, metrics.

use std::sync::Arc;

use actix_web::{App, HttpResponse, HttpServer, web};
use anyhow::{Context, Result};
use async_stream::stream;
use bytes::Bytes;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};

use crate::config::StreamConfig;
use crate::data::{SharedSnapshot, publish};
use crate::html;
use crate::pipeline::{Pipeline, StillError};
use crate::session::{BOUNDARY, ChannelSink, StreamSession};
use crate::telemetry;

/// Shared state behind the HTTP handlers.
///
/// The pipeline sits behind a tokio mutex used as the single-session permit:
/// whoever holds the guard owns capture, inference, and encoding until their
/// connection ends.
pub(crate) struct ServerState {
    pipeline: Arc<Mutex<Pipeline>>,
    snapshot: SharedSnapshot,
}

impl ServerState {
    pub(crate) fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            snapshot: SharedSnapshot::default(),
        }
    }
}

/// Binds and serves on the calling thread until shutdown.
pub(crate) fn run(config: StreamConfig, pipeline: Pipeline) -> Result<()> {
    let prometheus = telemetry::init_metrics_recorder().clone();
    let state = web::Data::new(ServerState::new(pipeline));
    let listen = config.listen_addr.clone();

    actix_web::rt::System::new().block_on(async move {
        info!(listen = %listen, "stream server up");
        HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .app_data(web::Data::new(prometheus.clone()))
                .configure(configure)
        })
        .bind(&listen)
        .with_context(|| format!("bind {listen}"))?
        .run()
        .await
        .context("stream server exited")
    })
}

pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/stream", web::get().to(stream_handler))
        .route("/frame.jpg", web::get().to(frame_handler))
        .route("/detections", web::get().to(detections_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(html::INDEX_HTML)
}

/// Opens the MJPEG stream. One live session at a time; while a session holds
/// the pipeline, further stream and still requests get 503.
async fn stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let Ok(permit) = state.pipeline.clone().try_lock_owned() else {
        return busy_response();
    };

    let (tx, mut rx) = mpsc::channel::<Bytes>(1);
    let snapshot = state.snapshot.clone();
    let spawned = telemetry::spawn_thread("stream-session", move || {
        let mut permit = permit;
        let end = StreamSession::new(&mut permit, ChannelSink::new(tx), snapshot).run();
        debug!(state = ?end.state, frames_sent = end.frames_sent, "session thread done");
    });
    if let Err(err) = spawned {
        error!(error = %err, "failed to spawn session thread");
        return HttpResponse::InternalServerError().finish();
    }

    let body = stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, actix_web::Error>(chunk);
        }
    };

    HttpResponse::Ok()
        .append_header(("Cache-Control", "no-cache"))
        .append_header((
            "Content-Type",
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        ))
        .streaming(body)
}

/// Single annotated still through the same pipeline, guarded by the same
/// permit as the stream.
async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    let Ok(permit) = state.pipeline.clone().try_lock_owned() else {
        return busy_response();
    };
    let snapshot = state.snapshot.clone();

    let captured = web::block(move || {
        let mut permit = permit;
        let result = permit.capture_still();
        if let Ok(frame) = &result {
            publish(&snapshot, frame.into());
        }
        result
    })
    .await;

    match captured {
        Ok(Ok(frame)) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .body(frame.jpeg.into_bytes()),
        Ok(Err(StillError::Unavailable)) => HttpResponse::ServiceUnavailable()
            .content_type("text/plain")
            .body("no frame available\n"),
        Ok(Err(StillError::Encode(err))) => {
            error!(error = %err, "still capture failed to encode");
            HttpResponse::InternalServerError().finish()
        }
        Err(err) => {
            error!(error = %err, "still capture task failed");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Most recent detection snapshot as JSON; 204 until the first frame lands.
async fn detections_handler(state: web::Data<ServerState>) -> HttpResponse {
    let guard = match state.snapshot.lock() {
        Ok(guard) => guard,
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };
    match guard.clone() {
        Some(snapshot) => HttpResponse::Ok().json(snapshot),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn metrics_handler(handle: web::Data<PrometheusHandle>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}

fn busy_response() -> HttpResponse {
    metrics::counter!("catcam_sessions_rejected_total").increment(1);
    HttpResponse::ServiceUnavailable()
        .content_type("text/plain")
        .body("stream busy: one active session at a time\n")
}
