//! MJPEG streaming daemon for cat detection.
//!
//! Captures frames from a V4L2 camera (or a looped still image), runs a
//! TFLite detector over each frame, draws the detections into the frame, and
//! serves the result as a multipart JPEG stream over HTTP.

mod annotate;
mod config;
mod data;
mod encode;
mod html;
mod pipeline;
mod prepare;
mod server;
mod session;
mod telemetry;
#[cfg(test)]
mod testutil;

use anyhow::Result;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = config::StreamConfig::from_args(&args)?;
    telemetry::init_tracing(config.verbose);
    let pipeline = pipeline::Pipeline::build(&config)?;
    server::run(config, pipeline)
}
