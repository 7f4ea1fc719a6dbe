//! Command line parsing for the streaming daemon.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

pub(crate) const USAGE: &str = "Usage: catcam <source> <model> [options]

  <source>                 capture source: /dev/video*, v4l2://<path>, or an image file
  <model>                  TFLite detection model path

Options:
  --listen <addr:port>     HTTP listen address (default 0.0.0.0:8080)
  --width <px>             preferred capture width (default 800)
  --height <px>            preferred capture height (default 600)
  --fallback-width <px>    reduced capture width (default 320)
  --fallback-height <px>   reduced capture height (default 240)
  --pool-frames <n>        capture buffers in the frame pool (default 2)
  --pool-budget-kb <kb>    byte budget for the frame pool (default 4096)
  --input-size <px>        square detector input size (default 96)
  --threshold <0..1>       confidence cutoff, exclusive (default 0.6)
  --class <id>             detector class to report (default 1)
  --jpeg-quality <1..100>  stream JPEG quality (default 80)
  --arena-kb <kb>          tensor arena budget in KiB (default 8192)
  --still-fps <fps>        replay rate for image-file sources (default 15)
  --verbose                debug logging for this crate";

/// Resolved invocation of the daemon.
#[derive(Clone, Debug)]
pub(crate) struct StreamConfig {
    pub(crate) source_uri: String,
    pub(crate) model_path: PathBuf,
    pub(crate) listen_addr: String,
    pub(crate) capture_width: u32,
    pub(crate) capture_height: u32,
    pub(crate) fallback_width: u32,
    pub(crate) fallback_height: u32,
    pub(crate) pool_frames: usize,
    pub(crate) pool_budget: usize,
    pub(crate) input_size: u32,
    pub(crate) threshold: f32,
    pub(crate) target_class: i64,
    pub(crate) jpeg_quality: u8,
    pub(crate) arena_budget: usize,
    pub(crate) still_fps: f32,
    pub(crate) verbose: bool,
}

impl StreamConfig {
    pub(crate) fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            bail!(USAGE);
        }

        let mut source_uri: Option<String> = None;
        let mut model_path: Option<String> = None;
        let mut listen_addr: Option<String> = None;
        let mut capture_width: Option<u32> = None;
        let mut capture_height: Option<u32> = None;
        let mut fallback_width: Option<u32> = None;
        let mut fallback_height: Option<u32> = None;
        let mut pool_frames: Option<usize> = None;
        let mut pool_budget_kb: Option<usize> = None;
        let mut input_size: Option<u32> = None;
        let mut threshold: Option<f32> = None;
        let mut target_class: Option<i64> = None;
        let mut jpeg_quality: Option<u8> = None;
        let mut arena_kb: Option<usize> = None;
        let mut still_fps: Option<f32> = None;
        let mut verbose = false;

        let mut idx = 1;
        while idx < args.len() {
            match args[idx].as_str() {
                "--source" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --source\n{USAGE}"))?;
                    source_uri = Some(value.clone());
                    idx += 2;
                }
                "--model" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --model\n{USAGE}"))?;
                    model_path = Some(value.clone());
                    idx += 2;
                }
                "--listen" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --listen\n{USAGE}"))?;
                    listen_addr = Some(value.clone());
                    idx += 2;
                }
                "--width" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --width\n{USAGE}"))?;
                    capture_width = Some(
                        value
                            .parse::<u32>()
                            .with_context(|| format!("invalid width '{value}'"))?,
                    );
                    idx += 2;
                }
                "--height" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --height\n{USAGE}"))?;
                    capture_height = Some(
                        value
                            .parse::<u32>()
                            .with_context(|| format!("invalid height '{value}'"))?,
                    );
                    idx += 2;
                }
                "--fallback-width" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --fallback-width\n{USAGE}"))?;
                    fallback_width = Some(
                        value
                            .parse::<u32>()
                            .with_context(|| format!("invalid fallback width '{value}'"))?,
                    );
                    idx += 2;
                }
                "--fallback-height" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --fallback-height\n{USAGE}"))?;
                    fallback_height = Some(
                        value
                            .parse::<u32>()
                            .with_context(|| format!("invalid fallback height '{value}'"))?,
                    );
                    idx += 2;
                }
                "--pool-frames" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --pool-frames\n{USAGE}"))?;
                    pool_frames = Some(
                        value
                            .parse::<usize>()
                            .with_context(|| format!("invalid pool frame count '{value}'"))?,
                    );
                    idx += 2;
                }
                "--pool-budget-kb" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --pool-budget-kb\n{USAGE}"))?;
                    pool_budget_kb = Some(
                        value
                            .parse::<usize>()
                            .with_context(|| format!("invalid pool budget '{value}'"))?,
                    );
                    idx += 2;
                }
                "--input-size" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --input-size\n{USAGE}"))?;
                    input_size = Some(
                        value
                            .parse::<u32>()
                            .with_context(|| format!("invalid input size '{value}'"))?,
                    );
                    idx += 2;
                }
                "--threshold" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --threshold\n{USAGE}"))?;
                    threshold = Some(
                        value
                            .parse::<f32>()
                            .with_context(|| format!("invalid threshold '{value}'"))?,
                    );
                    idx += 2;
                }
                "--class" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --class\n{USAGE}"))?;
                    target_class = Some(
                        value
                            .parse::<i64>()
                            .with_context(|| format!("invalid class id '{value}'"))?,
                    );
                    idx += 2;
                }
                "--jpeg-quality" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --jpeg-quality\n{USAGE}"))?;
                    jpeg_quality = Some(
                        value
                            .parse::<u8>()
                            .with_context(|| format!("invalid JPEG quality '{value}'"))?,
                    );
                    idx += 2;
                }
                "--arena-kb" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --arena-kb\n{USAGE}"))?;
                    arena_kb = Some(
                        value
                            .parse::<usize>()
                            .with_context(|| format!("invalid arena budget '{value}'"))?,
                    );
                    idx += 2;
                }
                "--still-fps" => {
                    let value = args
                        .get(idx + 1)
                        .with_context(|| format!("missing value for --still-fps\n{USAGE}"))?;
                    still_fps = Some(
                        value
                            .parse::<f32>()
                            .with_context(|| format!("invalid replay rate '{value}'"))?,
                    );
                    idx += 2;
                }
                "--verbose" => {
                    verbose = true;
                    idx += 1;
                }
                other => {
                    if !other.starts_with("--") && source_uri.is_none() {
                        source_uri = Some(other.to_string());
                        idx += 1;
                    } else if !other.starts_with("--") && model_path.is_none() {
                        model_path = Some(other.to_string());
                        idx += 1;
                    } else {
                        bail!("unknown argument '{other}'\n{USAGE}");
                    }
                }
            }
        }

        let source_uri = source_uri.with_context(|| format!("missing capture source\n{USAGE}"))?;
        let model_path = model_path.with_context(|| format!("missing model path\n{USAGE}"))?;
        let threshold = threshold.unwrap_or(0.6);
        let jpeg_quality = jpeg_quality.unwrap_or(80);
        let pool_frames = pool_frames.unwrap_or(2);
        let input_size = input_size.unwrap_or(96);
        let still_fps = still_fps.unwrap_or(15.0);
        let capture_width = capture_width.unwrap_or(800);
        let capture_height = capture_height.unwrap_or(600);
        let fallback_width = fallback_width.unwrap_or(320);
        let fallback_height = fallback_height.unwrap_or(240);

        if !(0.0..=1.0).contains(&threshold) {
            bail!("threshold must be within 0.0..=1.0, got {threshold}");
        }
        if jpeg_quality == 0 || jpeg_quality > 100 {
            bail!("JPEG quality must be within 1..=100, got {jpeg_quality}");
        }
        if pool_frames == 0 {
            bail!("pool must hold at least one frame");
        }
        if input_size == 0 {
            bail!("detector input size must be positive");
        }
        if capture_width == 0 || capture_height == 0 {
            bail!("capture resolution must be positive");
        }
        if fallback_width == 0 || fallback_height == 0 {
            bail!("fallback resolution must be positive");
        }
        if !still_fps.is_finite() || still_fps <= 0.0 {
            bail!("replay rate must be positive, got {still_fps}");
        }

        Ok(Self {
            source_uri,
            model_path: PathBuf::from(model_path),
            listen_addr: listen_addr.unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            capture_width,
            capture_height,
            fallback_width,
            fallback_height,
            pool_frames,
            pool_budget: pool_budget_kb.unwrap_or(4096) * 1024,
            input_size,
            threshold,
            target_class: target_class.unwrap_or(1),
            jpeg_quality,
            arena_budget: arena_kb.unwrap_or(8192) * 1024,
            still_fps,
            verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        std::iter::once("catcam")
            .chain(parts.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn positional_source_and_model_with_defaults() {
        let config = StreamConfig::from_args(&args(&["/dev/video0", "cat.tflite"])).unwrap();
        assert_eq!(config.source_uri, "/dev/video0");
        assert_eq!(config.model_path, PathBuf::from("cat.tflite"));
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!((config.capture_width, config.capture_height), (800, 600));
        assert_eq!((config.fallback_width, config.fallback_height), (320, 240));
        assert_eq!(config.pool_frames, 2);
        assert_eq!(config.input_size, 96);
        assert_eq!(config.threshold, 0.6);
        assert_eq!(config.target_class, 1);
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.arena_budget, 8192 * 1024);
        assert!(!config.verbose);
    }

    #[test]
    fn flags_override_defaults() {
        let config = StreamConfig::from_args(&args(&[
            "--model",
            "cat.tflite",
            "--source",
            "v4l2:///dev/video2",
            "--threshold",
            "0.35",
            "--jpeg-quality",
            "92",
            "--listen",
            "127.0.0.1:9000",
            "--pool-budget-kb",
            "512",
            "--verbose",
        ]))
        .unwrap();
        assert_eq!(config.source_uri, "v4l2:///dev/video2");
        assert_eq!(config.threshold, 0.35);
        assert_eq!(config.jpeg_quality, 92);
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.pool_budget, 512 * 1024);
        assert!(config.verbose);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = StreamConfig::from_args(&args(&["cam", "model", "--threshold", "1.5"]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("threshold"));
    }

    #[test]
    fn rejects_zero_jpeg_quality() {
        let err = StreamConfig::from_args(&args(&["cam", "model", "--jpeg-quality", "0"]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("JPEG quality"));
    }

    #[test]
    fn rejects_unknown_flag() {
        let err = StreamConfig::from_args(&args(&["cam", "model", "--what"]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("unknown argument"));
    }

    #[test]
    fn missing_model_is_reported() {
        let err = StreamConfig::from_args(&args(&["cam"])).unwrap_err().to_string();
        assert!(err.contains("missing model path"));
    }
}
