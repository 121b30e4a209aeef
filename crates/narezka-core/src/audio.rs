use std::path::Path;

use serde_json::Value;
use tokio::process::Command;

use crate::error::{NarezkaError, Result};

/// Container-level metadata needed for `video_info` and validator bounds.
#[derive(Debug, Clone)]
pub struct VideoProbe {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl VideoProbe {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Extract 16kHz mono PCM audio from a video using ffmpeg.
pub async fn extract_audio(video_path: &Path, audio_path: &Path) -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(video_path)
        .arg("-vn")
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-ar")
        .arg("16000")
        .arg("-ac")
        .arg("1")
        .arg(audio_path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(NarezkaError::AudioExtractionFailed {
            video_path: video_path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(())
}

/// Probe duration, resolution and frame rate using ffprobe.
pub async fn probe_video(video_path: &Path) -> Result<VideoProbe> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(video_path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(NarezkaError::ProbeFailed {
            video_path: video_path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let parsed: Value = serde_json::from_slice(&output.stdout)?;
    parse_probe_output(&parsed).ok_or_else(|| NarezkaError::ProbeFailed {
        video_path: video_path.to_path_buf(),
        reason: "no video stream in ffprobe output".to_string(),
    })
}

fn parse_probe_output(parsed: &Value) -> Option<VideoProbe> {
    let duration_seconds: f64 = parsed["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse().ok())?;

    let streams = parsed["streams"].as_array()?;
    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))?;

    let width = video_stream["width"].as_u64()? as u32;
    let height = video_stream["height"].as_u64()? as u32;
    let fps = video_stream["avg_frame_rate"]
        .as_str()
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);

    Some(VideoProbe {
        duration_seconds,
        width,
        height,
        fps,
    })
}

/// ffprobe reports frame rates as rationals like `30000/1001`.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 { None } else { Some(num / den) }
        }
        None => rate.parse().ok(),
    }
}
