use std::path::PathBuf;
use thiserror::Error;

use crate::timecode::TimecodeError;

#[derive(Error, Debug)]
pub enum NarezkaError {
    #[error("Audio extraction failed for {video_path}: {reason}")]
    AudioExtractionFailed { video_path: PathBuf, reason: String },

    #[error("Probing video metadata failed for {video_path}: {reason}")]
    ProbeFailed { video_path: PathBuf, reason: String },

    #[error("Transcription failed for {audio_path}: {reason}")]
    TranscriptionFailed { audio_path: PathBuf, reason: String },

    #[error("Cut analysis failed: {reason}")]
    AnalysisFailed { reason: String },

    #[error("Cache directory {path} is unusable: {reason}")]
    CacheUnavailable { path: PathBuf, reason: String },

    #[error("Invalid timestamp: {0}")]
    Timecode(#[from] TimecodeError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Missing API key: {env_var} environment variable is not set")]
    MissingApiKey { env_var: String },

    #[error("Processing was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, NarezkaError>;
