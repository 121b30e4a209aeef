//! Narezka Core Library
//!
//! Core functionality for turning long-form videos into validated cut
//! lists: audio extraction, Whisper transcription, two-phase AI analysis,
//! cut validation and artifact caching.

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod repair;
pub mod timecode;
pub mod transcribe;
pub mod types;
pub mod validate;

// Re-export commonly used items at crate root
pub use cache::{ArtifactKind, CacheEnvelope, CacheStore};
pub use config::NarezkaConfig;
pub use error::{NarezkaError, Result};
pub use gateway::{ChatTransport, ModelGateway, ModelProfile};
pub use pipeline::{Pipeline, PipelineHandle};
pub use progress::{CancelFlag, Phase, ProgressSink, ProgressUpdate};
pub use timecode::{format_seconds_f64, format_timestamp, parse_timestamp};
pub use transcribe::{TranscriptionService, WhisperBackend, WhisperModel};
pub use types::{Cut, CutDocument, Segment, Topic, Transcript, VideoInfo};
pub use validate::CutValidator;
