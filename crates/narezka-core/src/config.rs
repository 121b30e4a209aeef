use std::path::PathBuf;

use crate::gateway::ModelProfile;
use crate::transcribe::{WhisperBackend, WhisperModel};

/// Everything the pipeline consumes is injected through this struct; no
/// component reads ambient environment state except the per-profile API
/// keys resolved at request time.
#[derive(Debug, Clone)]
pub struct NarezkaConfig {
    /// Root directory for the three artifact caches and model files.
    pub cache_dir: PathBuf,
    /// Minimum acceptable cut length in seconds.
    pub min_cut_duration_secs: u32,
    /// Hard cap on cuts per video.
    pub max_cuts: usize,
    /// Audio files at or below this size are tried against the remote
    /// speech-to-text API first.
    pub remote_size_threshold_bytes: u64,
    /// Which local whisper implementation to load. Static choice, not
    /// per-request.
    pub backend: WhisperBackend,
    /// Overrides the duration-based model size table when set.
    pub preferred_model: Option<WhisperModel>,
    /// Free GPU memory in MB as detected at startup. `None` disables CUDA
    /// attempts entirely.
    pub gpu_free_mb: Option<u64>,
    /// Ordered model fallback list for analysis calls.
    pub model_profiles: Vec<ModelProfile>,
    /// Directory holding prompt template overrides.
    pub prompt_dir: Option<PathBuf>,
    /// Transcription language hint (whisper auto-detects when unset).
    pub language: Option<String>,
}

impl Default for NarezkaConfig {
    fn default() -> Self {
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("narezka"),
            min_cut_duration_secs: 30,
            max_cuts: 50,
            remote_size_threshold_bytes: 24 * 1024 * 1024,
            backend: WhisperBackend::Standard,
            preferred_model: None,
            gpu_free_mb: None,
            model_profiles: ModelProfile::default_chain(),
            prompt_dir: None,
            language: None,
        }
    }
}

impl NarezkaConfig {
    pub fn model_dir(&self) -> PathBuf {
        self.cache_dir.join("models")
    }
}
