use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};
use whisper_rs::{
    FullParams, SamplingStrategy, SegmentCallbackData, WhisperContext, WhisperContextParameters,
};

use crate::error::{NarezkaError, Result};
use crate::progress::CancelFlag;
use crate::types::{Segment, Transcript, Word};

/// Free GPU memory required before any CUDA attempt is made.
const GPU_FLOOR_MB: u64 = 2048;

/// Streaming progress is reported at most once per this many seconds of
/// transcribed audio, to avoid flooding the progress queue.
const PROGRESS_INTERVAL_AUDIO_SECS: f64 = 5.0;

/// Words are regrouped into sentence segments on pauses longer than this.
const PHRASE_PAUSE_SECS: f64 = 0.4;

/// Progress callback: fraction of the stage in `[0, 1]` plus a message.
pub type ProgressFn = Arc<dyn Fn(f64, &str) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct TranscriptionHint {
    pub duration_seconds: Option<f64>,
}

/// Which local whisper implementation to load. A static configuration
/// choice, never decided per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhisperBackend {
    Standard,
    Quantized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhisperModel {
    Base,
    Small,
    Medium,
    Large,
    LargeV3,
}

impl WhisperModel {
    pub fn stem(&self) -> &'static str {
        match self {
            WhisperModel::Base => "base",
            WhisperModel::Small => "small",
            WhisperModel::Medium => "medium",
            WhisperModel::Large => "large",
            WhisperModel::LargeV3 => "large-v3",
        }
    }

    /// ggml model file for a backend; the quantized backend uses the q5_1
    /// variants.
    pub fn file_name(&self, backend: WhisperBackend) -> String {
        match backend {
            WhisperBackend::Standard => format!("ggml-{}.bin", self.stem()),
            WhisperBackend::Quantized => format!("ggml-{}-q5_1.bin", self.stem()),
        }
    }

    /// Rough VRAM requirement used to gate CUDA attempts.
    pub fn vram_estimate_mb(&self) -> u64 {
        match self {
            WhisperModel::Base => 1000,
            WhisperModel::Small => 2000,
            WhisperModel::Medium => 5000,
            WhisperModel::Large | WhisperModel::LargeV3 => 10000,
        }
    }

    /// Fixed descending fallback chain, preferred size first.
    pub fn fallback_chain(preferred: WhisperModel) -> Vec<WhisperModel> {
        let mut chain = vec![preferred];
        for model in [
            WhisperModel::LargeV3,
            WhisperModel::Large,
            WhisperModel::Medium,
            WhisperModel::Small,
            WhisperModel::Base,
        ] {
            if model != preferred {
                chain.push(model);
            }
        }
        chain
    }
}

/// Model size from audio duration: short videos do not need the large
/// models.
pub fn pick_model_for_duration(duration_seconds: f64) -> WhisperModel {
    if duration_seconds < 5.0 * 60.0 {
        WhisperModel::Small
    } else if duration_seconds < 20.0 * 60.0 {
        WhisperModel::Medium
    } else {
        WhisperModel::Large
    }
}

/// Word-level timestamps cost extra compute; only request them for videos
/// under ten minutes.
pub fn wants_word_timestamps(duration_seconds: f64) -> bool {
    duration_seconds < 10.0 * 60.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

/// Ordered (device, model) attempts: CUDA first for every model whose VRAM
/// estimate fits, then CPU for the whole chain.
pub fn device_plan(gpu_free_mb: Option<u64>, preferred: WhisperModel) -> Vec<(Device, WhisperModel)> {
    let chain = WhisperModel::fallback_chain(preferred);
    let mut plan = Vec::new();

    if let Some(free) = gpu_free_mb {
        if free >= GPU_FLOOR_MB {
            for model in &chain {
                if model.vram_estimate_mb() <= free {
                    plan.push((Device::Cuda, *model));
                }
            }
        }
    }
    for model in &chain {
        plan.push((Device::Cpu, *model));
    }
    plan
}

/// Remote speech-to-text seam; the default implementation talks to an
/// OpenAI-compatible transcription endpoint.
#[async_trait]
pub trait SpeechApi: Send + Sync {
    async fn transcribe_file(&self, audio_path: &Path) -> anyhow::Result<Transcript>;
}

pub struct OpenAiSpeechApi {
    client: reqwest::Client,
    api_url: String,
    model: String,
    env_var: String,
}

impl OpenAiSpeechApi {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: "https://api.openai.com/v1/audio/transcriptions".into(),
            model: "whisper-1".into(),
            env_var: "OPENAI_API_KEY".into(),
        }
    }
}

impl Default for OpenAiSpeechApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechApi for OpenAiSpeechApi {
    async fn transcribe_file(&self, audio_path: &Path) -> anyhow::Result<Transcript> {
        let api_key = std::env::var(&self.env_var)
            .map_err(|_| anyhow::anyhow!("{} environment variable is not set", self.env_var))?;

        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());
        let bytes = fs::read(audio_path).await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let transcript: Transcript = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(transcript)
    }
}

/// Turns an audio file into a time-aligned transcript: remote API for small
/// files, local whisper with device/model fallback chains otherwise.
pub struct TranscriptionService {
    remote: Option<Arc<dyn SpeechApi>>,
    backend: WhisperBackend,
    model_dir: PathBuf,
    remote_size_threshold_bytes: u64,
    preferred_model: Option<WhisperModel>,
    gpu_free_mb: Option<u64>,
    language: Option<String>,
    client: reqwest::Client,
}

impl TranscriptionService {
    pub fn new(
        remote: Option<Arc<dyn SpeechApi>>,
        backend: WhisperBackend,
        model_dir: PathBuf,
        remote_size_threshold_bytes: u64,
        preferred_model: Option<WhisperModel>,
        gpu_free_mb: Option<u64>,
        language: Option<String>,
    ) -> Self {
        Self {
            remote,
            backend,
            model_dir,
            remote_size_threshold_bytes,
            preferred_model,
            gpu_free_mb,
            language,
            client: reqwest::Client::new(),
        }
    }

    /// Transcribe an audio file. Remote failures fall back to local
    /// transcription; the stage only fails once every local device/model
    /// combination has been exhausted.
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        hint: &TranscriptionHint,
        progress: ProgressFn,
        cancel: &CancelFlag,
    ) -> Result<Transcript> {
        let file_size = fs::metadata(audio_path).await?.len();

        if file_size <= self.remote_size_threshold_bytes {
            if let Some(remote) = &self.remote {
                progress(0.0, "Uploading audio for remote transcription");
                match remote.transcribe_file(audio_path).await {
                    Ok(transcript) => {
                        progress(1.0, "Remote transcription complete");
                        return Ok(transcript);
                    }
                    Err(e) => {
                        warn!(error = %e, "remote transcription failed, falling back to local");
                    }
                }
            }
        } else {
            debug!(
                file_size,
                threshold = self.remote_size_threshold_bytes,
                "audio exceeds remote size threshold, using local transcription"
            );
        }

        self.transcribe_local(audio_path, hint, progress, cancel)
            .await
    }

    async fn transcribe_local(
        &self,
        audio_path: &Path,
        hint: &TranscriptionHint,
        progress: ProgressFn,
        cancel: &CancelFlag,
    ) -> Result<Transcript> {
        // the decoded buffer is shared across attempts, never copied
        let samples = Arc::new(read_wav_samples(audio_path).await?);
        let duration_seconds = hint
            .duration_seconds
            .unwrap_or(samples.len() as f64 / 16_000.0);

        let preferred = self
            .preferred_model
            .unwrap_or_else(|| pick_model_for_duration(duration_seconds));
        let want_words = wants_word_timestamps(duration_seconds);
        let plan = device_plan(self.gpu_free_mb, preferred);

        let mut last_error = String::from("no transcription attempt was made");
        for (device, model) in plan {
            if cancel.is_cancelled() {
                return Err(NarezkaError::TranscriptionFailed {
                    audio_path: audio_path.to_path_buf(),
                    reason: "cancelled before completion".into(),
                });
            }

            let model_path = match self.ensure_model(model).await {
                Ok(path) => path,
                Err(e) => {
                    warn!(model = model.stem(), error = %e, "model unavailable, trying next combination");
                    last_error = e.to_string();
                    continue;
                }
            };

            progress(
                0.0,
                &format!(
                    "Transcribing with {} on {}",
                    model.stem(),
                    device.as_str()
                ),
            );

            let request = LocalRequest {
                backend: self.backend,
                model_path,
                device,
                want_words,
                language: self.language.clone(),
                duration_seconds,
            };
            let samples = samples.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            let attempt = tokio::task::spawn_blocking(move || {
                run_whisper(&request, &samples, progress, &cancel)
            })
            .await;

            match attempt {
                Ok(Ok(transcript)) => {
                    info!(
                        model = model.stem(),
                        device = device.as_str(),
                        segments = transcript.segments.len(),
                        "local transcription succeeded"
                    );
                    return Ok(transcript);
                }
                Ok(Err(e)) => {
                    // dropping the context above released any GPU memory the
                    // failed attempt held
                    warn!(
                        model = model.stem(),
                        device = device.as_str(),
                        error = %e,
                        "local transcription attempt failed, trying next combination"
                    );
                    last_error = e.to_string();
                }
                Err(e) => {
                    warn!(error = %e, "transcription task panicked, trying next combination");
                    last_error = e.to_string();
                }
            }
        }

        Err(NarezkaError::TranscriptionFailed {
            audio_path: audio_path.to_path_buf(),
            reason: format!(
                "every device/model combination failed; last error: {last_error}"
            ),
        })
    }

    /// Download a missing ggml model file from the whisper.cpp mirror.
    async fn ensure_model(&self, model: WhisperModel) -> anyhow::Result<PathBuf> {
        let file_name = model.file_name(self.backend);
        let model_path = self.model_dir.join(&file_name);
        if model_path.exists() {
            return Ok(model_path);
        }

        fs::create_dir_all(&self.model_dir).await?;
        let url = format!(
            "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{file_name}"
        );
        info!(url = %url, "downloading whisper model");
        let bytes = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        fs::write(&model_path, &bytes).await?;

        Ok(model_path)
    }
}

struct LocalRequest {
    backend: WhisperBackend,
    model_path: PathBuf,
    device: Device,
    want_words: bool,
    language: Option<String>,
    duration_seconds: f64,
}

async fn read_wav_samples(audio_path: &Path) -> Result<Vec<f32>> {
    let path = audio_path.to_path_buf();
    let samples = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<f32>> {
        let mut reader = hound::WavReader::open(&path)?;
        let raw: std::result::Result<Vec<i16>, _> = reader.samples::<i16>().collect();
        Ok(raw?
            .into_iter()
            .map(|s| s as f32 / i16::MAX as f32)
            .collect())
    })
    .await
    .map_err(|e| NarezkaError::TranscriptionFailed {
        audio_path: audio_path.to_path_buf(),
        reason: format!("wav reader task failed: {e}"),
    })?;

    samples.map_err(|e| NarezkaError::TranscriptionFailed {
        audio_path: audio_path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn run_whisper(
    request: &LocalRequest,
    samples: &[f32],
    progress: ProgressFn,
    cancel: &CancelFlag,
) -> anyhow::Result<Transcript> {
    let mut ctx_params = WhisperContextParameters::default();
    ctx_params.use_gpu = request.device == Device::Cuda;
    ctx_params.flash_attn = request.backend == WhisperBackend::Quantized;

    let model_path_str = request
        .model_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("model path is not valid UTF-8"))?;
    let ctx = WhisperContext::new_with_params(model_path_str, ctx_params)
        .map_err(|e| anyhow::anyhow!("failed to load model: {e}"))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 5 });
    if let Some(lang) = request.language.as_deref() {
        params.set_language(Some(lang));
    }
    if request.want_words {
        params.set_token_timestamps(true);
        params.set_split_on_word(true);
        params.set_max_len(1);
    }

    {
        let progress = progress.clone();
        let cancel = cancel.clone();
        let total = request.duration_seconds.max(1.0);
        let last_reported = Mutex::new(0.0f64);
        params.set_segment_callback_safe(move |seg: SegmentCallbackData| {
            if cancel.is_cancelled() {
                return;
            }
            let end = seg.end_timestamp as f64 / 100.0;
            let mut last = last_reported.lock().unwrap();
            if end - *last >= PROGRESS_INTERVAL_AUDIO_SECS {
                *last = end;
                progress(
                    (end / total).clamp(0.0, 1.0),
                    &format!("Transcribed {:.0}s of audio", end),
                );
            }
        });
    }

    let mut state = ctx
        .create_state()
        .map_err(|e| anyhow::anyhow!("failed to create whisper state: {e}"))?;
    state
        .full(params, samples)
        .map_err(|e| anyhow::anyhow!("whisper inference failed: {e}"))?;

    let mut text = String::new();
    let mut raw_segments: Vec<Segment> = Vec::new();
    for segment in state.as_iter() {
        let Ok(seg_text) = segment.to_str() else {
            continue;
        };
        raw_segments.push(Segment {
            id: raw_segments.len(),
            start: segment.start_timestamp() as f64 / 100.0,
            end: segment.end_timestamp() as f64 / 100.0,
            text: seg_text.to_string(),
            words: None,
        });
        text.push_str(seg_text);
    }

    let segments = if request.want_words {
        // word-split mode yields one word per segment; regroup into phrases
        let words: Vec<Word> = raw_segments
            .iter()
            .map(|s| Word {
                word: s.text.clone(),
                start: s.start,
                end: s.end,
            })
            .collect();
        group_words_into_segments(&words)
    } else {
        raw_segments
    };

    let language_index = state.full_lang_id_from_state();
    let language = whisper_rs::get_lang_str(language_index);

    Ok(Transcript {
        language: language.unwrap_or("unknown").to_string(),
        segments,
        text,
    })
}

/// Regroup word-sized segments into sentence segments, splitting on
/// terminal punctuation or a noticeable pause.
pub fn group_words_into_segments(words: &[Word]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current: Vec<Word> = Vec::new();
    let mut current_text = String::new();

    let flush = |current: &mut Vec<Word>, current_text: &mut String, segments: &mut Vec<Segment>| {
        if current.is_empty() {
            return;
        }
        let start = current.first().map(|w| w.start).unwrap_or(0.0);
        let end = current.last().map(|w| w.end).unwrap_or(start);
        segments.push(Segment {
            id: segments.len(),
            start,
            end,
            text: current_text.trim().to_string(),
            words: Some(std::mem::take(current)),
        });
        current_text.clear();
    };

    for (idx, word) in words.iter().enumerate() {
        current.push(word.clone());
        current_text.push_str(&word.word);
        current_text.push(' ');

        // commas are not boundaries; splitting on them fragments phrases
        let ends_sentence = word
            .word
            .trim_end()
            .ends_with(['.', '!', '?']);
        let has_pause = words
            .get(idx + 1)
            .map(|next| next.start - word.end > PHRASE_PAUSE_SECS)
            .unwrap_or(false);

        if ends_sentence || has_pause {
            flush(&mut current, &mut current_text, &mut segments);
        }
    }
    flush(&mut current, &mut current_text, &mut segments);

    segments
}
