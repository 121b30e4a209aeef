use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::audio;
use crate::cache::{ArtifactKind, CacheStore};
use crate::config::NarezkaConfig;
use crate::error::{NarezkaError, Result};
use crate::gateway::ModelGateway;
use crate::progress::{CancelFlag, Phase, ProgressSink, ProgressUpdate};
use crate::prompt::PromptBuilder;
use crate::timecode::format_seconds_f64;
use crate::transcribe::{TranscriptionHint, TranscriptionService};
use crate::types::{Cut, CutDocument, Topic, Transcript, VideoInfo};
use crate::validate::CutValidator;

/// Fixed percent ranges per phase so consumers can render one continuous
/// progress bar.
const EXTRACT_RANGE: (u8, u8) = (0, 30);
const TRANSCRIBE_RANGE: (u8, u8) = (30, 70);
const ANALYZE_RANGE: (u8, u8) = (70, 95);
const FINALIZE_RANGE: (u8, u8) = (95, 100);

/// Handle to a spawned pipeline run. Dropping the handle does not stop the
/// run; call [`PipelineHandle::cancel`] for that. A cancelled run is
/// signalled by the `done` receiver failing instead of yielding a result.
pub struct PipelineHandle {
    pub progress: mpsc::Receiver<ProgressUpdate>,
    pub done: oneshot::Receiver<Result<CutDocument>>,
    cancel: CancelFlag,
}

impl PipelineHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Drives one video through extraction, transcription, two-phase analysis,
/// validation and caching.
pub struct Pipeline {
    config: NarezkaConfig,
    cache: CacheStore,
    transcription: TranscriptionService,
    gateway: ModelGateway,
    prompts: PromptBuilder,
}

impl Pipeline {
    /// Build a pipeline from configuration with the default HTTP-backed
    /// services. Fails only if the cache directory cannot be created.
    pub fn new(config: NarezkaConfig) -> Result<Self> {
        let cache = CacheStore::open(&config.cache_dir)?;
        let transcription = TranscriptionService::new(
            Some(Arc::new(crate::transcribe::OpenAiSpeechApi::new())),
            config.backend,
            config.model_dir(),
            config.remote_size_threshold_bytes,
            config.preferred_model,
            config.gpu_free_mb,
            config.language.clone(),
        );
        let gateway = ModelGateway::with_http(config.model_profiles.clone());
        let prompts = PromptBuilder::new(config.prompt_dir.clone());
        Ok(Self {
            config,
            cache,
            transcription,
            gateway,
            prompts,
        })
    }

    /// Build a pipeline from already-constructed services, for tests and
    /// embedders that inject their own transports.
    pub fn with_parts(
        config: NarezkaConfig,
        cache: CacheStore,
        transcription: TranscriptionService,
        gateway: ModelGateway,
    ) -> Self {
        let prompts = PromptBuilder::new(config.prompt_dir.clone());
        Self {
            config,
            cache,
            transcription,
            gateway,
            prompts,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Spawn a run on the tokio runtime and return its control handle.
    pub fn spawn(self: Arc<Self>, video_path: PathBuf, force: bool) -> PipelineHandle {
        let (sink, progress) = ProgressSink::channel(64);
        let (done_tx, done) = oneshot::channel();
        let cancel = CancelFlag::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let result = self.run(&video_path, force, &sink, &task_cancel).await;
            match result {
                Err(NarezkaError::Cancelled) => {
                    // dropping the sender is the cancellation signal
                    info!(video = %video_path.display(), "pipeline run cancelled");
                }
                other => {
                    let _ = done_tx.send(other);
                }
            }
        });

        PipelineHandle {
            progress,
            done,
            cancel,
        }
    }

    /// Run the full pipeline for one video. `force` bypasses all cache
    /// reads; writes still happen so the next run hits.
    pub async fn run(
        &self,
        video_path: &Path,
        force: bool,
        progress: &ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<CutDocument> {
        let key = CacheStore::video_key(video_path);
        self.check_cancel(cancel)?;

        // a cuts-cache hit short-circuits the whole pipeline, including
        // audio extraction and probing
        if !force {
            if let Some(envelope) = self
                .cache
                .load::<CutDocument>(ArtifactKind::Cuts, &key)
            {
                info!(key = %key, "serving cuts from cache");
                progress.send(Phase::Complete, 100, "Loaded cuts from cache");
                return Ok(envelope.payload);
            }
        }

        progress.send(Phase::ExtractingAudio, EXTRACT_RANGE.0, "Probing video");
        let probe = audio::probe_video(video_path).await?;
        self.check_cancel(cancel)?;

        let (transcript, transcript_cached) =
            self.obtain_transcript(video_path, &key, &probe, force, progress, cancel)
                .await?;
        self.check_cancel(cancel)?;

        progress.send(
            Phase::AnalyzingWithAi,
            ANALYZE_RANGE.0,
            "Discovering topics",
        );
        let filename = video_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());
        let duration_str = format_seconds_f64(probe.duration_seconds);

        let (topics, topics_cached) = self
            .obtain_topics(video_path, &key, &transcript, &filename, &duration_str, force)
            .await;
        self.check_cancel(cancel)?;

        progress.send(
            Phase::AnalyzingWithAi,
            (ANALYZE_RANGE.0 + ANALYZE_RANGE.1) / 2,
            "Mapping topics to timestamps",
        );
        let cut_prompt = self
            .prompts
            .cut_generation(&topics, &transcript, &filename, &duration_str);
        let raw_cuts = self
            .gateway
            .call_cuts(&cut_prompt, probe.duration_seconds)
            .await;
        let drafts = parse_cuts(&raw_cuts);
        self.check_cancel(cancel)?;

        progress.send(Phase::Finalizing, FINALIZE_RANGE.0, "Validating cuts");
        let validator = CutValidator::new(
            self.config.min_cut_duration_secs,
            probe.duration_seconds as u32,
            self.config.max_cuts,
        );
        let cuts = validator.validate(drafts, Some(&transcript.segments));

        let document = CutDocument {
            video_info: VideoInfo {
                filename,
                duration: duration_str,
                resolution: probe.resolution(),
                fps: probe.fps,
                total_cuts: cuts.len(),
            },
            cuts,
        };

        self.cache.save(
            ArtifactKind::Cuts,
            &key,
            video_path,
            &document,
            Some(json!({
                "transcript_cached": transcript_cached,
                "topics_cached": topics_cached,
                "language": transcript.language,
            })),
        );

        progress.send(Phase::Complete, 100, "Done");
        Ok(document)
    }

    async fn obtain_transcript(
        &self,
        video_path: &Path,
        key: &str,
        probe: &audio::VideoProbe,
        force: bool,
        progress: &ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<(Transcript, bool)> {
        if !force {
            if let Some(envelope) = self
                .cache
                .load::<Transcript>(ArtifactKind::Transcription, key)
            {
                debug!(key = %key, "transcript cache hit, skipping extraction");
                progress.send(
                    Phase::GeneratingTranscription,
                    TRANSCRIBE_RANGE.1,
                    "Loaded transcript from cache",
                );
                return Ok((envelope.payload, true));
            }
        }

        progress.send(
            Phase::ExtractingAudio,
            (EXTRACT_RANGE.0 + EXTRACT_RANGE.1) / 2,
            "Extracting audio",
        );
        let audio_path = std::env::temp_dir().join(format!(
            "narezka-{key}-{}.wav",
            std::process::id()
        ));
        audio::extract_audio(video_path, &audio_path).await?;

        let transcript = self
            .transcribe_and_cleanup(&audio_path, probe.duration_seconds, progress, cancel)
            .await?;

        self.cache.save(
            ArtifactKind::Transcription,
            key,
            video_path,
            &transcript,
            None,
        );
        Ok((transcript, false))
    }

    /// Transcribe an already-extracted wav. The file is removed before any
    /// result propagates, whether the stage succeeds, fails, or is
    /// cancelled at the boundary check.
    async fn transcribe_and_cleanup(
        &self,
        audio_path: &Path,
        duration_seconds: f64,
        progress: &ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<Transcript> {
        let result = async {
            self.check_cancel(cancel)?;
            progress.send(
                Phase::GeneratingTranscription,
                TRANSCRIBE_RANGE.0,
                "Transcribing audio",
            );
            let stage_progress = {
                let progress = progress.clone();
                let (lo, hi) = TRANSCRIBE_RANGE;
                Arc::new(move |fraction: f64, message: &str| {
                    let percent = lo as f64 + fraction.clamp(0.0, 1.0) * (hi - lo) as f64;
                    progress.send(Phase::GeneratingTranscription, percent as u8, message);
                })
            };
            let hint = TranscriptionHint {
                duration_seconds: Some(duration_seconds),
            };
            self.transcription
                .transcribe(audio_path, &hint, stage_progress, cancel)
                .await
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(audio_path).await {
            debug!(path = %audio_path.display(), error = %e, "failed to remove temporary audio file");
        }
        result
    }

    async fn obtain_topics(
        &self,
        video_path: &Path,
        key: &str,
        transcript: &Transcript,
        filename: &str,
        duration_str: &str,
        force: bool,
    ) -> (Vec<Topic>, bool) {
        if !force {
            if let Some(envelope) = self.cache.load::<Vec<Topic>>(ArtifactKind::Topics, key) {
                debug!(key = %key, "topics cache hit");
                return (envelope.payload, true);
            }
        }

        let prompt = self
            .prompts
            .topic_discovery(transcript, filename, duration_str);
        let raw = self.gateway.call_topics(&prompt).await;
        let topics = parse_topics(&raw);
        self.cache
            .save(ArtifactKind::Topics, key, video_path, &topics, None);
        (topics, false)
    }

    fn check_cancel(&self, cancel: &CancelFlag) -> Result<()> {
        if cancel.is_cancelled() {
            Err(NarezkaError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Deserialize model-produced topic objects, skipping entries that do not
/// fit the schema and renumbering the survivors.
fn parse_topics(raw: &[Value]) -> Vec<Topic> {
    let mut topics: Vec<Topic> = raw
        .iter()
        .filter_map(|value| match serde_json::from_value(value.clone()) {
            Ok(topic) => Some(topic),
            Err(e) => {
                warn!(error = %e, "dropping malformed topic object");
                None
            }
        })
        .collect();
    for (idx, topic) in topics.iter_mut().enumerate() {
        topic.id = (idx + 1) as u32;
    }
    topics
}

/// Deserialize model-produced cut objects. Entries with the wrong shape are
/// dropped here; semantically bad timestamps survive for the validator.
fn parse_cuts(raw: &[Value]) -> Vec<Cut> {
    raw.iter()
        .filter_map(|value| match serde_json::from_value(value.clone()) {
            Ok(cut) => Some(cut),
            Err(e) => {
                warn!(error = %e, "dropping malformed cut object");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatTransport, ModelProfile, RequestStyle, ResponseKind};
    use crate::transcribe::{SpeechApi, WhisperBackend};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct PanickingTransport;

    #[async_trait]
    impl ChatTransport for PanickingTransport {
        async fn complete(
            &self,
            _profile: &ModelProfile,
            _prompt: &str,
            _kind: ResponseKind,
        ) -> anyhow::Result<String> {
            panic!("model gateway must not be contacted");
        }
    }

    struct ScriptedTransport {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn complete(
            &self,
            _profile: &ModelProfile,
            _prompt: &str,
            _kind: ResponseKind,
        ) -> anyhow::Result<String> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                anyhow::bail!("no scripted response left");
            }
            Ok(responses.remove(0))
        }
    }

    struct PanickingSpeechApi;

    #[async_trait]
    impl SpeechApi for PanickingSpeechApi {
        async fn transcribe_file(&self, _audio_path: &Path) -> anyhow::Result<Transcript> {
            panic!("speech API must not be contacted");
        }
    }

    fn test_profile() -> Vec<ModelProfile> {
        vec![ModelProfile {
            name: "scripted".into(),
            api_url: "http://localhost/unused".into(),
            model: "test".into(),
            env_var: "UNUSED".into(),
            request: RequestStyle::Standard {
                temperature: 0.3,
                max_tokens: 1024,
            },
        }]
    }

    fn test_pipeline(cache_root: &Path, transport: Arc<dyn ChatTransport>) -> Pipeline {
        test_pipeline_with_remote(cache_root, transport, Some(Arc::new(PanickingSpeechApi)))
    }

    fn test_pipeline_with_remote(
        cache_root: &Path,
        transport: Arc<dyn ChatTransport>,
        remote: Option<Arc<dyn SpeechApi>>,
    ) -> Pipeline {
        let config = NarezkaConfig {
            cache_dir: cache_root.to_path_buf(),
            model_profiles: test_profile(),
            ..NarezkaConfig::default()
        };
        let cache = CacheStore::open(&config.cache_dir).unwrap();
        let transcription = TranscriptionService::new(
            remote,
            WhisperBackend::Standard,
            config.model_dir(),
            config.remote_size_threshold_bytes,
            None,
            None,
            None,
        );
        let gateway = ModelGateway::new(config.model_profiles.clone(), transport);
        Pipeline::with_parts(config, cache, transcription, gateway)
    }

    fn cached_document() -> CutDocument {
        CutDocument {
            cuts: vec![Cut {
                id: 1,
                start: "00:00:00".into(),
                end: "00:05:00".into(),
                title: "Intro".into(),
                description: String::new(),
                duration: "00:05:00".into(),
                content_type: "explanation".into(),
            }],
            video_info: VideoInfo {
                filename: "demo.mp4".into(),
                duration: "00:35:00".into(),
                resolution: "1920x1080".into(),
                fps: 30.0,
                total_cuts: 1,
            },
        }
    }

    #[tokio::test]
    async fn cuts_cache_hit_short_circuits_everything() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(dir.path(), Arc::new(PanickingTransport));

        // the video file does not even exist; a cuts hit must not touch it
        let video = Path::new("/videos/demo.mp4");
        let key = CacheStore::video_key(video);
        pipeline
            .cache()
            .save(ArtifactKind::Cuts, &key, video, &cached_document(), None);

        let (sink, mut rx) = ProgressSink::channel(8);
        let document = pipeline
            .run(video, false, &sink, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(document.cuts.len(), 1);
        assert_eq!(document.cuts[0].title, "Intro");
        let update = rx.try_recv().unwrap();
        assert_eq!(update.phase, Phase::Complete);
        assert_eq!(update.percent, 100);
    }

    #[tokio::test]
    async fn force_bypasses_cuts_cache() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(dir.path(), Arc::new(PanickingTransport));

        let video = Path::new("/videos/missing.mp4");
        let key = CacheStore::video_key(video);
        pipeline
            .cache()
            .save(ArtifactKind::Cuts, &key, video, &cached_document(), None);

        // with force set the pipeline probes the (nonexistent) video and
        // fails instead of serving the cached document
        let result = pipeline
            .run(video, true, &ProgressSink::disabled(), &CancelFlag::new())
            .await;
        assert!(matches!(result, Err(NarezkaError::ProbeFailed { .. })));
    }

    #[tokio::test]
    async fn pre_set_cancel_stops_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(dir.path(), Arc::new(PanickingTransport));

        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = pipeline
            .run(
                Path::new("/videos/demo.mp4"),
                false,
                &ProgressSink::disabled(),
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(NarezkaError::Cancelled)));
    }

    #[tokio::test]
    async fn spawned_run_signals_cancellation_by_dropping_sender() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(test_pipeline(dir.path(), Arc::new(PanickingTransport)));

        let handle = pipeline.spawn(PathBuf::from("/videos/demo.mp4"), false);
        handle.cancel();
        assert!(handle.done.await.is_err());
    }

    #[test]
    fn malformed_topic_objects_are_dropped_and_survivors_renumbered() {
        let raw = vec![
            json!({"id": 7, "title": "Onions"}),
            json!({"no_title": true}),
            json!({"id": 9, "title": "Garlic"}),
        ];
        let topics = parse_topics(&raw);
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].id, 1);
        assert_eq!(topics[0].title, "Onions");
        assert_eq!(topics[1].id, 2);
        assert_eq!(topics[1].title, "Garlic");
    }

    #[test]
    fn cuts_with_bad_timestamps_survive_parsing_for_the_validator() {
        let raw = vec![
            json!({"start": "banana", "end": "00:01:00", "title": "Bad"}),
            json!({"start": "00:01:00", "end": "00:02:00", "title": "Good"}),
        ];
        let cuts = parse_cuts(&raw);
        // the unparseable timestamp is the validator's decision, not ours
        assert_eq!(cuts.len(), 2);
    }

    #[tokio::test]
    async fn cancellation_at_the_transcription_boundary_removes_the_wav() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(dir.path(), Arc::new(PanickingTransport));

        let audio_path = dir.path().join("extracted.wav");
        std::fs::write(&audio_path, b"RIFF").unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = pipeline
            .transcribe_and_cleanup(&audio_path, 600.0, &ProgressSink::disabled(), &cancel)
            .await;

        assert!(matches!(result, Err(NarezkaError::Cancelled)));
        assert!(!audio_path.exists());
    }

    #[tokio::test]
    async fn failed_transcription_still_removes_the_wav() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline_with_remote(dir.path(), Arc::new(PanickingTransport), None);

        // not a readable wav, so the stage fails after the cleanup point
        let audio_path = dir.path().join("extracted.wav");
        std::fs::write(&audio_path, b"RIFF").unwrap();

        let result = pipeline
            .transcribe_and_cleanup(
                &audio_path,
                600.0,
                &ProgressSink::disabled(),
                &CancelFlag::new(),
            )
            .await;

        assert!(result.is_err());
        assert!(!audio_path.exists());
    }

    #[tokio::test]
    async fn two_topics_flow_into_two_valid_cuts() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport {
            responses: Mutex::new(vec![
                r#"[
                    {"id": 1, "title": "Onions", "keywords": ["onions"]},
                    {"id": 2, "title": "Garlic", "keywords": ["garlic"]}
                ]"#
                .into(),
                r#"[
                    {"id": 1, "start": "00:00:00", "end": "00:15:00",
                     "title": "Onions", "content_type": "explanation"},
                    {"id": 2, "start": "00:30:00", "end": "00:34:00",
                     "title": "Garlic", "content_type": "explanation"}
                ]"#
                .into(),
            ]),
        });
        let pipeline = test_pipeline(dir.path(), transport);

        let video = Path::new("/videos/vegetables.mp4");
        let key = CacheStore::video_key(video);
        let transcript = Transcript {
            text: String::new(),
            segments: vec![
                crate::types::Segment {
                    id: 0,
                    start: 0.0,
                    end: 5.0,
                    text: "So today we'll discuss onions.".into(),
                    words: None,
                },
                crate::types::Segment {
                    id: 1,
                    start: 1800.0,
                    end: 1805.0,
                    text: "Now let's talk about garlic.".into(),
                    words: None,
                },
            ],
            language: "en".into(),
        };
        let video_duration = 2100.0;

        let (topics, cached) = pipeline
            .obtain_topics(video, &key, &transcript, "vegetables.mp4", "00:35:00", false)
            .await;
        assert!(!cached);
        assert_eq!(topics.len(), 2);

        let cut_prompt =
            pipeline
                .prompts
                .cut_generation(&topics, &transcript, "vegetables.mp4", "00:35:00");
        let raw_cuts = pipeline.gateway.call_cuts(&cut_prompt, video_duration).await;
        let drafts = parse_cuts(&raw_cuts);

        let validator = CutValidator::new(
            pipeline.config.min_cut_duration_secs,
            video_duration as u32,
            pipeline.config.max_cuts,
        );
        let cuts = validator.validate(drafts, Some(&transcript.segments));

        assert_eq!(cuts.len(), 2);
        assert_eq!(cuts[0].title, "Onions");
        assert_eq!(cuts[1].title, "Garlic");
        for cut in &cuts {
            let start = crate::timecode::parse_timestamp(&cut.start).unwrap();
            let end = crate::timecode::parse_timestamp(&cut.end).unwrap();
            assert!(end - start >= 30, "cut {:?} is too short", cut.title);
        }
        let first_end = crate::timecode::parse_timestamp(&cuts[0].end).unwrap();
        let second_start = crate::timecode::parse_timestamp(&cuts[1].start).unwrap();
        assert!(first_end <= second_start);
    }

    #[tokio::test]
    async fn analysis_results_are_cached_per_stage() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport {
            responses: Mutex::new(vec![
                r#"[{"id": 1, "title": "Onions", "keywords": ["onions"]}]"#.into(),
            ]),
        });
        let pipeline = test_pipeline(dir.path(), transport);

        let video = Path::new("/videos/talk.mp4");
        let key = CacheStore::video_key(video);
        let transcript = Transcript {
            text: "So today we'll discuss onions.".into(),
            segments: vec![],
            language: "en".into(),
        };

        let (topics, cached) = pipeline
            .obtain_topics(video, &key, &transcript, "talk.mp4", "00:35:00", false)
            .await;
        assert!(!cached);
        assert_eq!(topics[0].title, "Onions");
        assert!(pipeline.cache().has(ArtifactKind::Topics, &key));

        // second call must hit the cache; the scripted transport is empty
        let (topics, cached) = pipeline
            .obtain_topics(video, &key, &transcript, "talk.mp4", "00:35:00", false)
            .await;
        assert!(cached);
        assert_eq!(topics[0].title, "Onions");
    }
}
