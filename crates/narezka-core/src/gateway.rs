use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{NarezkaError, Result};
use crate::repair::{self, ExpectedShape};
use crate::timecode::format_seconds_f64;

/// One entry in the ordered model fallback list.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    pub name: String,
    pub api_url: String,
    pub model: String,
    pub env_var: String,
    pub request: RequestStyle,
}

/// Different models accept different parameter shapes: reasoning models
/// take an effort level and reject completion-length/temperature controls.
#[derive(Debug, Clone)]
pub enum RequestStyle {
    Reasoning { effort: String },
    Standard { temperature: f64, max_tokens: u32 },
}

impl ModelProfile {
    /// Default fallback chain: a high-effort reasoning configuration first,
    /// then standard configurations across the remaining providers.
    pub fn default_chain() -> Vec<ModelProfile> {
        vec![
            ModelProfile {
                name: "OpenAI (reasoning)".into(),
                api_url: "https://api.openai.com/v1/chat/completions".into(),
                model: "gpt-5.1".into(),
                env_var: "OPENAI_API_KEY".into(),
                request: RequestStyle::Reasoning {
                    effort: "high".into(),
                },
            },
            ModelProfile {
                name: "Grok".into(),
                api_url: "https://api.x.ai/v1/chat/completions".into(),
                model: "grok-4-fast".into(),
                env_var: "XAI_API_KEY".into(),
                request: RequestStyle::Standard {
                    temperature: 0.3,
                    max_tokens: 8192,
                },
            },
            ModelProfile {
                name: "Gemini".into(),
                api_url:
                    "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
                        .into(),
                model: "gemini-3-pro".into(),
                env_var: "GEMINI_API_KEY".into(),
                request: RequestStyle::Standard {
                    temperature: 0.3,
                    max_tokens: 8192,
                },
            },
        ]
    }

    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.env_var).map_err(|_| NarezkaError::MissingApiKey {
            env_var: self.env_var.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Json,
    Text,
}

/// Seam between the gateway's fallback logic and the actual HTTP call, so
/// tests can script responses per profile.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(
        &self,
        profile: &ModelProfile,
        prompt: &str,
        kind: ResponseKind,
    ) -> anyhow::Result<String>;
}

/// OpenAI-compatible chat-completions transport used by every default
/// profile.
pub struct HttpChatTransport {
    client: reqwest::Client,
}

impl HttpChatTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpChatTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn complete(
        &self,
        profile: &ModelProfile,
        prompt: &str,
        kind: ResponseKind,
    ) -> anyhow::Result<String> {
        let api_key = profile.api_key()?;

        let mut body = json!({
            "model": profile.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt,
                },
            ],
        });
        match &profile.request {
            RequestStyle::Reasoning { effort } => {
                body["reasoning_effort"] = json!(effort);
            }
            RequestStyle::Standard {
                temperature,
                max_tokens,
            } => {
                body["temperature"] = json!(temperature);
                body["max_tokens"] = json!(max_tokens);
            }
        }
        if kind == ResponseKind::Json {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(&profile.api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?
            .json::<Value>()
            .await?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                anyhow::anyhow!("invalid API response structure: {:?}", response)
            })?;

        Ok(content.to_string())
    }
}

/// Sends a prompt through an ordered list of model configurations until one
/// produces usable output. JSON calls never fail: exhausting the list
/// degrades to a synthesized single-segment result so the pipeline always
/// completes.
pub struct ModelGateway {
    profiles: Vec<ModelProfile>,
    transport: Arc<dyn ChatTransport>,
}

impl ModelGateway {
    pub fn new(profiles: Vec<ModelProfile>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            profiles,
            transport,
        }
    }

    pub fn with_http(profiles: Vec<ModelProfile>) -> Self {
        Self::new(profiles, Arc::new(HttpChatTransport::new()))
    }

    /// Free-text call: first profile returning non-empty text wins.
    pub async fn call_text(&self, prompt: &str) -> Result<String> {
        for profile in &self.profiles {
            match self
                .transport
                .complete(profile, prompt, ResponseKind::Text)
                .await
            {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => warn!(profile = %profile.name, "model returned empty response"),
                Err(e) => warn!(profile = %profile.name, error = %e, "model call failed"),
            }
        }
        Err(NarezkaError::AnalysisFailed {
            reason: "every configured model failed to produce text output".into(),
        })
    }

    /// Topic-discovery call. Degrades to a single whole-video topic.
    pub async fn call_topics(&self, prompt: &str) -> Vec<Value> {
        match self.call_structured(prompt, ExpectedShape::Topics).await {
            Some(items) => items,
            None => {
                warn!("all model configurations failed; synthesizing fallback topic");
                vec![json!({
                    "id": 1,
                    "title": "Full video overview",
                    "description": "Automatic fallback topic covering the entire video",
                    "content_type": "overview",
                    "importance_level": "important",
                    "estimated_duration": "long",
                    "keywords": [],
                    "related_topics": [],
                })]
            }
        }
    }

    /// Cut-generation call. Degrades to a single cut spanning the whole
    /// video so the caller always gets something exportable.
    pub async fn call_cuts(&self, prompt: &str, video_duration_secs: f64) -> Vec<Value> {
        match self.call_structured(prompt, ExpectedShape::Cuts).await {
            Some(items) => items,
            None => {
                warn!("all model configurations failed; synthesizing fallback cut");
                let end = format_seconds_f64(video_duration_secs);
                vec![json!({
                    "id": 1,
                    "start": "00:00:00",
                    "end": end,
                    "title": "Complete Video",
                    "description": "Automatic fallback segment covering the entire video",
                    "duration": end,
                    "content_type": "full_video",
                })]
            }
        }
    }

    async fn call_structured(&self, prompt: &str, shape: ExpectedShape) -> Option<Vec<Value>> {
        for profile in &self.profiles {
            let raw = match self
                .transport
                .complete(profile, prompt, ResponseKind::Json)
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(profile = %profile.name, error = %e, "model call failed, trying next configuration");
                    continue;
                }
            };
            if raw.trim().is_empty() {
                warn!(profile = %profile.name, "model returned empty response, trying next configuration");
                continue;
            }
            match repair::parse_structured(&raw, shape) {
                Ok((items, strategy)) => {
                    debug!(profile = %profile.name, strategy = ?strategy, count = items.len(), "parsed model response");
                    return Some(items);
                }
                Err(e) => {
                    warn!(profile = %profile.name, error = %e, "unparseable response even after repair, trying next configuration");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pops one scripted outcome per call and counts invocations.
    struct ScriptedTransport {
        responses: Mutex<Vec<anyhow::Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<anyhow::Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn complete(
            &self,
            _profile: &ModelProfile,
            _prompt: &str,
            _kind: ResponseKind,
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                anyhow::bail!("no scripted response left");
            }
            responses.remove(0)
        }
    }

    fn profiles(n: usize) -> Vec<ModelProfile> {
        (0..n)
            .map(|i| ModelProfile {
                name: format!("profile-{i}"),
                api_url: "http://localhost/unused".into(),
                model: format!("model-{i}"),
                env_var: "UNUSED".into(),
                request: RequestStyle::Standard {
                    temperature: 0.3,
                    max_tokens: 1024,
                },
            })
            .collect()
    }

    #[tokio::test]
    async fn stops_at_first_parseable_configuration() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(anyhow::anyhow!("network down")),
            Ok("not json at all".into()),
            Ok(r#"{"cuts": [{"start": "00:00:00", "end": "00:01:00", "title": "C"}]}"#.into()),
        ]));
        let gateway = ModelGateway::new(profiles(4), transport.clone());

        let cuts = gateway.call_cuts("prompt", 600.0).await;
        assert_eq!(cuts.len(), 1);
        assert_eq!(cuts[0]["title"], "C");
        // the fourth profile must never be contacted
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn first_success_means_single_call() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(
            r#"[{"id": 1, "title": "Intro"}]"#.into(),
        )]));
        let gateway = ModelGateway::new(profiles(3), transport.clone());

        let topics = gateway.call_topics("prompt").await;
        assert_eq!(topics.len(), 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_synthesizes_whole_video_cut() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok("garbage".into()),
            Ok("".into()),
            Err(anyhow::anyhow!("503")),
            Ok("more garbage".into()),
        ]));
        let gateway = ModelGateway::new(profiles(4), transport);

        let cuts = gateway.call_cuts("prompt", 3723.0).await;
        assert_eq!(cuts.len(), 1);
        assert_eq!(cuts[0]["title"], "Complete Video");
        assert_eq!(cuts[0]["start"], "00:00:00");
        assert_eq!(cuts[0]["end"], "01:02:03");
    }

    #[tokio::test]
    async fn exhaustion_synthesizes_fallback_topic() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok("nope".into())]));
        let gateway = ModelGateway::new(profiles(1), transport);

        let topics = gateway.call_topics("prompt").await;
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0]["title"], "Full video overview");
    }

    #[tokio::test]
    async fn truncated_response_is_repaired_not_skipped() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(
            r#"[{"start": "00:00:00", "end": "00:02:00", "title": "Kept"}, {"start": "00:02:00""#
                .into(),
        )]));
        let gateway = ModelGateway::new(profiles(2), transport.clone());

        let cuts = gateway.call_cuts("prompt", 300.0).await;
        assert_eq!(cuts.len(), 1);
        assert_eq!(cuts[0]["title"], "Kept");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
