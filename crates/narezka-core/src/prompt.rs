use std::fs;
use std::path::PathBuf;

use tracing::warn;

use crate::types::{Topic, Transcript, format_transcript_with_timestamps};

static TOPIC_DISCOVERY_PROMPT: &str = r#"You are a video content analyzer preparing a topic map for an editor.

INPUT: The transcript of the video "{filename}" (total duration {duration}).

IMPORTANT: IGNORE ALL TIMESTAMPS. Read the transcript purely as text and
describe WHAT is discussed, never WHEN. Do not mention, estimate, or invent
any times in your output.

TASK: Enumerate the distinct themes of the video: main topics, sub-topics,
stories, practical insights, and technical explanations.

OUTPUT: Return ONLY a valid JSON array:
[
  {
    "id": 1,
    "title": "Concise topic title",
    "description": "1-2 sentence description of what is discussed",
    "content_type": "explanation|story|insight|tutorial|discussion",
    "importance_level": "critical|important|interesting|supplementary",
    "estimated_duration": "long|medium|short",
    "keywords": ["keyword1", "keyword2"],
    "related_topics": []
  }
]

RULES:
- One entry per genuinely distinct theme; do not pad with near-duplicates
- importance_level reflects how essential the theme is to the video
- estimated_duration is a rough length bucket, NOT a timestamp
- keywords are the concrete terms the speaker actually uses

TRANSCRIPT:
{content}"#;

static CUT_GENERATION_PROMPT: &str = r#"You are a video editor locating cut boundaries for the video "{filename}" (total duration {duration}).

You are given the topics already discovered in this video, and the full
transcript with timestamps. Find each topic's natural start and end in the
transcript and emit one cut per exportable segment.

TOPICS:
{topics}

OUTPUT: Return ONLY a valid JSON array:
[
  {
    "id": 1,
    "start": "HH:MM:SS",
    "end": "HH:MM:SS",
    "title": "Cut title",
    "description": "What happens inside this exact time range",
    "duration": "HH:MM:SS",
    "content_type": "explanation|story|insight|tutorial|discussion"
  }
]

RULES:
- NEVER cut in the middle of an explanation; boundaries must fall where the
  speaker naturally opens or closes a thought
- Titles and descriptions must describe ONLY content inside the given
  timestamps, nothing before or after
- Prefer one complete topic over several fragments of it
- end must be strictly after start; zero-duration cuts are invalid
- Timestamps must come from the transcript, not be rounded inventions

TIMESTAMPED TRANSCRIPT:
{content}"#;

/// Renders the two analysis prompts. Templates can be overridden on disk:
/// when a prompt directory is configured, missing templates are seeded with
/// the built-in text so they can be edited later.
pub struct PromptBuilder {
    prompt_dir: Option<PathBuf>,
}

impl PromptBuilder {
    pub fn new(prompt_dir: Option<PathBuf>) -> Self {
        Self { prompt_dir }
    }

    fn template(&self, file_name: &str, builtin: &str) -> String {
        let Some(dir) = &self.prompt_dir else {
            return builtin.to_string();
        };
        let path = dir.join(file_name);
        match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => {
                // seed the default so the user has something to edit
                if let Err(e) = fs::create_dir_all(dir).and_then(|_| fs::write(&path, builtin)) {
                    warn!(path = %path.display(), error = %e, "failed to persist default prompt template");
                }
                builtin.to_string()
            }
        }
    }

    /// Phase 1 prompt: topic discovery over a deliberately time-blind view
    /// of the transcript.
    pub fn topic_discovery(&self, transcript: &Transcript, filename: &str, duration: &str) -> String {
        let content: String = transcript
            .segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join("\n");
        self.template("topic_discovery.txt", TOPIC_DISCOVERY_PROMPT)
            .replace("{filename}", filename)
            .replace("{duration}", duration)
            .replace("{content}", &content)
    }

    /// Phase 2 prompt: timestamp mapping. Topics are rendered as plain
    /// structured text rather than raw JSON to keep token overhead down.
    pub fn cut_generation(
        &self,
        topics: &[Topic],
        transcript: &Transcript,
        filename: &str,
        duration: &str,
    ) -> String {
        self.template("cut_generation.txt", CUT_GENERATION_PROMPT)
            .replace("{topics}", &render_topics(topics))
            .replace("{filename}", filename)
            .replace("{duration}", duration)
            .replace("{content}", &format_transcript_with_timestamps(transcript))
    }
}

fn render_topics(topics: &[Topic]) -> String {
    topics
        .iter()
        .map(|t| {
            let importance = format!("{:?}", t.importance_level).to_lowercase();
            let length = format!("{:?}", t.estimated_duration).to_lowercase();
            let mut line = format!("{}. {} [{}/{}]", t.id, t.title, importance, length);
            if !t.description.is_empty() {
                line.push_str(&format!(" - {}", t.description));
            }
            if !t.keywords.is_empty() {
                line.push_str(&format!(" (keywords: {})", t.keywords.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EstimatedLength, ImportanceLevel, Segment};

    fn transcript() -> Transcript {
        Transcript {
            text: String::new(),
            segments: vec![
                Segment {
                    id: 0,
                    start: 0.0,
                    end: 5.0,
                    text: "So today we'll discuss onions.".into(),
                    words: None,
                },
                Segment {
                    id: 1,
                    start: 1800.0,
                    end: 1805.0,
                    text: "Now let's talk about garlic.".into(),
                    words: None,
                },
            ],
            language: "en".into(),
        }
    }

    fn topic(id: u32, title: &str) -> Topic {
        Topic {
            id,
            title: title.into(),
            description: "about vegetables".into(),
            content_type: "explanation".into(),
            importance_level: ImportanceLevel::Important,
            estimated_duration: EstimatedLength::Medium,
            keywords: vec!["onions".into()],
            related_topics: vec![],
        }
    }

    #[test]
    fn topic_prompt_has_no_timestamps() {
        let builder = PromptBuilder::new(None);
        let prompt = builder.topic_discovery(&transcript(), "demo.mp4", "00:35:00");
        assert!(prompt.contains("demo.mp4"));
        assert!(prompt.contains("00:35:00"));
        assert!(prompt.contains("So today we'll discuss onions."));
        // transcript body must not carry segment timestamps
        assert!(!prompt.contains("[00:30:00]"));
        assert!(!prompt.contains("{content}"));
    }

    #[test]
    fn cut_prompt_carries_timestamps_and_plain_topics() {
        let builder = PromptBuilder::new(None);
        let prompt = builder.cut_generation(
            &[topic(1, "Onions"), topic(2, "Garlic")],
            &transcript(),
            "demo.mp4",
            "00:35:00",
        );
        assert!(prompt.contains("[00:30:00] Now let's talk about garlic."));
        assert!(prompt.contains("1. Onions [important/medium]"));
        assert!(prompt.contains("2. Garlic [important/medium]"));
        // topics are plain text, not serialized JSON
        assert!(!prompt.contains("\"importance_level\": \"important\""));
        assert!(!prompt.contains("{topics}"));
    }

    #[test]
    fn missing_override_is_seeded_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let builder = PromptBuilder::new(Some(dir.path().to_path_buf()));
        let _ = builder.topic_discovery(&transcript(), "demo.mp4", "00:35:00");
        let seeded = dir.path().join("topic_discovery.txt");
        assert!(seeded.exists());
        assert_eq!(fs::read_to_string(seeded).unwrap(), TOPIC_DISCOVERY_PROMPT);
    }

    #[test]
    fn override_replaces_builtin() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("cut_generation.txt"),
            "CUSTOM {filename} {topics} {content}",
        )
        .unwrap();
        let builder = PromptBuilder::new(Some(dir.path().to_path_buf()));
        let prompt =
            builder.cut_generation(&[topic(1, "Onions")], &transcript(), "demo.mp4", "00:35:00");
        assert!(prompt.starts_with("CUSTOM demo.mp4"));
    }
}
