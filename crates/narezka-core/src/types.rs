use serde::{Deserialize, Serialize};

use crate::timecode::format_seconds_f64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: String,
}

impl Transcript {
    /// Duration implied by the last segment, in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.segments.last().map(|s| s.end).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub id: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Word>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceLevel {
    Critical,
    Important,
    Interesting,
    Supplementary,
}

impl Default for ImportanceLevel {
    fn default() -> Self {
        ImportanceLevel::Interesting
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatedLength {
    Long,
    Medium,
    Short,
}

impl Default for EstimatedLength {
    fn default() -> Self {
        EstimatedLength::Medium
    }
}

/// A theme discovered during topic analysis. Deliberately carries no
/// timestamps; the cut-generation phase maps topics back onto the
/// timestamped transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub importance_level: ImportanceLevel,
    #[serde(default)]
    pub estimated_duration: EstimatedLength,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub related_topics: Vec<u32>,
}

/// A single exportable cut. Timestamps are `HH:MM:SS` strings; the
/// validator guarantees `end > start` and monotonic ordering on output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cut {
    #[serde(default)]
    pub id: u32,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub filename: String,
    pub duration: String,
    pub resolution: String,
    pub fps: f64,
    pub total_cuts: usize,
}

/// The stable external contract produced by the pipeline and persisted in
/// the cuts cache. Identical shape regardless of whether cuts came from
/// manual entry, file upload, or the AI pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutDocument {
    pub cuts: Vec<Cut>,
    pub video_info: VideoInfo,
}

impl CutDocument {
    /// Human-readable rendering for terminal output.
    pub fn to_readable(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("# {}\n\n", self.video_info.filename));
        output.push_str(&format!(
            "**Duration:** {} | **Resolution:** {} | **{} cuts**\n\n",
            self.video_info.duration, self.video_info.resolution, self.video_info.total_cuts
        ));

        for cut in &self.cuts {
            output.push_str(&format!(
                "## [{}–{}] {}\n\n",
                cut.start, cut.end, cut.title
            ));
            if !cut.description.is_empty() {
                output.push_str(&format!("{}\n", cut.description));
            }
            output.push_str(&format!(
                "Duration: {} | Type: {}\n\n",
                cut.duration,
                if cut.content_type.is_empty() {
                    "unspecified"
                } else {
                    &cut.content_type
                }
            ));
        }

        output
    }
}

/// Format transcript segments as `[HH:MM:SS] text` lines for prompts.
pub fn format_transcript_with_timestamps(transcript: &Transcript) -> String {
    transcript
        .segments
        .iter()
        .map(|seg| format!("[{}] {}", format_seconds_f64(seg.start), seg.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}
