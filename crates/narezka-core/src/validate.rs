use tracing::{debug, warn};

use crate::timecode::{format_timestamp, parse_timestamp};
use crate::types::{Cut, Segment};

/// Words that mark a short segment as worth keeping standalone. A fixed,
/// replaceable policy table, not an algorithmic requirement; override with
/// [`CutValidator::with_keywords`].
pub const QUALITY_KEYWORDS: &[&str] = &[
    "tip", "insight", "key", "warning", "important", "secret", "mistake", "trick", "takeaway",
    "summary",
];

/// Discourse markers that open a natural speech boundary.
const BOUNDARY_OPENERS: &[&str] = &["so ", "now ", "well ", "okay", "alright", "let's", "anyway"];

/// Phrase endings that close a natural speech boundary.
const BOUNDARY_CLOSERS: &[&str] = &[".", "!", "?", "right?", "exactly"];

/// Window searched around each cut boundary for a natural speech boundary.
const REFINE_WINDOW_SECS: f64 = 10.0;

#[derive(Debug, Clone)]
struct Draft {
    start: u32,
    end: u32,
    title: String,
    description: String,
    content_type: String,
}

impl Draft {
    fn duration(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

/// Left-to-right repair of a model-produced cut list against a running
/// `previous_end` cursor. A cut leaves this validator either fully valid or
/// excluded; the list is never partially corrected into an invalid state.
pub struct CutValidator {
    min_duration_secs: u32,
    video_duration_secs: u32,
    max_cuts: usize,
    keywords: Vec<String>,
}

impl CutValidator {
    pub fn new(min_duration_secs: u32, video_duration_secs: u32, max_cuts: usize) -> Self {
        Self {
            min_duration_secs,
            video_duration_secs,
            max_cuts,
            keywords: QUALITY_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Replace the quality-keyword policy table.
    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_lowercase()).collect();
        self
    }

    /// Validate and repair a raw cut list. Returns an ordered,
    /// non-overlapping list; empty when every input cut was rejected.
    pub fn validate(&self, raw: Vec<Cut>, segments: Option<&[Segment]>) -> Vec<Cut> {
        let drafts: Vec<Draft> = raw.into_iter().filter_map(|c| self.prefilter(c)).collect();

        let mut out: Vec<Draft> = Vec::new();
        let mut previous_end: u32 = 0;
        let mut i = 0;

        while i < drafts.len() {
            let mut draft = drafts[i].clone();
            i += 1;

            // monotonic ordering: a cut must not start before the previous
            // cut ended
            if draft.start < previous_end {
                draft.start = previous_end;
            }
            if draft.end > self.video_duration_secs {
                draft.end = self.video_duration_secs;
            }
            if draft.end <= draft.start {
                // unrecoverable after snapping; arithmetic repair here would
                // fabricate a range the model never produced
                warn!(title = %draft.title, "dropping cut with unrecoverable timing");
                continue;
            }

            if draft.duration() < self.min_duration_secs {
                if self.has_quality_keyword(&draft) {
                    debug!(title = %draft.title, "keeping short cut with quality keyword");
                } else {
                    draft.end =
                        (draft.start + self.min_duration_secs).min(self.video_duration_secs);
                    if draft.duration() < self.min_duration_secs {
                        // clamped at the video end; merging with the next cut
                        // is the only remaining option
                        match drafts.get(i) {
                            Some(next) => {
                                let next_end = next.end.min(self.video_duration_secs);
                                if next_end > draft.start {
                                    debug!(
                                        first = %draft.title,
                                        second = %next.title,
                                        "merging short cut with its successor"
                                    );
                                    draft = self.merge(draft, next, next_end);
                                    i += 1;
                                } else {
                                    // merging would not produce a valid range;
                                    // keep the longer of the two originals
                                    let next = next.clone();
                                    i += 1;
                                    if next.duration() > draft.duration()
                                        && next.end.min(self.video_duration_secs) > previous_end
                                    {
                                        draft = next;
                                        draft.start = draft.start.max(previous_end);
                                        draft.end = draft.end.min(self.video_duration_secs);
                                    }
                                    if draft.end <= draft.start {
                                        continue;
                                    }
                                }
                            }
                            None => {
                                // final short fragment at the end of the video
                                if draft.duration() == 0 {
                                    continue;
                                }
                            }
                        }
                    }
                }
            }

            if let Some(segments) = segments {
                self.refine_boundaries(&mut draft, segments, previous_end);
            }

            previous_end = draft.end;
            out.push(draft);
        }

        out.truncate(self.max_cuts);
        out.into_iter()
            .enumerate()
            .map(|(idx, d)| Cut {
                id: idx as u32 + 1,
                start: format_timestamp(d.start),
                end: format_timestamp(d.end),
                duration: format_timestamp(d.duration()),
                title: d.title,
                description: d.description,
                content_type: d.content_type,
            })
            .collect()
    }

    /// Discard cuts that cannot be meaningfully repaired: unparseable
    /// timestamps, zero or negative duration.
    fn prefilter(&self, cut: Cut) -> Option<Draft> {
        let start = match parse_timestamp(&cut.start) {
            Ok(s) => s,
            Err(e) => {
                warn!(title = %cut.title, error = %e, "dropping cut with unparseable start");
                return None;
            }
        };
        let end = match parse_timestamp(&cut.end) {
            Ok(s) => s,
            Err(e) => {
                warn!(title = %cut.title, error = %e, "dropping cut with unparseable end");
                return None;
            }
        };
        if end <= start {
            warn!(title = %cut.title, start, end, "dropping zero or negative duration cut");
            return None;
        }
        Some(Draft {
            start,
            end,
            title: cut.title,
            description: cut.description,
            content_type: cut.content_type,
        })
    }

    fn has_quality_keyword(&self, draft: &Draft) -> bool {
        let haystack = format!("{} {}", draft.title, draft.description).to_lowercase();
        self.keywords.iter().any(|k| haystack.contains(k.as_str()))
    }

    fn merge(&self, mut draft: Draft, next: &Draft, next_end: u32) -> Draft {
        draft.end = draft.end.max(next_end);
        draft.title = format!("{} + {}", draft.title, next.title);
        if !next.description.is_empty() {
            if !draft.description.is_empty() {
                draft.description.push(' ');
            }
            draft.description.push_str(&next.description);
        }
        if draft.content_type.is_empty() {
            draft.content_type = next.content_type.clone();
        }
        draft
    }

    /// Nudge boundaries toward natural speech boundaries: a segment inside
    /// the search window that opens with a discourse marker (for starts) or
    /// closes with terminal punctuation (for ends). Heuristic only; a
    /// refinement that would invalidate the cut is discarded.
    fn refine_boundaries(&self, draft: &mut Draft, segments: &[Segment], previous_end: u32) {
        let was_long = draft.duration() >= self.min_duration_secs;

        let refined_start = segments
            .iter()
            .filter(|s| (s.start - draft.start as f64).abs() <= REFINE_WINDOW_SECS)
            .find(|s| {
                let text = s.text.trim_start().to_lowercase();
                BOUNDARY_OPENERS.iter().any(|m| text.starts_with(m))
            })
            .map(|s| s.start.max(0.0) as u32);

        if let Some(start) = refined_start {
            if start >= previous_end && start < draft.end {
                draft.start = start;
            }
        }

        let refined_end = segments
            .iter()
            .filter(|s| (s.end - draft.end as f64).abs() <= REFINE_WINDOW_SECS)
            .find(|s| {
                let text = s.text.trim_end().to_lowercase();
                BOUNDARY_CLOSERS.iter().any(|m| text.ends_with(m))
            })
            .map(|s| s.end.ceil() as u32);

        if let Some(end) = refined_end {
            if end > draft.start && end <= self.video_duration_secs {
                draft.end = end;
            }
        }

        // never let refinement shrink a valid cut below the minimum
        if was_long && draft.duration() < self.min_duration_secs {
            draft.end = (draft.start + self.min_duration_secs).min(self.video_duration_secs);
        }
    }
}
