use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{NarezkaError, Result};

pub const CACHE_VERSION: u32 = 1;

/// The three independently cached pipeline artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Transcription,
    Topics,
    Cuts,
}

impl ArtifactKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Transcription => "transcriptions",
            ArtifactKind::Topics => "topics",
            ArtifactKind::Cuts => "cuts",
        }
    }

    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Transcription,
        ArtifactKind::Topics,
        ArtifactKind::Cuts,
    ];
}

/// Metadata wrapper persisted around every cached payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope<T> {
    pub payload: T,
    pub video_path: PathBuf,
    pub created_at: String,
    pub cache_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_info: Option<serde_json::Value>,
}

/// File-backed store for pipeline artifacts, one JSON document per
/// (kind, video) pair. Writes are whole-document overwrites.
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Open the store, eagerly creating the per-kind directories. A
    /// permissions failure here is fatal; everything later degrades to
    /// cache misses instead.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for kind in ArtifactKind::ALL {
            fs::create_dir_all(root.join(kind.dir_name())).map_err(|e| {
                NarezkaError::CacheUnavailable {
                    path: root.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(Self { root })
    }

    /// Cache key for a video: its filename stem. Two files sharing a stem
    /// collide and a replaced file at the same path reads stale artifacts;
    /// `clear_video` or a forced run is the escape hatch.
    pub fn video_key(video_path: &Path) -> String {
        let stem = video_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        stem.chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    fn document_path(&self, kind: ArtifactKind, key: &str) -> PathBuf {
        self.root.join(kind.dir_name()).join(format!("{key}.json"))
    }

    pub fn has(&self, kind: ArtifactKind, key: &str) -> bool {
        self.document_path(kind, key).exists()
    }

    /// Load an envelope; a missing, unreadable, or corrupt document is a
    /// cache miss, never an error.
    pub fn load<T: DeserializeOwned>(
        &self,
        kind: ArtifactKind,
        key: &str,
    ) -> Option<CacheEnvelope<T>> {
        let path = self.document_path(kind, key);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return None,
        };
        match serde_json::from_str::<CacheEnvelope<T>>(&content) {
            Ok(envelope) if envelope.cache_version == CACHE_VERSION => Some(envelope),
            Ok(envelope) => {
                debug!(
                    path = %path.display(),
                    found = envelope.cache_version,
                    "cache version mismatch, treating as miss"
                );
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache document, treating as miss");
                None
            }
        }
    }

    /// Persist a payload. A failed write is logged and swallowed: losing a
    /// cache write must never lose an already-computed result. Returns the
    /// document location on success.
    pub fn save<T: Serialize>(
        &self,
        kind: ArtifactKind,
        key: &str,
        video_path: &Path,
        payload: &T,
        processing_info: Option<serde_json::Value>,
    ) -> Option<PathBuf> {
        let envelope = CacheEnvelope {
            payload,
            video_path: video_path.to_path_buf(),
            created_at: chrono::Utc::now().to_rfc3339(),
            cache_version: CACHE_VERSION,
            processing_info,
        };
        let path = self.document_path(kind, key);
        let serialized = match serde_json::to_string_pretty(&envelope) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to serialize cache envelope");
                return None;
            }
        };
        match fs::write(&path, serialized) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to write cache document");
                None
            }
        }
    }

    /// Remove every artifact for one video.
    pub fn clear_video(&self, key: &str) {
        for kind in ArtifactKind::ALL {
            let path = self.document_path(kind, key);
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove cache document");
                }
            }
        }
    }

    /// Wipe all cached artifacts for every video.
    pub fn clear_all(&self) {
        for kind in ArtifactKind::ALL {
            let dir = self.root.join(kind.dir_name());
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(path = %entry.path().display(), error = %e, "failed to remove cache document");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("cache")).unwrap();
        (dir, store)
    }

    #[test]
    fn save_then_load_returns_payload() {
        let (_dir, store) = store();
        let payload = json!({"cuts": [{"id": 1}]});
        let location = store.save(
            ArtifactKind::Cuts,
            "demo",
            Path::new("/videos/demo.mp4"),
            &payload,
            None,
        );
        assert!(location.is_some());

        let envelope = store
            .load::<serde_json::Value>(ArtifactKind::Cuts, "demo")
            .unwrap();
        assert_eq!(envelope.payload, payload);
        assert_eq!(envelope.cache_version, CACHE_VERSION);
        assert_eq!(envelope.video_path, PathBuf::from("/videos/demo.mp4"));
    }

    #[test]
    fn second_save_wins() {
        let (_dir, store) = store();
        let video = Path::new("/videos/demo.mp4");
        store.save(ArtifactKind::Topics, "demo", video, &json!({"v": 1}), None);
        store.save(ArtifactKind::Topics, "demo", video, &json!({"v": 2}), None);

        let envelope = store
            .load::<serde_json::Value>(ArtifactKind::Topics, "demo")
            .unwrap();
        assert_eq!(envelope.payload, json!({"v": 2}));
    }

    #[test]
    fn kinds_are_independent() {
        let (_dir, store) = store();
        let video = Path::new("/videos/demo.mp4");
        store.save(ArtifactKind::Transcription, "demo", video, &json!("t"), None);
        assert!(store.has(ArtifactKind::Transcription, "demo"));
        assert!(!store.has(ArtifactKind::Topics, "demo"));
        assert!(!store.has(ArtifactKind::Cuts, "demo"));
    }

    #[test]
    fn corrupt_document_is_a_miss() {
        let (dir, store) = store();
        let path = dir
            .path()
            .join("cache")
            .join("cuts")
            .join("demo.json");
        fs::write(&path, "{not json").unwrap();
        assert!(store.load::<serde_json::Value>(ArtifactKind::Cuts, "demo").is_none());
    }

    #[test]
    fn clear_video_removes_all_kinds() {
        let (_dir, store) = store();
        let video = Path::new("/videos/demo.mp4");
        for kind in ArtifactKind::ALL {
            store.save(kind, "demo", video, &json!(1), None);
        }
        store.clear_video("demo");
        for kind in ArtifactKind::ALL {
            assert!(!store.has(kind, "demo"));
        }
    }

    #[test]
    fn video_key_uses_sanitized_stem() {
        assert_eq!(CacheStore::video_key(Path::new("/a/b/demo.mp4")), "demo");
        assert_eq!(
            CacheStore::video_key(Path::new("/a/my talk (final).mov")),
            "my_talk__final_"
        );
    }
}
