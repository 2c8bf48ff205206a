//! Mission completion recording.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Marks missions complete for an identity. Implementations must be
/// idempotent: recording an existing pair is not an error.
#[async_trait]
pub trait CompletionRecorder: Send + Sync {
    /// Returns `true` when the completion is new.
    async fn record_completion(&self, slug: &str, mission_id: &str) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEntry {
    pub slug: String,
    pub mission_id: String,
    pub completed_at: DateTime<Utc>,
}

/// In-memory recorder for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryCompletionRecorder {
    entries: Mutex<Vec<CompletionEntry>>,
}

impl MemoryCompletionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<CompletionEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn contains(&self, slug: &str, mission_id: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|e| e.slug == slug && e.mission_id == mission_id)
    }
}

#[async_trait]
impl CompletionRecorder for MemoryCompletionRecorder {
    async fn record_completion(&self, slug: &str, mission_id: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries
            .iter()
            .any(|e| e.slug == slug && e.mission_id == mission_id)
        {
            return Ok(false);
        }
        entries.push(CompletionEntry {
            slug: slug.to_string(),
            mission_id: mission_id.to_string(),
            completed_at: Utc::now(),
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_completion_is_ignored() {
        let recorder = MemoryCompletionRecorder::new();
        assert!(recorder.record_completion("ana", "m3").await.unwrap());
        assert!(!recorder.record_completion("ana", "m3").await.unwrap());
        assert!(recorder.record_completion("ana", "m4").await.unwrap());

        assert_eq!(recorder.entries().len(), 2);
        assert!(recorder.contains("ana", "m3"));
        assert!(!recorder.contains("luis", "m3"));
    }
}
