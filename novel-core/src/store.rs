//! Story persistence.
//!
//! [`StoryStore`] is the seam the service saves through. [`JsonStoryStore`]
//! keeps one pretty-printed JSON file per story and replaces it atomically;
//! [`MemoryStoryStore`] is for tests and embedding.

use crate::story::{StoryRecord, StorySummary, SAVE_VERSION};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Story not found: {0}")]
    NotFound(String),
}

/// Where stories are saved.
#[async_trait]
pub trait StoryStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<StoryRecord, StoreError>;

    /// Save the whole record, replacing any previous version.
    async fn save(&self, record: &StoryRecord) -> Result<(), StoreError>;

    /// Summaries of every story, most recently updated first.
    async fn list(&self) -> Result<Vec<StorySummary>, StoreError>;
}

// ============================================================================
// JSON files
// ============================================================================

/// One `{id}.json` file per story in a directory.
#[derive(Debug, Clone)]
pub struct JsonStoryStore {
    dir: PathBuf,
}

impl JsonStoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a story's save file. Ids are sanitized to a file name.
    pub fn path_for(&self, id: &str) -> PathBuf {
        let sanitized = id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect::<String>();
        self.dir.join(format!("{sanitized}.json"))
    }

    async fn read_record(path: &Path) -> Result<StoryRecord, StoreError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Versioned {
            version: u32,
        }
        let versioned: Versioned = serde_json::from_str(&content)?;
        if versioned.version != SAVE_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: SAVE_VERSION,
                found: versioned.version,
            });
        }

        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl StoryStore for JsonStoryStore {
    async fn load(&self, id: &str) -> Result<StoryRecord, StoreError> {
        let path = self.path_for(id);
        if !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Self::read_record(&path).await
    }

    async fn save(&self, record: &StoryRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&record.id);
        let tmp = path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(record)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        debug!(id = %record.id, path = %path.display(), "story saved");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StorySummary>, StoreError> {
        let mut stories = Vec::new();
        if !fs::try_exists(&self.dir).await? {
            return Ok(stories);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match Self::read_record(&path).await {
                    Ok(record) => stories.push(record.summary()),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable save"),
                }
            }
        }

        stories.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(stories)
    }
}

// ============================================================================
// In memory
// ============================================================================

/// Stories kept in a map.
#[derive(Debug, Default)]
pub struct MemoryStoryStore {
    stories: RwLock<HashMap<String, StoryRecord>>,
}

impl MemoryStoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.stories.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.stories.read().await.is_empty()
    }
}

#[async_trait]
impl StoryStore for MemoryStoryStore {
    async fn load(&self, id: &str) -> Result<StoryRecord, StoreError> {
        self.stories
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save(&self, record: &StoryRecord) -> Result<(), StoreError> {
        self.stories
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StorySummary>, StoreError> {
        let mut stories: Vec<StorySummary> = self
            .stories
            .read()
            .await
            .values()
            .map(StoryRecord::summary)
            .collect();
        stories.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(stories)
    }
}
