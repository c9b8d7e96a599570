//! NovelService: the public API for creating and continuing stories.
//!
//! Wraps the [`ChapterEngine`] and a [`StoryStore`]. Generation for one
//! story is serialized by a per-story lock; different stories proceed
//! concurrently. A chapter is committed with a single store save after
//! generation succeeds, so a failed attempt leaves the saved story as it
//! was and can simply be retried.

use crate::characters::{find_character, merge_update, Character};
use crate::engine::{BibleRequest, ChapterEngine, ChapterOutput, OpeningRequest};
use crate::error::EngineError;
use crate::store::{StoreError, StoryStore};
use crate::story::{NewStory, StoryRecord, StorySummary};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::info;

/// A chapter that has been generated and saved.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedChapter {
    pub story_id: String,
    pub index: u32,
    pub output: ChapterOutput,
}

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// A held per-story lock. Dropping it releases the lock and forgets the
/// map entry once nobody else holds or waits on it.
struct StoryLease<'a> {
    locks: &'a LockMap,
    id: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for StoryLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(self.id);
        }
    }
}

/// Story creation and continuation over a store.
pub struct NovelService<S> {
    engine: ChapterEngine,
    store: S,
    locks: LockMap,
}

impl<S: StoryStore> NovelService<S> {
    pub fn new(engine: ChapterEngine, store: S) -> Self {
        Self {
            engine,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &ChapterEngine {
        &self.engine
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Whether a chapter is being generated for this story right now.
    pub fn is_busy(&self, id: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Create a story: bible, detail pass, opening chapter, first save.
    pub async fn start_story(&self, settings: NewStory) -> Result<StoryRecord, EngineError> {
        let request = BibleRequest {
            genre_label: settings.genre_label.clone(),
            tags: settings.tags.clone(),
            tone: settings.tone.clone(),
            target_chapters: settings.target_ending_chapter,
            category: settings.category.clone(),
        };
        let bible = self.engine.generate_bible(&request).await?;
        let bible = self.engine.ensure_detailed_settings(&request, bible).await;

        let opening = self
            .engine
            .generate_opening(OpeningRequest {
                genre_label: &settings.genre_label,
                tags: &settings.tags,
                tone: &settings.tone,
                pov: &settings.pov,
                bible: &bible,
            })
            .await?;

        let record = StoryRecord::new(settings, bible, opening);
        self.store.save(&record).await?;
        info!(id = %record.id, title = %record.title(), "story created");
        Ok(record)
    }

    /// Generate and save the next chapter, waiting for any chapter already
    /// in progress for the same story.
    pub async fn next_chapter(&self, id: &str) -> Result<CommittedChapter, EngineError> {
        let lock = self.lock_for(id);
        let lease = self.lease(id, Some(lock.lock_owned().await));
        self.generate_locked(id, lease).await
    }

    /// Like [`next_chapter`](Self::next_chapter) but fails with
    /// [`EngineError::Busy`] instead of waiting.
    pub async fn try_next_chapter(&self, id: &str) -> Result<CommittedChapter, EngineError> {
        let lock = self.lock_for(id);
        let lease = self.lease(id, lock.try_lock_owned().ok());
        if lease.guard.is_none() {
            return Err(EngineError::Busy(id.to_string()));
        }
        self.generate_locked(id, lease).await
    }

    fn lease<'a>(
        &'a self,
        id: &'a str,
        guard: Option<OwnedMutexGuard<()>>,
    ) -> StoryLease<'a> {
        StoryLease {
            locks: &self.locks,
            id,
            guard,
        }
    }

    async fn generate_locked(
        &self,
        id: &str,
        _lease: StoryLease<'_>,
    ) -> Result<CommittedChapter, EngineError> {
        let mut record = self.load(id).await?;
        let index = record.next_chapter_index();
        let output = self.engine.generate(&record.chapter_context()).await?;

        record.apply_chapter(index, &output);
        self.store.save(&record).await?;

        info!(
            id,
            index,
            phase = %record.plot_state.phase,
            progress = record.plot_state.instance_progress,
            "chapter committed"
        );
        Ok(CommittedChapter {
            story_id: record.id,
            index,
            output,
        })
    }

    /// Refine one character's profile and save it.
    ///
    /// Shares the story's lock with chapter generation. Returns the
    /// character as saved.
    pub async fn refine_character(&self, id: &str, name: &str) -> Result<Character, EngineError> {
        let lock = self.lock_for(id);
        let _lease = self.lease(id, Some(lock.lock_owned().await));

        let mut record = self.load(id).await?;
        let index = find_character(&record.characters, name).ok_or_else(|| {
            EngineError::CharacterNotFound {
                story: id.to_string(),
                name: name.to_string(),
            }
        })?;

        let update = self
            .engine
            .refine_character(record.title(), &record.characters[index])
            .await;
        let changed = update.profile_update.as_ref().is_some_and(|p| !p.is_empty());
        if changed {
            merge_update(&mut record.characters, &update);
            self.store.save(&record).await?;
            info!(id, name = %record.characters[index].name, "character refined");
        }
        Ok(record.characters[index].clone())
    }

    pub async fn load(&self, id: &str) -> Result<StoryRecord, EngineError> {
        self.store.load(id).await.map_err(|e| match e {
            StoreError::NotFound(id) => EngineError::StoryNotFound(id),
            other => EngineError::Store(other),
        })
    }

    pub async fn list(&self) -> Result<Vec<StorySummary>, EngineError> {
        Ok(self.store.list().await?)
    }
}

impl<S> std::fmt::Debug for NovelService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NovelService")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::gateway::Gateway;
    use crate::store::MemoryStoryStore;
    use crate::testing::ScriptedBackend;

    fn service(backend: ScriptedBackend) -> NovelService<MemoryStoryStore> {
        let engine = ChapterEngine::new(
            Gateway::new(Arc::new(backend)),
            EngineConfig::default().with_seed(7),
        );
        NovelService::new(engine, MemoryStoryStore::new())
    }

    #[tokio::test]
    async fn test_missing_story() {
        let service = service(ScriptedBackend::new("primary"));
        assert!(matches!(
            service.next_chapter("nope").await,
            Err(EngineError::StoryNotFound(_))
        ));
        assert!(!service.is_busy("nope"));
        assert!(service.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_entries_are_released() {
        let service = service(ScriptedBackend::new("primary"));
        for _ in 0..3 {
            let _ = service.try_next_chapter("ghost").await;
        }
        assert!(service.locks.lock().unwrap().is_empty());

        // A waiter keeps the entry alive until it is done.
        let held = service.lock_for("story").lock_owned().await;
        let waiting = service.lock_for("story");
        drop(held);
        assert_eq!(service.locks.lock().unwrap().len(), 1);
        drop(waiting);
        let lease = service.lease("story", None);
        drop(lease);
        assert!(service.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_try_next_chapter_reports_busy() {
        let service = service(ScriptedBackend::new("primary"));
        let _held = service.lock_for("story").lock_owned().await;
        assert!(service.is_busy("story"));
        assert!(matches!(
            service.try_next_chapter("story").await,
            Err(EngineError::Busy(_))
        ));
    }
}
