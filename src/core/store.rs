use crate::core::io::Storage;
use crate::core::state::{NarrationChunk, NarrationLanguage, ServiceResponse, Story};
use crate::services::timeline::PersistedTrack;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::path::Path;
use std::sync::Arc;

/// Persistence collaborator for story records. Backends are interchangeable.
#[async_trait]
pub trait StoryStore: Send + Sync {
    async fn load_story(&self, story_id: &str) -> ServiceResponse<Story>;
    async fn save_story(&self, story: &Story) -> ServiceResponse<()>;
    async fn save_timeline(&self, story_id: &str, tracks: &[PersistedTrack]) -> ServiceResponse<()>;
    async fn save_narration_chunks(
        &self,
        story_id: &str,
        language: NarrationLanguage,
        chunks: &[NarrationChunk],
    ) -> ServiceResponse<()>;
}

/// Stores each story as `{folder}/{id}.json`.
pub struct JsonStoryStore {
    folder: String,
    storage: Arc<dyn Storage>,
}

impl JsonStoryStore {
    pub fn new(folder: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            folder: folder.into(),
            storage,
        }
    }

    fn story_path(&self, story_id: &str) -> String {
        Path::new(&self.folder)
            .join(format!("{}.json", story_id))
            .to_string_lossy()
            .to_string()
    }

    async fn read(&self, story_id: &str) -> Result<Story> {
        let path = self.story_path(story_id);
        let bytes = self.storage.read(&path).await?;
        let story: Story = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse story record {}", path))?;
        Ok(story)
    }

    async fn write(&self, story: &Story) -> Result<()> {
        if story.id.is_empty() {
            anyhow::bail!("Cannot save a story without an id");
        }
        let path = self.story_path(&story.id);
        let content = serde_json::to_string_pretty(story)?;
        self.storage.write(&path, content.as_bytes()).await?;
        debug!("Saved story {} to {}", story.id, path);
        Ok(())
    }

    async fn update<F>(&self, story_id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Story) + Send,
    {
        let mut story = self.read(story_id).await?;
        apply(&mut story);
        self.write(&story).await
    }
}

#[async_trait]
impl StoryStore for JsonStoryStore {
    async fn load_story(&self, story_id: &str) -> ServiceResponse<Story> {
        self.read(story_id).await.into()
    }

    async fn save_story(&self, story: &Story) -> ServiceResponse<()> {
        self.write(story).await.into()
    }

    async fn save_timeline(&self, story_id: &str, tracks: &[PersistedTrack]) -> ServiceResponse<()> {
        let tracks = tracks.to_vec();
        let item_count: usize = tracks.iter().map(|t| t.items.len()).sum();
        let result = self
            .update(story_id, move |story| story.timeline_tracks = Some(tracks))
            .await;
        if result.is_ok() {
            info!("Saved timeline for story {} ({} items)", story_id, item_count);
        }
        result.into()
    }

    async fn save_narration_chunks(
        &self,
        story_id: &str,
        language: NarrationLanguage,
        chunks: &[NarrationChunk],
    ) -> ServiceResponse<()> {
        let chunks = chunks.to_vec();
        self.update(story_id, move |story| *story.chunks_mut(language) = chunks)
            .await
            .into()
    }
}
