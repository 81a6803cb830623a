use super::{DragSource, MoveOutcome, PersistedTrack, Timeline};
use crate::core::state::{GeneratedImage, NarrationLanguage, Story};
use crate::core::store::StoryStore;
use anyhow::Result;
use log::{debug, error, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// User-facing notifications (toasts in a UI, log lines in the CLI).
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => info!("{}", message),
            NoticeLevel::Error => error!("{}", message),
        }
    }
}

/// Owns a story's timeline and saves it a short while after the last edit.
///
/// Saves are last-write-wins. A failed save is reported but the in-memory
/// timeline is kept as is. Must be used inside a tokio runtime.
pub struct TimelineEditor {
    story_id: String,
    timeline: Timeline,
    store: Arc<dyn StoryStore>,
    notifier: Arc<dyn Notifier>,
    debounce: Duration,
    /// Bumped on every user edit.
    revision: Arc<AtomicU64>,
    /// Last revision known to be persisted.
    saved_revision: Arc<AtomicU64>,
    pending: Option<JoinHandle<()>>,
}

impl TimelineEditor {
    pub fn new(
        story_id: impl Into<String>,
        store: Arc<dyn StoryStore>,
        notifier: Arc<dyn Notifier>,
        debounce: Duration,
    ) -> Self {
        Self {
            story_id: story_id.into(),
            timeline: Timeline::default(),
            store,
            notifier,
            debounce,
            revision: Arc::new(AtomicU64::new(0)),
            saved_revision: Arc::new(AtomicU64::new(0)),
            pending: None,
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    pub fn is_modified(&self) -> bool {
        self.revision.load(Ordering::SeqCst) != self.saved_revision.load(Ordering::SeqCst)
    }

    pub fn has_pending_save(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Replaces the timeline with the story's saved tracks (or a default layout).
    /// Loading never schedules a save and leaves the editor unmodified.
    pub fn load(&mut self, story: &Story, language: NarrationLanguage) {
        self.cancel_pending();
        self.story_id = story.id.clone();
        self.timeline = Timeline::rehydrate(story, language);
        self.saved_revision
            .store(self.revision.load(Ordering::SeqCst), Ordering::SeqCst);
        debug!(
            "Loaded timeline for story {} ({} tracks)",
            self.story_id,
            self.timeline.tracks().len()
        );
    }

    pub fn select(&mut self, item_id: Option<&str>) {
        self.timeline.select(item_id);
    }

    pub fn move_item(&mut self, source: DragSource, target_track_id: &str) -> Result<MoveOutcome> {
        let outcome = self.timeline.move_item(source, target_track_id)?;
        if outcome.changed() {
            self.mark_modified();
        }
        Ok(outcome)
    }

    pub fn reorder_item(&mut self, item_id: &str, new_index: usize) -> Result<()> {
        self.timeline.reorder_item(item_id, new_index)?;
        self.mark_modified();
        Ok(())
    }

    pub fn delete_item(&mut self, item_id: &str) -> bool {
        let removed = self.timeline.delete_item(item_id);
        if removed {
            self.mark_modified();
        }
        removed
    }

    pub fn resize_item(&mut self, item_id: &str, width: f64) -> Result<()> {
        self.timeline.resize_item(item_id, width)?;
        self.mark_modified();
        Ok(())
    }

    pub fn set_item_offset(&mut self, item_id: &str, margin_left: f64) -> Result<()> {
        self.timeline.set_item_offset(item_id, margin_left)?;
        self.mark_modified();
        Ok(())
    }

    pub fn prune_dangling(&mut self, images: &[GeneratedImage]) -> usize {
        let removed = self.timeline.prune_dangling(images);
        if removed > 0 {
            self.notifier.notify(
                NoticeLevel::Info,
                &format!("Removed {} timeline items whose images no longer exist", removed),
            );
            self.mark_modified();
        }
        removed
    }

    /// Saves right away, dropping any pending debounced save.
    pub async fn flush(&mut self) -> Result<()> {
        self.cancel_pending();
        if !self.is_modified() {
            return Ok(());
        }
        let revision = self.revision.load(Ordering::SeqCst);
        let snapshot = self.timeline.to_snapshot();
        let saved = persist(
            self.store.as_ref(),
            self.notifier.as_ref(),
            &self.story_id,
            &snapshot,
            revision,
            &self.saved_revision,
        )
        .await;
        if saved {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Failed to save timeline for story {}", self.story_id))
        }
    }

    fn mark_modified(&mut self) {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.schedule_save(revision);
    }

    fn schedule_save(&mut self, revision: u64) {
        self.cancel_pending();

        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let saved_revision = self.saved_revision.clone();
        let story_id = self.story_id.clone();
        let snapshot = self.timeline.to_snapshot();
        let debounce = self.debounce;

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            persist(
                store.as_ref(),
                notifier.as_ref(),
                &story_id,
                &snapshot,
                revision,
                &saved_revision,
            )
            .await;
        }));
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

async fn persist(
    store: &dyn StoryStore,
    notifier: &dyn Notifier,
    story_id: &str,
    snapshot: &[PersistedTrack],
    revision: u64,
    saved_revision: &AtomicU64,
) -> bool {
    let response = store.save_timeline(story_id, snapshot).await;
    if response.success {
        saved_revision.fetch_max(revision, Ordering::SeqCst);
        true
    } else {
        let reason = response.error.unwrap_or_else(|| "unknown error".to_string());
        notifier.notify(
            NoticeLevel::Error,
            &format!("Failed to save timeline: {}", reason),
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{NarrationChunk, ServiceResponse};
    use crate::services::timeline::{MediaType, TimelineMediaItem};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockStore {
        saves: Mutex<Vec<Vec<PersistedTrack>>>,
        should_fail: bool,
    }

    #[async_trait]
    impl StoryStore for MockStore {
        async fn load_story(&self, _story_id: &str) -> ServiceResponse<Story> {
            ServiceResponse::fail("not used")
        }
        async fn save_story(&self, _story: &Story) -> ServiceResponse<()> {
            ServiceResponse::ok(())
        }
        async fn save_timeline(&self, _story_id: &str, tracks: &[PersistedTrack]) -> ServiceResponse<()> {
            if self.should_fail {
                return ServiceResponse::fail("network down");
            }
            self.saves.lock().unwrap().push(tracks.to_vec());
            ServiceResponse::ok(())
        }
        async fn save_narration_chunks(
            &self,
            _story_id: &str,
            _language: NarrationLanguage,
            _chunks: &[NarrationChunk],
        ) -> ServiceResponse<()> {
            ServiceResponse::ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<(NoticeLevel, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, level: NoticeLevel, message: &str) {
            self.notices.lock().unwrap().push((level, message.to_string()));
        }
    }

    fn story() -> Story {
        Story {
            id: "s1".to_string(),
            generated_images: vec![
                GeneratedImage::new("a.png", "a"),
                GeneratedImage::new("b.png", "b"),
            ],
            ..Default::default()
        }
    }

    fn editor(store: Arc<MockStore>, notifier: Arc<RecordingNotifier>) -> TimelineEditor {
        let mut editor = TimelineEditor::new("s1", store, notifier, Duration::from_millis(1000));
        editor.load(&story(), NarrationLanguage::English);
        editor
    }

    fn video_ids(editor: &TimelineEditor) -> Vec<String> {
        editor
            .timeline()
            .track("video-track")
            .unwrap()
            .items
            .iter()
            .map(|i| i.id.clone())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_never_saves() {
        let store = Arc::new(MockStore::default());
        let mut editor = editor(store.clone(), Arc::new(RecordingNotifier::default()));
        editor.load(&story(), NarrationLanguage::English);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(store.saves.lock().unwrap().is_empty());
        assert!(!editor.is_modified());
        assert!(!editor.has_pending_save());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_drops_pending_edits() -> Result<()> {
        let store = Arc::new(MockStore::default());
        let mut editor = editor(store.clone(), Arc::new(RecordingNotifier::default()));
        let ids = video_ids(&editor);

        editor.delete_item(&ids[0]);
        assert!(editor.has_pending_save());
        editor.load(&story(), NarrationLanguage::English);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(store.saves.lock().unwrap().is_empty());
        assert!(!editor.is_modified());
        assert_eq!(video_ids(&editor).len(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_edits_saves_once() -> Result<()> {
        let store = Arc::new(MockStore::default());
        let mut editor = editor(store.clone(), Arc::new(RecordingNotifier::default()));
        let ids = video_ids(&editor);

        editor.resize_item(&ids[0], 200.0)?;
        tokio::time::sleep(Duration::from_millis(400)).await;
        editor.set_item_offset(&ids[0], 10.0)?;
        tokio::time::sleep(Duration::from_millis(400)).await;
        editor.delete_item(&ids[1]);
        assert!(editor.is_modified());

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(store.saves.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let saves = store.saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0][0].items.len(), 1);
        assert_eq!(saves[0][0].items[0].ui.as_ref().unwrap().margin_left, 10.0);
        drop(saves);
        assert!(!editor.is_modified());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_notifies_and_keeps_state() -> Result<()> {
        let store = Arc::new(MockStore {
            should_fail: true,
            ..Default::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let mut editor = editor(store.clone(), notifier.clone());
        let ids = video_ids(&editor);

        editor.delete_item(&ids[0]);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let notices = notifier.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].0, NoticeLevel::Error);
        assert!(notices[0].1.contains("network down"));
        drop(notices);

        assert_eq!(video_ids(&editor).len(), 1);
        assert!(editor.is_modified());
        assert!(editor.flush().await.is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_drop_does_not_save() -> Result<()> {
        let store = Arc::new(MockStore::default());
        let mut editor = editor(store.clone(), Arc::new(RecordingNotifier::default()));

        let outcome = editor.move_item(
            DragSource::Library(TimelineMediaItem::new(MediaType::Audio)),
            "video-track",
        )?;
        assert_eq!(outcome, MoveOutcome::Rejected);
        assert!(!editor.is_modified());
        assert!(!editor.has_pending_save());
        Ok(())
    }

    #[tokio::test]
    async fn test_flush_saves_immediately() -> Result<()> {
        let store = Arc::new(MockStore::default());
        let mut editor = TimelineEditor::new(
            "s1",
            store.clone(),
            Arc::new(RecordingNotifier::default()),
            Duration::from_secs(60),
        );
        editor.load(&story(), NarrationLanguage::English);
        let ids = video_ids(&editor);

        editor.reorder_item(&ids[1], 0)?;
        editor.flush().await?;

        let saves = store.saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0][0].items[0].id, ids[1]);
        drop(saves);
        assert!(!editor.is_modified());
        assert!(!editor.has_pending_save());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_dangling_notifies_and_saves() {
        let store = Arc::new(MockStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut editor = editor(store.clone(), notifier.clone());

        let remaining = vec![GeneratedImage::new("a.png", "a")];
        assert_eq!(editor.prune_dangling(&remaining), 1);
        assert_eq!(notifier.notices.lock().unwrap()[0].0, NoticeLevel::Info);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.saves.lock().unwrap().len(), 1);
    }
}
