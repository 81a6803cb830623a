use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use story2video::core::config::Config;
use story2video::core::io::{NativeStorage, Storage};
use story2video::core::state::NarrationLanguage;
use story2video::core::store::{JsonStoryStore, StoryStore};
use story2video::services::composer::{detect_dimensions, Composer, CompositionOptions};
use story2video::services::scenes::SceneCache;
use story2video::services::timeline::editor::{LogNotifier, TimelineEditor};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(story_id) = args.next() else {
        eprintln!("Usage: story2video <story-id> [en|es|ro]");
        std::process::exit(2);
    };
    let language = args
        .next()
        .map(|code| NarrationLanguage::parse(&code))
        .transpose()?
        .unwrap_or_default();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let store = Arc::new(JsonStoryStore::new(config.stories_folder.clone(), storage.clone()));

    // 1. Load story and give images stable ids
    let mut story = store.load_story(&story_id).await.into_result()?;
    if story.assign_image_ids() {
        store.save_story(&story).await.into_result()?;
    }

    // 2. Timeline: rehydrate, drop references to deleted images, persist
    let mut editor = TimelineEditor::new(
        story.id.clone(),
        store.clone(),
        Arc::new(LogNotifier),
        Duration::from_millis(config.timeline.save_debounce_ms),
    );
    editor.load(&story, language);
    if story.timeline_tracks.is_none() {
        println!("No saved timeline, creating default layout");
        store
            .save_timeline(&story.id, &editor.timeline().to_snapshot())
            .await
            .into_result()?;
    }
    let pruned = editor.prune_dangling(&story.generated_images);
    if pruned > 0 {
        println!("Removed {} stale timeline items", pruned);
    }
    editor.flush().await?;

    // 3. Compose
    let mut options = CompositionOptions::from_config(&config.video);
    if let Some(first) = story.generated_images.first() {
        if storage.exists(&first.image_url).await.unwrap_or(false) {
            let bytes = storage.read(&first.image_url).await?;
            options.detected = detect_dimensions(&bytes).ok();
        }
    }

    let mut cache = SceneCache::new(config.cache.scene_capacity);
    let composition = Composer::compose(
        &mut cache,
        &story.generated_images,
        story.chunks(language),
        &options,
    )?;

    let output_path = Path::new(&config.output_folder)
        .join(format!("{}.{}.composition.json", story.id, language.code()));
    let output_path_str = output_path.to_string_lossy().to_string();
    storage
        .write(&output_path_str, serde_json::to_string_pretty(&composition)?.as_bytes())
        .await?;

    println!(
        "Composition written to {} ({} scenes, {} frames, {:.1}s)",
        output_path_str,
        composition.scenes.len(),
        composition.duration_in_frames,
        composition.duration_secs()
    );
    Ok(())
}
