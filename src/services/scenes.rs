use crate::core::state::{GeneratedImage, NarrationChunk};
use crate::utils::frames::{distribute_frames, seconds_to_frames, SECONDS_PER_IMAGE};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Shown wherever a scene has no usable image.
pub const PLACEHOLDER_IMAGE: &str = "/placeholder.svg";
const PLACEHOLDER_CHUNK_ID: &str = "placeholder";

/// One narration chunk and the images shown while it plays.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SceneData {
    pub audio_chunk: NarrationChunk,
    pub images: Vec<String>,
    /// Cut on cumulative boundaries, so this can be one frame short of
    /// `ceil(duration * fps)` and the scene's audio clipped by up to one frame.
    pub duration_in_frames: u64,
    pub image_frame_durations: Vec<u64>,
}

/// Groups images under the narration chunks they illustrate and times them.
///
/// Chunks without a positive duration are ignored. Images tagged with a
/// chunk id (or, failing that, a chunk index) stay with that chunk. Chunks
/// left without images share the untagged images in order, and anything
/// still empty shows [`PLACEHOLDER_IMAGE`].
///
/// Scene budgets are cut on cumulative boundaries, so the frame total is
/// always `ceil(fps * total_seconds)`.
pub fn organize_scenes(images: &[GeneratedImage], chunks: &[NarrationChunk], fps: u32) -> Vec<SceneData> {
    let valid: Vec<(&NarrationChunk, f64)> = chunks
        .iter()
        .filter_map(|c| c.valid_duration().map(|d| (c, d)))
        .collect();

    if valid.is_empty() {
        debug!("No timed narration chunks, building placeholder scene for {} images", images.len());
        return vec![placeholder_scene(images, fps)];
    }

    let mut by_id: HashMap<&str, Vec<String>> = HashMap::new();
    let mut by_index: HashMap<usize, Vec<String>> = HashMap::new();
    let mut unassigned: Vec<String> = Vec::new();
    for image in images {
        if let Some(chunk_id) = image.chunk_id.as_deref() {
            by_id.entry(chunk_id).or_default().push(image.image_url.clone());
        } else if let Some(chunk_index) = image.chunk_index {
            by_index.entry(chunk_index).or_default().push(image.image_url.clone());
        } else {
            unassigned.push(image.image_url.clone());
        }
    }

    let chunk_count = valid.len();
    let per_chunk = unassigned.len() / chunk_count;
    let extra = unassigned.len() % chunk_count;

    let mut scenes = Vec::with_capacity(chunk_count);
    let mut cumulative_secs = 0.0;
    let mut emitted_frames = 0u64;

    for (i, (chunk, duration)) in valid.into_iter().enumerate() {
        cumulative_secs += duration;
        let boundary = seconds_to_frames(cumulative_secs, fps);
        let frames = boundary.saturating_sub(emitted_frames).max(1);
        emitted_frames += frames;

        let mut scene_images = by_id
            .get(chunk.id.as_str())
            .or_else(|| by_index.get(&chunk.index))
            .cloned()
            .unwrap_or_default();

        if scene_images.is_empty() {
            let start = i * per_chunk + i.min(extra);
            let len = per_chunk + usize::from(i < extra);
            scene_images.extend_from_slice(&unassigned[start..start + len]);
        }
        if scene_images.is_empty() {
            scene_images.push(PLACEHOLDER_IMAGE.to_string());
        }
        // Every image needs at least one frame
        scene_images.truncate(frames as usize);

        let image_frame_durations = distribute_frames(frames, scene_images.len());
        scenes.push(SceneData {
            audio_chunk: chunk.clone(),
            images: scene_images,
            duration_in_frames: frames,
            image_frame_durations,
        });
    }

    scenes
}

fn placeholder_scene(images: &[GeneratedImage], fps: u32) -> SceneData {
    let mut urls: Vec<String> = images.iter().map(|i| i.image_url.clone()).collect();
    if urls.is_empty() {
        urls.push(PLACEHOLDER_IMAGE.to_string());
    }
    let per_image = SECONDS_PER_IMAGE * fps as u64;
    let total = per_image * urls.len() as u64;

    let mut chunk = NarrationChunk::new(PLACEHOLDER_CHUNK_ID, "", 0);
    chunk.duration = Some((SECONDS_PER_IMAGE * urls.len() as u64) as f64);

    SceneData {
        audio_chunk: chunk,
        image_frame_durations: vec![per_image; urls.len()],
        images: urls,
        duration_in_frames: total,
    }
}

/// Cache key: the counts and durations that drive timing, plus a hash of
/// chunk ids and image placements so equal timings with different content
/// don't collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SceneKey {
    image_count: usize,
    chunk_count: usize,
    fps: u32,
    durations: String,
    content_hash: u64,
}

impl SceneKey {
    pub fn new(images: &[GeneratedImage], chunks: &[NarrationChunk], fps: u32) -> Self {
        let durations = chunks
            .iter()
            .map(|c| c.duration.map(|d| d.to_string()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",");

        let mut hasher = DefaultHasher::new();
        for chunk in chunks {
            chunk.id.hash(&mut hasher);
            chunk.index.hash(&mut hasher);
        }
        for image in images {
            image.image_url.hash(&mut hasher);
            image.chunk_id.hash(&mut hasher);
            image.chunk_index.hash(&mut hasher);
        }

        Self {
            image_count: images.len(),
            chunk_count: chunks.len(),
            fps,
            durations,
            content_hash: hasher.finish(),
        }
    }
}

struct CacheEntry {
    scenes: Vec<SceneData>,
    last_used: u64,
}

/// Bounded LRU cache of organized scenes.
pub struct SceneCache {
    capacity: usize,
    entries: HashMap<SceneKey, CacheEntry>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl SceneCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get_or_organize(
        &mut self,
        images: &[GeneratedImage],
        chunks: &[NarrationChunk],
        fps: u32,
    ) -> &[SceneData] {
        let key = SceneKey::new(images, chunks, fps);
        self.tick += 1;
        let tick = self.tick;

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_used = tick;
            self.hits += 1;
        } else {
            self.misses += 1;
            let scenes = organize_scenes(images, chunks, fps);
            if self.entries.len() >= self.capacity {
                self.evict_lru();
            }
            self.entries.insert(
                key.clone(),
                CacheEntry {
                    scenes,
                    last_used: tick,
                },
            );
        }

        &self.entries[&key].scenes
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, index: usize, duration: f64) -> NarrationChunk {
        let mut c = NarrationChunk::new(id, format!("text {}", id), index);
        c.duration = Some(duration);
        c
    }

    fn image(url: &str, chunk_id: Option<&str>) -> GeneratedImage {
        let mut img = GeneratedImage::new(url, "prompt");
        img.chunk_id = chunk_id.map(str::to_string);
        img
    }

    #[test]
    fn test_no_valid_chunks_spans_all_images() {
        let images: Vec<_> = (0..5).map(|i| image(&format!("{}.png", i), None)).collect();
        let chunks = vec![NarrationChunk::new("c0", "untimed", 0), chunk("c1", 1, 0.0)];

        let scenes = organize_scenes(&images, &chunks, 30);
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].images.len(), 5);
        assert_eq!(scenes[0].duration_in_frames, 5 * 3 * 30);
        assert_eq!(scenes[0].image_frame_durations, vec![90; 5]);
    }

    #[test]
    fn test_no_chunks_no_images_uses_placeholder() {
        let scenes = organize_scenes(&[], &[], 24);
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].images, vec![PLACEHOLDER_IMAGE.to_string()]);
        assert_eq!(scenes[0].duration_in_frames, 72);
    }

    #[test]
    fn test_assigned_images_follow_their_chunk() {
        let images = vec![
            image("b.png", Some("c1")),
            image("a.png", Some("c0")),
            image("c.png", Some("c1")),
        ];
        let chunks = vec![chunk("c0", 0, 2.0), chunk("c1", 1, 1.0)];

        let scenes = organize_scenes(&images, &chunks, 30);
        assert_eq!(scenes[0].images, vec!["a.png"]);
        assert_eq!(scenes[1].images, vec!["b.png", "c.png"]);
        assert_eq!(scenes[0].duration_in_frames, 60);
        assert_eq!(scenes[1].image_frame_durations, vec![15, 15]);
    }

    #[test]
    fn test_chunk_index_is_used_without_chunk_id() {
        let mut tagged = GeneratedImage::new("idx.png", "p");
        tagged.chunk_index = Some(1);
        let images = vec![image("free.png", None), tagged];
        let chunks = vec![chunk("c0", 0, 1.0), chunk("c1", 1, 1.0)];

        let scenes = organize_scenes(&images, &chunks, 30);
        assert_eq!(scenes[0].images, vec!["free.png"]);
        assert_eq!(scenes[1].images, vec!["idx.png"]);
    }

    #[test]
    fn test_unassigned_images_split_proportionally() {
        let images: Vec<_> = (0..7).map(|i| image(&format!("{}.png", i), None)).collect();
        let chunks = vec![chunk("c0", 0, 1.0), chunk("c1", 1, 1.0), chunk("c2", 2, 1.0)];

        let scenes = organize_scenes(&images, &chunks, 30);
        let counts: Vec<usize> = scenes.iter().map(|s| s.images.len()).collect();
        assert_eq!(counts, vec![3, 2, 2]);
        assert_eq!(scenes[0].images, vec!["0.png", "1.png", "2.png"]);
        assert_eq!(scenes[2].images, vec!["5.png", "6.png"]);
    }

    #[test]
    fn test_chunk_without_images_gets_placeholder() {
        let images = vec![image("a.png", Some("c0"))];
        let chunks = vec![chunk("c0", 0, 1.0), chunk("c1", 1, 1.0)];

        let scenes = organize_scenes(&images, &chunks, 30);
        assert_eq!(scenes[1].images, vec![PLACEHOLDER_IMAGE.to_string()]);
    }

    #[test]
    fn test_image_durations_sum_to_budget() {
        let images: Vec<_> = (0..7).map(|i| image(&format!("{}.png", i), Some("c0"))).collect();
        let chunks = vec![chunk("c0", 0, 3.37)];

        let scenes = organize_scenes(&images, &chunks, 30);
        let scene = &scenes[0];
        assert_eq!(scene.duration_in_frames, 102);
        assert_eq!(scene.image_frame_durations.len(), 7);
        assert_eq!(scene.image_frame_durations.iter().sum::<u64>(), 102);
        assert!(scene.image_frame_durations.iter().all(|d| *d >= 1));
        assert_eq!(scene.image_frame_durations[0], 15);
        assert_eq!(scene.image_frame_durations[6], 14);
    }

    #[test]
    fn test_total_frames_match_total_duration() {
        let durations = [0.1, 0.2, 1.333, 2.5, 0.07, 4.0];
        let chunks: Vec<_> = durations
            .iter()
            .enumerate()
            .map(|(i, d)| chunk(&format!("c{}", i), i, *d))
            .collect();

        for fps in [24, 25, 30, 60] {
            let scenes = organize_scenes(&[], &chunks, fps);
            let total: u64 = scenes.iter().map(|s| s.duration_in_frames).sum();
            let expected = seconds_to_frames(durations.iter().sum(), fps);
            assert_eq!(total, expected, "fps {}", fps);
            assert!(scenes.iter().all(|s| s.duration_in_frames >= 1));
        }
    }

    #[test]
    fn test_half_frame_scenes_share_the_rounding() {
        let chunks = vec![chunk("c0", 0, 0.5), chunk("c1", 1, 0.5)];
        let scenes = organize_scenes(&[], &chunks, 25);
        let frames: Vec<u64> = scenes.iter().map(|s| s.duration_in_frames).collect();
        // 12.5 frames each; the second scene is cut at the 25-frame boundary
        assert_eq!(frames, vec![13, 12]);
    }

    #[test]
    fn test_more_images_than_frames_are_truncated() {
        let images: Vec<_> = (0..5).map(|i| image(&format!("{}.png", i), Some("c0"))).collect();
        let chunks = vec![chunk("c0", 0, 0.05)];

        let scenes = organize_scenes(&images, &chunks, 30);
        assert_eq!(scenes[0].duration_in_frames, 2);
        assert_eq!(scenes[0].images.len(), 2);
        assert_eq!(scenes[0].image_frame_durations, vec![1, 1]);
    }

    #[test]
    fn test_cache_hits_and_eviction() {
        let mut cache = SceneCache::new(2);
        let chunks_a = vec![chunk("a", 0, 1.0)];
        let chunks_b = vec![chunk("b", 0, 1.0)];
        let chunks_c = vec![chunk("c", 0, 1.0)];

        cache.get_or_organize(&[], &chunks_a, 30);
        cache.get_or_organize(&[], &chunks_b, 30);
        cache.get_or_organize(&[], &chunks_a, 30);
        assert_eq!(cache.hits(), 1);

        // b is least recently used
        cache.get_or_organize(&[], &chunks_c, 30);
        assert_eq!(cache.len(), 2);
        cache.get_or_organize(&[], &chunks_a, 30);
        assert_eq!(cache.hits(), 2);
        cache.get_or_organize(&[], &chunks_b, 30);
        assert_eq!(cache.misses(), 4);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_equal_durations_different_content_do_not_collide() {
        let mut cache = SceneCache::new(4);
        let chunks = vec![chunk("c0", 0, 1.0)];
        let first = cache.get_or_organize(&[image("one.png", None)], &chunks, 30).to_vec();
        let second = cache.get_or_organize(&[image("two.png", None)], &chunks, 30).to_vec();

        assert_eq!(first[0].images, vec!["one.png"]);
        assert_eq!(second[0].images, vec!["two.png"]);
    }
}
