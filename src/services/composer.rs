use crate::core::config::VideoConfig;
use crate::core::state::{GeneratedImage, NarrationChunk};
use crate::services::scenes::{organize_scenes, SceneCache, SceneData, PLACEHOLDER_IMAGE};
use crate::utils::frames::{DEFAULT_COMPOSITION_SECS, SECONDS_PER_IMAGE};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use url::Url;

pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Explicit size wins, then the detected source size, then 1920x1080.
    pub fn resolve(explicit: Option<(u32, u32)>, detected: Option<(u32, u32)>) -> Self {
        let (width, height) = explicit
            .filter(|(w, h)| *w > 0 && *h > 0)
            .or(detected.filter(|(w, h)| *w > 0 && *h > 0))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));
        Self { width, height }
    }
}

/// Reads the pixel size of an encoded image without decoding it fully.
pub fn detect_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let reader = image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("Failed to sniff image format")?;
    reader
        .into_dimensions()
        .context("Failed to read image dimensions")
}

#[derive(Debug, Clone, Default)]
pub struct CompositionOptions {
    pub fps: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub detected: Option<(u32, u32)>,
}

impl CompositionOptions {
    pub fn from_config(config: &VideoConfig) -> Self {
        Self {
            fps: config.fps,
            width: config.width,
            height: config.height,
            detected: None,
        }
    }

    fn explicit(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    pub src: String,
    /// Relative to the start of the scene.
    pub from: u64,
    pub duration_in_frames: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSequence {
    /// Relative to the start of the scene.
    pub from: u64,
    pub duration_in_frames: u64,
    pub src: String,
    pub placeholder: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSequence {
    pub chunk_id: String,
    pub from: u64,
    pub duration_in_frames: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioTrack>,
    pub images: Vec<ImageSequence>,
}

/// Frame-exact render plan: scenes back to back, images back to back inside
/// each scene, one audio track per narrated scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub duration_in_frames: u64,
    pub scenes: Vec<SceneSequence>,
}

/// What is on screen at a given frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameContent<'a> {
    pub scene_index: usize,
    pub image: &'a ImageSequence,
    pub audio: Option<&'a AudioTrack>,
}

impl Composition {
    pub fn frame_at(&self, frame: u64) -> Option<FrameContent<'_>> {
        if frame >= self.duration_in_frames {
            return None;
        }
        let (scene_index, scene) = self
            .scenes
            .iter()
            .enumerate()
            .find(|(_, s)| frame >= s.from && frame < s.from + s.duration_in_frames)?;
        let local = frame - scene.from;
        let image = scene
            .images
            .iter()
            .find(|i| local >= i.from && local < i.from + i.duration_in_frames)?;
        Some(FrameContent {
            scene_index,
            image,
            audio: scene.audio.as_ref(),
        })
    }

    pub fn duration_secs(&self) -> f64 {
        if self.fps == 0 {
            return 0.0;
        }
        self.duration_in_frames as f64 / self.fps as f64
    }
}

/// True for `data:image/...` URIs, absolute http(s) URLs and paths.
pub fn is_usable_image_src(src: &str) -> bool {
    let src = src.trim();
    if src.is_empty() {
        return false;
    }
    if src.starts_with('/') || src.starts_with("./") {
        return true;
    }
    if let Some(rest) = src.strip_prefix("data:") {
        return rest.starts_with("image/") && rest.contains(',');
    }
    match Url::parse(src) {
        Ok(url) => match url.scheme() {
            "http" | "https" => url.host_str().is_some(),
            "file" => true,
            _ => false,
        },
        Err(_) => false,
    }
}

/// Total length in frames: narration when any chunk is timed, otherwise
/// three seconds per image, otherwise ten seconds.
pub fn total_duration_frames(images: &[GeneratedImage], chunks: &[NarrationChunk], fps: u32) -> u64 {
    if chunks.iter().any(|c| c.valid_duration().is_some()) {
        // Same cumulative rounding the scene organizer uses.
        organize_scenes(&[], chunks, fps)
            .iter()
            .map(|s| s.duration_in_frames)
            .sum()
    } else if !images.is_empty() {
        images.len() as u64 * SECONDS_PER_IMAGE * fps as u64
    } else {
        DEFAULT_COMPOSITION_SECS * fps as u64
    }
}

pub struct Composer;

impl Composer {
    pub fn compose(
        cache: &mut SceneCache,
        images: &[GeneratedImage],
        chunks: &[NarrationChunk],
        options: &CompositionOptions,
    ) -> Result<Composition> {
        if options.fps == 0 {
            anyhow::bail!("fps must be greater than zero");
        }
        let fps = options.fps;
        let resolution = Resolution::resolve(options.explicit(), options.detected);

        let organized: Vec<SceneData> = if images.is_empty() && !chunks.iter().any(|c| c.valid_duration().is_some()) {
            // Nothing to show or hear: a single placeholder for the default length.
            let frames = DEFAULT_COMPOSITION_SECS * fps as u64;
            let mut chunk = NarrationChunk::new("placeholder", "", 0);
            chunk.duration = Some(DEFAULT_COMPOSITION_SECS as f64);
            vec![SceneData {
                audio_chunk: chunk,
                images: vec![PLACEHOLDER_IMAGE.to_string()],
                duration_in_frames: frames,
                image_frame_durations: vec![frames],
            }]
        } else {
            cache.get_or_organize(images, chunks, fps).to_vec()
        };

        let mut scenes = Vec::with_capacity(organized.len());
        let mut cursor = 0u64;
        let mut placeholders = 0usize;

        for scene in &organized {
            let mut local = 0u64;
            let mut sequences = Vec::with_capacity(scene.images.len());
            for (src, frames) in scene.images.iter().zip(&scene.image_frame_durations) {
                let usable = is_usable_image_src(src);
                if !usable {
                    placeholders += 1;
                }
                sequences.push(ImageSequence {
                    from: local,
                    duration_in_frames: *frames,
                    src: if usable { src.clone() } else { PLACEHOLDER_IMAGE.to_string() },
                    placeholder: !usable || src == PLACEHOLDER_IMAGE,
                });
                local += frames;
            }

            let audio = scene
                .audio_chunk
                .audio_url
                .as_ref()
                .filter(|url| !url.trim().is_empty())
                .map(|url| AudioTrack {
                    src: url.clone(),
                    from: 0,
                    duration_in_frames: scene.duration_in_frames,
                });

            scenes.push(SceneSequence {
                chunk_id: scene.audio_chunk.id.clone(),
                from: cursor,
                duration_in_frames: scene.duration_in_frames,
                audio,
                images: sequences,
            });
            cursor += scene.duration_in_frames;
        }

        if placeholders > 0 {
            warn!("{} image sources were unusable and replaced by placeholders", placeholders);
        }
        debug!(
            "Scene cache: {} entries, {} hits, {} misses",
            cache.len(),
            cache.hits(),
            cache.misses()
        );

        let composition = Composition {
            fps,
            width: resolution.width,
            height: resolution.height,
            duration_in_frames: cursor,
            scenes,
        };
        info!(
            "Composed {} scenes, {} frames ({:.2}s) at {}x{}",
            composition.scenes.len(),
            composition.duration_in_frames,
            composition.duration_secs(),
            composition.width,
            composition.height
        );
        Ok(composition)
    }
}
