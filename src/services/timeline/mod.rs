//! Multi-track timeline: tracks of media items that can be dragged between
//! tracks, reordered, resized and deleted.
//!
//! Items point back at story images by stable `imageId`. Older snapshots only
//! carry `originalIndex` (a position in `generatedImages`), which is still
//! honoured but can go stale when images are removed; see
//! [`Timeline::dangling_items`].

pub mod editor;

use crate::core::state::{GeneratedImage, NarrationLanguage, Story};
use anyhow::{anyhow, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Narration,
    Audio,
    Text,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Text,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
        }
    }
}

/// Icon shown next to a track header.
pub fn icon_name(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Video => "Film",
        TrackKind::Narration => "Mic",
        TrackKind::Audio => "Music",
        TrackKind::Text => "Type",
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemUi {
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub margin_left: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineMediaItem {
    /// Unique per placement; the same image placed twice gets two ids.
    pub id: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<ItemUi>,
    /// Fields written by other clients, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TimelineMediaItem {
    pub fn new(media_type: MediaType) -> Self {
        Self {
            id: placement_id(media_type),
            media_type,
            original_index: None,
            source_id: None,
            image_id: None,
            name: None,
            url: None,
            ui: None,
            extra: Map::new(),
        }
    }

    fn origin(&self) -> Option<Origin<'_>> {
        if let Some(source_id) = self.source_id.as_deref() {
            Some(Origin::Source(source_id))
        } else if let Some(image_id) = self.image_id.as_deref() {
            Some(Origin::Image(image_id))
        } else {
            self.original_index.map(|i| Origin::Index(self.media_type, i))
        }
    }

    fn references_image(&self) -> bool {
        self.image_id.is_some() || self.original_index.is_some()
    }
}

/// What a placed item was created from, used to refuse duplicate drops.
#[derive(Debug, PartialEq, Eq)]
enum Origin<'a> {
    Source(&'a str),
    Image(&'a str),
    Index(MediaType, usize),
}

fn placement_id(media_type: MediaType) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}-{}-{:06x}", media_type.as_str(), millis, rand::random::<u32>() & 0xff_ffff)
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimelineTrack {
    pub id: String,
    pub kind: TrackKind,
    pub name: String,
    pub items: Vec<TimelineMediaItem>,
    pub height: u32,
    pub accepts: Vec<MediaType>,
}

impl TimelineTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, name: impl Into<String>) -> Self {
        let (height, accepts) = match kind {
            TrackKind::Video => (80, vec![MediaType::Image, MediaType::Video]),
            TrackKind::Narration => (60, vec![MediaType::Audio]),
            TrackKind::Audio => (60, vec![MediaType::Audio]),
            TrackKind::Text => (50, vec![MediaType::Text]),
        };
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            items: Vec::new(),
            height,
            accepts,
        }
    }

    pub fn accepts(&self, media_type: MediaType) -> bool {
        self.accepts.contains(&media_type)
    }
}

/// Track as stored on the story record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTrack {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    pub name: String,
    #[serde(default)]
    pub items: Vec<TimelineMediaItem>,
    #[serde(default = "default_track_height")]
    pub height: u32,
    #[serde(default)]
    pub accepts: Vec<MediaType>,
    /// Derived from `kind`; ignored when loading.
    #[serde(default)]
    pub icon_name: String,
}

fn default_track_height() -> u32 {
    60
}

impl From<&TimelineTrack> for PersistedTrack {
    fn from(track: &TimelineTrack) -> Self {
        Self {
            id: track.id.clone(),
            kind: track.kind,
            name: track.name.clone(),
            items: track.items.clone(),
            height: track.height,
            accepts: track.accepts.clone(),
            icon_name: icon_name(track.kind).to_string(),
        }
    }
}

impl From<&PersistedTrack> for TimelineTrack {
    fn from(track: &PersistedTrack) -> Self {
        let accepts = if track.accepts.is_empty() {
            TimelineTrack::new("", track.kind, "").accepts
        } else {
            track.accepts.clone()
        };
        Self {
            id: track.id.clone(),
            kind: track.kind,
            name: track.name.clone(),
            items: track.items.clone(),
            height: track.height,
            accepts,
        }
    }
}

/// Where a dragged item comes from.
#[derive(Clone, Debug)]
pub enum DragSource {
    Track { track_id: String, item_id: String },
    /// An item dragged in from the media library; it gets a fresh placement id.
    Library(TimelineMediaItem),
}

#[derive(Clone, Debug, PartialEq)]
pub enum MoveOutcome {
    Inserted { item_id: String },
    /// The target already holds an item with the same origin.
    Duplicate { removed_from_source: bool },
    /// The target track does not accept this media type. Nothing changed.
    Rejected,
}

impl MoveOutcome {
    pub fn changed(&self) -> bool {
        match self {
            Self::Inserted { .. } => true,
            Self::Duplicate { removed_from_source } => *removed_from_source,
            Self::Rejected => false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Timeline {
    tracks: Vec<TimelineTrack>,
    selected_item: Option<String>,
}

impl Timeline {
    pub fn new(tracks: Vec<TimelineTrack>) -> Self {
        Self {
            tracks,
            selected_item: None,
        }
    }

    pub fn from_snapshot(snapshot: &[PersistedTrack]) -> Self {
        Self::new(snapshot.iter().map(TimelineTrack::from).collect())
    }

    pub fn to_snapshot(&self) -> Vec<PersistedTrack> {
        self.tracks.iter().map(PersistedTrack::from).collect()
    }

    /// Rebuilds the timeline from the story's saved tracks, or lays out a
    /// fresh one from its images, narration and script.
    pub fn rehydrate(story: &Story, language: NarrationLanguage) -> Self {
        match story.timeline_tracks.as_deref() {
            Some(snapshot) if !snapshot.is_empty() => {
                debug!("Rehydrating {} saved tracks for story {}", snapshot.len(), story.id);
                Self::from_snapshot(snapshot)
            }
            _ => Self::default_layout(story, language),
        }
    }

    /// Video, narration and text tracks filled from the story.
    pub fn default_layout(story: &Story, language: NarrationLanguage) -> Self {
        let mut video = TimelineTrack::new("video-track", TrackKind::Video, "Video");
        for (i, image) in story.generated_images.iter().enumerate() {
            let mut item = TimelineMediaItem::new(MediaType::Image);
            item.original_index = Some(i);
            item.image_id = image.id.clone();
            item.source_id = Some(image.id.clone().unwrap_or_else(|| format!("image-{}", i)));
            item.name = Some(format!("Scene {}", i + 1));
            item.url = Some(image.image_url.clone());
            video.items.push(item);
        }

        let chunks = story.chunks(language);
        let mut narration = TimelineTrack::new("narration-track", TrackKind::Narration, "Narration");
        for chunk in chunks {
            if let Some(audio_url) = &chunk.audio_url {
                let mut item = TimelineMediaItem::new(MediaType::Audio);
                item.source_id = Some(chunk.id.clone());
                item.name = Some(format!("Narration {}", chunk.index + 1));
                item.url = Some(audio_url.clone());
                narration.items.push(item);
            }
        }
        if narration.items.is_empty() {
            if let Some(audio_url) = &story.narration_audio_url {
                let mut item = TimelineMediaItem::new(MediaType::Audio);
                item.source_id = Some("narration".to_string());
                item.name = Some("Narration".to_string());
                item.url = Some(audio_url.clone());
                narration.items.push(item);
            }
        }

        let mut text = TimelineTrack::new("text-track", TrackKind::Text, "Text");
        for chunk in chunks.iter().filter(|c| !c.text.trim().is_empty()) {
            let mut item = TimelineMediaItem::new(MediaType::Text);
            item.source_id = Some(format!("text-{}", chunk.id));
            item.name = Some(chunk.text.clone());
            text.items.push(item);
        }
        if text.items.is_empty() {
            if let Some(script) = story.script.as_deref().filter(|s| !s.trim().is_empty()) {
                let mut item = TimelineMediaItem::new(MediaType::Text);
                item.source_id = Some("script".to_string());
                item.name = Some(script.to_string());
                text.items.push(item);
            }
        }

        Self::new(vec![video, narration, text])
    }

    pub fn tracks(&self) -> &[TimelineTrack] {
        &self.tracks
    }

    pub fn track(&self, track_id: &str) -> Option<&TimelineTrack> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    pub fn selected_item(&self) -> Option<&str> {
        self.selected_item.as_deref()
    }

    pub fn select(&mut self, item_id: Option<&str>) {
        self.selected_item = item_id.map(str::to_string);
    }

    pub fn find_item(&self, item_id: &str) -> Option<(&TimelineTrack, &TimelineMediaItem)> {
        self.tracks
            .iter()
            .find_map(|t| t.items.iter().find(|i| i.id == item_id).map(|i| (t, i)))
    }

    fn track_index(&self, track_id: &str) -> Result<usize> {
        self.tracks
            .iter()
            .position(|t| t.id == track_id)
            .ok_or_else(|| anyhow!("Unknown track: {}", track_id))
    }

    fn item_mut(&mut self, item_id: &str) -> Result<&mut TimelineMediaItem> {
        self.tracks
            .iter_mut()
            .flat_map(|t| t.items.iter_mut())
            .find(|i| i.id == item_id)
            .ok_or_else(|| anyhow!("Unknown timeline item: {}", item_id))
    }

    /// Drops an item onto `target_track_id`, appending it at the end.
    pub fn move_item(&mut self, source: DragSource, target_track_id: &str) -> Result<MoveOutcome> {
        let target = self.track_index(target_track_id)?;

        let (item, source_track) = match source {
            DragSource::Track { track_id, item_id } => {
                let from = self.track_index(&track_id)?;
                let item = self.tracks[from]
                    .items
                    .iter()
                    .find(|i| i.id == item_id)
                    .cloned()
                    .ok_or_else(|| anyhow!("Item {} is not on track {}", item_id, track_id))?;
                (item, Some(from))
            }
            DragSource::Library(mut item) => {
                item.id = placement_id(item.media_type);
                (item, None)
            }
        };

        if !self.tracks[target].accepts(item.media_type) {
            debug!(
                "Track {} does not accept {} items",
                target_track_id,
                item.media_type.as_str()
            );
            return Ok(MoveOutcome::Rejected);
        }

        let origin = item.origin();
        let duplicate = origin.is_some()
            && self.tracks[target]
                .items
                .iter()
                .any(|existing| existing.id != item.id && existing.origin() == origin);

        // A duplicate dropped from another track still leaves its source.
        let removed_from_source = match source_track {
            Some(from) if !duplicate || from != target => {
                self.tracks[from].items.retain(|i| i.id != item.id);
                from != target
            }
            _ => false,
        };
        if duplicate {
            return Ok(MoveOutcome::Duplicate { removed_from_source });
        }

        let item_id = item.id.clone();
        self.tracks[target].items.push(item);
        Ok(MoveOutcome::Inserted { item_id })
    }

    /// Moves an item to `new_index` within its own track.
    pub fn reorder_item(&mut self, item_id: &str, new_index: usize) -> Result<()> {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.items.iter().any(|i| i.id == item_id))
            .ok_or_else(|| anyhow!("Unknown timeline item: {}", item_id))?;
        let from = track
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or_else(|| anyhow!("Unknown timeline item: {}", item_id))?;
        let item = track.items.remove(from);
        let to = new_index.min(track.items.len());
        track.items.insert(to, item);
        Ok(())
    }

    /// Removes the placement from whichever track holds it and clears the selection.
    pub fn delete_item(&mut self, item_id: &str) -> bool {
        let mut removed = false;
        for track in &mut self.tracks {
            let before = track.items.len();
            track.items.retain(|i| i.id != item_id);
            removed |= track.items.len() != before;
        }
        self.selected_item = None;
        removed
    }

    pub fn resize_item(&mut self, item_id: &str, width: f64) -> Result<()> {
        let item = self.item_mut(item_id)?;
        item.ui.get_or_insert_with(ItemUi::default).width = width.max(0.0);
        Ok(())
    }

    pub fn set_item_offset(&mut self, item_id: &str, margin_left: f64) -> Result<()> {
        let item = self.item_mut(item_id)?;
        item.ui.get_or_insert_with(ItemUi::default).margin_left = margin_left.max(0.0);
        Ok(())
    }

    /// The story image an item points at, if the reference still resolves.
    pub fn resolve_image<'a>(item: &TimelineMediaItem, images: &'a [GeneratedImage]) -> Option<&'a GeneratedImage> {
        if let Some(image_id) = item.image_id.as_deref() {
            return images.iter().find(|img| img.id.as_deref() == Some(image_id));
        }
        item.original_index.and_then(|i| images.get(i))
    }

    /// Ids of items whose image reference no longer resolves.
    pub fn dangling_items(&self, images: &[GeneratedImage]) -> Vec<String> {
        self.tracks
            .iter()
            .flat_map(|t| t.items.iter())
            .filter(|i| i.references_image() && Self::resolve_image(i, images).is_none())
            .map(|i| i.id.clone())
            .collect()
    }

    /// Removes items with dangling image references. Returns how many were removed.
    pub fn prune_dangling(&mut self, images: &[GeneratedImage]) -> usize {
        let dangling = self.dangling_items(images);
        for id in &dangling {
            self.delete_item(id);
        }
        dangling.len()
    }
}
