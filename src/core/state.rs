use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::services::timeline::PersistedTrack;

/// Archived versions kept per image before the oldest is dropped.
pub const MAX_IMAGE_HISTORY: usize = 10;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NarrationChunk {
    pub id: String,
    pub text: String,
    pub index: usize,
    /// Seconds of narration audio, attached once audio exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NarrationChunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>, index: usize) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            index,
            duration: None,
            audio_url: None,
            extra: Map::new(),
        }
    }

    pub fn valid_duration(&self) -> Option<f64> {
        self.duration.filter(|d| d.is_finite() && *d > 0.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_index: Option<usize>,
    #[serde(default)]
    pub original_prompt: String,
    #[serde(default)]
    pub request_prompt: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_chapter_generated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<GeneratedImage>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GeneratedImage {
    pub fn new(image_url: impl Into<String>, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            image_url: image_url.into(),
            original_prompt: prompt.clone(),
            request_prompt: prompt,
            ..Default::default()
        }
    }

    /// Assigns a stable id if the image predates stable ids. Returns the id.
    pub fn ensure_id(&mut self) -> &str {
        self.id
            .get_or_insert_with(|| format!("img-{:016x}", rand::random::<u64>()))
            .as_str()
    }

    /// Replaces this image with a regenerated version, archiving the current one.
    /// Keeps at most [`MAX_IMAGE_HISTORY`] archived versions, newest last.
    pub fn record_regeneration(&mut self, image_url: impl Into<String>, request_prompt: impl Into<String>) {
        let mut history = self.history.take().unwrap_or_default();
        let mut archived = self.clone();
        archived.history = None;
        history.push(archived);
        if history.len() > MAX_IMAGE_HISTORY {
            let overflow = history.len() - MAX_IMAGE_HISTORY;
            history.drain(..overflow);
        }

        self.image_url = image_url.into();
        self.request_prompt = request_prompt.into();
        self.history = Some(history);
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum NarrationLanguage {
    #[default]
    English,
    Spanish,
    Romanian,
}

impl NarrationLanguage {
    pub fn parse(code: &str) -> Result<Self> {
        match code.to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Self::English),
            "es" | "spanish" => Ok(Self::Spanish),
            "ro" | "romanian" => Ok(Self::Romanian),
            other => Err(anyhow!("Unknown narration language: {}", other)),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Spanish => "es",
            Self::Romanian => "ro",
        }
    }
}

/// The persisted story record. Only the fields the assembly core touches are
/// typed; everything else rides along in `extra`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default)]
    pub generated_images: Vec<GeneratedImage>,
    #[serde(default)]
    pub narration_chunks: Vec<NarrationChunk>,
    #[serde(default)]
    pub spanish_narration_chunks: Vec<NarrationChunk>,
    #[serde(default)]
    pub romanian_narration_chunks: Vec<NarrationChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_tracks: Option<Vec<PersistedTrack>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_audio_duration_seconds: Option<f64>,
    /// Fields owned by other clients of the record, written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Story {
    pub fn chunks(&self, language: NarrationLanguage) -> &[NarrationChunk] {
        match language {
            NarrationLanguage::English => &self.narration_chunks,
            NarrationLanguage::Spanish => &self.spanish_narration_chunks,
            NarrationLanguage::Romanian => &self.romanian_narration_chunks,
        }
    }

    pub fn chunks_mut(&mut self, language: NarrationLanguage) -> &mut Vec<NarrationChunk> {
        match language {
            NarrationLanguage::English => &mut self.narration_chunks,
            NarrationLanguage::Spanish => &mut self.spanish_narration_chunks,
            NarrationLanguage::Romanian => &mut self.romanian_narration_chunks,
        }
    }

    /// Gives every image a stable id. Returns true if any id was assigned.
    pub fn assign_image_ids(&mut self) -> bool {
        let mut changed = false;
        for image in &mut self.generated_images {
            if image.id.is_none() {
                image.ensure_id();
                changed = true;
            }
        }
        changed
    }
}

/// Uniform envelope returned by external collaborators (stores, providers).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServiceResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ServiceResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<T> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(anyhow!("Service reported success without data")),
            (false, _) => Err(anyhow!(self
                .error
                .unwrap_or_else(|| "Unknown service error".to_string()))),
        }
    }
}

impl<T> From<Result<T>> for ServiceResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::fail(format!("{:#}", e)),
        }
    }
}
