use crate::core::state::{NarrationChunk, NarrationLanguage, ServiceResponse};
use crate::core::store::StoryStore;
use crate::utils::audio::{estimate_duration, FALLBACK_DURATION_SECS};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    /// Where the audio was stored.
    pub audio_url: String,
    /// The encoded audio, when the provider hands it back inline.
    pub data_uri: Option<String>,
    /// Exact duration, if the provider reports one.
    pub duration: Option<f64>,
}

/// Text-to-speech provider.
#[async_trait]
pub trait NarrationSynthesizer: Send + Sync {
    async fn synthesize(&self, chunk: &NarrationChunk) -> ServiceResponse<SynthesizedAudio>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Generated { index: usize, duration: f64 },
    Failed { index: usize, error: String },
    /// Already had audio.
    Skipped { index: usize },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub generated: usize,
    pub skipped: usize,
    pub failed: Vec<(usize, String)>,
    pub cancelled: bool,
}

/// Generates narration one chunk at a time.
///
/// Each call to [`next`](Self::next) handles exactly one chunk. A failure is
/// reported and the batch moves on. Cancellation is checked between chunks;
/// a request already in flight is allowed to finish.
pub struct NarrationBatch<'a> {
    chunks: Vec<NarrationChunk>,
    synthesizer: &'a dyn NarrationSynthesizer,
    cancel: Arc<AtomicBool>,
    position: usize,
    regenerate: bool,
    cancelled: bool,
}

impl<'a> NarrationBatch<'a> {
    pub fn new(
        chunks: Vec<NarrationChunk>,
        synthesizer: &'a dyn NarrationSynthesizer,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            chunks,
            synthesizer,
            cancel,
            position: 0,
            regenerate: false,
            cancelled: false,
        }
    }

    /// Also redo chunks that already have audio.
    pub fn regenerate(mut self, regenerate: bool) -> Self {
        self.regenerate = regenerate;
        self
    }

    pub fn chunks(&self) -> &[NarrationChunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<NarrationChunk> {
        self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub async fn next(&mut self) -> Option<ChunkOutcome> {
        if self.position >= self.chunks.len() {
            return None;
        }
        if self.cancel.load(Ordering::SeqCst) {
            if !self.cancelled {
                info!("Narration batch cancelled at chunk {}", self.position);
            }
            self.cancelled = true;
            return None;
        }

        let index = self.position;
        self.position += 1;

        let chunk = &self.chunks[index];
        if !self.regenerate && chunk.audio_url.is_some() && chunk.valid_duration().is_some() {
            return Some(ChunkOutcome::Skipped { index });
        }

        let response = self.synthesizer.synthesize(chunk).await;
        match response.into_result() {
            Ok(audio) => {
                let duration = audio
                    .duration
                    .filter(|d| d.is_finite() && *d > 0.0)
                    .or_else(|| audio.data_uri.as_deref().map(estimate_duration))
                    .unwrap_or_else(|| {
                        warn!("No duration for chunk {}, assuming {}s", index, FALLBACK_DURATION_SECS);
                        FALLBACK_DURATION_SECS
                    });
                let chunk = &mut self.chunks[index];
                chunk.audio_url = Some(audio.audio_url);
                chunk.duration = Some(duration);
                Some(ChunkOutcome::Generated { index, duration })
            }
            Err(e) => {
                warn!("Narration for chunk {} failed: {:#}", index, e);
                Some(ChunkOutcome::Failed {
                    index,
                    error: e.to_string(),
                })
            }
        }
    }

    pub async fn run(&mut self, progress: Option<&ProgressBar>) -> BatchReport {
        let mut report = BatchReport::default();
        while let Some(outcome) = self.next().await {
            match outcome {
                ChunkOutcome::Generated { .. } => report.generated += 1,
                ChunkOutcome::Skipped { .. } => report.skipped += 1,
                ChunkOutcome::Failed { index, error } => report.failed.push((index, error)),
            }
            if let Some(pb) = progress {
                pb.inc(1);
            }
        }
        report.cancelled = self.cancelled;
        report
    }
}

/// Narrates every chunk of a story in one language and saves the result.
/// Chunks that did get audio are saved even when others failed.
pub async fn narrate_story(
    store: &dyn StoryStore,
    synthesizer: &dyn NarrationSynthesizer,
    story_id: &str,
    language: NarrationLanguage,
    cancel: Arc<AtomicBool>,
) -> Result<BatchReport> {
    let story = store.load_story(story_id).await.into_result()?;
    let chunks = story.chunks(language).to_vec();
    if chunks.is_empty() {
        return Err(anyhow!("Story {} has no {} narration chunks", story_id, language.code()));
    }

    let pb = ProgressBar::new(chunks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let mut batch = NarrationBatch::new(chunks, synthesizer, cancel);
    let report = batch.run(Some(&pb)).await;
    pb.finish_with_message("Narration complete");

    if report.generated > 0 {
        store
            .save_narration_chunks(story_id, language, batch.chunks())
            .await
            .into_result()?;
    }
    info!(
        "Narration for {}: {} generated, {} skipped, {} failed",
        story_id,
        report.generated,
        report.skipped,
        report.failed.len()
    );
    Ok(report)
}
