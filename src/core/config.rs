use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_stories")]
    pub stories_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub timeline: TimelineConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VideoConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Forces the output width. Falls back to the detected image size.
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimelineConfig {
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_scene_capacity")]
    pub scene_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stories_folder: default_stories(),
            output_folder: default_output(),
            video: VideoConfig::default(),
            timeline: TimelineConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            width: None,
            height: None,
        }
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: default_save_debounce_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            scene_capacity: default_scene_capacity(),
        }
    }
}

fn default_stories() -> String {
    "stories".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_fps() -> u32 {
    30
}
fn default_save_debounce_ms() -> u64 {
    1000
}
fn default_scene_capacity() -> usize {
    32
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if config.video.fps == 0 {
            anyhow::bail!("video.fps must be greater than zero");
        }
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.stories_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("config.yml");
        fs::write(&path, "video:\n  fps: 24\n  width: 1280\n")?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.video.fps, 24);
        assert_eq!(config.video.width, Some(1280));
        assert_eq!(config.video.height, None);
        assert_eq!(config.stories_folder, "stories");
        assert_eq!(config.timeline.save_debounce_ms, 1000);
        assert_eq!(config.cache.scene_capacity, 32);
        Ok(())
    }

    #[test]
    fn test_zero_fps_rejected() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("config.yml");
        fs::write(&path, "video:\n  fps: 0\n")?;

        assert!(Config::load_from(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.yml"));
        assert!(result.is_err());
    }
}
