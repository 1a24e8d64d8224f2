//! Service settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every field carries `#[serde(default)]` at the struct level, so a partial
//! `settings.toml` only needs the values it overrides.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ModelsConfig
// ---------------------------------------------------------------------------

/// Where style models live and how many stay resident.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory holding one weight file per style.  `None` means the
    /// platform data directory (see [`AppPaths::models_dir`]).
    pub dir: Option<PathBuf>,
    /// File extension (without the dot) that marks a style artifact.
    pub extension: String,
    /// Maximum number of decoded models kept in memory at once.
    pub cache_capacity: usize,
    /// Run the forward pass on the first CUDA device when one is available.
    pub use_gpu: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            extension: "safetensors".into(),
            cache_capacity: 3,
            use_gpu: false,
        }
    }
}

impl ModelsConfig {
    /// Resolved models directory.
    pub fn models_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| AppPaths::new().models_dir)
    }
}

// ---------------------------------------------------------------------------
// ImageConfig
// ---------------------------------------------------------------------------

/// Pre- and post-processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Photos whose longer side exceeds this are center-cropped to a square
    /// and scaled to `max_side` × `max_side`.
    pub max_side: u32,
    /// JPEG quality (1 – 100) for the stylized output.
    pub jpeg_quality: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_side: 1500,
            jpeg_quality: 75,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorConfig
// ---------------------------------------------------------------------------

/// Worker pool sizing and admission control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of jobs allowed to run at once.  `None` means one per
    /// available CPU core.
    pub workers: Option<usize>,
    /// Seconds a job may wait for a free worker before failing.
    pub queue_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_timeout_secs: 120,
        }
    }
}

impl ExecutorConfig {
    /// Effective worker count, never zero.
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(2)
            })
            .max(1)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Per-conversation bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds without any event after which a session is dropped.
    pub idle_timeout_secs: u64,
    /// How often the idle sweeper runs, in seconds.
    pub sweep_interval_secs: u64,
    /// Capacity of each session's inbound event queue.
    pub queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
            queue_depth: 32,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level service configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use neural_style::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Style artifact location and model cache.
    pub models: ModelsConfig,
    /// Image pre/post-processing.
    pub image: ImageConfig,
    /// Inference worker pool.
    pub executor: ExecutorConfig,
    /// Session registry.
    pub session: SessionConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// so callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.models.dir, loaded.models.dir);
        assert_eq!(original.models.extension, loaded.models.extension);
        assert_eq!(original.models.cache_capacity, loaded.models.cache_capacity);
        assert_eq!(original.image.max_side, loaded.image.max_side);
        assert_eq!(original.image.jpeg_quality, loaded.image.jpeg_quality);
        assert_eq!(original.executor.workers, loaded.executor.workers);
        assert_eq!(
            original.executor.queue_timeout_secs,
            loaded.executor.queue_timeout_secs
        );
        assert_eq!(
            original.session.idle_timeout_secs,
            loaded.session.idle_timeout_secs
        );
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config.image.max_side, 1500);
        assert_eq!(config.models.cache_capacity, 3);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert!(cfg.models.dir.is_none());
        assert_eq!(cfg.models.extension, "safetensors");
        assert!(!cfg.models.use_gpu);
        assert_eq!(cfg.image.max_side, 1500);
        assert_eq!(cfg.image.jpeg_quality, 75);
        assert_eq!(cfg.executor.queue_timeout(), Duration::from_secs(120));
        assert_eq!(cfg.session.idle_timeout(), Duration::from_secs(1800));
        assert_eq!(cfg.session.queue_depth, 32);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[image]\nmax_side = 512\n\n[executor]\nworkers = 2\n")
            .expect("write");

        let cfg = AppConfig::load_from(&path).expect("load");
        assert_eq!(cfg.image.max_side, 512);
        assert_eq!(cfg.image.jpeg_quality, 75);
        assert_eq!(cfg.executor.worker_count(), 2);
        assert_eq!(cfg.session.queue_depth, 32);
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.models.dir = Some(PathBuf::from("/srv/styles"));
        cfg.models.cache_capacity = 8;
        cfg.models.use_gpu = true;
        cfg.executor.workers = Some(4);
        cfg.session.sweep_interval_secs = 5;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.models.models_dir(), PathBuf::from("/srv/styles"));
        assert_eq!(loaded.models.cache_capacity, 8);
        assert!(loaded.models.use_gpu);
        assert_eq!(loaded.executor.worker_count(), 4);
        assert_eq!(loaded.session.sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn worker_count_is_never_zero() {
        let cfg = ExecutorConfig {
            workers: Some(0),
            ..ExecutorConfig::default()
        };
        assert_eq!(cfg.worker_count(), 1);
        assert!(ExecutorConfig::default().worker_count() >= 1);
    }
}
