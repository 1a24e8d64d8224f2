//! Artifact store: where trained style models come from.
//!
//! [`ArtifactStore`] is the seam between the catalog / model cache and the
//! storage backend.  An artifact is addressed by a string id; the store only
//! knows how to enumerate ids and hand back raw bytes.
//!
//! [`FsArtifactStore`] is the production implementation: a flat directory
//! with one weight file per style (`<models_dir>/<id>.<extension>`), an
//! optional `styles.json` manifest mapping ids to display names, and an
//! optional sample output per style (`<models_dir>/<id>.example.jpg`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No artifact with this id exists.
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// The backing storage could not be read.
    #[error("artifact store unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// ArtifactStore trait
// ---------------------------------------------------------------------------

/// Read-only collection of style model artifacts, addressed by id.
///
/// Implementations must be `Send + Sync`: the catalog enumerates from async
/// tasks while the model cache loads from blocking worker threads.
pub trait ArtifactStore: Send + Sync {
    /// All artifact ids, in a stable order.
    fn list_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Raw bytes of one artifact.
    fn load(&self, id: &str) -> Result<Vec<u8>, StoreError>;

    /// Optional human-readable name for an artifact.
    fn display_name(&self, _id: &str) -> Option<String> {
        None
    }

    /// Optional sample image stylized with this artifact, as JPEG bytes.
    fn example(&self, _id: &str) -> Option<Vec<u8>> {
        None
    }
}

// Compile-time assertion: Box<dyn ArtifactStore> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn ArtifactStore>) {}
};

// ---------------------------------------------------------------------------
// FsArtifactStore
// ---------------------------------------------------------------------------

/// Name of the optional display-name manifest inside the models directory.
pub const MANIFEST_FILE: &str = "styles.json";

/// File name suffix of a style's sample image: `<id>.example.jpg`.
pub const EXAMPLE_SUFFIX: &str = "example.jpg";

/// Directory-backed artifact store.
///
/// ids are file stems, listed in byte-wise lexicographic order so repeated
/// scans of an unchanged directory always agree.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
    extension: String,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn artifact_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{}", self.extension))
    }

    fn read_manifest(&self) -> Option<HashMap<String, String>> {
        let content = std::fs::read_to_string(self.dir.join(MANIFEST_FILE)).ok()?;
        match serde_json::from_str(&content) {
            Ok(names) => Some(names),
            Err(e) => {
                log::warn!("catalog: ignoring malformed {MANIFEST_FILE}: {e}");
                None
            }
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.dir.display())))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.dir.display())))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.ends_with(".example") {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn load(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.artifact_path(id);
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(path.display().to_string()),
            _ => StoreError::Unavailable(format!("{}: {e}", path.display())),
        })
    }

    fn display_name(&self, id: &str) -> Option<String> {
        self.read_manifest()?.remove(id)
    }

    fn example(&self, id: &str) -> Option<Vec<u8>> {
        let path = self.dir.join(format!("{id}.{EXAMPLE_SUFFIX}"));
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("catalog: cannot read {}: {e}", path.display());
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore  (test-only)
// ---------------------------------------------------------------------------

/// In-memory store whose contents and availability can be changed while a
/// catalog is using it.
#[cfg(test)]
pub struct MemoryStore {
    artifacts: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
    examples: std::sync::Mutex<HashMap<String, Vec<u8>>>,
    offline: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryStore {
    /// A store holding `ids` in the given order, each with a few dummy bytes.
    pub fn with_ids(ids: &[&str]) -> Self {
        Self {
            artifacts: std::sync::Mutex::new(
                ids.iter().map(|id| (id.to_string(), id.as_bytes().to_vec())).collect(),
            ),
            examples: std::sync::Mutex::new(HashMap::new()),
            offline: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_example(&self, id: &str, jpeg: &[u8]) {
        self.examples
            .lock()
            .unwrap()
            .insert(id.to_string(), jpeg.to_vec());
    }

    pub fn push(&self, id: &str) {
        self.artifacts
            .lock()
            .unwrap()
            .push((id.to_string(), id.as_bytes().to_vec()));
    }

    pub fn remove(&self, id: &str) {
        self.artifacts.lock().unwrap().retain(|(k, _)| k != id);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline
            .store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            Err(StoreError::Unavailable("store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
impl ArtifactStore for MemoryStore {
    fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        Ok(self
            .artifacts
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn load(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        self.check_online()?;
        self.artifacts
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn example(&self, id: &str) -> Option<Vec<u8>> {
        self.examples.lock().unwrap().get(id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
