//! Style catalog: numbered, named styles backed by an [`ArtifactStore`].
//!
//! Style ids are 1-based and follow the order in which artifacts were first
//! seen.  Every enumeration re-scans the store and merges the result
//! append-only: artifacts that appear later get the next free id, and an id
//! once handed out is never reassigned or reordered.  An artifact that
//! disappears keeps its id; loading it then fails with a store error.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use super::store::{ArtifactStore, StoreError};

// ---------------------------------------------------------------------------
// StyleId / StyleDescriptor
// ---------------------------------------------------------------------------

/// 1-based position of a style in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleId(u32);

impl StyleId {
    /// Returns `None` for zero, the only value that is never a valid id.
    pub fn new(n: u32) -> Option<Self> {
        (n > 0).then_some(Self(n))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

impl fmt::Display for StyleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One selectable style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleDescriptor {
    pub id: StyleId,
    /// Artifact id inside the store.
    pub artifact: String,
    /// Name shown to the user.
    pub display_name: String,
}

/// Sample output of one style, numbered like the style itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleExample {
    pub style: StyleDescriptor,
    /// JPEG bytes.
    pub jpeg: Vec<u8>,
}

// ---------------------------------------------------------------------------
// CatalogError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// The artifact store could not be enumerated.
    #[error("style catalog unavailable: {0}")]
    Unavailable(String),

    /// The id was never handed out by this catalog.
    #[error("unknown style {0}")]
    UnknownStyle(StyleId),

    /// The style exists but its artifact could not be read.
    #[error("artifact for style {style} could not be read: {source}")]
    Artifact {
        style: StyleId,
        #[source]
        source: StoreError,
    },
}

// ---------------------------------------------------------------------------
// StyleCatalog
// ---------------------------------------------------------------------------

pub struct StyleCatalog {
    store: Arc<dyn ArtifactStore>,
    entries: RwLock<Vec<StyleDescriptor>>,
}

impl fmt::Debug for StyleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StyleCatalog")
            .field("known", &self.known().len())
            .finish_non_exhaustive()
    }
}

impl StyleCatalog {
    /// Build a catalog and perform the initial scan.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Unavailable`] when the store cannot be enumerated.
    pub fn open(store: Arc<dyn ArtifactStore>) -> Result<Self, CatalogError> {
        let catalog = Self {
            store,
            entries: RwLock::new(Vec::new()),
        };
        let added = catalog.rescan()?;
        log::info!("catalog: {added} style(s) available");
        Ok(catalog)
    }

    /// Re-enumerate the store and append newly appeared artifacts.
    ///
    /// Returns how many styles were added.
    pub fn rescan(&self) -> Result<usize, CatalogError> {
        let ids = self
            .store
            .list_ids()
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;
        for artifact in ids {
            if entries.iter().any(|d| d.artifact == artifact) {
                continue;
            }
            let id = StyleId((entries.len() + 1) as u32);
            let display_name = self
                .store
                .display_name(&artifact)
                .unwrap_or_else(|| humanize(&artifact));
            log::debug!("catalog: {id} → {artifact} ({display_name})");
            entries.push(StyleDescriptor {
                id,
                artifact,
                display_name,
            });
            added += 1;
        }
        Ok(added)
    }

    /// All styles in id order, after a fresh scan of the store.
    pub fn list(&self) -> Result<Vec<StyleDescriptor>, CatalogError> {
        self.rescan()?;
        Ok(self.known())
    }

    /// Number of styles, after a fresh scan of the store.
    pub fn count(&self) -> Result<usize, CatalogError> {
        self.rescan()?;
        Ok(self.entries.read().unwrap_or_else(PoisonError::into_inner).len())
    }

    /// Descriptor for an id already handed out, without touching the store.
    pub fn get(&self, id: StyleId) -> Option<StyleDescriptor> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id.index())
            .cloned()
    }

    /// Raw bytes of the artifact behind `id`.
    pub fn load_artifact(&self, id: StyleId) -> Result<Vec<u8>, CatalogError> {
        let descriptor = self.get(id).ok_or(CatalogError::UnknownStyle(id))?;
        self.store
            .load(&descriptor.artifact)
            .map_err(|source| CatalogError::Artifact { style: id, source })
    }

    /// Sample image for `id`, if the store has one.
    pub fn example(&self, id: StyleId) -> Option<Vec<u8>> {
        let descriptor = self.get(id)?;
        self.store.example(&descriptor.artifact)
    }

    /// Every available sample image in style order, after a fresh scan.
    /// Styles without a sample are skipped.
    pub fn examples(&self) -> Result<Vec<StyleExample>, CatalogError> {
        Ok(self
            .list()?
            .into_iter()
            .filter_map(|style| {
                let jpeg = self.store.example(&style.artifact)?;
                Some(StyleExample { style, jpeg })
            })
            .collect())
    }

    fn known(&self) -> Vec<StyleDescriptor> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Turn an artifact id into a display name.
///
/// ```
/// use neural_style::style::humanize;
///
/// assert_eq!(humanize("starry_night"), "Starry Night");
/// assert_eq!(humanize("la-muse"), "La Muse");
/// ```
pub fn humanize(artifact: &str) -> String {
    artifact
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
