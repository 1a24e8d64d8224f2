//! Styles: where they come from, how they are numbered, and the loaded
//! networks that apply them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ArtifactStore (trait)        FsArtifactStore / MemoryStore  │
//! │        │  list_ids / load                                    │
//! │        ▼                                                     │
//! │  StyleCatalog ── 1-based StyleId, append-only re-scan        │
//! │        │  load_artifact                                      │
//! │        ▼                                                     │
//! │  ModelCache ── single-flight, LRU, capacity N                │
//! │        │  NetworkLoader::load (bytes → network)              │
//! │        ▼                                                     │
//! │  Arc<dyn StyleNetwork> ── TransformerNet (candle)            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use neural_style::style::{
//!     FsArtifactStore, ModelCache, StyleCatalog, StyleId, TransformerNetLoader,
//! };
//!
//! let store = Arc::new(FsArtifactStore::new("models", "safetensors"));
//! let catalog = Arc::new(StyleCatalog::open(store).unwrap());
//! let cache = ModelCache::new(catalog, Arc::new(TransformerNetLoader::new(false)), 3);
//!
//! let network = cache.get(StyleId::new(1).unwrap()).unwrap();
//! # let _ = network;
//! ```

pub mod cache;
pub mod catalog;
pub mod network;
pub mod store;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use cache::ModelCache;
pub use catalog::{
    humanize, CatalogError, StyleCatalog, StyleDescriptor, StyleExample, StyleId,
};
pub use network::{ModelError, NetworkLoader, StyleNetwork, TransformerNet, TransformerNetLoader};
pub use store::{ArtifactStore, FsArtifactStore, StoreError, EXAMPLE_SUFFIX, MANIFEST_FILE};

// test-only re-exports for the executor and session tests.
#[cfg(test)]
pub use network::{MockLoader, MockNetwork};
#[cfg(test)]
pub use store::MemoryStore;
