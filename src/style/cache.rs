//! Bounded, single-flight cache of loaded style networks.
//!
//! ```text
//! get(id) ──lock──▶ slot for id? ──no──▶ insert empty slot
//!                       │
//!                  unlock, then slot.get_or_init(load)   ← one loader, others block
//!                       │
//!              Ok ──lock──▶ evict least-recently-used ready slots over capacity
//!              Err ─lock──▶ drop this slot only (next get retries)
//! ```
//!
//! Loads run outside the cache lock, so a slow artifact never stalls hits on
//! other styles.  Networks are handed out as `Arc`s; evicting a slot only
//! drops the cache's reference, so in-flight jobs keep running on it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use super::catalog::{StyleCatalog, StyleId};
use super::network::{ModelError, NetworkLoader, StyleNetwork};

type LoadResult = Result<Arc<dyn StyleNetwork>, ModelError>;

struct Slot {
    cell: OnceLock<LoadResult>,
    last_used: AtomicU64,
}

impl Slot {
    fn is_ready(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }

    fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<StyleId, Arc<Slot>>,
    // Monotonic access counter; lower means older.
    clock: u64,
}

pub struct ModelCache {
    catalog: Arc<StyleCatalog>,
    loader: Arc<dyn NetworkLoader>,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("capacity", &self.capacity)
            .field("resident", &self.resident().len())
            .finish_non_exhaustive()
    }
}

impl ModelCache {
    /// `capacity` is clamped to at least one resident model.
    pub fn new(
        catalog: Arc<StyleCatalog>,
        loader: Arc<dyn NetworkLoader>,
        capacity: usize,
    ) -> Self {
        Self {
            catalog,
            loader,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the network for `style`, loading it if needed.
    ///
    /// Blocking: call from a worker thread, not from an async task.
    ///
    /// # Errors
    ///
    /// [`ModelError::LoadFailed`] when the artifact is unknown, missing or
    /// corrupt.  The failure is not cached and other entries are untouched.
    pub fn get(&self, style: StyleId) -> Result<Arc<dyn StyleNetwork>, ModelError> {
        let slot = {
            let mut state = self.lock();
            state.clock += 1;
            let now = state.clock;
            let slot = state
                .slots
                .entry(style)
                .or_insert_with(|| {
                    Arc::new(Slot {
                        cell: OnceLock::new(),
                        last_used: AtomicU64::new(now),
                    })
                })
                .clone();
            slot.last_used.store(now, Ordering::Relaxed);
            slot
        };

        let result = slot.cell.get_or_init(|| self.load(style)).clone();

        let mut state = self.lock();
        match &result {
            Ok(_) => self.evict_over_capacity(&mut state, style),
            Err(e) => {
                // Only drop the slot we waited on; a retry may already have
                // replaced it.
                if state
                    .slots
                    .get(&style)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot))
                {
                    state.slots.remove(&style);
                }
                log::warn!("cache: {e}");
            }
        }
        result
    }

    /// Styles whose models are currently loaded, oldest access first.
    pub fn resident(&self) -> Vec<StyleId> {
        let state = self.lock();
        let mut ready: Vec<(u64, StyleId)> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.is_ready())
            .map(|(id, slot)| (slot.last_used(), *id))
            .collect();
        ready.sort();
        ready.into_iter().map(|(_, id)| id).collect()
    }

    /// Drop every resident model.
    pub fn clear(&self) {
        self.lock().slots.clear();
    }

    fn load(&self, style: StyleId) -> LoadResult {
        let descriptor = self.catalog.get(style).ok_or_else(|| ModelError::LoadFailed {
            style,
            reason: "unknown style".into(),
        })?;
        let started = std::time::Instant::now();
        let weights = self
            .catalog
            .load_artifact(style)
            .map_err(|e| ModelError::LoadFailed {
                style,
                reason: e.to_string(),
            })?;
        let network = self.loader.load(&descriptor, &weights)?;
        log::info!(
            "cache: loaded {style} '{}' ({} bytes) in {} ms",
            descriptor.artifact,
            weights.len(),
            started.elapsed().as_millis()
        );
        Ok(network)
    }

    fn evict_over_capacity(&self, state: &mut CacheState, keep: StyleId) {
        loop {
            let ready = state.slots.values().filter(|s| s.is_ready()).count();
            if ready <= self.capacity {
                return;
            }
            let victim = state
                .slots
                .iter()
                .filter(|(id, slot)| **id != keep && slot.is_ready())
                .min_by_key(|(_, slot)| slot.last_used())
                .map(|(id, _)| *id);
            match victim {
                Some(id) => {
                    state.slots.remove(&id);
                    log::info!("cache: evicted {id} (least recently used)");
                }
                None => return,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
