//! Spatial TTL cache.
//!
//! Payloads are keyed by geohash cell and persisted through a `BlobStore`;
//! only bookkeeping (write and access times) lives in memory. The index and
//! the store are updated under one write lock, so a reader never sees an
//! index entry whose blob is still being written.
//!
//! The index is capped at `max_entries` cells. Stale cells stay readable
//! by `get` until the cap forces one out: a new cell evicts the oldest
//! stale cell first, then the least recently accessed one.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::geohash::{self, MAX_PRECISION};
use crate::host::Clock;
use crate::storage::BlobStore;
use crate::types::{CacheError, CellId, Position, StorageError, WeatherPayload};

pub const DEFAULT_MAX_AGE_MINS: i64 = 60;

/// Cells kept before eviction starts. A cell at precision 5 is ~5 km
/// across, so this covers a long passage between restarts.
pub const DEFAULT_MAX_ENTRIES: usize = 512;

/// Bookkeeping for one cached cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Cell-keyed payload cache with age-based invalidation.
pub struct SpatialCache {
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    precision: usize,
    max_age_mins: AtomicI64,
    max_entries: AtomicUsize,
    index: RwLock<HashMap<CellId, CacheEntry>>,
}

impl SpatialCache {
    /// Prepare the store and drop anything left over from a previous run.
    ///
    /// Fails with `StorageInit` if the store cannot be created or emptied;
    /// the cache holds no payloads in memory, so it is useless without one.
    pub async fn open(
        store: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        precision: usize,
        max_age_mins: i64,
    ) -> Result<Self, CacheError> {
        let init_error = |source: StorageError| CacheError::StorageInit {
            path: store.location(),
            source,
        };

        store.init().await.map_err(init_error)?;

        let keys = store.keys().await.map_err(init_error)?;
        let purged = keys.len();
        for result in join_all(keys.iter().map(|k| store.remove(k))).await {
            result.map_err(init_error)?;
        }

        info!(
            location = %store.location(),
            purged,
            precision,
            max_age_mins,
            "Spatial cache ready"
        );

        Ok(Self {
            precision: precision.clamp(1, MAX_PRECISION),
            max_age_mins: AtomicI64::new(max_age_mins.max(1)),
            max_entries: AtomicUsize::new(DEFAULT_MAX_ENTRIES),
            index: RwLock::new(HashMap::new()),
            store,
            clock,
        })
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    /// The cell `position` falls in at this cache's precision.
    pub fn cell_for(&self, position: &Position) -> CellId {
        geohash::encode_position(position, self.precision)
    }

    pub fn max_age(&self) -> i64 {
        self.max_age_mins.load(Ordering::Relaxed)
    }

    /// Change the staleness threshold. Values below one minute are ignored.
    pub fn set_max_age(&self, minutes: i64) {
        if minutes < 1 {
            debug!(minutes, "Ignoring max age below one minute");
            return;
        }
        self.max_age_mins.store(minutes, Ordering::Relaxed);
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries.load(Ordering::Relaxed)
    }

    /// Change the index cap. Zero is ignored. Existing cells over the new
    /// cap are evicted by later `put`s, not immediately.
    pub fn set_max_entries(&self, entries: usize) {
        if entries == 0 {
            debug!("Ignoring zero cache capacity");
            return;
        }
        self.max_entries.store(entries, Ordering::Relaxed);
    }

    /// First fresh cell whose bounding box contains `position`.
    ///
    /// Cells are scanned in `HashMap` iteration order, which is unspecified.
    /// If rounding at a cell edge makes two boxes contain the point, either
    /// may be returned; if it makes none contain it, the result is a miss.
    pub async fn lookup(&self, position: &Position) -> Option<CellId> {
        let now = self.clock.now();
        let max_age = Duration::minutes(self.max_age());
        let index = self.index.read().await;

        for (cell, entry) in index.iter() {
            if now - entry.updated_at > max_age {
                continue;
            }
            match geohash::decode_bbox(cell) {
                Ok(bbox) if bbox.contains(position) => return Some(cell.clone()),
                Ok(_) => {}
                Err(e) => warn!(%cell, error = %e, "Skipping undecodable cell"),
            }
        }
        None
    }

    /// Load a payload by cell, regardless of age.
    pub async fn get(&self, cell: &CellId) -> Result<WeatherPayload, CacheError> {
        let mut index = self.index.write().await;
        if !index.contains_key(cell) {
            return Err(CacheError::NotFound(cell.clone()));
        }

        let bytes = match self.store.read(cell.as_str()).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                warn!(%cell, "Indexed cell missing from store");
                index.remove(cell);
                return Err(CacheError::NotFound(cell.clone()));
            }
            Err(source) => {
                return Err(CacheError::StorageRead {
                    cell: cell.clone(),
                    source,
                })
            }
        };

        let payload: WeatherPayload = match serde_json::from_slice(&bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!(%cell, error = %e, "Corrupt cache entry");
                index.remove(cell);
                return Err(CacheError::NotFound(cell.clone()));
            }
        };

        if let Some(entry) = index.get_mut(cell) {
            entry.last_accessed_at = self.clock.now();
        }
        Ok(payload)
    }

    /// Store `payload` under `cell`, replacing any previous entry.
    ///
    /// The index is only touched once the blob is durably written.
    pub async fn put(&self, cell: &CellId, payload: &WeatherPayload) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(payload).map_err(|source| CacheError::Serialize {
            cell: cell.clone(),
            source,
        })?;

        let mut index = self.index.write().await;
        self.store
            .write(cell.as_str(), &bytes)
            .await
            .map_err(|source| CacheError::StorageWrite {
                cell: cell.clone(),
                source,
            })?;

        let now = self.clock.now();
        if !index.contains_key(cell) {
            self.evict_for_insert(&mut index, now).await;
        }
        index.insert(
            cell.clone(),
            CacheEntry {
                updated_at: now,
                last_accessed_at: now,
            },
        );
        debug!(%cell, bytes = bytes.len(), "Cache entry stored");
        Ok(())
    }

    /// Make room for one more cell. A blob that cannot be removed is left
    /// for the startup purge; its index entry goes regardless.
    async fn evict_for_insert(&self, index: &mut HashMap<CellId, CacheEntry>, now: DateTime<Utc>) {
        let max_age = Duration::minutes(self.max_age());
        while index.len() >= self.max_entries() {
            let oldest_stale = index
                .iter()
                .filter(|(_, e)| now - e.updated_at > max_age)
                .min_by_key(|(_, e)| e.updated_at)
                .map(|(c, _)| c.clone());
            let victim = oldest_stale.or_else(|| {
                index
                    .iter()
                    .min_by_key(|(_, e)| e.last_accessed_at)
                    .map(|(c, _)| c.clone())
            });
            let Some(victim) = victim else {
                return;
            };

            if let Err(e) = self.store.remove(victim.as_str()).await {
                warn!(cell = %victim, error = %e, "Could not remove evicted blob");
            }
            index.remove(&victim);
            debug!(cell = %victim, "Cache entry evicted");
        }
    }

    /// Remove `cell` from the store and the index. Absent cells are fine.
    pub async fn delete(&self, cell: &CellId) -> Result<(), CacheError> {
        let mut index = self.index.write().await;
        self.store
            .remove(cell.as_str())
            .await
            .map_err(|source| CacheError::StorageWrite {
                cell: cell.clone(),
                source,
            })?;
        index.remove(cell);
        Ok(())
    }

    /// Remove every indexed cell.
    pub async fn purge(&self) -> Result<(), CacheError> {
        let mut index = self.index.write().await;
        let cells: Vec<CellId> = index.keys().cloned().collect();
        let results = join_all(cells.iter().map(|c| self.store.remove(c.as_str()))).await;

        for (cell, result) in cells.iter().zip(results) {
            match result {
                Ok(()) => {
                    index.remove(cell);
                }
                Err(source) => {
                    return Err(CacheError::StorageWrite {
                        cell: cell.clone(),
                        source,
                    })
                }
            }
        }
        info!(purged = cells.len(), "Cache purged");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }

    /// Snapshot of the index, for status reporting.
    pub async fn entries(&self) -> Vec<(CellId, CacheEntry)> {
        let index = self.index.read().await;
        let mut entries: Vec<_> = index.iter().map(|(c, e)| (c.clone(), *e)).collect();
        entries.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        entries
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
