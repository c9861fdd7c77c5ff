// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Decoded sounds, ready to play, keyed by sound id.
//!
//! Loads are deduplicated: at most one fetch and decode runs per id at a time,
//! and every caller interested in that id awaits the same shared future. Loads
//! are spawned onto the runtime, so a load nobody waits for any more still
//! runs to completion.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio::{decode, DecodedSound};
use crate::playback::PlaybackConfig;
use crate::store::{SoundStore, StoreError, DEFAULT_SOUND_ID};

/// The sound played for the reserved default id.
pub const DEFAULT_ASSET: &[u8] = include_bytes!("../assets/default.wav");

/// Error types for the cache. Missing records and undecodable audio are
/// misses, not errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("Sound store error: {0}")]
    Store(#[from] Arc<StoreError>),
}

/// A decoded sound with its resolved playback configuration.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub id: String,
    pub sound: DecodedSound,
    pub config: PlaybackConfig,
}

type LoadResult = Result<Option<CacheEntry>, Arc<StoreError>>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    loads: HashMap<String, SharedLoad>,
}

struct Inner<S> {
    store: S,
    default_asset: Arc<[u8]>,
    state: Mutex<CacheState>,
}

/// The resource cache. Cloning is cheap and clones share state.
pub struct ResourceCache<S: SoundStore> {
    inner: Arc<Inner<S>>,
}

impl<S: SoundStore> Clone for ResourceCache<S> {
    fn clone(&self) -> Self {
        ResourceCache {
            inner: self.inner.clone(),
        }
    }
}

impl<S: SoundStore> ResourceCache<S> {
    /// Creates a cache backed by the given store, using the bundled default sound.
    pub fn new(store: S) -> ResourceCache<S> {
        ResourceCache::with_default_asset(store, DEFAULT_ASSET)
    }

    /// Creates a cache with a custom default sound.
    pub fn with_default_asset(store: S, default_asset: impl Into<Arc<[u8]>>) -> ResourceCache<S> {
        ResourceCache {
            inner: Arc::new(Inner {
                store,
                default_asset: default_asset.into(),
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Brings the cache in line with the given active set. Entries no longer
    /// active are dropped unless a load for them is still running; missing
    /// active entries are loaded. Returns once every load this call started
    /// or joined has settled. A store failure for one id doesn't stop the
    /// others, and the first such failure is returned.
    pub async fn reconcile(&self, active_ids: &[String]) -> Result<(), CacheError> {
        let active: HashSet<&str> = active_ids.iter().map(String::as_str).collect();

        let pending: Vec<SharedLoad> = {
            let mut state = self.inner.state.lock();
            let CacheState { entries, loads } = &mut *state;
            entries.retain(|id, _| {
                let keep = active.contains(id.as_str()) || loads.contains_key(id);
                if !keep {
                    debug!(id = id.as_str(), "Dropping inactive sound.");
                }
                keep
            });

            let mut pending = Vec::new();
            for id in active_ids {
                if !state.entries.contains_key(id.as_str()) {
                    pending.push(self.inner.load_locked(&mut state, id));
                }
            }
            pending
        };

        let failure = join_all(pending)
            .await
            .into_iter()
            .find_map(Result::err);
        match failure {
            Some(e) => Err(CacheError::Store(e)),
            None => Ok(()),
        }
    }

    /// Returns the entry for the given id, loading it if needed. `None` means
    /// the sound doesn't exist or couldn't be decoded.
    pub async fn resolve_for_play(&self, id: &str) -> Result<Option<CacheEntry>, CacheError> {
        let load = {
            let mut state = self.inner.state.lock();
            if let Some(entry) = state.entries.get(id) {
                return Ok(Some(entry.clone()));
            }
            self.inner.load_locked(&mut state, id)
        };
        Ok(load.await?)
    }

    /// Returns true if an entry for the id is ready.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.state.lock().entries.contains_key(id)
    }

    /// Returns true if a load for the id is running.
    pub fn is_loading(&self, id: &str) -> bool {
        self.inner.state.lock().loads.contains_key(id)
    }

    /// The ids with ready entries, sorted.
    pub fn cached_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.state.lock().entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl<S: SoundStore> Inner<S> {
    /// Returns the in-flight load for the id, starting one if there is none.
    /// The load is registered before the caller releases the lock, so any
    /// later caller joins it.
    fn load_locked(self: &Arc<Self>, state: &mut CacheState, id: &str) -> SharedLoad {
        if let Some(load) = state.loads.get(id) {
            debug!(id, "Joining in-flight load.");
            return load.clone();
        }

        let task = {
            let inner = self.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                let result = inner.fetch(&id).await.map_err(Arc::new);
                {
                    // Settling and publishing happen together so no caller
                    // sees neither a load nor an entry.
                    let mut state = inner.state.lock();
                    state.loads.remove(&id);
                    if let Ok(Some(entry)) = &result {
                        state.entries.insert(id, entry.clone());
                    }
                }
                result
            })
        };

        let load = {
            let inner = self.clone();
            let id = id.to_string();
            async move {
                match task.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(id = id.as_str(), err = %e, "Load task failed.");
                        inner.state.lock().loads.remove(&id);
                        Ok(None)
                    }
                }
            }
            .boxed()
            .shared()
        };

        state.loads.insert(id.to_string(), load.clone());
        load
    }

    /// Fetches and decodes one sound.
    async fn fetch(&self, id: &str) -> Result<Option<CacheEntry>, StoreError> {
        info!(id, "Loading sound.");

        let (decoded, mut config) = if id == DEFAULT_SOUND_ID {
            let decoded = decode_blocking(id, self.default_asset.clone()).await;
            (decoded, PlaybackConfig::builtin_default())
        } else {
            let record = match self.store.get(id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(id, "Sound not found.");
                    return Ok(None);
                }
                Err(e) => {
                    error!(id, err = %e, "Unable to read sound.");
                    return Err(e);
                }
            };
            let config = PlaybackConfig::from_record(&record);
            (decode_blocking(id, record.blob).await, config)
        };

        let Some(sound) = decoded else {
            return Ok(None);
        };
        config.resolve_end_time(sound.duration());
        debug!(
            id,
            duration = sound.duration(),
            end_time = config.end_time,
            "Sound loaded."
        );

        Ok(Some(CacheEntry {
            id: id.to_string(),
            sound,
            config,
        }))
    }
}

/// Decodes off the async threads. Failures are logged and become misses.
async fn decode_blocking<B>(id: &str, bytes: B) -> Option<DecodedSound>
where
    B: AsRef<[u8]> + Send + Sync + 'static,
{
    match tokio::task::spawn_blocking(move || decode(bytes)).await {
        Ok(Ok(sound)) => Some(sound),
        Ok(Err(e)) => {
            error!(id, err = %e, "Unable to decode sound.");
            None
        }
        Err(e) => {
            error!(id, err = %e, "Decode task failed.");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemorySoundStore, SoundRecord};
    use crate::testutil::{eventually_async, record, GatedStore};

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_default_resolution() {
        let cache = ResourceCache::new(MemorySoundStore::new());
        cache.reconcile(&ids(&["default"])).await.unwrap();

        let entry = cache.resolve_for_play("default").await.unwrap().unwrap();
        assert!((entry.config.end_time - 0.2).abs() < 1e-6);
        assert!((entry.sound.duration() - 0.2).abs() < 1e-6);
        assert_eq!(entry.config.volume, 1.0);
        assert!(entry.config.fade_in > 0.0);
        assert!(entry.config.fade_out > 0.0);
    }

    #[tokio::test]
    async fn test_default_never_reads_store() {
        let cache = ResourceCache::new(GatedStore::open(Vec::new()));
        cache.reconcile(&ids(&["default"])).await.unwrap();
        assert_eq!(cache.store().gets(), 0);
        assert!(cache.contains("default"));
    }

    #[tokio::test]
    async fn test_record_config() {
        let mut custom = record("custom_1", 4.0);
        custom.start_time = 1.0;
        custom.end_time = 3.0;
        custom.volume = 0.8;
        custom.fade_in = Some(0.2);
        let cache = ResourceCache::new(MemorySoundStore::with_records([custom]));

        let entry = cache.resolve_for_play("custom_1").await.unwrap().unwrap();
        assert_eq!(
            entry.config,
            PlaybackConfig {
                start_time: 1.0,
                end_time: 3.0,
                volume: 0.8,
                fade_in: 0.2,
                fade_out: crate::playback::DEFAULT_FADE_OUT,
            }
        );
    }

    #[tokio::test]
    async fn test_unset_end_time_resolved() {
        let cache = ResourceCache::new(MemorySoundStore::with_records([record("custom_1", 0.5)]));
        let entry = cache.resolve_for_play("custom_1").await.unwrap().unwrap();
        assert!((entry.config.end_time - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_reconcile_containment() {
        let cache = ResourceCache::new(MemorySoundStore::with_records([
            record("a", 0.1),
            record("b", 0.1),
            record("c", 0.1),
        ]));

        cache.reconcile(&ids(&["a", "b"])).await.unwrap();
        assert_eq!(cache.cached_ids(), ids(&["a", "b"]));

        cache.reconcile(&ids(&["c", "default"])).await.unwrap();
        assert_eq!(cache.cached_ids(), ids(&["c", "default"]));

        cache.reconcile(&ids(&["c"])).await.unwrap();
        assert_eq!(cache.cached_ids(), ids(&["c"]));
    }

    #[tokio::test]
    async fn test_reconcile_reuses_entries() {
        let cache = ResourceCache::new(GatedStore::open([record("a", 0.1), record("b", 0.1)]));
        cache.reconcile(&ids(&["a"])).await.unwrap();
        cache.reconcile(&ids(&["a", "b"])).await.unwrap();
        cache.resolve_for_play("a").await.unwrap();
        assert_eq!(cache.store().gets_for("a"), 1);
        assert_eq!(cache.store().gets_for("b"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolve_loads_once() {
        let (store, gate) = GatedStore::gated([record("x", 0.1)]);
        let cache = ResourceCache::new(store);

        let (first, second) = tokio::join!(cache.resolve_for_play("x"), async {
            assert!(cache.is_loading("x"));
            gate.add_permits(1);
            cache.resolve_for_play("x").await
        });

        assert!(first.unwrap().is_some());
        assert!(second.unwrap().is_some());
        assert_eq!(cache.store().gets_for("x"), 1);
        assert!(!cache.is_loading("x"));
    }

    #[tokio::test]
    async fn test_concurrent_reconciles_load_once() {
        let (store, gate) = GatedStore::gated([record("x", 0.1)]);
        let cache = ResourceCache::new(store);
        let active = ids(&["x"]);

        let (first, second, _) = tokio::join!(
            cache.reconcile(&active),
            cache.reconcile(&active),
            async {
                gate.add_permits(1);
            }
        );

        first.unwrap();
        second.unwrap();
        assert_eq!(cache.store().gets_for("x"), 1);
        assert!(cache.contains("x"));
    }

    #[tokio::test]
    async fn test_in_flight_load_survives_reconcile() {
        let (store, gate) = GatedStore::gated([record("slow", 0.1)]);
        let cache = ResourceCache::new(store);

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.reconcile(&["slow".to_string()]).await }
        });
        eventually_async(
            || {
                let cache = cache.clone();
                async move { cache.is_loading("slow") }
            },
            "load never started",
        )
        .await;

        // The newer active set doesn't wait for, or cancel, the old load.
        cache.reconcile(&ids(&["default"])).await.unwrap();
        assert!(cache.is_loading("slow"));

        gate.add_permits(1);
        first.await.unwrap().unwrap();
        assert_eq!(cache.cached_ids(), ids(&["default", "slow"]));

        // Once settled, the next reconcile drops it.
        cache.reconcile(&ids(&["default"])).await.unwrap();
        assert_eq!(cache.cached_ids(), ids(&["default"]));
    }

    #[tokio::test]
    async fn test_missing_record_is_a_miss() {
        let cache = ResourceCache::new(MemorySoundStore::new());
        assert!(cache.resolve_for_play("custom_9").await.unwrap().is_none());
        cache.reconcile(&ids(&["custom_9"])).await.unwrap();
        assert!(cache.cached_ids().is_empty());
        assert!(!cache.is_loading("custom_9"));
    }

    #[tokio::test]
    async fn test_decode_failure_is_a_miss() {
        let broken = SoundRecord {
            blob: b"not audio at all".to_vec(),
            ..record("broken", 0.1)
        };
        let cache = ResourceCache::new(MemorySoundStore::with_records([broken, record("ok", 0.1)]));

        cache.reconcile(&ids(&["broken", "ok"])).await.unwrap();
        assert_eq!(cache.cached_ids(), ids(&["ok"]));
        assert!(cache.resolve_for_play("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let cache = ResourceCache::new(GatedStore::failing());

        let result = cache.reconcile(&ids(&["default", "custom_1"])).await;
        assert!(matches!(result, Err(CacheError::Store(_))));
        // Sibling loads still complete.
        assert_eq!(cache.cached_ids(), ids(&["default"]));
        assert!(!cache.is_loading("custom_1"));

        assert!(cache.resolve_for_play("custom_1").await.is_err());
    }
}
