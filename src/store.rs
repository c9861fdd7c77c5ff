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

//! Persistent storage for user-supplied sounds.
//!
//! A store maps a sound id to a [`SoundRecord`]. Records are never edited in
//! place: the settings surface saves a new record and deletes old ones.

use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ConfigError, SettingsStore};

mod dir;
mod error;
mod memory;

pub use dir::DirSoundStore;
pub use error::StoreError;
pub use memory::MemorySoundStore;

/// The reserved id of the bundled sound.
pub const DEFAULT_SOUND_ID: &str = "default";

/// The maximum number of custom sounds kept in a store.
pub const MAX_CUSTOM_SOUNDS: usize = 5;

/// The largest sound blob [`save_custom_sound`] accepts.
pub const MAX_SOUND_BYTES: usize = 10 * 1024 * 1024;

/// Sentinel end time meaning "play to the end of the decoded audio".
pub const UNSET_END_TIME: f64 = 0.0;

fn default_volume() -> f32 {
    1.0
}

/// A stored sound. The blob is kept out of the serialized metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoundRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip)]
    pub blob: Vec<u8>,
    /// Trim start in seconds.
    #[serde(default)]
    pub start_time: f64,
    /// Trim end in seconds, or [`UNSET_END_TIME`].
    #[serde(default)]
    pub end_time: f64,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_in: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_out: Option<f64>,
    /// Insertion time in milliseconds, used for recency ordering.
    pub updated_at: u64,
}

/// The identifying part of a record, returned by listings.
#[derive(Clone, Debug, PartialEq)]
pub struct SoundSummary {
    pub id: String,
    pub name: Option<String>,
    pub updated_at: u64,
}

impl From<&SoundRecord> for SoundSummary {
    fn from(record: &SoundRecord) -> Self {
        SoundSummary {
            id: record.id.clone(),
            name: record.name.clone(),
            updated_at: record.updated_at,
        }
    }
}

/// A keyed store of sound records. Single-record operations are atomic.
pub trait SoundStore: Send + Sync + 'static {
    /// Gets the record with the given id, or None if it doesn't exist.
    fn get(&self, id: &str) -> impl Future<Output = Result<Option<SoundRecord>, StoreError>> + Send;

    /// Inserts or replaces a record.
    fn put(&self, record: SoundRecord) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes a record. Deleting a missing record is not an error.
    fn delete(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Lists every record in the store.
    fn list(&self) -> impl Future<Output = Result<Vec<SoundSummary>, StoreError>> + Send;
}

/// A sound the user has trimmed and wants to keep.
#[derive(Clone, Debug)]
pub struct NewSound {
    pub name: Option<String>,
    pub blob: Vec<u8>,
    pub start_time: f64,
    pub end_time: f64,
    pub volume: f32,
    pub fade_in: Option<f64>,
    pub fade_out: Option<f64>,
}

/// Saves a new custom sound, evicting the oldest custom sounds first if the
/// store is already at [`MAX_CUSTOM_SOUNDS`]. Returns the generated id.
///
/// Blobs over [`MAX_SOUND_BYTES`] are rejected before the store is touched.
pub async fn save_custom_sound<S: SoundStore>(
    store: &S,
    sound: NewSound,
) -> Result<String, StoreError> {
    if sound.blob.len() > MAX_SOUND_BYTES {
        return Err(StoreError::TooLarge {
            size: sound.blob.len(),
            limit: MAX_SOUND_BYTES,
        });
    }

    let mut custom: Vec<SoundSummary> = store
        .list()
        .await?
        .into_iter()
        .filter(|summary| summary.id != DEFAULT_SOUND_ID)
        .collect();
    custom.sort_by_key(|summary| summary.updated_at);

    let latest = custom.last().map(|summary| summary.updated_at).unwrap_or(0);
    let excess = (custom.len() + 1).saturating_sub(MAX_CUSTOM_SOUNDS);
    for evicted in custom.iter().take(excess) {
        info!(id = evicted.id.as_str(), "Evicting oldest custom sound");
        store.delete(&evicted.id).await?;
    }

    // Ids derive from the timestamp, so it must be unique and increasing.
    let updated_at = now_millis().max(latest + 1);
    let id = format!("custom_{}", updated_at);
    store
        .put(SoundRecord {
            id: id.clone(),
            name: sound.name,
            blob: sound.blob,
            start_time: sound.start_time,
            end_time: sound.end_time,
            volume: sound.volume,
            fade_in: sound.fade_in,
            fade_out: sound.fade_out,
            updated_at,
        })
        .await?;

    info!(id = id.as_str(), "Custom sound saved");
    Ok(id)
}

/// Errors from operations that touch both the store and the settings.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Settings(#[from] ConfigError),
}

/// Deletes a sound and removes it from the active set.
pub async fn delete_sound<S: SoundStore, C: SettingsStore>(
    store: &S,
    settings: &C,
    id: &str,
) -> Result<(), LibraryError> {
    store.delete(id).await?;
    settings.remove_active_id(id).await?;
    info!(id, "Sound deleted");
    Ok(())
}

/// Deletes every stored sound and resets the active set to the default sound.
/// Returns the number of records deleted.
pub async fn reset_sounds<S: SoundStore, C: SettingsStore>(
    store: &S,
    settings: &C,
) -> Result<usize, LibraryError> {
    let records = store.list().await?;
    for record in &records {
        store.delete(&record.id).await?;
    }
    settings.set_active_ids(Vec::new()).await?;
    info!(deleted = records.len(), "Sound library reset");
    Ok(records.len())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySettings;

    fn new_sound(name: &str) -> NewSound {
        NewSound {
            name: Some(name.to_string()),
            blob: vec![1, 2, 3],
            start_time: 0.5,
            end_time: 1.5,
            volume: 0.7,
            fade_in: None,
            fade_out: Some(0.2),
        }
    }

    #[tokio::test]
    async fn test_save_assigns_increasing_ids() {
        let store = MemorySoundStore::new();

        let first = save_custom_sound(&store, new_sound("one")).await.unwrap();
        let second = save_custom_sound(&store, new_sound("two")).await.unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("custom_"));

        let a = store.get(&first).await.unwrap().unwrap();
        let b = store.get(&second).await.unwrap().unwrap();
        assert!(b.updated_at > a.updated_at);
        assert_eq!(a.blob, vec![1, 2, 3]);
        assert_eq!(a.fade_in, None);
        assert_eq!(a.fade_out, Some(0.2));
    }

    #[tokio::test]
    async fn test_save_evicts_oldest_custom_sound() {
        let store = MemorySoundStore::new();

        let mut ids = Vec::new();
        for i in 0..MAX_CUSTOM_SOUNDS {
            ids.push(
                save_custom_sound(&store, new_sound(&format!("sound{}", i)))
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(store.list().await.unwrap().len(), MAX_CUSTOM_SOUNDS);

        let newest = save_custom_sound(&store, new_sound("newest")).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), MAX_CUSTOM_SOUNDS);
        assert!(store.get(&ids[0]).await.unwrap().is_none());
        assert!(store.get(&ids[1]).await.unwrap().is_some());
        assert!(store.get(&newest).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_default_override_does_not_count_as_custom() {
        let store = MemorySoundStore::new();
        store
            .put(SoundRecord {
                id: DEFAULT_SOUND_ID.to_string(),
                name: None,
                blob: vec![],
                start_time: 0.0,
                end_time: UNSET_END_TIME,
                volume: 1.0,
                fade_in: None,
                fade_out: None,
                updated_at: 0,
            })
            .await
            .unwrap();

        for i in 0..MAX_CUSTOM_SOUNDS {
            save_custom_sound(&store, new_sound(&format!("sound{}", i)))
                .await
                .unwrap();
        }
        assert!(store.get(DEFAULT_SOUND_ID).await.unwrap().is_some());
        assert_eq!(store.list().await.unwrap().len(), MAX_CUSTOM_SOUNDS + 1);
    }

    #[tokio::test]
    async fn test_delete_sound_updates_active_set() {
        let store = MemorySoundStore::new();
        let settings = MemorySettings::default();
        let id = save_custom_sound(&store, new_sound("one")).await.unwrap();
        settings
            .set_active_ids(vec![id.clone()])
            .await
            .unwrap();

        delete_sound(&store, &settings, &id).await.unwrap();

        assert!(store.get(&id).await.unwrap().is_none());
        let loaded = settings.load().await.unwrap();
        assert_eq!(loaded.active_ids().ids(), &[DEFAULT_SOUND_ID.to_string()]);
    }

    #[tokio::test]
    async fn test_save_rejects_oversized_sound() {
        let store = MemorySoundStore::new();
        let mut sound = new_sound("huge");
        sound.blob = vec![0; MAX_SOUND_BYTES + 1];

        assert!(matches!(
            save_custom_sound(&store, sound).await,
            Err(StoreError::TooLarge { size, limit })
                if size == MAX_SOUND_BYTES + 1 && limit == MAX_SOUND_BYTES
        ));
        assert!(store.list().await.unwrap().is_empty());

        let mut sound = new_sound("at limit");
        sound.blob = vec![0; MAX_SOUND_BYTES];
        assert!(save_custom_sound(&store, sound).await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_sounds() {
        let store = MemorySoundStore::new();
        let settings = MemorySettings::default();
        let mut saved = Vec::new();
        for i in 0..3 {
            saved.push(
                save_custom_sound(&store, new_sound(&format!("sound{}", i)))
                    .await
                    .unwrap(),
            );
        }
        settings.set_active_ids(saved.clone()).await.unwrap();

        assert_eq!(reset_sounds(&store, &settings).await.unwrap(), 3);

        assert!(store.list().await.unwrap().is_empty());
        let loaded = settings.load().await.unwrap();
        assert_eq!(loaded.active_ids().ids(), &[DEFAULT_SOUND_ID.to_string()]);

        // Resetting an empty library is fine.
        assert_eq!(reset_sounds(&store, &settings).await.unwrap(), 0);
    }

    #[test]
    fn test_record_metadata_defaults() {
        let record: SoundRecord = serde_yml::from_str("id: custom_1\nupdated_at: 5\n").unwrap();
        assert_eq!(record.start_time, 0.0);
        assert_eq!(record.end_time, UNSET_END_TIME);
        assert_eq!(record.volume, 1.0);
        assert_eq!(record.fade_in, None);
        assert!(record.blob.is_empty());
    }
}
