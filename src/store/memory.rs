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
use std::collections::HashMap;

use parking_lot::RwLock;

use super::{SoundRecord, SoundStore, SoundSummary, StoreError};

/// A sound store that lives entirely in memory.
#[derive(Default)]
pub struct MemorySoundStore {
    records: RwLock<HashMap<String, SoundRecord>>,
}

impl MemorySoundStore {
    /// Creates an empty store.
    pub fn new() -> MemorySoundStore {
        MemorySoundStore::default()
    }

    /// Creates a store holding the given records.
    pub fn with_records(records: impl IntoIterator<Item = SoundRecord>) -> MemorySoundStore {
        MemorySoundStore {
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|record| (record.id.clone(), record))
                    .collect(),
            ),
        }
    }
}

impl SoundStore for MemorySoundStore {
    async fn get(&self, id: &str) -> Result<Option<SoundRecord>, StoreError> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn put(&self, record: SoundRecord) -> Result<(), StoreError> {
        self.records.write().insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.records.write().remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SoundSummary>, StoreError> {
        Ok(self.records.read().values().map(SoundSummary::from).collect())
    }
}

impl std::fmt::Debug for MemorySoundStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySoundStore")
            .field("records", &self.records.read().len())
            .finish()
    }
}
