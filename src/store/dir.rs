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
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use super::{SoundRecord, SoundStore, SoundSummary, StoreError};

const METADATA_EXTENSION: &str = "yaml";
const BLOB_EXTENSION: &str = "bin";

/// A sound store backed by a directory. Each record is a `<id>.yaml` metadata
/// file next to a `<id>.bin` blob. The metadata file is written last, so its
/// presence marks a complete record.
#[derive(Debug, Clone)]
pub struct DirSoundStore {
    root: PathBuf,
}

impl DirSoundStore {
    /// Opens the store at the given directory, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<DirSoundStore, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(DirSoundStore { root })
    }

    /// The directory holding the records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, id: &str) -> Result<(PathBuf, PathBuf), StoreError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }

        Ok((
            self.root.join(format!("{}.{}", id, METADATA_EXTENSION)),
            self.root.join(format!("{}.{}", id, BLOB_EXTENSION)),
        ))
    }
}

async fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl SoundStore for DirSoundStore {
    async fn get(&self, id: &str) -> Result<Option<SoundRecord>, StoreError> {
        let (metadata_path, blob_path) = self.paths(id)?;
        let metadata = match fs::read_to_string(&metadata_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut record: SoundRecord = serde_yml::from_str(&metadata)?;
        record.blob = fs::read(&blob_path).await?;
        if record.id != id {
            warn!(id, stored_id = record.id.as_str(), "Record id doesn't match its file name");
            record.id = id.to_string();
        }
        Ok(Some(record))
    }

    async fn put(&self, record: SoundRecord) -> Result<(), StoreError> {
        let (metadata_path, blob_path) = self.paths(&record.id)?;
        fs::write(&blob_path, &record.blob).await?;
        fs::write(&metadata_path, serde_yml::to_string(&record)?).await?;
        debug!(id = record.id.as_str(), bytes = record.blob.len(), "Record written");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let (metadata_path, blob_path) = self.paths(id)?;
        remove_if_present(&metadata_path).await?;
        remove_if_present(&blob_path).await
    }

    async fn list(&self) -> Result<Vec<SoundSummary>, StoreError> {
        let mut summaries = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == METADATA_EXTENSION) {
                continue;
            }

            match serde_yml::from_str::<SoundRecord>(&fs::read_to_string(&path).await?) {
                Ok(record) => summaries.push(SoundSummary::from(&record)),
                Err(e) => warn!(path = ?path, err = %e, "Skipping unreadable sound record"),
            }
        }
        Ok(summaries)
    }
}
