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
use std::future::Future;
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::ConfigError;
use crate::store::DEFAULT_SOUND_ID;

/// The ordered set of sound ids kept warm in the playback host.
///
/// Never empty: an empty list collapses to the default sound. Duplicate ids are
/// dropped, keeping the first occurrence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ActiveSet(Vec<String>);

impl ActiveSet {
    /// Gets the ids in order.
    pub fn ids(&self) -> &[String] {
        &self.0
    }

    /// Returns true if the id is part of the set.
    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|active| active == id)
    }

    /// Picks one id uniformly at random.
    pub fn choose(&self) -> &str {
        self.0
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_SOUND_ID)
    }

    /// Returns this set with the given id removed.
    pub fn without(&self, id: &str) -> ActiveSet {
        ActiveSet::from(
            self.0
                .iter()
                .filter(|active| *active != id)
                .cloned()
                .collect::<Vec<String>>(),
        )
    }
}

impl Default for ActiveSet {
    fn default() -> Self {
        ActiveSet(vec![DEFAULT_SOUND_ID.to_string()])
    }
}

impl From<Vec<String>> for ActiveSet {
    fn from(ids: Vec<String>) -> Self {
        let mut deduped: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }

        if deduped.is_empty() {
            ActiveSet::default()
        } else {
            ActiveSet(deduped)
        }
    }
}

impl From<ActiveSet> for Vec<String> {
    fn from(active: ActiveSet) -> Self {
        active.0
    }
}

/// User settings shared by the dispatcher and the settings surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Whether triggers play anything at all. Absent means enabled.
    is_enabled: bool,

    /// The sounds to keep cached and pick from.
    active_ids: ActiveSet,

    /// Single keys that trigger a sound while typing.
    target_keys: Vec<String>,

    /// Words that trigger a sound when composed.
    target_words: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            is_enabled: true,
            active_ids: ActiveSet::default(),
            target_keys: ["c", "a", "t", "C", "A", "T"]
                .iter()
                .map(|key| key.to_string())
                .collect(),
            target_words: ["かわいい", "kawaii", "カワイイ"]
                .iter()
                .map(|word| word.to_string())
                .collect(),
        }
    }
}

impl Settings {
    /// Returns true if triggers are enabled.
    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    /// Gets the active set.
    pub fn active_ids(&self) -> &ActiveSet {
        &self.active_ids
    }

    /// Gets the trigger keys.
    pub fn target_keys(&self) -> &[String] {
        &self.target_keys
    }

    /// Gets the trigger words.
    pub fn target_words(&self) -> &[String] {
        &self.target_words
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.is_enabled = enabled;
    }

    pub fn set_active_ids(&mut self, active_ids: ActiveSet) {
        self.active_ids = active_ids;
    }

    /// Replaces the trigger keys. Each key is trimmed and must be exactly one
    /// character. Duplicates are dropped.
    pub fn set_target_keys(&mut self, keys: Vec<String>) -> Result<(), ConfigError> {
        let mut normalized: Vec<String> = Vec::with_capacity(keys.len());
        for key in keys {
            let key = key.trim();
            if key.chars().count() != 1 {
                return Err(ConfigError::InvalidKey(key.to_string()));
            }
            if !normalized.iter().any(|existing| existing == key) {
                normalized.push(key.to_string());
            }
        }
        self.target_keys = normalized;
        Ok(())
    }

    pub fn set_target_words(&mut self, words: Vec<String>) {
        self.target_words = words;
    }
}

/// Process-wide settings storage that survives restarts.
///
/// The read-modify-write helpers are not atomic across concurrent writers; the
/// settings surface is the only writer.
pub trait SettingsStore: Send + Sync + 'static {
    /// Loads the current settings, falling back to defaults for anything unset.
    fn load(&self) -> impl Future<Output = Result<Settings, ConfigError>> + Send;

    /// Replaces the stored settings.
    fn save(&self, settings: &Settings) -> impl Future<Output = Result<(), ConfigError>> + Send;

    /// Turns triggers on or off.
    fn set_enabled(&self, enabled: bool) -> impl Future<Output = Result<(), ConfigError>> + Send {
        async move {
            let mut settings = self.load().await?;
            settings.set_enabled(enabled);
            self.save(&settings).await
        }
    }

    /// Replaces the active set, returning the normalized set that was stored.
    fn set_active_ids(
        &self,
        ids: Vec<String>,
    ) -> impl Future<Output = Result<ActiveSet, ConfigError>> + Send {
        async move {
            let mut settings = self.load().await?;
            let active = ActiveSet::from(ids);
            settings.set_active_ids(active.clone());
            self.save(&settings).await?;
            Ok(active)
        }
    }

    /// Removes an id from the active set, returning the stored set.
    fn remove_active_id(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<ActiveSet, ConfigError>> + Send {
        async move {
            let mut settings = self.load().await?;
            let active = settings.active_ids().without(id);
            settings.set_active_ids(active.clone());
            self.save(&settings).await?;
            Ok(active)
        }
    }
}

/// Settings persisted as a YAML file.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    /// Creates a settings store at the given path. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> FileSettings {
        FileSettings { path: path.into() }
    }

    /// The settings file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettings {
    async fn load(&self) -> Result<Settings, ConfigError> {
        Ok(Config::builder()
            .add_source(
                File::from(self.path.as_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .build()?
            .try_deserialize::<Settings>()?)
    }

    async fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let serialized = serde_yml::to_string(settings)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serialized).await?;
        debug!(path = ?self.path, "Settings saved");
        Ok(())
    }
}

/// Settings kept in memory.
#[derive(Debug, Default)]
pub struct MemorySettings {
    settings: RwLock<Settings>,
}

impl MemorySettings {
    /// Creates an in-memory store holding the given settings.
    pub fn new(settings: Settings) -> MemorySettings {
        MemorySettings {
            settings: RwLock::new(settings),
        }
    }
}

impl SettingsStore for MemorySettings {
    async fn load(&self) -> Result<Settings, ConfigError> {
        Ok(self.settings.read().clone())
    }

    async fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        *self.settings.write() = settings.clone();
        Ok(())
    }
}
