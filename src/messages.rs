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

//! Messages exchanged between the trigger side and the playback host.

use serde::{Deserialize, Serialize};

/// Messages sent by the input observer and the settings surface to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerMessage {
    /// Play one sound from the active set.
    TriggerPlay,

    /// The active set or the stored sounds changed.
    SoundUpdated,
}

/// Messages delivered to the playback host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    /// Reconcile the host cache against this active set.
    UpdateCache {
        #[serde(rename = "activeIds")]
        active_ids: Vec<String>,
    },

    /// Play this sound, loading it on demand if needed.
    PlayAudio { id: String },
}
