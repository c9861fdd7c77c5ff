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

//! Short sound cues triggered by typing.
//!
//! A [`dispatcher::Dispatcher`] turns trigger messages into host messages and
//! delivers them through a [`host::HostLifecycle`], which creates the playback
//! host on first use. The host keeps decoded sounds in a
//! [`cache::ResourceCache`] and plays them with a [`playback::PlaybackEngine`],
//! one at a time.

pub mod audio;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod host;
pub mod messages;
pub mod playback;
pub mod playsync;
pub mod store;
#[cfg(test)]
mod testutil;
