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

//! Plays cached sounds, one at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, span, Level};

use crate::audio::{AudioOutput, OutputError, VoiceRequest};
use crate::cache::CacheEntry;
use crate::playsync::CancelHandle;

mod envelope;

pub use envelope::{
    Envelope, GainSegment, PlaybackConfig, DEFAULT_FADE_IN, DEFAULT_FADE_OUT, GAIN_FLOOR,
};

/// The sound currently being played.
#[derive(Debug)]
struct PlaybackSession {
    id: u64,
    sound_id: String,
    cancel_handle: CancelHandle,
}

/// The current session, plus the newest session id an output reported as ended.
#[derive(Debug, Default)]
struct SessionSlot {
    current: Mutex<Option<PlaybackSession>>,
    ended: AtomicU64,
}

impl SessionSlot {
    /// Locks the slot, dropping a session that ended while the lock was busy.
    fn lock(&self) -> MutexGuard<'_, Option<PlaybackSession>> {
        let mut current = self.current.lock();
        let ended = self.ended.load(Ordering::Acquire);
        if current.as_ref().is_some_and(|session| session.id <= ended) {
            *current = None;
        }
        current
    }
}

/// Plays sounds on an output. Starting a sound stops whatever was playing.
pub struct PlaybackEngine<O: AudioOutput> {
    output: Arc<O>,
    current: Arc<SessionSlot>,
    next_session_id: AtomicU64,
}

impl<O: AudioOutput> PlaybackEngine<O> {
    pub fn new(output: Arc<O>) -> PlaybackEngine<O> {
        PlaybackEngine {
            output,
            current: Arc::new(SessionSlot::default()),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// The output sounds are played on.
    pub fn output(&self) -> &Arc<O> {
        &self.output
    }

    /// Plays the given sound, stopping the current one first. Returns the new
    /// session's id.
    pub fn play(&self, entry: &CacheEntry) -> Result<u64, OutputError> {
        let span = span!(Level::INFO, "play", sound = entry.id.as_str());
        let _enter = span.enter();

        // The slot stays locked from stop to start so concurrent plays can't
        // both end up audible.
        let mut current = self.current.lock();
        if let Some(previous) = current.take() {
            if previous.cancel_handle.cancel() {
                debug!(
                    session = previous.id,
                    sound = previous.sound_id.as_str(),
                    "Stopped previous sound."
                );
            }
        }

        let config = &entry.config;
        let t0 = self.output.current_time();
        let duration = config.duration();
        let request = VoiceRequest {
            sound: entry.sound.clone(),
            offset: config.start_time,
            duration: (duration > 0.0).then_some(duration),
            envelope: Envelope::compute(config, t0),
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::downgrade(&self.current);
        let cancel_handle = self
            .output
            .start(request, Box::new(move || clear_session(&slot, session_id)))?;

        debug!(
            session = session_id,
            offset = config.start_time,
            duration,
            volume = config.volume,
            "Started sound."
        );
        *current = Some(PlaybackSession {
            id: session_id,
            sound_id: entry.id.clone(),
            cancel_handle,
        });

        Ok(session_id)
    }

    /// Stops the current sound, if any.
    pub fn stop(&self) {
        if let Some(session) = self.current.lock().take() {
            session.cancel_handle.cancel();
            debug!(session = session.id, "Stopped sound.");
        }
    }

    /// The id of the session that is currently playing.
    pub fn current_session_id(&self) -> Option<u64> {
        self.current.lock().as_ref().map(|session| session.id)
    }
}

/// Clears the slot, but only if it still holds the session that ended. A
/// later session must not be cleared by an earlier one finishing.
///
/// Session ids only grow and the slot always holds the newest session, so
/// recording the ended id is enough for the next lock to drop it when the slot
/// is busy here.
fn clear_session(slot: &Weak<SessionSlot>, session_id: u64) {
    let Some(slot) = slot.upgrade() else {
        return;
    };
    slot.ended.fetch_max(session_id, Ordering::AcqRel);
    // An output may end a voice from within start while play holds the lock.
    let Some(mut current) = slot.current.try_lock() else {
        return;
    };
    if current
        .as_ref()
        .is_some_and(|session| session.id == session_id)
    {
        *current = None;
    }
}

impl<O: AudioOutput> Drop for PlaybackEngine<O> {
    fn drop(&mut self) {
        self.stop();
    }
}
