// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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
use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::{AudioOutput, EndedCallback, OutputError, VoiceRequest};
use crate::playsync::CancelHandle;

struct Voice {
    request: VoiceRequest,
    cancel_handle: CancelHandle,
    on_ended: Option<EndedCallback>,
}

/// A snapshot of a voice started on the mock output.
#[derive(Clone, Debug)]
pub struct StartedVoice {
    pub request: VoiceRequest,
    pub cancel_handle: CancelHandle,
    /// Whether every earlier voice had already been stopped when this one started.
    pub others_stopped: bool,
}

/// A mock output. Doesn't actually play anything; the clock only moves when
/// told to.
pub struct MockOutput {
    time: Mutex<f64>,
    voices: Mutex<Vec<Voice>>,
    started: Mutex<Vec<StartedVoice>>,
    fail: Mutex<bool>,
}

impl MockOutput {
    /// Creates a mock output with its clock at the given time.
    pub fn new(time: f64) -> MockOutput {
        MockOutput {
            time: Mutex::new(time),
            voices: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        }
    }

    /// Moves the clock.
    pub fn set_time(&self, time: f64) {
        *self.time.lock() = time;
    }

    /// Makes subsequent starts fail.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Every voice started so far, in order.
    pub fn started(&self) -> Vec<StartedVoice> {
        self.started.lock().clone()
    }

    /// Number of voices that are neither finished nor cancelled.
    pub fn audible(&self) -> usize {
        self.voices
            .lock()
            .iter()
            .filter(|voice| voice.on_ended.is_some() && !voice.cancel_handle.is_cancelled())
            .count()
    }

    /// Ends the voice at the given index as if it ran out of samples.
    /// Returns false if it had already ended.
    pub fn finish(&self, index: usize) -> bool {
        let on_ended = {
            let mut voices = self.voices.lock();
            voices
                .get_mut(index)
                .and_then(|voice| voice.on_ended.take())
        };
        match on_ended {
            Some(on_ended) => {
                on_ended();
                true
            }
            None => false,
        }
    }

    /// Fires the ended callback of every cancelled voice, as a real output
    /// would on its next render pass.
    pub fn reap(&self) {
        let ended: Vec<EndedCallback> = {
            let mut voices = self.voices.lock();
            voices
                .iter_mut()
                .filter(|voice| voice.cancel_handle.is_cancelled())
                .filter_map(|voice| voice.on_ended.take())
                .collect()
        };
        ended.into_iter().for_each(|on_ended| on_ended());
    }
}

impl Default for MockOutput {
    fn default() -> Self {
        MockOutput::new(0.0)
    }
}

impl AudioOutput for MockOutput {
    fn current_time(&self) -> f64 {
        *self.time.lock()
    }

    fn start(
        &self,
        request: VoiceRequest,
        on_ended: EndedCallback,
    ) -> Result<CancelHandle, OutputError> {
        let span = span!(Level::INFO, "start voice (mock)");
        let _enter = span.enter();

        if *self.fail.lock() {
            return Err(OutputError::Closed);
        }

        info!(
            offset = request.offset,
            duration = request.duration,
            sound = ?request.sound,
            "Starting voice."
        );

        let cancel_handle = CancelHandle::new();
        let mut voices = self.voices.lock();
        let others_stopped = voices
            .iter()
            .all(|voice| voice.on_ended.is_none() || voice.cancel_handle.is_cancelled());
        self.started.lock().push(StartedVoice {
            request: request.clone(),
            cancel_handle: cancel_handle.clone(),
            others_stopped,
        });
        voices.push(Voice {
            request,
            cancel_handle: cancel_handle.clone(),
            on_ended: Some(on_ended),
        });

        Ok(cancel_handle)
    }
}

impl std::fmt::Debug for MockOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockOutput")
            .field("time", &self.current_time())
            .field("voices", &self.voices.lock().len())
            .finish()
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("request", &self.request)
            .field("cancel_handle", &self.cancel_handle)
            .finish()
    }
}
