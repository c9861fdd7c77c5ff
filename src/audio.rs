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
use crate::playback::Envelope;
use crate::playsync::CancelHandle;

#[cfg(feature = "device")]
pub mod cpal;
pub mod decode;
pub mod mock;

pub use decode::{decode, DecodeError, DecodedSound};

/// Error types for audio output.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("No output device available")]
    NoDevice,

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Output stream error: {0}")]
    Stream(String),

    #[error("Output has been closed")]
    Closed,
}

/// A single sound to render on an output.
#[derive(Clone, Debug)]
pub struct VoiceRequest {
    pub sound: DecodedSound,
    /// Where to start reading the sound, in seconds.
    pub offset: f64,
    /// How much of the sound to play, in seconds. `None` plays to the end.
    pub duration: Option<f64>,
    /// Gain automation, expressed on the output clock.
    pub envelope: Envelope,
}

/// Called once a voice has stopped, whether it finished or was cancelled.
pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// An audio output with its own clock.
pub trait AudioOutput: Send + Sync + 'static {
    /// The output clock, in seconds.
    fn current_time(&self) -> f64;

    /// Starts a voice. The returned handle stops it; `on_ended` fires exactly
    /// once when the voice stops for any reason.
    fn start(
        &self,
        request: VoiceRequest,
        on_ended: EndedCallback,
    ) -> Result<CancelHandle, OutputError>;
}
