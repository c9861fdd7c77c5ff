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
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{error, info};

use super::{AudioOutput, DecodedSound, EndedCallback, OutputError, VoiceRequest};
use crate::playback::Envelope;
use crate::playsync::CancelHandle;

/// A voice being mixed into the output.
struct ActiveVoice {
    sound: DecodedSound,
    envelope: Envelope,
    cancel_handle: CancelHandle,
    on_ended: Option<EndedCallback>,
    /// Read position in source frames. Fractional when the rates differ.
    position: f64,
    /// Source frame at which the voice stops.
    end: f64,
    /// Source frames consumed per output frame.
    step: f64,
}

impl ActiveVoice {
    fn new(
        request: VoiceRequest,
        cancel_handle: CancelHandle,
        on_ended: EndedCallback,
        output_rate: u32,
    ) -> ActiveVoice {
        let source_rate = request.sound.sample_rate() as f64;
        let frames = request.sound.frames() as f64;
        let position = (request.offset * source_rate).clamp(0.0, frames);
        let end = match request.duration {
            Some(duration) => (position + duration * source_rate).min(frames),
            None => frames,
        };
        ActiveVoice {
            step: source_rate / output_rate as f64,
            sound: request.sound,
            envelope: request.envelope,
            cancel_handle,
            on_ended: Some(on_ended),
            position,
            end,
        }
    }

    /// Mixes this voice into the buffer. Returns true once the voice is done.
    fn render(&mut self, out: &mut [f32], channels: usize, first_frame: u64, rate: f64) -> bool {
        if self.cancel_handle.is_cancelled() {
            return true;
        }

        let source = self.sound.samples();
        let source_channels = self.sound.channel_count() as usize;
        for (i, frame) in out.chunks_mut(channels).enumerate() {
            if self.position >= self.end {
                return true;
            }

            let gain = self
                .envelope
                .gain_at((first_frame + i as u64) as f64 / rate);
            let index = self.position as usize;
            let fraction = (self.position - index as f64) as f32;
            for (channel, sample) in frame.iter_mut().enumerate() {
                // Mono is spread to every channel; extra source channels are dropped.
                let source_channel = if source_channels == 1 {
                    0
                } else if channel < source_channels {
                    channel
                } else {
                    continue;
                };
                let current = source[index * source_channels + source_channel];
                let next = source
                    .get((index + 1) * source_channels + source_channel)
                    .copied()
                    .unwrap_or(current);
                *sample += (current + (next - current) * fraction) * gain;
            }
            self.position += self.step;
        }

        self.position >= self.end
    }
}

/// Mixes voices into the buffer and advances the clock. Returns the callbacks
/// of voices that ended, to be called once the voice lock is released.
fn mix(
    voices: &Mutex<Vec<ActiveVoice>>,
    clock: &AtomicU64,
    out: &mut [f32],
    channels: usize,
    rate: f64,
) -> Vec<EndedCallback> {
    out.fill(0.0);
    let first_frame = clock.load(Ordering::Acquire);
    let mut ended = Vec::new();
    voices.lock().retain_mut(|voice| {
        let done = voice.render(out, channels, first_frame, rate);
        if done {
            ended.extend(voice.on_ended.take());
        }
        !done
    });
    clock.fetch_add((out.len() / channels) as u64, Ordering::Release);
    ended
}

/// Plays voices on the default output device.
pub struct CpalOutput {
    sample_rate: u32,
    channels: u16,
    voices: Arc<Mutex<Vec<ActiveVoice>>>,
    /// Output frames rendered so far.
    clock: Arc<AtomicU64>,
    shutdown_tx: Option<crossbeam_channel::Sender<()>>,
    output_thread: Option<thread::JoinHandle<()>>,
}

impl CpalOutput {
    /// Opens the default output device. The stream lives on its own thread.
    pub fn open() -> Result<CpalOutput, OutputError> {
        let voices: Arc<Mutex<Vec<ActiveVoice>>> = Arc::new(Mutex::new(Vec::new()));
        let clock = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let output_thread = {
            let voices = voices.clone();
            let clock = clock.clone();
            thread::spawn(move || {
                let stream = match build_stream(voices, clock) {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Returns once the sender is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
        };

        let (sample_rate, channels) = ready_rx.recv().map_err(|_| OutputError::Closed)??;
        info!(sample_rate, channels, "Output stream started.");

        Ok(CpalOutput {
            sample_rate,
            channels,
            voices,
            clock,
            shutdown_tx: Some(shutdown_tx),
            output_thread: Some(output_thread),
        })
    }
}

fn build_stream(
    voices: Arc<Mutex<Vec<ActiveVoice>>>,
    clock: Arc<AtomicU64>,
) -> Result<(cpal::Stream, (u32, u16)), OutputError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or(OutputError::NoDevice)?;
    let supported = device
        .default_output_config()
        .map_err(|e| OutputError::Stream(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(OutputError::UnsupportedFormat(format!(
            "{:?}",
            supported.sample_format()
        )));
    }

    let config: cpal::StreamConfig = supported.config();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    let rate = sample_rate as f64;
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let ended = mix(&voices, &clock, data, channels as usize, rate);
                ended.into_iter().for_each(|on_ended| on_ended());
            },
            |err| error!(err = %err, "Output stream error."),
            None,
        )
        .map_err(|e| OutputError::Stream(e.to_string()))?;
    stream
        .play()
        .map_err(|e| OutputError::Stream(e.to_string()))?;

    Ok((stream, (sample_rate, channels)))
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn start(
        &self,
        request: VoiceRequest,
        on_ended: EndedCallback,
    ) -> Result<CancelHandle, OutputError> {
        if self.shutdown_tx.is_none() {
            return Err(OutputError::Closed);
        }
        let cancel_handle = CancelHandle::new();
        self.voices.lock().push(ActiveVoice::new(
            request,
            cancel_handle.clone(),
            on_ended,
            self.sample_rate,
        ));
        Ok(cancel_handle)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.shutdown_tx.take();
        if let Some(output_thread) = self.output_thread.take() {
            if output_thread.join().is_err() {
                error!("Output thread panicked.");
            }
        }

        let remaining: Vec<EndedCallback> = self
            .voices
            .lock()
            .drain(..)
            .filter_map(|mut voice| voice.on_ended.take())
            .collect();
        remaining.into_iter().for_each(|on_ended| on_ended());
    }
}

impl fmt::Debug for CpalOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalOutput")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}
