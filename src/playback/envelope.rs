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

//! Playback configuration and the volume envelope derived from it.

use crate::store::{SoundRecord, UNSET_END_TIME};

/// The smallest gain the envelope uses. Exponential ramps can't reach or
/// cross zero, so silence is approximated with this value.
pub const GAIN_FLOOR: f32 = 0.001;

/// Fade-in used when a record doesn't specify one.
pub const DEFAULT_FADE_IN: f64 = 0.05;

/// Fade-out used when a record doesn't specify one.
pub const DEFAULT_FADE_OUT: f64 = 0.1;

/// How a cached sound should be played. All times are in seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackConfig {
    pub start_time: f64,
    /// Never the unset sentinel once the sound has been decoded.
    pub end_time: f64,
    pub volume: f32,
    pub fade_in: f64,
    pub fade_out: f64,
}

impl PlaybackConfig {
    /// The built-in configuration of the bundled default sound.
    pub fn builtin_default() -> PlaybackConfig {
        PlaybackConfig {
            start_time: 0.0,
            end_time: UNSET_END_TIME,
            volume: 1.0,
            fade_in: DEFAULT_FADE_IN,
            fade_out: DEFAULT_FADE_OUT,
        }
    }

    /// Builds a configuration from a stored record, filling in default fades.
    pub fn from_record(record: &SoundRecord) -> PlaybackConfig {
        PlaybackConfig {
            start_time: record.start_time,
            end_time: record.end_time,
            volume: record.volume,
            fade_in: record.fade_in.unwrap_or(DEFAULT_FADE_IN),
            fade_out: record.fade_out.unwrap_or(DEFAULT_FADE_OUT),
        }
    }

    /// Replaces an unset end time with the decoded duration.
    pub fn resolve_end_time(&mut self, duration: f64) {
        if self.end_time == UNSET_END_TIME {
            self.end_time = duration;
        }
    }

    /// The played length, clamped at zero. Zero means "play to the natural end".
    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }
}

/// One step of a gain automation timeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GainSegment {
    /// Jump to a value at the given time.
    Set { at: f64, value: f32 },

    /// Move exponentially from one value to another over `[start, end]`.
    Ramp {
        start: f64,
        end: f64,
        from: f32,
        to: f32,
    },
}

impl GainSegment {
    fn start(&self) -> f64 {
        match self {
            GainSegment::Set { at, .. } => *at,
            GainSegment::Ramp { start, .. } => *start,
        }
    }
}

/// A volume envelope: fade-in, sustain, optional fade-out.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    segments: Vec<GainSegment>,
}

impl Envelope {
    /// Computes the envelope for a sound starting at `t0` on the output clock.
    pub fn compute(config: &PlaybackConfig, t0: f64) -> Envelope {
        let target = config.volume.max(GAIN_FLOOR);
        let duration = config.duration();
        let mut segments = vec![GainSegment::Set {
            at: t0,
            value: GAIN_FLOOR,
        }];

        if config.fade_in > 0.0 {
            segments.push(GainSegment::Ramp {
                start: t0,
                end: t0 + config.fade_in,
                from: GAIN_FLOOR,
                to: target,
            });
        } else {
            segments.push(GainSegment::Set {
                at: t0,
                value: target,
            });
        }

        // A fade-out at least as long as the sound would overlap the fade-in,
        // and one can't start before the fade-in is done.
        let fade_out_start = config.fade_in.max(duration - config.fade_out);
        if config.fade_out > 0.0 && duration > config.fade_out && fade_out_start < duration {
            segments.push(GainSegment::Ramp {
                start: t0 + fade_out_start,
                end: t0 + duration,
                from: target,
                to: GAIN_FLOOR,
            });
        }

        Envelope { segments }
    }

    /// The automation steps in time order.
    pub fn segments(&self) -> &[GainSegment] {
        &self.segments
    }

    /// The gain at time `t`. Before the first step the gain is the floor.
    pub fn gain_at(&self, t: f64) -> f32 {
        let mut gain = GAIN_FLOOR;
        for segment in &self.segments {
            if segment.start() > t {
                break;
            }
            gain = match *segment {
                GainSegment::Set { value, .. } => value,
                GainSegment::Ramp {
                    start,
                    end,
                    from,
                    to,
                } => {
                    if t >= end || end <= start {
                        to
                    } else {
                        let progress = ((t - start) / (end - start)) as f32;
                        from * (to / from).powf(progress)
                    }
                }
            };
        }
        gain
    }
}
