//! UI-facing loudness and activity classification.

use serde::{Deserialize, Serialize};

use crate::constants::{AUDIBLE_RMS, MAGNITUDE_BASE, MAGNITUDE_SCALE, MIC_BLOCK_GRACE_SAMPLES};

/// Activity classification derived per chunk; purely observational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MagnitudeState {
    NotYetTalked,
    MicMayBeBlocked,
    Talking,
    /// Trailing silence is approaching the stop threshold.
    EndingSoonSilence,
    /// The utterance buffer is close to its hard limit.
    EndingSoonFull,
}

/// Per-chunk observations the tracker combines with its own history.
#[derive(Debug, Clone, Copy)]
pub struct MagnitudeContext {
    pub has_talked: bool,
    pub ending_soon: bool,
    pub nearing_capacity: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Magnitude {
    /// Bounded monotone loudness score in [0, 1).
    pub value: f32,
    pub state: MagnitudeState,
}

/// Derives [`Magnitude`] updates from chunk loudness.
pub struct MagnitudeTracker {
    block_detection: bool,
    samples_seen: usize,
    heard_anything: bool,
}

impl MagnitudeTracker {
    pub fn new(block_detection: bool) -> Self {
        Self {
            block_detection,
            samples_seen: 0,
            heard_anything: false,
        }
    }

    pub fn update(&mut self, chunk: &[f32], ctx: MagnitudeContext) -> Magnitude {
        self.samples_seen += chunk.len();
        let rms = utter_vad::rms(chunk);
        if rms > AUDIBLE_RMS {
            self.heard_anything = true;
        }

        // Near-silence maps near 0; loud speech saturates near 1.
        let value = 1.0 - MAGNITUDE_BASE.powf(MAGNITUDE_SCALE * rms);

        let state = if ctx.nearing_capacity {
            MagnitudeState::EndingSoonFull
        } else if ctx.ending_soon {
            MagnitudeState::EndingSoonSilence
        } else if ctx.has_talked {
            MagnitudeState::Talking
        } else if self.mic_may_be_blocked() {
            MagnitudeState::MicMayBeBlocked
        } else {
            MagnitudeState::NotYetTalked
        };

        Magnitude { value, state }
    }

    fn mic_may_be_blocked(&self) -> bool {
        self.block_detection
            && !self.heard_anything
            && self.samples_seen >= MIC_BLOCK_GRACE_SAMPLES
    }
}
