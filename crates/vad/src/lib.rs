//! Voice-activity segmentation over fixed 30ms frames.
//!
//! The per-frame speech/non-speech decision is delegated to an injected
//! [`FrameClassifier`]; this crate owns the frame alignment, run counters
//! and hysteresis that turn those decisions into "speech started" and
//! "speech ended" signals.

use serde::{Deserialize, Serialize};

/// Samples per VAD frame (30ms at 16kHz).
pub const FRAME_SAMPLES: usize = 480;

#[derive(Debug, thiserror::Error)]
pub enum VadError {
    #[error("classifier inference error: {0}")]
    Inference(String),
}

pub type Result<T> = std::result::Result<T, VadError>;

/// Per-frame speech/non-speech primitive.
///
/// Implementations receive exactly [`FRAME_SAMPLES`] normalized samples per
/// call. Stateful classifiers reset between recording sessions.
pub trait FrameClassifier: Send {
    fn classify(&mut self, frame: &[f32]) -> Result<bool>;

    fn reset(&mut self) {}
}

/// RMS-threshold classifier, the default primitive.
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self { threshold: 0.01 }
    }
}

impl FrameClassifier for EnergyClassifier {
    fn classify(&mut self, frame: &[f32]) -> Result<bool> {
        Ok(rms(frame) > self.threshold)
    }
}

/// Root-mean-square loudness of a chunk of normalized samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Hysteresis thresholds for the segmenter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmenterSettings {
    /// Samples that must elapse before "has talked" may latch. Guards
    /// against a session-start chime registering as speech.
    pub warmup_samples: usize,
    /// Consecutive speech frames that latch "has talked".
    pub speech_run_frames: u32,
    /// Consecutive non-speech frames that raise the advisory ending-soon
    /// signal (~1s).
    pub ending_silence_frames: u32,
    /// Consecutive non-speech frames that declare end-of-speech (~2s).
    pub stop_silence_frames: u32,
    /// Frame RMS that latches "has talked" regardless of the classifier.
    pub talk_rms_threshold: f32,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            warmup_samples: 9600, // 0.6s at 16kHz
            speech_run_frames: 8,
            ending_silence_frames: 33,
            stop_silence_frames: 66,
            talk_rms_threshold: 0.05,
        }
    }
}

/// Tracks speech/silence runs across whole frames and decides when the
/// utterance has started and ended.
///
/// Chunks of any size are accepted; a partial trailing frame is buffered
/// until completed by the next chunk.
pub struct Segmenter {
    classifier: Box<dyn FrameClassifier>,
    settings: SegmenterSettings,
    pending: Vec<f32>,
    speech_run: u32,
    silence_run: u32,
    samples_seen: usize,
    has_talked: bool,
    paused: bool,
    enabled: bool,
}

impl Segmenter {
    pub fn new(classifier: Box<dyn FrameClassifier>) -> Self {
        Self::with_settings(classifier, SegmenterSettings::default())
    }

    pub fn with_settings(classifier: Box<dyn FrameClassifier>, settings: SegmenterSettings) -> Self {
        Self {
            classifier,
            settings,
            pending: Vec::with_capacity(FRAME_SAMPLES),
            speech_run: 0,
            silence_run: 0,
            samples_seen: 0,
            has_talked: false,
            paused: false,
            enabled: true,
        }
    }

    /// Feed a chunk of samples, classifying every whole frame it completes.
    pub fn push(&mut self, chunk: &[f32]) {
        self.pending.extend_from_slice(chunk);
        while self.pending.len() >= FRAME_SAMPLES {
            let frame: Vec<f32> = self.pending.drain(..FRAME_SAMPLES).collect();
            self.samples_seen += FRAME_SAMPLES;
            self.process_frame(&frame);
        }
    }

    fn process_frame(&mut self, frame: &[f32]) {
        if self.enabled {
            let speech = match self.classifier.classify(frame) {
                Ok(speech) => speech,
                Err(e) => {
                    tracing::warn!(error = %e, "frame classifier failed, treating as non-speech");
                    false
                }
            };

            if speech {
                self.speech_run += 1;
                self.silence_run = 0;
            } else {
                self.silence_run += 1;
                self.speech_run = 0;
            }

            // A paused segmenter never accumulates silence toward a stop.
            if self.paused {
                self.silence_run = 0;
            }
        }

        if !self.has_talked && self.samples_seen >= self.settings.warmup_samples {
            let loud = rms(frame) > self.settings.talk_rms_threshold;
            if loud || self.speech_run > self.settings.speech_run_frames {
                self.has_talked = true;
                tracing::debug!(samples_seen = self.samples_seen, "speech started");
            }
        }
    }

    /// True once the utterance has audibly started.
    pub fn has_talked(&self) -> bool {
        self.has_talked
    }

    /// Advisory: silence has run long enough that a stop is likely soon.
    pub fn ending_soon(&self) -> bool {
        self.enabled
            && self.has_talked
            && !self.paused
            && self.silence_run > self.settings.ending_silence_frames
    }

    /// True once trailing silence has crossed the stop threshold.
    pub fn end_of_speech(&self) -> bool {
        self.enabled
            && self.has_talked
            && !self.paused
            && self.silence_run > self.settings.stop_silence_frames
    }

    /// Transiently suspend stop decisions (e.g. during a caller gesture).
    pub fn set_paused(&mut self, paused: bool) {
        if paused && !self.paused {
            self.silence_run = 0;
        }
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Disable classification entirely; warm-up and the RMS "has talked"
    /// latch keep working so loudness states remain available.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.speech_run = 0;
            self.silence_run = 0;
        }
    }

    pub fn samples_seen(&self) -> usize {
        self.samples_seen
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.speech_run = 0;
        self.silence_run = 0;
        self.samples_seen = 0;
        self.has_talked = false;
        self.paused = false;
        self.classifier.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voiced_frame() -> Vec<f32> {
        (0..FRAME_SAMPLES)
            .map(|i| 0.3 * (i as f32 * 0.2).sin())
            .collect()
    }

    fn silent_frame() -> Vec<f32> {
        vec![0.0; FRAME_SAMPLES]
    }

    fn segmenter() -> Segmenter {
        Segmenter::new(Box::<EnergyClassifier>::default())
    }

    #[test]
    fn test_partial_frames_are_buffered() {
        let mut seg = segmenter();
        seg.push(&vec![0.0; FRAME_SAMPLES - 1]);
        assert_eq!(seg.samples_seen(), 0);
        seg.push(&[0.0]);
        assert_eq!(seg.samples_seen(), FRAME_SAMPLES);
    }

    #[test]
    fn test_warmup_gates_has_talked() {
        let mut seg = segmenter();
        let warmup_frames = SegmenterSettings::default().warmup_samples / FRAME_SAMPLES;

        // Loud audio inside the warm-up window must not latch.
        for _ in 0..warmup_frames - 1 {
            seg.push(&voiced_frame());
            assert!(!seg.has_talked());
        }
        seg.push(&voiced_frame());
        assert!(seg.has_talked());
    }

    #[test]
    fn test_stop_index_matches_silence_threshold() {
        let settings = SegmenterSettings::default();
        let warmup_frames = settings.warmup_samples / FRAME_SAMPLES; // 20
        let voiced = 20usize;
        let trailing = 120usize;

        let mut seg = segmenter();
        let mut first_stop = None;
        let mut frame_index = 0usize;

        for _ in 0..warmup_frames {
            seg.push(&silent_frame());
            frame_index += 1;
            assert!(!seg.end_of_speech());
        }
        for _ in 0..voiced {
            seg.push(&voiced_frame());
            frame_index += 1;
            assert!(!seg.end_of_speech());
        }
        for _ in 0..trailing {
            seg.push(&silent_frame());
            frame_index += 1;
            if seg.end_of_speech() && first_stop.is_none() {
                first_stop = Some(frame_index);
            }
        }

        let expected = warmup_frames + voiced + settings.stop_silence_frames as usize;
        let first_stop = first_stop.expect("end of speech never declared");
        assert!(
            first_stop >= expected && first_stop <= expected + 1,
            "stopped at frame {first_stop}, expected ~{expected}"
        );
    }

    #[test]
    fn test_ending_soon_precedes_stop() {
        let settings = SegmenterSettings::default();
        let mut seg = segmenter();
        for _ in 0..25 {
            seg.push(&voiced_frame());
        }
        assert!(seg.has_talked());

        for _ in 0..=settings.ending_silence_frames {
            seg.push(&silent_frame());
        }
        assert!(seg.ending_soon());
        assert!(!seg.end_of_speech());
    }

    #[test]
    fn test_pause_holds_silence_run() {
        let mut seg = segmenter();
        for _ in 0..25 {
            seg.push(&voiced_frame());
        }
        seg.set_paused(true);
        for _ in 0..200 {
            seg.push(&silent_frame());
        }
        assert!(!seg.end_of_speech());

        seg.set_paused(false);
        for _ in 0..=SegmenterSettings::default().stop_silence_frames {
            seg.push(&silent_frame());
        }
        assert!(seg.end_of_speech());
    }

    #[test]
    fn test_no_stop_before_has_talked() {
        let mut seg = segmenter();
        for _ in 0..500 {
            seg.push(&silent_frame());
        }
        assert!(!seg.has_talked());
        assert!(!seg.end_of_speech());
    }

    #[test]
    fn test_disabled_segmenter_never_stops() {
        let mut seg = segmenter();
        seg.set_enabled(false);
        for _ in 0..25 {
            seg.push(&voiced_frame());
        }
        // RMS latch still works while classification is off.
        assert!(seg.has_talked());
        for _ in 0..200 {
            seg.push(&silent_frame());
        }
        assert!(!seg.end_of_speech());
        assert!(!seg.ending_soon());
    }

    struct FailingClassifier;

    impl FrameClassifier for FailingClassifier {
        fn classify(&mut self, _frame: &[f32]) -> Result<bool> {
            Err(VadError::Inference("model crashed".into()))
        }
    }

    #[test]
    fn test_classifier_error_counts_as_silence() {
        let mut seg = Segmenter::new(Box::new(FailingClassifier));
        for _ in 0..25 {
            seg.push(&voiced_frame());
        }
        // The RMS latch still fires; the failing classifier contributes
        // silence so the stop countdown keeps running.
        assert!(seg.has_talked());
        for _ in 0..=SegmenterSettings::default().stop_silence_frames {
            seg.push(&silent_frame());
        }
        assert!(seg.end_of_speech());
    }
}
