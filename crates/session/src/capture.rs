//! The real-time capture loop: read, accumulate, segment, classify.
//!
//! Runs on a blocking task for the whole recording phase. Cancellation is
//! checked at least once per chunk, including on the catch-up drain path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use utter_audio::FrameSource;
use utter_vad::Segmenter;

use crate::accumulator::{AppendOutcome, SampleAccumulator};
use crate::constants::{BUFFER_TAIL_WARNING_SAMPLES, CHUNK_SAMPLES};
use crate::magnitude::{MagnitudeContext, MagnitudeState, MagnitudeTracker};

/// Why recording stopped. The cause feeds one stop transition but stays
/// distinct so callers can tell a cut-off from detected silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    EndOfSpeech,
    CapacityExceeded,
    CallerStop,
    StreamEnded,
}

pub(crate) enum CaptureEvent {
    Magnitude { value: f32, state: MagnitudeState },
}

pub(crate) enum CaptureResult {
    Stopped { samples: Vec<f32>, cause: StopCause },
    Cancelled,
}

pub(crate) struct CaptureTask {
    pub source: Box<dyn FrameSource>,
    pub segmenter: Segmenter,
    pub accumulator: SampleAccumulator,
    pub magnitude: MagnitudeTracker,
    pub vad_enabled: bool,
    pub vad_paused: Arc<AtomicBool>,
    pub stop: CancellationToken,
    pub cancel: CancellationToken,
    pub events: mpsc::UnboundedSender<CaptureEvent>,
}

impl CaptureTask {
    pub(crate) fn run(mut self) -> CaptureResult {
        let cause = 'capture: loop {
            if self.cancel.is_cancelled() {
                return CaptureResult::Cancelled;
            }
            if self.stop.is_cancelled() {
                break StopCause::CallerStop;
            }

            let chunk = match self.source.read(CHUNK_SAMPLES) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(error = %e, "capture read failed");
                    break StopCause::StreamEnded;
                }
            };
            if chunk.len() < CHUNK_SAMPLES {
                if !chunk.is_empty() {
                    self.ingest(&chunk);
                }
                break StopCause::StreamEnded;
            }
            if let Some(cause) = self.ingest(&chunk) {
                break cause;
            }

            // Drain whatever queued up while we were processing.
            loop {
                if self.cancel.is_cancelled() {
                    return CaptureResult::Cancelled;
                }
                let extra = match self.source.try_read(CHUNK_SAMPLES) {
                    Ok(extra) => extra,
                    Err(e) => {
                        tracing::warn!(error = %e, "capture drain failed");
                        break 'capture StopCause::StreamEnded;
                    }
                };
                if extra.is_empty() {
                    break;
                }
                if let Some(cause) = self.ingest(&extra) {
                    break 'capture cause;
                }
            }
        };

        tracing::info!(?cause, samples = self.accumulator.len(), "recording stopped");
        CaptureResult::Stopped {
            samples: self.accumulator.into_samples(),
            cause,
        }
    }

    fn ingest(&mut self, chunk: &[f32]) -> Option<StopCause> {
        self.segmenter
            .set_paused(self.vad_paused.load(Ordering::Acquire));

        let outcome = self.accumulator.append(chunk);
        self.segmenter.push(chunk);

        let magnitude = self.magnitude.update(
            chunk,
            MagnitudeContext {
                has_talked: self.segmenter.has_talked(),
                ending_soon: self.vad_enabled && self.segmenter.ending_soon(),
                nearing_capacity: self
                    .accumulator
                    .nearing_capacity(BUFFER_TAIL_WARNING_SAMPLES),
            },
        );
        let _ = self.events.send(CaptureEvent::Magnitude {
            value: magnitude.value,
            state: magnitude.state,
        });

        if outcome == AppendOutcome::Full {
            return Some(StopCause::CapacityExceeded);
        }
        if self.vad_enabled && self.segmenter.end_of_speech() {
            return Some(StopCause::EndOfSpeech);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use utter_vad::{EnergyClassifier, SegmenterSettings, FRAME_SAMPLES};

    struct ScriptedSource {
        chunks: VecDeque<Vec<f32>>,
    }

    impl ScriptedSource {
        fn new(chunks: Vec<Vec<f32>>) -> Self {
            Self {
                chunks: chunks.into(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn read(&mut self, _max: usize) -> utter_audio::Result<Vec<f32>> {
            Ok(self.chunks.pop_front().unwrap_or_default())
        }

        fn try_read(&mut self, _max: usize) -> utter_audio::Result<Vec<f32>> {
            Ok(Vec::new())
        }
    }

    fn task(source: ScriptedSource, accumulator: SampleAccumulator, vad_enabled: bool) -> (CaptureTask, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let task = CaptureTask {
            source: Box::new(source),
            segmenter: Segmenter::new(Box::<EnergyClassifier>::default()),
            accumulator,
            magnitude: MagnitudeTracker::new(false),
            vad_enabled,
            vad_paused: Arc::new(AtomicBool::new(false)),
            stop: CancellationToken::new(),
            cancel: CancellationToken::new(),
            events,
        };
        (task, rx)
    }

    fn voiced_chunk() -> Vec<f32> {
        (0..CHUNK_SAMPLES)
            .map(|i| 0.3 * (i as f32 * 0.2).sin())
            .collect()
    }

    fn silent_chunk() -> Vec<f32> {
        vec![0.0; CHUNK_SAMPLES]
    }

    #[test]
    fn test_vad_silence_stops_capture() {
        let settings = SegmenterSettings::default();
        let mut chunks = Vec::new();
        // Warm-up plus speech, then more trailing silence than the stop
        // threshold requires.
        let warmup_chunks = settings.warmup_samples / CHUNK_SAMPLES + 1;
        for _ in 0..warmup_chunks + 20 {
            chunks.push(voiced_chunk());
        }
        let silence_chunks =
            (settings.stop_silence_frames as usize + 5) * FRAME_SAMPLES / CHUNK_SAMPLES + 1;
        for _ in 0..silence_chunks {
            chunks.push(silent_chunk());
        }

        let fed: usize = chunks.iter().map(Vec::len).sum();
        let (task, _rx) = task(
            ScriptedSource::new(chunks),
            SampleAccumulator::new(EPOCH_FOR_TESTS, None),
            true,
        );
        match task.run() {
            CaptureResult::Stopped { samples, cause } => {
                assert_eq!(cause, StopCause::EndOfSpeech);
                // Stopped before the tail was exhausted.
                assert!(samples.len() <= fed);
                assert!(!samples.is_empty());
            }
            CaptureResult::Cancelled => panic!("unexpected cancellation"),
        }
    }

    const EPOCH_FOR_TESTS: usize = CHUNK_SAMPLES * 64;

    #[test]
    fn test_capacity_stop_keeps_final_chunk() {
        // One-epoch cap, pre-scripted to land exactly one chunk past it.
        let chunks: Vec<Vec<f32>> = (0..65).map(|_| voiced_chunk()).collect();
        let (task, _rx) = task(
            ScriptedSource::new(chunks),
            SampleAccumulator::new(EPOCH_FOR_TESTS, Some(1)),
            true,
        );
        match task.run() {
            CaptureResult::Stopped { samples, cause } => {
                assert_eq!(cause, StopCause::CapacityExceeded);
                assert_eq!(samples.len(), EPOCH_FOR_TESTS);
            }
            CaptureResult::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[test]
    fn test_stream_end_keeps_partial_chunk() {
        let chunks = vec![voiced_chunk(), vec![0.25; 100]];
        let (task, _rx) = task(
            ScriptedSource::new(chunks),
            SampleAccumulator::new(EPOCH_FOR_TESTS, None),
            true,
        );
        match task.run() {
            CaptureResult::Stopped { samples, cause } => {
                assert_eq!(cause, StopCause::StreamEnded);
                assert_eq!(samples.len(), CHUNK_SAMPLES + 100);
            }
            CaptureResult::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[test]
    fn test_caller_stop_wins_before_read() {
        let (task, _rx) = task(
            ScriptedSource::new(vec![voiced_chunk(); 100]),
            SampleAccumulator::new(EPOCH_FOR_TESTS, None),
            true,
        );
        task.stop.cancel();
        match task.run() {
            CaptureResult::Stopped { samples, cause } => {
                assert_eq!(cause, StopCause::CallerStop);
                assert!(samples.is_empty());
            }
            CaptureResult::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[test]
    fn test_cancel_discards_everything() {
        let (task, _rx) = task(
            ScriptedSource::new(vec![voiced_chunk(); 100]),
            SampleAccumulator::new(EPOCH_FOR_TESTS, None),
            true,
        );
        task.cancel.cancel();
        assert!(matches!(task.run(), CaptureResult::Cancelled));
    }

    #[test]
    fn test_magnitude_events_flow() {
        let chunks = vec![voiced_chunk(), voiced_chunk()];
        let (task, mut rx) = task(
            ScriptedSource::new(chunks),
            SampleAccumulator::new(EPOCH_FOR_TESTS, None),
            true,
        );
        task.run();

        let mut count = 0;
        while let Ok(CaptureEvent::Magnitude { value, .. }) = rx.try_recv() {
            assert!(value > 0.5);
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_disabled_vad_never_stops_on_silence() {
        let mut chunks = vec![voiced_chunk(); 30];
        chunks.extend(vec![silent_chunk(); 200]);
        let fed: usize = chunks.iter().map(Vec::len).sum();

        let (mut task, _rx) = task(
            ScriptedSource::new(chunks),
            SampleAccumulator::new(EPOCH_FOR_TESTS * 8, None),
            false,
        );
        task.segmenter.set_enabled(false);
        match task.run() {
            CaptureResult::Stopped { samples, cause } => {
                assert_eq!(cause, StopCause::StreamEnded);
                assert_eq!(samples.len(), fed);
            }
            CaptureResult::Cancelled => panic!("unexpected cancellation"),
        }
    }
}
