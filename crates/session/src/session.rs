//! The capture-and-recognition session state machine.
//!
//! One session owns all mutable state and runs on its own task; caller
//! control calls arrive over a channel and are serialized here. Recording
//! and engine construction run as two independently cancellable activities
//! that join at the stop transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utter_audio::AudioFocus;
use utter_engine::{
    DecodingMode, EngineError, RecognitionEngine, RecognitionRequest, RunState,
};
use utter_vad::{Segmenter, SegmenterSettings};

use crate::accumulator::SampleAccumulator;
use crate::capture::{CaptureEvent, CaptureResult, CaptureTask, StopCause};
use crate::constants::{DEVICE_INIT_RETRIES, EPOCH_SAMPLES, OOM_RECLAIM_CYCLES, SAMPLE_RATE};
use crate::deps::SessionDeps;
use crate::observer::SessionObserver;
use crate::EndReason;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub vad_enabled: bool,
    /// Hard utterance cap. `None` permits unbounded epoch growth.
    pub max_duration: Option<Duration>,
    /// Free-text phrase hints passed to the recognition backend.
    pub glossary: String,
    /// Initial forced language; adjustable until the stop transition.
    pub language: Option<String>,
    pub mode: DecodingMode,
    pub segmenter: SegmenterSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vad_enabled: true,
            max_duration: None,
            glossary: String::new(),
            language: None,
            mode: DecodingMode::Greedy,
            segmenter: SegmenterSettings::default(),
        }
    }
}

enum Control {
    Permission(bool),
    SetLanguage(Option<String>),
    PauseVad(bool),
    Stop,
    Cancel,
}

/// Caller handle for one recognition session.
///
/// All methods are fire-and-forget; a session that has already ended
/// ignores further control calls, so cancel is safe from any state.
pub struct Recognizer {
    control: mpsc::UnboundedSender<Control>,
    handle: JoinHandle<()>,
}

impl Recognizer {
    /// Spawn a session on the current tokio runtime.
    pub fn start(
        config: SessionConfig,
        deps: SessionDeps,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let session = Session {
            config,
            deps,
            observer,
            control: control_rx,
        };
        let handle = tokio::spawn(session.run());
        Self {
            control: control_tx,
            handle,
        }
    }

    pub fn grant_permission(&self, granted: bool) {
        let _ = self.control.send(Control::Permission(granted));
    }

    pub fn set_language(&self, language: Option<String>) {
        let _ = self.control.send(Control::SetLanguage(language));
    }

    pub fn set_vad_paused(&self, paused: bool) {
        let _ = self.control.send(Control::PauseVad(paused));
    }

    /// Freeze the buffer and move to recognition.
    pub fn stop(&self) {
        let _ = self.control.send(Control::Stop);
    }

    /// Tear the whole session down from any state.
    pub fn cancel(&self) {
        let _ = self.control.send(Control::Cancel);
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Wait for the session task to end.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Idempotent audio-focus holder; release is reachable from every exit
/// path via `Drop`.
struct FocusGuard {
    focus: Arc<dyn AudioFocus>,
    released: AtomicBool,
}

impl FocusGuard {
    fn acquire(focus: Arc<dyn AudioFocus>) -> Self {
        if let Err(e) = focus.acquire() {
            tracing::warn!(error = %e, "audio focus acquisition failed, continuing");
        }
        Self {
            focus,
            released: AtomicBool::new(false),
        }
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.focus.release();
        }
    }
}

impl Drop for FocusGuard {
    fn drop(&mut self) {
        self.release();
    }
}

enum EngineEvent {
    Partial(String),
    Status(RunState),
}

type BuildHandle = JoinHandle<utter_engine::Result<Box<dyn RecognitionEngine>>>;

async fn abort_build(handle: BuildHandle) {
    handle.abort();
    if let Ok(Ok(mut engine)) = handle.await {
        engine.close().await;
    }
}

struct Session {
    config: SessionConfig,
    deps: SessionDeps,
    observer: Arc<dyn SessionObserver>,
    control: mpsc::UnboundedReceiver<Control>,
}

impl Session {
    async fn run(self) {
        let observer = Arc::clone(&self.observer);
        match self.drive().await {
            Ok(text) => observer.on_finished(text),
            Err(reason) => {
                if matches!(reason, EndReason::PermissionDenied) {
                    observer.on_permission_rejected();
                }
                tracing::info!(?reason, "session ended without transcript");
                observer.on_ended(reason);
            }
        }
    }

    async fn drive(self) -> Result<String, EndReason> {
        let Session {
            config,
            deps,
            observer,
            mut control,
        } = self;
        let SessionDeps {
            device,
            focus,
            permission,
            engines,
            classifier,
            reclaim,
        } = deps;

        let mut language = config.language.clone();
        let vad_paused = Arc::new(AtomicBool::new(false));

        // --- Idle -> NeedsPermission -> Loading ---
        if !permission.is_granted() {
            observer.on_need_permission();
            loop {
                match control.recv().await {
                    Some(Control::Permission(true)) => break,
                    Some(Control::Permission(false)) => return Err(EndReason::PermissionDenied),
                    Some(Control::Cancel) | None => return Err(EndReason::Cancelled),
                    Some(Control::SetLanguage(l)) => language = l,
                    Some(Control::PauseVad(p)) => vad_paused.store(p, Ordering::Release),
                    Some(Control::Stop) => {}
                }
            }
        }
        observer.on_loading();

        // --- Loading -> Recording: open the device with bounded retry ---
        let mut source = None;
        for attempt in 1..=DEVICE_INIT_RETRIES {
            while let Ok(cmd) = control.try_recv() {
                match cmd {
                    Control::Cancel => return Err(EndReason::Cancelled),
                    Control::SetLanguage(l) => language = l,
                    Control::PauseVad(p) => vad_paused.store(p, Ordering::Release),
                    Control::Permission(_) | Control::Stop => {}
                }
            }
            match device.open() {
                Ok(opened) => {
                    source = Some(opened);
                    break;
                }
                Err(e) => tracing::warn!(attempt, error = %e, "capture device failed to open"),
            }
        }
        let Some(source) = source else {
            return Err(EndReason::DeviceInitFailed {
                message: format!("capture device failed {DEVICE_INIT_RETRIES} times"),
            });
        };

        let focus = FocusGuard::acquire(focus);

        // --- Recording: capture loop races lazy engine construction ---
        let mut segmenter = Segmenter::with_settings(classifier, config.segmenter);
        if !config.vad_enabled {
            segmenter.set_enabled(false);
        }
        let accumulator = SampleAccumulator::with_max_samples(
            EPOCH_SAMPLES,
            config
                .max_duration
                .map(|d| (d.as_secs_f64() * SAMPLE_RATE as f64) as usize),
        );
        let magnitude =
            crate::magnitude::MagnitudeTracker::new(source.supports_block_detection());

        let stop = CancellationToken::new();
        let cancel = CancellationToken::new();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let task = CaptureTask {
            source,
            segmenter,
            accumulator,
            magnitude,
            vad_enabled: config.vad_enabled,
            vad_paused: Arc::clone(&vad_paused),
            stop: stop.clone(),
            cancel: cancel.clone(),
            events: event_tx,
        };
        let mut capture = tokio::task::spawn_blocking(move || task.run());

        let factory = Arc::clone(&engines);
        let build: BuildHandle = tokio::spawn(async move { factory.build().await });
        let mut build = Some(build);

        observer.on_recording_started();

        let capture_result = loop {
            let mut cancelled = false;
            tokio::select! {
                biased;
                cmd = control.recv() => match cmd {
                    Some(Control::Cancel) | None => cancelled = true,
                    Some(Control::Stop) => stop.cancel(),
                    Some(Control::PauseVad(p)) => vad_paused.store(p, Ordering::Release),
                    Some(Control::SetLanguage(l)) => language = l,
                    Some(Control::Permission(_)) => {}
                },
                Some(event) = event_rx.recv() => {
                    let CaptureEvent::Magnitude { value, state } = event;
                    observer.on_magnitude(value, state);
                },
                result = &mut capture => break result.map_err(|e| format!("capture task: {e}")),
            }
            if cancelled {
                cancel.cancel();
                let _ = (&mut capture).await;
                if let Some(build) = build.take() {
                    abort_build(build).await;
                }
                focus.release();
                return Err(EndReason::Cancelled);
            }
        };

        // Deliver magnitude updates that were produced before the stop.
        while let Ok(CaptureEvent::Magnitude { value, state }) = event_rx.try_recv() {
            observer.on_magnitude(value, state);
        }

        let (samples, cause) = match capture_result {
            Err(message) => {
                if let Some(build) = build.take() {
                    abort_build(build).await;
                }
                focus.release();
                return Err(EndReason::EngineFailed { message });
            }
            Ok(CaptureResult::Cancelled) => {
                if let Some(build) = build.take() {
                    abort_build(build).await;
                }
                focus.release();
                return Err(EndReason::Cancelled);
            }
            Ok(CaptureResult::Stopped { samples, cause }) => (samples, cause),
        };

        // --- Recording -> Processing: buffer is frozen from here on ---
        focus.release();
        observer.on_processing_started(cause);

        let request = RecognitionRequest {
            samples: Arc::from(samples.into_boxed_slice()),
            glossary: config.glossary.clone(),
            language,
            mode: config.mode,
        };

        let (engine_tx, mut engine_rx) = mpsc::unbounded_channel();

        'processing: loop {
            // Join engine readiness; later iterations rebuild from scratch.
            let mut handle: BuildHandle = match build.take() {
                Some(handle) => handle,
                None => {
                    let factory = Arc::clone(&engines);
                    tokio::spawn(async move { factory.build().await })
                }
            };
            let built = loop {
                let mut cancelled = false;
                tokio::select! {
                    biased;
                    cmd = control.recv() => match cmd {
                        Some(Control::Cancel) | None => cancelled = true,
                        _ => {}
                    },
                    result = &mut handle => break match result {
                        Ok(result) => result,
                        Err(e) => Err(EngineError::Inference(format!("engine build task: {e}"))),
                    },
                }
                if cancelled {
                    abort_build(handle).await;
                    return Err(EndReason::Cancelled);
                }
            };

            let mut engine = match built {
                Ok(engine) => engine,
                Err(EngineError::OutOfMemory) => {
                    tracing::warn!("engine construction ran out of memory, reclaiming");
                    observer.on_status(RunState::OutOfMemory);
                    for _ in 0..OOM_RECLAIM_CYCLES {
                        reclaim.reclaim().await;
                    }
                    continue 'processing;
                }
                Err(EngineError::ModelsMissing(kinds)) => {
                    return Err(EndReason::EngineConfiguration {
                        missing_models: kinds.iter().map(|k| k.name().to_string()).collect(),
                        message: "speech models are not installed".into(),
                    });
                }
                Err(EngineError::Configuration(message)) => {
                    return Err(EndReason::EngineConfiguration {
                        missing_models: Vec::new(),
                        message,
                    });
                }
                Err(e) => {
                    return Err(EndReason::EngineFailed {
                        message: e.to_string(),
                    });
                }
            };

            let tx = engine_tx.clone();
            engine.set_partial_result_callback(Arc::new(move |text| {
                let _ = tx.send(EngineEvent::Partial(text));
            }));
            let tx = engine_tx.clone();
            engine.set_status_callback(Arc::new(move |state| {
                let _ = tx.send(EngineEvent::Status(state));
            }));

            // --- Processing: transcribe, forwarding events as produced ---
            let attempt = {
                let mut fut = engine.transcribe(&request);
                loop {
                    tokio::select! {
                        biased;
                        cmd = control.recv() => match cmd {
                            Some(Control::Cancel) | None => break None,
                            _ => {}
                        },
                        Some(event) = engine_rx.recv() => match event {
                            EngineEvent::Partial(text) => observer.on_partial_result(text),
                            EngineEvent::Status(state) => observer.on_status(state),
                        },
                        result = &mut fut => break Some(result),
                    }
                }
            };

            // Flush events that arrived before the call resolved, in order.
            while let Ok(event) = engine_rx.try_recv() {
                match event {
                    EngineEvent::Partial(text) => observer.on_partial_result(text),
                    EngineEvent::Status(state) => observer.on_status(state),
                }
            }
            engine.close().await;

            match attempt {
                None => return Err(EndReason::Cancelled),
                Some(Ok(text)) => return Ok(text),
                Some(Err(EngineError::OutOfMemory)) => {
                    // The frozen buffer is retained; only the engine is
                    // rebuilt.
                    tracing::warn!("transcription ran out of memory, reclaiming and retrying");
                    observer.on_status(RunState::OutOfMemory);
                    for _ in 0..OOM_RECLAIM_CYCLES {
                        reclaim.reclaim().await;
                    }
                    continue 'processing;
                }
                Some(Err(EngineError::Transport(e))) => {
                    return Err(EndReason::TransportFailed {
                        message: e.to_string(),
                    });
                }
                Some(Err(e)) => {
                    return Err(EndReason::EngineFailed {
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}
