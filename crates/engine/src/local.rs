use std::sync::Arc;

use crate::types::{
    DecodingMode, EngineFactory, PartialResultFn, RecognitionEngine, RecognitionRequest, RunState,
    StatusFn,
};

/// Model flavors the local backend can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Multilingual,
    EnglishOnly,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Multilingual => "multilingual",
            ModelKind::EnglishOnly => "english-only",
        }
    }
}

/// Decode parameters passed through to the model.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub mode: DecodingMode,
    pub language: Option<String>,
    pub glossary: String,
}

/// Event emitted by a model while a decode is running.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    Progress(RunState),
    Partial(String),
}

#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub text: String,
    /// Language the model identified, when it ran detection.
    pub detected_language: Option<String>,
}

/// Opaque on-device inference model.
///
/// Implementations own loaded weights and decode synchronously; the engine
/// moves them onto a blocking task for the duration of a call.
pub trait SpeechModel: Send {
    fn kind(&self) -> ModelKind;

    fn transcribe(
        &mut self,
        samples: &[f32],
        options: &DecodeOptions,
        emit: &mut dyn FnMut(ModelEvent),
    ) -> crate::Result<ModelOutput>;

    /// Release model memory. Called at most once.
    fn unload(&mut self) {}
}

/// Loads models from wherever the host keeps them.
pub trait ModelLoader: Send + Sync {
    fn available(&self, kind: ModelKind) -> bool;

    fn load(&self, kind: ModelKind) -> crate::Result<Box<dyn SpeechModel>>;
}

/// On-device recognition backend.
///
/// Streams true partials from the model. When the primary multilingual
/// model identifies English audio and an English-only model is installed,
/// the engine reruns the decode on the English model internally; callers
/// observe only the partials, never the hand-off.
pub struct LocalEngine {
    loader: Arc<dyn ModelLoader>,
    model: Option<Box<dyn SpeechModel>>,
    partial_callback: Option<PartialResultFn>,
    status_callback: Option<StatusFn>,
}

impl std::fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("model_loaded", &self.model.is_some())
            .field("has_partial_callback", &self.partial_callback.is_some())
            .field("has_status_callback", &self.status_callback.is_some())
            .finish()
    }
}

impl LocalEngine {
    /// Load the primary model and wrap it. Fails with
    /// [`crate::EngineError::ModelsMissing`] when no model is installed.
    pub fn new(loader: Arc<dyn ModelLoader>) -> crate::Result<Self> {
        let kind = if loader.available(ModelKind::Multilingual) {
            ModelKind::Multilingual
        } else if loader.available(ModelKind::EnglishOnly) {
            ModelKind::EnglishOnly
        } else {
            return Err(crate::EngineError::ModelsMissing(vec![
                ModelKind::Multilingual,
                ModelKind::EnglishOnly,
            ]));
        };

        tracing::info!(model = kind.name(), "loading speech model");
        let model = loader.load(kind)?;
        Ok(Self {
            loader,
            model: Some(model),
            partial_callback: None,
            status_callback: None,
        })
    }
}

fn wants_handoff(
    model: &dyn SpeechModel,
    request: &RecognitionRequest,
    output: &ModelOutput,
    loader: &dyn ModelLoader,
) -> bool {
    model.kind() == ModelKind::Multilingual
        && request.language.is_none()
        && output
            .detected_language
            .as_deref()
            .is_some_and(|lang| lang.eq_ignore_ascii_case("en") || lang.starts_with("en-"))
        && loader.available(ModelKind::EnglishOnly)
}

#[async_trait::async_trait]
impl RecognitionEngine for LocalEngine {
    async fn transcribe(&mut self, request: &RecognitionRequest) -> crate::Result<String> {
        let mut model = self
            .model
            .take()
            .ok_or_else(|| crate::EngineError::Inference("engine is closed".into()))?;
        let loader = Arc::clone(&self.loader);
        let partial_callback = self.partial_callback.clone();
        let status_callback = self.status_callback.clone();
        let request = request.clone();

        // Decoding is CPU-bound for seconds; keep it off the async executor.
        let handle = tokio::task::spawn_blocking(move || {
            let mut emit = |event: ModelEvent| match event {
                ModelEvent::Progress(state) => {
                    if let Some(cb) = &status_callback {
                        cb(state);
                    }
                }
                ModelEvent::Partial(text) => {
                    if let Some(cb) = &partial_callback {
                        cb(text);
                    }
                }
            };

            let options = DecodeOptions {
                mode: request.mode,
                language: request.language.clone(),
                glossary: request.glossary.clone(),
            };
            let output = model.transcribe(&request.samples, &options, &mut emit)?;

            let text = if wants_handoff(model.as_ref(), &request, &output, loader.as_ref()) {
                tracing::debug!("handing off to english-only model");
                match run_english_handoff(&loader, &request, &options, &partial_callback) {
                    Ok((english, text)) => {
                        model.unload();
                        model = english;
                        text
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "english hand-off failed, keeping primary result");
                        output.text
                    }
                }
            } else {
                output.text
            };

            Ok::<_, crate::EngineError>((model, text))
        });

        match handle.await {
            Ok(Ok((model, text))) => {
                self.model = Some(model);
                Ok(text)
            }
            // The failed model instance is dropped here so an OOM retry
            // starts from a clean engine.
            Ok(Err(e)) => Err(e),
            Err(e) => Err(crate::EngineError::Inference(format!("decode task: {e}"))),
        }
    }

    async fn close(&mut self) {
        if let Some(mut model) = self.model.take() {
            model.unload();
            tracing::debug!("local engine closed");
        }
    }

    fn set_partial_result_callback(&mut self, callback: PartialResultFn) {
        self.partial_callback = Some(callback);
    }

    fn set_status_callback(&mut self, callback: StatusFn) {
        self.status_callback = Some(callback);
    }
}

/// Rerun the decode on the English-only model. Progress events are
/// suppressed so the hand-off never surfaces as a state transition.
fn run_english_handoff(
    loader: &Arc<dyn ModelLoader>,
    request: &RecognitionRequest,
    options: &DecodeOptions,
    partial_callback: &Option<PartialResultFn>,
) -> crate::Result<(Box<dyn SpeechModel>, String)> {
    let mut english = loader.load(ModelKind::EnglishOnly)?;
    let mut emit = |event: ModelEvent| {
        if let ModelEvent::Partial(text) = event {
            if let Some(cb) = partial_callback {
                cb(text);
            }
        }
    };
    let options = DecodeOptions {
        language: Some("en".into()),
        ..options.clone()
    };
    let output = english.transcribe(&request.samples, &options, &mut emit)?;
    Ok((english, output.text))
}

/// [`EngineFactory`] for the local backend.
pub struct LocalEngineFactory {
    loader: Arc<dyn ModelLoader>,
}

impl LocalEngineFactory {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self { loader }
    }
}

#[async_trait::async_trait]
impl EngineFactory for LocalEngineFactory {
    async fn build(&self) -> crate::Result<Box<dyn RecognitionEngine>> {
        Ok(Box::new(LocalEngine::new(Arc::clone(&self.loader))?))
    }
}
