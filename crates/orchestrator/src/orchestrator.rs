use crate::completions::{completion_id, completion_response, completion_stream, ChatCompletion};
use crate::conversation::Conversation;
use amp_common::{
    BackendClass, ChatCompletionRequest, Error, GenerateRequest, GenerationParams, ImageRequest,
    Message, MessageRequest, ModelInfo, Outcome, Result, Role, SpeechRequest, TranscriptionRequest,
};
use amp_config::{AppConfig, CompletionsConfig, ModelCatalog};
use amp_runtime::{
    BackendHandle, DisabledBackend, EngineHandle, Evictable, IdleEvictor, ImageGenerator,
    ImageGeneratorHandle, LaunchOptions, SpeechSynthesizer, SynthesizerHandle, TextEngine,
    Transcriber, TranscriberHandle,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Audio container extensions accepted for transcription
const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "mp4", "mkv"];

/// One idle timer per backend class
struct Evictors {
    text_generation: IdleEvictor,
    transcription: IdleEvictor,
    synthesis: IdleEvictor,
    image_generation: IdleEvictor,
}

impl Evictors {
    fn get(&self, class: BackendClass) -> &IdleEvictor {
        match class {
            BackendClass::TextGeneration => &self.text_generation,
            BackendClass::Transcription => &self.transcription,
            BackendClass::Synthesis => &self.synthesis,
            BackendClass::ImageGeneration => &self.image_generation,
        }
    }
}

/// Evictor whose deadline unloads the backend behind `handle`
fn evictor_for<B>(class: BackendClass, timeout: Duration, handle: BackendHandle<B>) -> IdleEvictor
where
    B: Evictable + ?Sized + 'static,
{
    IdleEvictor::new(class.as_str(), timeout, move || {
        let handle = handle.clone();
        async move {
            if let Err(e) = handle.evict().await {
                error!(backend = %class, "Eviction failed: {}", e);
            }
        }
    })
}

/// Assembles an [`Orchestrator`]; backend classes left unset are disabled
pub struct OrchestratorBuilder {
    config: AppConfig,
    catalog: ModelCatalog,
    engine: EngineHandle,
    transcriber: TranscriberHandle,
    synthesizer: SynthesizerHandle,
    image_generator: ImageGeneratorHandle,
}

impl OrchestratorBuilder {
    pub fn transcriber(mut self, backend: impl Transcriber + 'static) -> Self {
        self.transcriber = TranscriberHandle::from_backend(backend);
        self
    }

    pub fn synthesizer(mut self, backend: impl SpeechSynthesizer + 'static) -> Self {
        self.synthesizer = SynthesizerHandle::from_backend(backend);
        self
    }

    pub fn image_generator(mut self, backend: impl ImageGenerator + 'static) -> Self {
        self.image_generator = ImageGeneratorHandle::from_backend(backend);
        self
    }

    /// Must be called from within a tokio runtime
    pub fn build(self) -> Orchestrator {
        let idle = &self.config.idle;
        let evictors = Evictors {
            text_generation: evictor_for(
                BackendClass::TextGeneration,
                idle.timeout(BackendClass::TextGeneration),
                self.engine.clone(),
            ),
            transcription: evictor_for(
                BackendClass::Transcription,
                idle.timeout(BackendClass::Transcription),
                self.transcriber.clone(),
            ),
            synthesis: evictor_for(
                BackendClass::Synthesis,
                idle.timeout(BackendClass::Synthesis),
                self.synthesizer.clone(),
            ),
            image_generation: evictor_for(
                BackendClass::ImageGeneration,
                idle.timeout(BackendClass::ImageGeneration),
                self.image_generator.clone(),
            ),
        };

        Orchestrator {
            launch: LaunchOptions::from_config(&self.config.engine),
            completions: self.config.completions,
            catalog: self.catalog,
            engine: self.engine,
            transcriber: self.transcriber,
            synthesizer: self.synthesizer,
            image_generator: self.image_generator,
            evictors,
            conversations: RwLock::new(HashMap::new()),
        }
    }
}

/// Façade over every backend class and the conversation table.
///
/// Each call into a backend holds that class's idle timer for its whole
/// duration; the timer re-arms once the last call finishes, success or not.
/// Operations never return `Err`: failures are logged and folded into
/// [`Outcome::Failure`].
pub struct Orchestrator {
    launch: LaunchOptions,
    completions: CompletionsConfig,
    catalog: ModelCatalog,
    engine: EngineHandle,
    transcriber: TranscriberHandle,
    synthesizer: SynthesizerHandle,
    image_generator: ImageGeneratorHandle,
    evictors: Evictors,
    conversations: RwLock<HashMap<String, Arc<Mutex<Conversation>>>>,
}

impl Orchestrator {
    pub fn builder(
        config: AppConfig,
        catalog: ModelCatalog,
        engine: impl TextEngine + 'static,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            catalog,
            engine: EngineHandle::from_engine(engine),
            transcriber: TranscriberHandle::from_backend(DisabledBackend::new(
                BackendClass::Transcription,
            )),
            synthesizer: SynthesizerHandle::from_backend(DisabledBackend::new(
                BackendClass::Synthesis,
            )),
            image_generator: ImageGeneratorHandle::from_backend(DisabledBackend::new(
                BackendClass::ImageGeneration,
            )),
        }
    }

    pub fn evictor(&self, class: BackendClass) -> &IdleEvictor {
        self.evictors.get(class)
    }

    /// Identifier of the resident text-generation model
    pub async fn loaded_model(&self) -> Option<String> {
        self.engine.loaded_model().await
    }

    pub async fn add_system_message(&self, request: &MessageRequest) -> Outcome<()> {
        settle("add_system_message", self.add_message(request, Role::System).await)
    }

    pub async fn add_user_message(&self, request: &MessageRequest) -> Outcome<()> {
        settle("add_user_message", self.add_message(request, Role::User).await)
    }

    pub async fn add_assistant_message(&self, request: &MessageRequest) -> Outcome<()> {
        settle("add_assistant_message", self.add_message(request, Role::Assistant).await)
    }

    async fn add_message(&self, request: &MessageRequest, role: Role) -> Result<()> {
        let conversation_id = required(request.conversation_id.as_deref(), "conversation_id")?;
        let message = required(request.message.as_deref(), "message")?;

        let conversation = self.conversation(conversation_id).await?;
        conversation.lock().await.add_message(role, message);
        Ok(())
    }

    /// Append a user message to a pinned conversation and generate the reply
    pub async fn generate_response(&self, request: &GenerateRequest) -> Outcome<String> {
        settle("generate_response", self.try_generate_response(request).await)
    }

    async fn try_generate_response(&self, request: &GenerateRequest) -> Result<String> {
        let conversation_id = required(request.conversation_id.as_deref(), "conversation_id")?;
        let message = required(request.message.as_deref(), "message")?;

        let _busy = self.evictors.text_generation.hold();
        let conversation = self.conversation(conversation_id).await?;
        let mut conversation = conversation.lock().await;
        conversation.add_message(Role::User, message);

        let engine = self.engine.acquire(conversation.model_id(), &self.launch).await?;
        let params = GenerationParams::new(
            request.max_tokens.unwrap_or(self.completions.default_max_tokens),
        )
        .with_response_prefix(request.response_prefix.clone());

        let completion = conversation
            .generate(&**engine, &params, request.single_message_mode)
            .await?;
        Ok(completion.text)
    }

    /// OpenAI-compatible completion over a fresh, single-use conversation
    pub async fn chat_completions(
        &self,
        request: ChatCompletionRequest,
    ) -> Outcome<ChatCompletion> {
        settle("chat_completions", self.try_chat_completions(request).await)
    }

    async fn try_chat_completions(&self, request: ChatCompletionRequest) -> Result<ChatCompletion> {
        request.validate()?;
        let available = self.list_models().await?;
        let model_id = resolve_model(&available, request.model.as_deref())?;

        let mut conversation = Conversation::new(completion_id(), model_id.as_str());
        for message in &request.messages {
            let role = request_role(message.role.as_deref());
            let content = message.content.trim();
            if let (Some(role), false) = (role, content.is_empty()) {
                conversation.add_message(role, content);
            }
        }
        if conversation.is_empty() {
            return Err(Error::InvalidRequest(
                "messages must contain at least one entry with a known role and content".into(),
            ));
        }

        let max_tokens = request.max_tokens.unwrap_or(self.completions.chat_max_tokens);
        let params = GenerationParams::new(max_tokens).with_temperature(request.temperature);

        let busy = self.evictors.text_generation.hold();
        let engine = self.engine.acquire(&model_id, &self.launch).await?;
        let completion = conversation.generate(&**engine, &params, false).await?;
        drop(engine);
        drop(busy);

        if request.is_streaming() {
            return Ok(ChatCompletion::Stream(completion_stream(
                model_id,
                completion.text,
                self.completions.stream_chunk_delay(),
            )));
        }

        let prompt = request.messages.iter().map(|message| message.content.as_str());
        Ok(ChatCompletion::Complete(completion_response(&model_id, prompt, completion.text)))
    }

    pub async fn available_models(&self) -> Outcome<Vec<String>> {
        settle("available_models", self.list_models().await)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        self.scan_catalog(ModelCatalog::list_models).await
    }

    async fn default_model(&self) -> Result<String> {
        self.scan_catalog(ModelCatalog::default_model).await
    }

    /// Run a directory scan on the blocking pool
    async fn scan_catalog<T>(&self, scan: fn(&ModelCatalog) -> Result<T>) -> Result<T>
    where
        T: Send + 'static,
    {
        let catalog = self.catalog.clone();
        tokio::task::spawn_blocking(move || scan(&catalog))
            .await
            .map_err(|e| Error::Internal(format!("Model scan task failed: {}", e)))?
    }

    /// Model pinned to a conversation, creating the conversation if unseen
    pub async fn model_info(&self, conversation_id: Option<&str>) -> Outcome<ModelInfo> {
        let result = async {
            let conversation_id = required(conversation_id, "conversation_id")?;
            let conversation = self.conversation(conversation_id).await?;
            let path = conversation.lock().await.model_id().to_string();
            Ok::<_, Error>(ModelInfo { path })
        };
        settle("model_info", result.await)
    }

    /// Snapshot of a conversation log
    pub async fn conversation_messages(&self, conversation_id: &str) -> Option<Vec<Message>> {
        let conversation = self.conversations.read().await.get(conversation_id).cloned()?;
        let messages = conversation.lock().await.messages().to_vec();
        Some(messages)
    }

    pub async fn speech_to_text(&self, request: &TranscriptionRequest) -> Outcome<String> {
        let result = async {
            validate_audio_filename(&request.filename)?;
            if request.audio.is_empty() {
                return Err(Error::InvalidRequest("Uploaded file is empty".into()));
            }

            let _busy = self.evictors.transcription.hold();
            self.transcriber
                .read()
                .await
                .transcribe(&request.audio, request.srt_mode)
                .await
        };
        settle("speech_to_text", result.await)
    }

    /// Synthesize speech, one WAV clip per segment
    pub async fn text_to_speech(&self, request: &SpeechRequest) -> Outcome<Vec<Vec<u8>>> {
        let result = async {
            required(Some(request.text.as_str()), "text")?;

            let _busy = self.evictors.synthesis.hold();
            self.synthesizer
                .read()
                .await
                .synthesize(&request.text, request.voice_sample.as_deref())
                .await
        };
        settle("text_to_speech", result.await)
    }

    pub async fn generate_image(&self, request: &ImageRequest) -> Outcome<Vec<u8>> {
        let result = async {
            required(Some(request.prompt.as_str()), "prompt")?;
            if request.width == 0 || request.height == 0 {
                return Err(Error::InvalidRequest("width and height must be positive".into()));
            }

            let _busy = self.evictors.image_generation.hold();
            self.image_generator.read().await.generate_image(request).await
        };
        settle("generate_image", result.await)
    }

    /// Cancel every idle timer and unload every backend
    pub async fn shutdown(&self) {
        info!("Shutting down backends");
        for class in BackendClass::ALL {
            self.evictors.get(class).cancel();
        }

        let results = [
            (BackendClass::TextGeneration, self.engine.evict().await),
            (BackendClass::Transcription, self.transcriber.evict().await),
            (BackendClass::Synthesis, self.synthesizer.evict().await),
            (BackendClass::ImageGeneration, self.image_generator.evict().await),
        ];
        for (class, result) in results {
            if let Err(e) = result {
                error!(backend = %class, "Failed to unload during shutdown: {}", e);
            }
        }
    }

    /// Look up a pinned conversation, creating it on the default model
    async fn conversation(&self, conversation_id: &str) -> Result<Arc<Mutex<Conversation>>> {
        if let Some(conversation) = self.conversations.read().await.get(conversation_id) {
            return Ok(conversation.clone());
        }

        let model_id = self.default_model().await?;
        let mut table = self.conversations.write().await;
        if let Some(conversation) = table.get(conversation_id) {
            return Ok(conversation.clone());
        }

        info!(conversation = %conversation_id, model = %model_id, "Creating conversation");
        let conversation = Arc::new(Mutex::new(Conversation::new(conversation_id, model_id)));
        table.insert(conversation_id.to_string(), conversation.clone());
        Ok(conversation)
    }
}

/// Log a failed operation and fold it into an [`Outcome`]
fn settle<T>(operation: &str, result: Result<T>) -> Outcome<T> {
    if let Err(e) = &result {
        error!(operation = %operation, error_type = e.error_type(), "{}", e);
    }
    Outcome::from(result)
}

/// Requested model if installed, else the first available one
fn resolve_model(available: &[String], requested: Option<&str>) -> Result<String> {
    let default_model = available
        .first()
        .cloned()
        .ok_or_else(|| Error::BackendNotFound("No models available.".into()))?;

    match requested.filter(|model| !model.is_empty()) {
        Some(model) if available.iter().any(|m| m == model) => Ok(model.to_string()),
        Some(model) => {
            warn!(
                "Requested model '{}' not found. Falling back to default model '{}'.",
                model, default_model
            );
            Ok(default_model)
        }
        None => Ok(default_model),
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::InvalidRequest(format!("Missing {} in the request.", field))),
    }
}

fn request_role(role: Option<&str>) -> Option<Role> {
    role.and_then(Role::parse)
}

fn validate_audio_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        return Err(Error::InvalidRequest("No selected file".into()));
    }

    let allowed = filename
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_lowercase())
        .is_some_and(|extension| AUDIO_EXTENSIONS.contains(&extension.as_str()));
    if !allowed {
        return Err(Error::InvalidRequest("Invalid file type".into()));
    }
    Ok(())
}
