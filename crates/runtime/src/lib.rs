mod backends;
mod engine;
mod handle;
mod idle_evictor;
mod process_manager;
pub mod prompt_format;


pub use backends::DisabledBackend;
pub use engine::{EngineProcessManager, EngineSlot};
pub use handle::{
    BackendHandle, EngineHandle, ImageGeneratorHandle, SynthesizerHandle, TranscriberHandle,
};
pub use idle_evictor::{IdleEvictor, IdleHold};
pub use process_manager::ProcessManager;
pub use prompt_format::{FormatterFamily, Prompt, PromptPiece};

use amp_common::{GenerationParams, ImageRequest, Message, Result};
use async_trait::async_trait;

/// Launch parameters for a text-generation engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaunchOptions {
    pub gpu_layers: i32,
    pub context_window: usize,
}

impl LaunchOptions {
    pub fn from_config(config: &amp_config::EngineConfig) -> Self {
        Self {
            gpu_layers: config.gpu_layers,
            context_window: config.context_window,
        }
    }
}

/// Text produced by an engine, with the model identifier it reported
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

/// A memory-resident backend that can be evicted when idle.
///
/// `unload` must be idempotent: evicting an already-evicted backend is a no-op.
#[async_trait]
pub trait Evictable: Send + Sync {
    /// Release the resident model
    async fn unload(&mut self) -> Result<()>;

    /// Whether a model is currently resident
    fn is_loaded(&self) -> bool;
}

/// Single-slot text-generation engine
#[async_trait]
pub trait TextEngine: Evictable {
    /// Make `model_id` the resident model, swapping out any other one
    async fn ensure_model(&mut self, model_id: &str, options: &LaunchOptions) -> Result<()>;

    /// Identifier of the resident model
    fn loaded_model(&self) -> Option<&str>;

    /// Generate the next assistant turn for `messages`
    async fn generate(&self, messages: &[Message], params: &GenerationParams) -> Result<Completion>;
}

/// Speech-to-text backend
#[async_trait]
pub trait Transcriber: Evictable {
    async fn transcribe(&self, audio: &[u8], srt_mode: bool) -> Result<String>;
}

/// Text-to-speech backend, returning one WAV clip per synthesized segment
#[async_trait]
pub trait SpeechSynthesizer: Evictable {
    async fn synthesize(&self, text: &str, voice_sample: Option<&[u8]>) -> Result<Vec<Vec<u8>>>;
}

/// Image-generation backend, returning an encoded image
#[async_trait]
pub trait ImageGenerator: Evictable {
    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>>;
}
