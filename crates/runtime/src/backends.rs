use crate::{Evictable, ImageGenerator, SpeechSynthesizer, Transcriber};
use amp_common::{BackendClass, Error, ImageRequest, Result};
use async_trait::async_trait;

/// Placeholder for a backend class with no implementation configured.
///
/// Never holds a model, so eviction is always a no-op, and every call
/// fails with `BackendUnavailable`.
#[derive(Debug, Clone, Copy)]
pub struct DisabledBackend {
    class: BackendClass,
}

impl DisabledBackend {
    pub fn new(class: BackendClass) -> Self {
        Self { class }
    }

    fn unavailable(&self) -> Error {
        Error::BackendUnavailable(format!("No {} backend is configured", self.class))
    }
}

#[async_trait]
impl Evictable for DisabledBackend {
    async fn unload(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        false
    }
}

#[async_trait]
impl Transcriber for DisabledBackend {
    async fn transcribe(&self, _audio: &[u8], _srt_mode: bool) -> Result<String> {
        Err(self.unavailable())
    }
}

#[async_trait]
impl SpeechSynthesizer for DisabledBackend {
    async fn synthesize(&self, _text: &str, _voice_sample: Option<&[u8]>) -> Result<Vec<Vec<u8>>> {
        Err(self.unavailable())
    }
}

#[async_trait]
impl ImageGenerator for DisabledBackend {
    async fn generate_image(&self, _request: &ImageRequest) -> Result<Vec<u8>> {
        Err(self.unavailable())
    }
}
