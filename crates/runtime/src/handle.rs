use crate::{
    Evictable, ImageGenerator, LaunchOptions, SpeechSynthesizer, TextEngine, Transcriber,
};
use amp_common::Result;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

/// Shared slot holding one backend.
///
/// Calls run under the read side of the lock, so they may overlap each
/// other but never a load, swap or eviction, which take the write side.
pub struct BackendHandle<B: ?Sized> {
    inner: Arc<RwLock<Box<B>>>,
}

pub type EngineHandle = BackendHandle<dyn TextEngine>;
pub type TranscriberHandle = BackendHandle<dyn Transcriber>;
pub type SynthesizerHandle = BackendHandle<dyn SpeechSynthesizer>;
pub type ImageGeneratorHandle = BackendHandle<dyn ImageGenerator>;

impl<B: ?Sized> Clone for BackendHandle<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: ?Sized> BackendHandle<B> {
    pub fn new(backend: Box<B>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(backend)),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Box<B>> {
        self.inner.read().await
    }
}

impl TranscriberHandle {
    pub fn from_backend(backend: impl Transcriber + 'static) -> Self {
        Self::new(Box::new(backend))
    }
}

impl SynthesizerHandle {
    pub fn from_backend(backend: impl SpeechSynthesizer + 'static) -> Self {
        Self::new(Box::new(backend))
    }
}

impl ImageGeneratorHandle {
    pub fn from_backend(backend: impl ImageGenerator + 'static) -> Self {
        Self::new(Box::new(backend))
    }
}

impl<B: Evictable + ?Sized> BackendHandle<B> {
    /// Unload the resident model. Waits for in-flight calls to finish.
    pub async fn evict(&self) -> Result<()> {
        let mut backend = self.inner.write().await;
        if !backend.is_loaded() {
            debug!("Eviction skipped, backend already unloaded");
            return Ok(());
        }
        backend.unload().await
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.read().await.is_loaded()
    }
}

impl EngineHandle {
    pub fn from_engine(engine: impl TextEngine + 'static) -> Self {
        Self::new(Box::new(engine))
    }

    /// Make `model_id` resident and return a read guard over the engine.
    ///
    /// The fast path only takes the read lock. A swap upgrades to the write
    /// lock and downgrades once the model is ready, so no other caller can
    /// slip a different model in between the load and the call.
    pub async fn acquire(
        &self,
        model_id: &str,
        options: &LaunchOptions,
    ) -> Result<RwLockReadGuard<'_, Box<dyn TextEngine>>> {
        {
            let engine = self.inner.read().await;
            if engine.is_loaded() && engine.loaded_model() == Some(model_id) {
                return Ok(engine);
            }
        }

        let mut engine = self.inner.write().await;
        engine.ensure_model(model_id, options).await?;
        Ok(engine.downgrade())
    }

    pub async fn loaded_model(&self) -> Option<String> {
        self.inner.read().await.loaded_model().map(str::to_string)
    }
}
