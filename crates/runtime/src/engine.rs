use crate::{
    process_manager::ProcessManager,
    prompt_format::{FormatterFamily, Prompt},
    Completion, Evictable, LaunchOptions, TextEngine,
};
use amp_common::{Error, GenerationParams, Message, Result};
use amp_config::{EngineConfig, SamplingConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// State of the single text-generation slot
#[derive(Debug, Clone, Default)]
pub struct EngineSlot {
    pub loaded_model: Option<String>,
    pub ready: bool,
    pub formatter: FormatterFamily,
    pub loaded_at: Option<SystemTime>,
}

impl EngineSlot {
    fn clear(&mut self) {
        *self = EngineSlot::default();
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a Prompt,
    n_predict: usize,
    temperature: f32,
    top_p: f32,
    min_p: f32,
    typical_p: f32,
    repeat_penalty: f32,
    top_k: i32,
}

impl<'a> CompletionRequest<'a> {
    fn new(prompt: &'a Prompt, params: &GenerationParams, sampling: &SamplingConfig) -> Self {
        Self {
            prompt,
            n_predict: params.max_tokens,
            temperature: params.temperature.unwrap_or(sampling.temperature),
            top_p: sampling.top_p,
            min_p: sampling.min_p,
            typical_p: sampling.typical_p,
            repeat_penalty: sampling.repeat_penalty,
            top_k: sampling.top_k,
        }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    model: String,
}

/// Manages the external llama.cpp server process.
///
/// At most one engine runs at a time; loading a different model terminates
/// the current process before the new one starts.
pub struct EngineProcessManager {
    config: EngineConfig,
    binary: PathBuf,
    model_dir: PathBuf,
    process: ProcessManager,
    slot: EngineSlot,
    client: Client,
    server_url: String,
}

impl EngineProcessManager {
    pub fn new(config: &EngineConfig, model_dir: impl Into<PathBuf>) -> Result<Self> {
        let binary = config.resolve_binary()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            server_url: config.server_url(),
            config: config.clone(),
            binary,
            model_dir: model_dir.into(),
            process: ProcessManager::new("llama-server"),
            slot: EngineSlot::default(),
            client,
        })
    }

    pub fn slot(&self) -> &EngineSlot {
        &self.slot
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    fn launch_command(&self, model_path: &Path, options: &LaunchOptions) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.config.extra_args)
            .arg("--n-gpu-layers")
            .arg(options.gpu_layers.to_string())
            .arg("--ctx-size")
            .arg(options.context_window.to_string())
            .arg("--host")
            .arg(&self.config.host)
            .arg("--port")
            .arg(self.config.port.to_string())
            .arg("-m")
            .arg(model_path);
        cmd
    }

    async fn start(&mut self, model_id: &str, options: &LaunchOptions) -> Result<()> {
        let model_path = self.model_dir.join(model_id);
        if !model_path.is_file() {
            return Err(Error::BackendNotFound(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        info!(
            "Starting engine for {} (gpu_layers={}, ctx={})",
            model_id, options.gpu_layers, options.context_window
        );

        let command = self.launch_command(&model_path, options);
        let mut ready = self
            .process
            .spawn(command, &self.config.readiness_markers)
            .await
            .map_err(|e| Error::EngineStartupFailed(format!("Failed to start engine: {}", e)))?;

        let startup_timeout = self.config.startup_timeout();
        match timeout(startup_timeout, ready.recv()).await {
            Ok(Some(())) => {
                self.slot = EngineSlot {
                    loaded_model: Some(model_id.to_string()),
                    ready: true,
                    formatter: FormatterFamily::classify(model_id),
                    loaded_at: Some(SystemTime::now()),
                };
                info!(
                    "Engine ready with {} ({:?} formatting)",
                    model_id, self.slot.formatter
                );
                Ok(())
            }
            Ok(None) => {
                self.process.terminate().await?;
                Err(Error::EngineStartupFailed(format!(
                    "Engine exited before becoming ready while loading {}",
                    model_id
                )))
            }
            Err(_) => {
                warn!("Engine not ready after {:?}, terminating", startup_timeout);
                self.process.terminate().await?;
                Err(Error::EngineStartupFailed(format!(
                    "Engine did not become ready within {}s while loading {}",
                    startup_timeout.as_secs(),
                    model_id
                )))
            }
        }
    }
}

#[async_trait]
impl Evictable for EngineProcessManager {
    async fn unload(&mut self) -> Result<()> {
        if self.slot.loaded_model.is_none() && self.process.pid().is_none() {
            debug!("Unload requested with no engine running");
            return Ok(());
        }

        info!("Unloading engine model {:?}", self.slot.loaded_model);
        self.slot.clear();
        self.process.terminate().await
    }

    /// Ready and the process has not gone away since
    fn is_loaded(&self) -> bool {
        self.slot.ready && self.process.is_alive()
    }
}

#[async_trait]
impl TextEngine for EngineProcessManager {
    async fn ensure_model(&mut self, model_id: &str, options: &LaunchOptions) -> Result<()> {
        if self.is_loaded()
            && self.slot.loaded_model.as_deref() == Some(model_id)
            && self.process.is_running()
        {
            return Ok(());
        }

        self.unload().await?;
        self.start(model_id, options).await
    }

    fn loaded_model(&self) -> Option<&str> {
        self.slot.loaded_model.as_deref()
    }

    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<Completion> {
        let model_id = match &self.slot.loaded_model {
            Some(model_id) if self.is_loaded() => model_id,
            _ => return Err(Error::EngineUnavailable),
        };

        let mut prompt = self.slot.formatter.format(messages);
        prompt.push_text(&params.response_prefix);

        let request = CompletionRequest::new(&prompt, params, &self.config.sampling);
        let url = format!("{}/completion", self.server_url);
        debug!("Requesting completion from {} ({} messages)", url, messages.len());

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::EngineRequestFailed(format!("Failed to reach engine: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::EngineRequestFailed(format!(
                "Engine returned {}: {}",
                status, body
            )));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::EngineRequestFailed(format!("Invalid engine response: {}", e)))?;

        let model = if body.model.is_empty() {
            model_id.clone()
        } else {
            body.model
        };

        Ok(Completion {
            text: self.slot.formatter.strip_turn_artifacts(&body.content),
            model,
        })
    }
}
