use amp_common::{BackendClass, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine binary names looked up in the search directory, in order
const ENGINE_BINARY_NAMES: &[&str] = &["llama-server", "server"];

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub models: ModelsConfig,
    pub idle: IdleConfig,
    pub completions: CompletionsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 17173,
        }
    }
}

/// External text-generation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit engine binary; searched for in `search_dir` when unset
    pub binary: Option<PathBuf>,
    pub search_dir: PathBuf,
    /// Arguments placed before the managed launch flags
    pub extra_args: Vec<String>,
    pub host: String,
    pub port: u16,
    pub gpu_layers: i32,
    pub context_window: usize,
    /// Any of these substrings on the engine's output marks it ready
    pub readiness_markers: Vec<String>,
    pub startup_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub sampling: SamplingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: None,
            search_dir: PathBuf::from("bin"),
            extra_args: Vec::new(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            gpu_layers: 9001,
            context_window: 8192,
            readiness_markers: vec![
                "llama_new_context_with_model: graph splits".to_string(),
                "server is listening on".to_string(),
            ],
            startup_timeout_secs: 120,
            request_timeout_secs: 600,
            sampling: SamplingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Locate the engine binary
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        if let Some(binary) = &self.binary {
            if binary.exists() {
                return Ok(binary.clone());
            }
            return Err(Error::ConfigError(format!(
                "Engine binary not found at {}",
                binary.display()
            )));
        }

        for name in ENGINE_BINARY_NAMES {
            let file_name = if cfg!(windows) {
                format!("{}.exe", name)
            } else {
                name.to_string()
            };
            let candidate = self.search_dir.join(file_name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(Error::ConfigError(format!(
            "Add the llama.cpp server binary into the {} folder",
            self.search_dir.display()
        )))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Sampling parameters sent with every completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub min_p: f32,
    pub typical_p: f32,
    pub repeat_penalty: f32,
    pub top_k: i32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.8,
            min_p: 0.05,
            typical_p: 1.0,
            repeat_penalty: 1.18,
            top_k: 40,
        }
    }
}

/// Models configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub directory: PathBuf,
    pub extension: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("models"),
            extension: "gguf".to_string(),
        }
    }
}

/// Idle timeouts per backend class, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    pub text_generation_secs: u64,
    pub transcription_secs: u64,
    pub synthesis_secs: u64,
    pub image_generation_secs: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            text_generation_secs: 660,
            transcription_secs: 600,
            synthesis_secs: 600,
            image_generation_secs: 60,
        }
    }
}

impl IdleConfig {
    pub fn timeout(&self, class: BackendClass) -> Duration {
        let secs = match class {
            BackendClass::TextGeneration => self.text_generation_secs,
            BackendClass::Transcription => self.transcription_secs,
            BackendClass::Synthesis => self.synthesis_secs,
            BackendClass::ImageGeneration => self.image_generation_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Completion defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionsConfig {
    /// Used by pinned conversations when a request omits `max_tokens`
    pub default_max_tokens: usize,
    /// Used by the chat-completions shim when a request omits `max_tokens`
    pub chat_max_tokens: usize,
    /// Pause between simulated stream chunks
    pub stream_chunk_delay_ms: u64,
}

impl Default for CompletionsConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: 200,
            chat_max_tokens: 512,
            stream_chunk_delay_ms: 500,
        }
    }
}

impl CompletionsConfig {
    pub fn stream_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.stream_chunk_delay_ms)
    }
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<AppConfig> {
        if let Some(path) = path {
            if path.exists() {
                return Self::read(path);
            }
            tracing::warn!("Config file {} not found, trying default locations", path.display());
        }

        // Check default locations
        let default_paths = vec![
            PathBuf::from("amp.json"),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("amp/config.json"),
        ];

        for path in default_paths {
            if path.exists() {
                return Self::read(&path);
            }
        }

        // Use defaults
        Ok(AppConfig::default())
    }

    fn read(path: &PathBuf) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(config: &AppConfig, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
