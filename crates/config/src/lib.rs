mod config_loader;
mod model_catalog;


pub use config_loader::{
    AppConfig, CompletionsConfig, ConfigLoader, EngineConfig, IdleConfig, ModelsConfig,
    SamplingConfig, ServerConfig,
};
pub use model_catalog::ModelCatalog;
