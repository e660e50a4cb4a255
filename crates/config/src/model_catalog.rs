use amp_common::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::ModelsConfig;

/// Installed text-generation models, read from a directory listing.
///
/// The directory is rescanned on every query so that models copied in while
/// the process runs become available without a restart.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    directory: PathBuf,
    extension: String,
}

impl ModelCatalog {
    pub fn new(directory: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            extension: extension.into(),
        }
    }

    pub fn from_config(config: &ModelsConfig) -> Self {
        Self::new(config.directory.clone(), config.extension.clone())
    }

    /// List all installed model identifiers, sorted
    pub fn list_models(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Models directory {} does not exist", self.directory.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let suffix = format!(".{}", self.extension);
        let mut models = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(&suffix) {
                    models.push(name.to_string());
                }
            }
        }

        models.sort();
        Ok(models)
    }

    /// The first listed model
    pub fn default_model(&self) -> Result<String> {
        self.list_models()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::BackendNotFound("No models available.".into()))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
