//! JSON persistence for the learned transition model.
//!
//! The document is a cache, not a source of truth: a missing, unreadable or
//! corrupt file is reported to the caller, who falls back to an empty model.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TransitionModel;
use crate::error::{PrebufferError, Result};

/// File name of the persisted model inside the data directory.
pub const MODEL_FILE_NAME: &str = "channel_predictions.json";

/// Current document layout version.
const MODEL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedModel {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    transitions: HashMap<String, HashMap<String, f64>>,
    #[serde(default)]
    hourly_popularity: BTreeMap<u32, HashMap<String, f64>>,
    #[serde(default = "Utc::now")]
    last_updated: DateTime<Utc>,
}

/// Location of the persisted model on disk.
#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(MODEL_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the model. `Ok(None)` when no document exists yet.
    pub async fn load(&self) -> Result<Option<(TransitionModel, DateTime<Utc>)>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let doc: PersistedModel = serde_json::from_slice(&bytes)?;
        if doc.version > MODEL_VERSION {
            return Err(PrebufferError::persistence(format!(
                "unsupported model version {} in {}",
                doc.version,
                self.path.display()
            )));
        }

        let hourly_popularity = doc
            .hourly_popularity
            .into_iter()
            .filter(|(hour, _)| *hour < 24)
            .collect();
        let model = TransitionModel {
            transitions: doc.transitions,
            hourly_popularity,
        };
        debug!(path = %self.path.display(), "Loaded prediction model");
        Ok(Some((model, doc.last_updated)))
    }

    /// Writes the model atomically (temporary file, then rename).
    pub async fn save(&self, model: &TransitionModel) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let doc = PersistedModel {
            version: MODEL_VERSION,
            transitions: model.transitions.clone(),
            hourly_popularity: model.hourly_popularity.clone(),
            last_updated: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&doc)?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        debug!(path = %self.path.display(), "Saved prediction model");
        Ok(())
    }

    /// Deletes the document. A missing file is not an error.
    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
