//! Remote try-on model abstraction.
//!
//! This module defines the `TryOnModel` trait, the seam between the service and the hosted
//! try-on model. The model is a black box: it receives two image files plus a handful of fixed
//! inference parameters, and hands back a list of artifacts whose first entry is the composite.
//! Implementations persist that composite into the outputs directory before returning.
//!
//! Any error returned here is a signal to fall back to the local compositor; it never reaches
//! the HTTP caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{config::RemoteModelConfig, storage::Storage};

pub mod http;

/// Build the remote model from configuration.
///
/// Returns `None` when no model is configured or it is switched off; the service then goes
/// straight to the local fallback.
pub fn create_model(config: Option<&RemoteModelConfig>, storage: Storage) -> anyhow::Result<Option<Box<dyn TryOnModel>>> {
    match config {
        Some(config) if config.enabled => Ok(Some(Box::new(http::HttpTryOnModel::from_config(config, storage)?))),
        Some(_) => {
            tracing::info!("Remote try-on model disabled by configuration, using local fallback only");
            Ok(None)
        }
        None => {
            tracing::info!("No remote try-on model configured, using local fallback only");
            Ok(None)
        }
    }
}

/// Errors from the remote model. All of them mean "remote unavailable".
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("request to try-on model failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("try-on model returned a malformed response: {0}")]
    MalformedResponse(String),

    #[error("try-on model returned no output artifacts")]
    EmptyOutput,

    #[error("try-on model artifact is not readable from here: {0}")]
    UntrustedArtifact(String),

    #[error("try-on model artifact is not a recognised image")]
    NotAnImage,

    #[error("try-on model response exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
}

/// Fixed inference parameters sent with every call.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceParams {
    /// Number of denoising steps the diffusion model runs
    pub denoise_steps: u32,
    /// Sampling seed, fixed so repeated requests are comparable
    pub seed: u64,
    /// Free-text description of the garment
    pub garment_description: String,
    /// Let the model derive the garment mask automatically
    pub auto_mask: bool,
    /// Let the model crop and resize the person photo
    pub auto_crop: bool,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            denoise_steps: 30,
            seed: 42,
            garment_description: "A garment".to_string(),
            auto_mask: true,
            auto_crop: false,
        }
    }
}

/// Capability interface of the hosted try-on model.
#[async_trait]
pub trait TryOnModel: Send + Sync {
    /// Generate a composite for the two uploaded images.
    ///
    /// On success the composite has already been written to the outputs directory and its path
    /// is returned.
    async fn generate(&self, person: &Path, garment: &Path, params: &InferenceParams) -> Result<PathBuf, RemoteError>;
}
