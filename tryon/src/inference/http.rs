//! HTTP client for a hosted try-on model.
//!
//! The model is called with a single `multipart/form-data` POST carrying both images and the
//! inference parameters. It answers with JSON of the form `{"data": [artifact, ...]}`, where an
//! artifact is either a bare string or a file object with `url` and/or `path` keys. The first
//! artifact is the composite; it is downloaded (URL) or copied (local path) into the outputs
//! directory under a fresh name.
//!
//! Whatever the model points at ends up publicly served, so artifacts are treated as untrusted:
//! - local paths and `file://` URLs are only read from beneath the configured artifact directory
//! - replies and downloads are capped at `max_response_size` bytes
//! - the bytes must sniff as an image, and the stored extension follows the detected format

use async_trait::async_trait;
use reqwest::{
    Client, Response,
    header::AUTHORIZATION,
    multipart::{Form, Part},
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{InferenceParams, RemoteError, TryOnModel};
use crate::{config::RemoteModelConfig, storage::Storage};

/// Extension used when the detected image format has no registered extension.
const DEFAULT_EXTENSION: &str = "png";

/// Reply and artifact size cap when none is configured.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 20 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    data: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Artifact {
    Location(String),
    File { url: Option<String>, path: Option<String> },
}

impl Artifact {
    fn location(&self) -> Option<&str> {
        match self {
            Artifact::Location(location) => Some(location.as_str()),
            Artifact::File { url, path } => url.as_deref().or(path.as_deref()),
        }
    }
}

/// The concrete implementation of `TryOnModel`, backed by `reqwest`.
pub struct HttpTryOnModel {
    client: Client,
    url: Url,
    api_key: Option<String>,
    storage: Storage,
    max_response_size: usize,
    artifact_dir: Option<PathBuf>,
}

impl HttpTryOnModel {
    /// A client that only accepts http(s) artifacts, capped at [`DEFAULT_MAX_RESPONSE_SIZE`].
    pub fn new(client: Client, url: Url, api_key: Option<String>, storage: Storage) -> Self {
        Self {
            client,
            url,
            api_key,
            storage,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            artifact_dir: None,
        }
    }

    pub fn with_max_response_size(mut self, limit: usize) -> Self {
        self.max_response_size = limit;
        self
    }

    /// Accept local-path artifacts located beneath `dir`.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn from_config(config: &RemoteModelConfig, storage: Storage) -> anyhow::Result<Self> {
        // No client-level timeout: the service decides how long to wait.
        let client = Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client for try-on model: {}", e))?;

        let mut model = Self::new(client, config.url.clone(), config.api_key.clone(), storage)
            .with_max_response_size(config.max_response_size);
        if let Some(dir) = &config.artifact_dir {
            model = model.with_artifact_dir(dir.clone());
        }
        Ok(model)
    }

    fn bearer(&self) -> Option<String> {
        self.api_key.as_ref().map(|key| format!("Bearer {}", key))
    }

    async fn predict(&self, person: &Path, garment: &Path, params: &InferenceParams) -> Result<PredictionResponse, RemoteError> {
        let form = Form::new()
            .part("person_image", file_part(person).await?)
            .part("garment_image", file_part(garment).await?)
            .text("garment_description", params.garment_description.clone())
            .text("denoise_steps", params.denoise_steps.to_string())
            .text("seed", params.seed.to_string())
            .text("auto_mask", params.auto_mask.to_string())
            .text("auto_crop", params.auto_crop.to_string());

        let mut request = self.client.post(self.url.clone()).multipart(form);
        if let Some(bearer) = self.bearer() {
            request = request.header(AUTHORIZATION, bearer);
        }

        let response = request.send().await?.error_for_status()?;
        let body = read_limited(response, self.max_response_size).await?;

        serde_json::from_slice(&body).map_err(|e| {
            let body = String::from_utf8_lossy(&body);
            RemoteError::MalformedResponse(format!("{e}: {}", truncate(&body, 200)))
        })
    }

    /// Fetch the raw artifact bytes.
    async fn fetch_artifact(&self, location: &str) -> Result<Vec<u8>, RemoteError> {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let mut request = self.client.get(url.clone());
                // Only hand the key to the model's own host
                if url.host_str() == self.url.host_str()
                    && let Some(bearer) = self.bearer()
                {
                    request = request.header(AUTHORIZATION, bearer);
                }

                let response = request.send().await?.error_for_status()?;
                read_limited(response, self.max_response_size).await
            }
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| RemoteError::MalformedResponse(format!("unusable file URL: {location}")))?;
                self.read_local(&path).await
            }
            Ok(url) => Err(RemoteError::UntrustedArtifact(format!("unsupported scheme `{}`", url.scheme()))),
            Err(_) => self.read_local(Path::new(location)).await,
        }
    }

    /// Read a file the model wrote to the shared artifact directory.
    ///
    /// Both sides are canonicalized first, so `..` segments and symlinks cannot leave the
    /// directory. Relative paths are taken relative to it.
    async fn read_local(&self, path: &Path) -> Result<Vec<u8>, RemoteError> {
        let Some(artifact_dir) = &self.artifact_dir else {
            return Err(RemoteError::UntrustedArtifact(path.display().to_string()));
        };

        let root = tokio::fs::canonicalize(artifact_dir).await.map_err(|source| RemoteError::Io {
            path: artifact_dir.clone(),
            source,
        })?;
        let resolved = tokio::fs::canonicalize(root.join(path)).await.map_err(|source| RemoteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !resolved.starts_with(&root) {
            return Err(RemoteError::UntrustedArtifact(path.display().to_string()));
        }

        let io_error = |source| RemoteError::Io {
            path: resolved.clone(),
            source,
        };
        let metadata = tokio::fs::metadata(&resolved).await.map_err(io_error)?;
        if !metadata.is_file() {
            return Err(RemoteError::UntrustedArtifact(path.display().to_string()));
        }
        if metadata.len() > self.max_response_size as u64 {
            return Err(RemoteError::TooLarge {
                limit: self.max_response_size,
            });
        }

        tokio::fs::read(&resolved).await.map_err(io_error)
    }
}

#[async_trait]
impl TryOnModel for HttpTryOnModel {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn generate(&self, person: &Path, garment: &Path, params: &InferenceParams) -> Result<PathBuf, RemoteError> {
        let prediction = self.predict(person, garment, params).await?;
        debug!(artifacts = prediction.data.len(), "Try-on model responded");

        let location = prediction.data.first().ok_or(RemoteError::EmptyOutput)?;
        let location = location
            .location()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| RemoteError::MalformedResponse("first artifact has neither url nor path".to_string()))?;

        let bytes = self.fetch_artifact(location).await.inspect_err(|e| {
            warn!(artifact = location, error = %e, "Refusing try-on model artifact");
        })?;
        let extension = artifact_extension(&bytes)?;
        let name = Storage::output_name("remote", extension);
        let path = self.storage.write_output(&name, &bytes).await?;

        debug!(artifact = location, output = %path.display(), "Stored remote try-on result");
        Ok(path)
    }
}

async fn file_part(path: &Path) -> Result<Part, RemoteError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| RemoteError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    Ok(Part::bytes(bytes).file_name(file_name).mime_str(mime.as_ref())?)
}

/// Collect a response body, giving up as soon as it exceeds `limit` bytes.
async fn read_limited(mut response: Response, limit: usize) -> Result<Vec<u8>, RemoteError> {
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(RemoteError::TooLarge { limit });
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(RemoteError::TooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// File extension for a stored artifact, taken from the image format its bytes sniff as.
fn artifact_extension(bytes: &[u8]) -> Result<&'static str, RemoteError> {
    let format = image::guess_format(bytes).map_err(|_| RemoteError::NotAnImage)?;
    Ok(format.extensions_str().first().copied().unwrap_or(DEFAULT_EXTENSION))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
