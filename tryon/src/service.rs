//! Try-on orchestration: remote model first, local overlay second.
//!
//! A request is served by exactly one of three paths, recorded as [`TryOnOutcome`]:
//!
//! 1. **Remote** - the hosted model produced a composite.
//! 2. **Fallback** - the remote model is missing or failed in any way, and the local compositor
//!    pasted the garment onto the person photo.
//! 3. **Placeholder** - the local compositor failed too and the configured policy masks that with
//!    a fixed image URL.
//!
//! Remote failures never reach the caller. A local failure under the default policy does, as a
//! terminal `500`.

use bytes::Bytes;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, instrument, warn};

use crate::{
    compositor::{self, OverlayGeometry},
    config::{CompositionFailurePolicy, Config},
    errors::{Error, Result},
    inference::{self, InferenceParams, TryOnModel},
    storage::Storage,
};

/// One uploaded image as received from the client.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub bytes: Bytes,
}

/// A validated try-on request.
#[derive(Debug, Clone)]
pub struct TryOnRequest {
    pub person: ImageUpload,
    pub garment: ImageUpload,
    /// Overrides the configured garment description for the remote model
    pub garment_description: Option<String>,
}

/// Which path produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryOnOutcome {
    Remote,
    Fallback,
    Placeholder,
}

impl TryOnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TryOnOutcome::Remote => "remote",
            TryOnOutcome::Fallback => "fallback",
            TryOnOutcome::Placeholder => "placeholder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryOnResult {
    pub output_image_url: String,
    pub outcome: TryOnOutcome,
}

/// Attempt budget for the remote model.
#[derive(Debug, Clone, Copy)]
pub struct RemotePolicy {
    pub timeout: Option<Duration>,
    pub max_attempts: u32,
}

impl Default for RemotePolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            max_attempts: 1,
        }
    }
}

pub struct TryOnService {
    storage: Storage,
    model: Option<Arc<dyn TryOnModel>>,
    params: InferenceParams,
    remote_policy: RemotePolicy,
    geometry: OverlayGeometry,
    on_failure: CompositionFailurePolicy,
}

impl TryOnService {
    pub fn new(storage: Storage, geometry: OverlayGeometry, on_failure: CompositionFailurePolicy) -> Self {
        Self {
            storage,
            model: None,
            params: InferenceParams::default(),
            remote_policy: RemotePolicy::default(),
            geometry,
            on_failure,
        }
    }

    /// Attach a remote model. Without one every request goes to the local compositor.
    pub fn with_model(mut self, model: Arc<dyn TryOnModel>, params: InferenceParams, remote_policy: RemotePolicy) -> Self {
        self.model = Some(model);
        self.params = params;
        self.remote_policy = remote_policy;
        self
    }

    /// Wire up storage, the optional remote model and the fallback from configuration.
    pub fn from_config(config: &Config, storage: Storage) -> anyhow::Result<Self> {
        let service = Self::new(
            storage.clone(),
            config.fallback.geometry.resolve(),
            config.fallback.on_failure.clone(),
        );

        let model = inference::create_model(config.remote_model.as_ref(), storage)?;

        Ok(match (model, config.remote_model.as_ref()) {
            (Some(model), Some(remote)) => service.with_model(
                Arc::from(model),
                remote.params.clone(),
                RemotePolicy {
                    timeout: remote.timeout,
                    max_attempts: remote.max_attempts,
                },
            ),
            _ => service,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn has_remote_model(&self) -> bool {
        self.model.is_some()
    }

    /// Run one try-on request through the remote model and, if needed, the local fallback.
    #[instrument(skip_all, fields(person_size = request.person.bytes.len(), garment_size = request.garment.bytes.len()))]
    pub async fn try_on(&self, request: TryOnRequest) -> Result<TryOnResult> {
        let person_path = self
            .storage
            .save_upload(request.person.file_name.as_deref(), &request.person.bytes)
            .await?;
        let garment_path = self
            .storage
            .save_upload(request.garment.file_name.as_deref(), &request.garment.bytes)
            .await?;

        if let Some(model) = &self.model {
            let mut params = self.params.clone();
            if let Some(description) = request.garment_description.filter(|d| !d.trim().is_empty()) {
                params.garment_description = description;
            }

            if let Some(output) = self.generate_remote(model, person_path, garment_path, params).await {
                match self.storage.url_for(&output) {
                    Some(url) => {
                        info!(outcome = TryOnOutcome::Remote.as_str(), output = %url, "Try-on completed");
                        return Ok(TryOnResult {
                            output_image_url: url,
                            outcome: TryOnOutcome::Remote,
                        });
                    }
                    None => warn!(path = %output.display(), "Remote model stored its result outside the outputs directory"),
                }
            }
        }

        self.compose_locally(request.person.bytes, request.garment.bytes).await
    }

    /// Call the remote model on its own task, honouring the attempt budget.
    ///
    /// Returns `None` on any failure; the reason is logged.
    async fn generate_remote(
        &self,
        model: &Arc<dyn TryOnModel>,
        person: PathBuf,
        garment: PathBuf,
        params: InferenceParams,
    ) -> Option<PathBuf> {
        for attempt in 1..=self.remote_policy.max_attempts {
            let mut task = tokio::spawn({
                let model = Arc::clone(model);
                let person = person.clone();
                let garment = garment.clone();
                let params = params.clone();
                async move { model.generate(&person, &garment, &params).await }
            });

            let joined = match self.remote_policy.timeout {
                Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        task.abort();
                        warn!(attempt, timeout = ?limit, "Try-on model timed out");
                        continue;
                    }
                },
                None => task.await,
            };

            match joined {
                Ok(Ok(output)) => return Some(output),
                Ok(Err(e)) => warn!(attempt, error = %e, "Try-on model failed"),
                Err(e) => warn!(attempt, error = %e, "Try-on model task did not complete"),
            }
        }

        warn!(
            attempts = self.remote_policy.max_attempts,
            "Try-on model unavailable, falling back to local composition"
        );
        None
    }

    /// Paste the garment onto the person locally and store the PNG.
    async fn compose_locally(&self, person: Bytes, garment: Bytes) -> Result<TryOnResult> {
        let geometry = self.geometry;
        let composed = tokio::task::spawn_blocking(move || compositor::compose_png(&person, &garment, &geometry))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn composition task: {e}"),
            })?;

        let failure = match composed {
            Ok(png) => {
                let name = Storage::output_name("result", "png");
                match self.storage.write_output(&name, &png).await {
                    Ok(_) => {
                        let url = self.storage.output_url(&name);
                        info!(outcome = TryOnOutcome::Fallback.as_str(), output = %url, "Try-on completed");
                        return Ok(TryOnResult {
                            output_image_url: url,
                            outcome: TryOnOutcome::Fallback,
                        });
                    }
                    Err(e) => Error::from(e),
                }
            }
            Err(e) => Error::from(e),
        };

        match &self.on_failure {
            CompositionFailurePolicy::Error => Err(failure),
            CompositionFailurePolicy::Placeholder { url } => {
                warn!(outcome = TryOnOutcome::Placeholder.as_str(), error = %failure, placeholder = %url, "Local composition failed, answering with placeholder");
                Ok(TryOnResult {
                    output_image_url: url.to_string(),
                    outcome: TryOnOutcome::Placeholder,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::RemoteError;
    use crate::test_utils::{MockModel, solid_png, test_storage};
    use std::collections::HashSet;
    use url::Url;

    fn request() -> TryOnRequest {
        TryOnRequest {
            person: ImageUpload {
                file_name: Some("me.png".to_string()),
                bytes: Bytes::from(solid_png(800, 1000, [0, 0, 255, 255])),
            },
            garment: ImageUpload {
                file_name: Some("shirt.png".to_string()),
                bytes: Bytes::from(solid_png(400, 400, [255, 0, 0, 255])),
            },
            garment_description: None,
        }
    }

    #[tokio::test]
    async fn without_model_uses_local_fallback() {
        let (_dir, storage) = test_storage().await;
        let service = TryOnService::new(storage.clone(), OverlayGeometry::CLASSIC, CompositionFailurePolicy::Error);

        let result = service.try_on(request()).await.unwrap();

        assert_eq!(result.outcome, TryOnOutcome::Fallback);
        assert!(result.output_image_url.starts_with("/static/result_"));
        let name = result.output_image_url.trim_start_matches("/static/");
        let stored = image::open(storage.outputs_dir().join(name)).unwrap();
        assert_eq!((stored.width(), stored.height()), (800, 1000));
        assert_eq!(stored.to_rgba8().get_pixel(200, 250).0, [255, 0, 0, 255]);
    }

    #[test_log::test(tokio::test)]
    async fn remote_success_is_returned() {
        let (_dir, storage) = test_storage().await;
        let model = Arc::new(MockModel::succeeding(storage.clone()));
        let service = TryOnService::new(storage.clone(), OverlayGeometry::CLASSIC, CompositionFailurePolicy::Error).with_model(
            model.clone(),
            InferenceParams::default(),
            RemotePolicy::default(),
        );

        let mut req = request();
        req.garment_description = Some("Blue denim jacket".to_string());
        let result = service.try_on(req).await.unwrap();

        assert_eq!(result.outcome, TryOnOutcome::Remote);
        assert!(result.output_image_url.starts_with("/static/remote_"));
        assert_eq!(model.calls(), 1);
        assert_eq!(model.last_description().as_deref(), Some("Blue denim jacket"));
    }

    #[test_log::test(tokio::test)]
    async fn remote_failure_falls_back_after_budget() {
        let (_dir, storage) = test_storage().await;
        let model = Arc::new(MockModel::failing(|| RemoteError::EmptyOutput));
        let service = TryOnService::new(storage.clone(), OverlayGeometry::FITTED, CompositionFailurePolicy::Error).with_model(
            model.clone(),
            InferenceParams::default(),
            RemotePolicy {
                timeout: None,
                max_attempts: 3,
            },
        );

        let result = service.try_on(request()).await.unwrap();

        assert_eq!(result.outcome, TryOnOutcome::Fallback);
        assert_eq!(model.calls(), 3);
    }

    #[test_log::test(tokio::test)]
    async fn hanging_remote_times_out_into_fallback() {
        let (_dir, storage) = test_storage().await;
        let model = Arc::new(MockModel::hanging());
        let service = TryOnService::new(storage.clone(), OverlayGeometry::CLASSIC, CompositionFailurePolicy::Error).with_model(
            model,
            InferenceParams::default(),
            RemotePolicy {
                timeout: Some(Duration::from_millis(50)),
                max_attempts: 2,
            },
        );

        let result = service.try_on(request()).await.unwrap();
        assert_eq!(result.outcome, TryOnOutcome::Fallback);
    }

    #[tokio::test]
    async fn corrupt_upload_is_terminal_by_default() {
        let (_dir, storage) = test_storage().await;
        let service = TryOnService::new(storage, OverlayGeometry::CLASSIC, CompositionFailurePolicy::Error);

        let mut req = request();
        req.garment.bytes = Bytes::from_static(b"not an image");

        let err = service.try_on(req).await.unwrap_err();
        assert!(matches!(err, Error::Composition(_)));
    }

    #[tokio::test]
    async fn corrupt_upload_uses_placeholder_when_configured() {
        let (_dir, storage) = test_storage().await;
        let placeholder = Url::parse("https://cdn.example.com/placeholder.jpg").unwrap();
        let service = TryOnService::new(
            storage,
            OverlayGeometry::CLASSIC,
            CompositionFailurePolicy::Placeholder { url: placeholder.clone() },
        );

        let mut req = request();
        req.person.bytes = Bytes::from_static(b"\x89PNG truncated");

        let result = service.try_on(req).await.unwrap();
        assert_eq!(result.outcome, TryOnOutcome::Placeholder);
        assert_eq!(result.output_image_url, placeholder.as_str());
    }

    #[tokio::test]
    async fn concurrent_requests_get_distinct_outputs() {
        let (_dir, storage) = test_storage().await;
        let service = Arc::new(TryOnService::new(storage, OverlayGeometry::CLASSIC, CompositionFailurePolicy::Error));

        let small = || TryOnRequest {
            person: ImageUpload {
                file_name: None,
                bytes: Bytes::from(solid_png(20, 30, [0, 0, 255, 255])),
            },
            garment: ImageUpload {
                file_name: None,
                bytes: Bytes::from(solid_png(10, 10, [255, 0, 0, 255])),
            },
            garment_description: None,
        };

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let service = service.clone();
                let req = small();
                tokio::spawn(async move { service.try_on(req).await })
            })
            .collect();

        let mut urls = HashSet::new();
        for handle in handles {
            urls.insert(handle.await.unwrap().unwrap().output_image_url);
        }
        assert_eq!(urls.len(), 16);
    }
}
