//! Test utilities shared by unit and handler tests.

use crate::{
    config::Config,
    inference::{InferenceParams, RemoteError, TryOnModel},
    service::TryOnService,
    storage::Storage,
};
use async_trait::async_trait;
use axum_test::TestServer;
use image::{ImageFormat, Rgba, RgbaImage};
use std::{
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tempfile::TempDir;

/// reqwest is built without a default crypto provider; tests that make HTTP calls need one.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Encode a single-colour PNG.
pub fn solid_png(width: u32, height: u32, colour: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(colour));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).expect("encode test png");
    buf.into_inner()
}

/// Storage rooted in a fresh temp dir, served under `/static`.
pub async fn test_storage() -> (TempDir, Storage) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let storage = Storage::new(dir.path().join("uploads"), dir.path().join("static"), "/static");
    storage.init().await.expect("init storage");
    (dir, storage)
}

/// Default config pointing at a temp dir, with no remote model.
pub fn create_test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.storage.base_dir = dir.to_path_buf();
    config
}

/// Full application over a temp dir. The `TempDir` must outlive the server.
pub async fn create_test_app() -> (TestServer, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let app = crate::Application::new(create_test_config(dir.path()))
        .await
        .expect("Failed to create application");
    (app.into_test_server(), dir)
}

/// Application over a temp dir with a model in front of the local fallback.
///
/// `make_model` receives the application's storage so a succeeding model can write its output
/// where the service expects it.
pub async fn create_test_app_with_model<F>(make_model: F) -> (TestServer, TempDir)
where
    F: FnOnce(Storage) -> Arc<dyn TryOnModel>,
{
    let dir = tempfile::tempdir().expect("create temp dir");
    let config = create_test_config(dir.path());
    let storage = Storage::from_config(&config.storage);
    storage.init().await.expect("init storage");
    let model = make_model(storage.clone());

    let service = TryOnService::new(
        storage,
        config.fallback.geometry.resolve(),
        config.fallback.on_failure.clone(),
    )
    .with_model(model, InferenceParams::default(), Default::default());

    let app = crate::Application::with_service(config, service).expect("Failed to create application");
    (app.into_test_server(), dir)
}

enum Behaviour {
    Succeed(Storage),
    Fail(fn() -> RemoteError),
    Hang,
}

/// Scripted stand-in for the hosted model.
pub struct MockModel {
    behaviour: Behaviour,
    calls: AtomicUsize,
    last_description: Mutex<Option<String>>,
}

impl MockModel {
    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            calls: AtomicUsize::new(0),
            last_description: Mutex::new(None),
        }
    }

    /// Writes a small green PNG into the outputs directory.
    pub fn succeeding(storage: Storage) -> Self {
        Self::with(Behaviour::Succeed(storage))
    }

    pub fn failing(error: fn() -> RemoteError) -> Self {
        Self::with(Behaviour::Fail(error))
    }

    /// Never completes.
    pub fn hanging() -> Self {
        Self::with(Behaviour::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_description(&self) -> Option<String> {
        self.last_description.lock().unwrap().clone()
    }
}

#[async_trait]
impl TryOnModel for MockModel {
    async fn generate(&self, person: &Path, garment: &Path, params: &InferenceParams) -> Result<PathBuf, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_description.lock().unwrap() = Some(params.garment_description.clone());
        assert!(person.exists(), "person upload should be on disk before the model runs");
        assert!(garment.exists(), "garment upload should be on disk before the model runs");

        match &self.behaviour {
            Behaviour::Succeed(storage) => {
                let name = Storage::output_name("remote", "png");
                Ok(storage.write_output(&name, &solid_png(4, 4, [0, 255, 0, 255])).await?)
            }
            Behaviour::Fail(error) => Err(error()),
            Behaviour::Hang => std::future::pending().await,
        }
    }
}
