//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `TRYON_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `TRYON_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `TRYON_STORAGE__BASE_DIR=/srv/tryon` sets the `storage.base_dir` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use tryon::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`, `max_upload_size`
//! - **Storage**: `storage.base_dir`, `storage.uploads_dir`, `storage.outputs_dir`, `storage.public_prefix`
//! - **Remote model**: `remote_model.url`, `remote_model.timeout`, `remote_model.params`,
//!   `remote_model.max_response_size`, `remote_model.artifact_dir` - optional; without it every
//!   request uses the local fallback
//! - **Fallback**: `fallback.geometry`, `fallback.on_failure`
//! - **Security**: `cors` - CORS settings for the storefront
//! - **Telemetry**: `enable_otel_export`
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! TRYON_PORT=8080
//!
//! # Point at a hosted model
//! TRYON_REMOTE_MODEL__URL="https://tryon.example.com/api/tryon"
//! TRYON_REMOTE_MODEL__API_KEY="hf_..."
//!
//! # Use the wider overlay
//! TRYON_FALLBACK__GEOMETRY=fitted
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::compositor::OverlayGeometry;
use crate::errors::Error;
use crate::inference::InferenceParams;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "TRYON_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have sensible defaults defined in the `Default` implementation, so an empty (or
/// missing) config file yields a working local-only service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Upload and output directories
    pub storage: StorageConfig,
    /// Hosted try-on model. When absent the remote path is skipped entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_model: Option<RemoteModelConfig>,
    /// Local overlay used when the remote model fails or is not configured
    pub fallback: FallbackConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// Maximum request body size in bytes (both images together)
    pub max_upload_size: usize,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Where uploads and results live on disk, and where results are served from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Base directory; the uploads and outputs directories are created beneath it
    pub base_dir: PathBuf,
    /// Directory name for raw uploads (write-once, never served)
    pub uploads_dir: String,
    /// Directory name for generated results (served publicly)
    pub outputs_dir: String,
    /// URL prefix the outputs directory is served under
    pub public_prefix: String,
}

/// Hosted try-on model endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteModelConfig {
    /// Set to false to keep the configuration but skip the remote call
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Prediction endpoint that accepts the multipart request
    pub url: Url,
    /// Optional bearer token sent with every request to the model host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Give up on an attempt after this long. Unset means wait indefinitely.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Total attempts before falling back (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Largest model reply or artifact download accepted, in bytes
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
    /// Directory the model shares with this service. Artifacts given as local paths or `file://`
    /// URLs are only read from beneath it; when unset they are refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
    /// Fixed inference parameters
    #[serde(default)]
    pub params: InferenceParams,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    1
}

fn default_max_response_size() -> usize {
    20 * 1024 * 1024
}

/// Local fallback behaviour.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackConfig {
    /// Overlay geometry: a preset name or explicit fractions
    pub geometry: GeometryConfig,
    /// What to answer when the local composition itself fails
    pub on_failure: CompositionFailurePolicy,
}

/// Overlay geometry, either a named preset or custom values.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum GeometryConfig {
    Preset(GeometryPreset),
    Custom(OverlayGeometry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryPreset {
    /// Half the person's width, a quarter of the way down
    Classic,
    /// 60% of the person's width, 35% down plus 10px
    Fitted,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        GeometryConfig::Preset(GeometryPreset::Classic)
    }
}

impl GeometryConfig {
    pub fn resolve(&self) -> OverlayGeometry {
        match self {
            GeometryConfig::Preset(GeometryPreset::Classic) => OverlayGeometry::CLASSIC,
            GeometryConfig::Preset(GeometryPreset::Fitted) => OverlayGeometry::FITTED,
            GeometryConfig::Custom(geometry) => *geometry,
        }
    }
}

/// Policy for a failed local composition (corrupt or undecodable upload).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CompositionFailurePolicy {
    /// Respond with a 500 error
    #[default]
    Error,
    /// Respond 200 with a fixed placeholder image URL
    Placeholder { url: Url },
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://shop.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            storage: StorageConfig::default(),
            remote_model: None,
            fallback: FallbackConfig::default(),
            cors: CorsConfig::default(),
            max_upload_size: 20 * 1024 * 1024,
            enable_otel_export: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            uploads_dir: "uploads".to_string(),
            outputs_dir: "static".to_string(),
            public_prefix: "/static".to_string(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        // The storefront is a static site on another origin; it sends no cookies.
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        for (name, value) in [
            ("uploads_dir", &self.storage.uploads_dir),
            ("outputs_dir", &self.storage.outputs_dir),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Internal {
                    operation: format!("Config validation: storage.{name} cannot be empty"),
                });
            }
        }

        if self.storage.uploads_dir == self.storage.outputs_dir {
            return Err(Error::Internal {
                operation: "Config validation: storage.uploads_dir and storage.outputs_dir must differ, uploads must never be served"
                    .to_string(),
            });
        }

        let prefix = self.storage.public_prefix.trim_end_matches('/');
        if !prefix.starts_with('/') || prefix.is_empty() {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: storage.public_prefix must be a non-root path starting with '/' (got '{}')",
                    self.storage.public_prefix
                ),
            });
        }
        if prefix == "/api" || prefix.starts_with("/api/") {
            return Err(Error::Internal {
                operation: "Config validation: storage.public_prefix cannot live under /api".to_string(),
            });
        }

        let geometry = self.fallback.geometry.resolve();
        if !(geometry.width_fraction > 0.0 && geometry.width_fraction <= 1.0) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: fallback.geometry.width_fraction must be within (0, 1] (got {})",
                    geometry.width_fraction
                ),
            });
        }
        if !(0.0..=1.0).contains(&geometry.vertical_fraction) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: fallback.geometry.vertical_fraction must be within [0, 1] (got {})",
                    geometry.vertical_fraction
                ),
            });
        }

        if let Some(remote) = &self.remote_model {
            if remote.max_attempts == 0 {
                return Err(Error::Internal {
                    operation: "Config validation: remote_model.max_attempts must be at least 1".to_string(),
                });
            }
            if remote.timeout.is_some_and(|t| t.is_zero()) {
                return Err(Error::Internal {
                    operation: "Config validation: remote_model.timeout must be positive; omit it to wait indefinitely".to_string(),
                });
            }
            if remote.max_response_size == 0 {
                return Err(Error::Internal {
                    operation: "Config validation: remote_model.max_response_size cannot be 0".to_string(),
                });
            }
            if remote.params.denoise_steps == 0 {
                return Err(Error::Internal {
                    operation: "Config validation: remote_model.params.denoise_steps must be at least 1".to_string(),
                });
            }
        }

        if self.max_upload_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: max_upload_size cannot be 0".to_string(),
            });
        }

        // Validate CORS configuration
        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        let has_wildcard = self.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            return Err(Error::Internal {
                operation: "Config validation: CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins."
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values (TRYON_CONFIG names the file itself)
            .merge(Env::prefixed("TRYON_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
