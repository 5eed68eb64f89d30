use std::collections::BTreeSet;

use thiserror::Error;

use crate::events::RabbitMqConfig;
use crate::object_store::S3Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Longest validity S3 accepts for a presigned URL
const MAX_PRESIGNED_EXPIRES_SECONDS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub auth: AuthConfig,
    /// RabbitMQ settings; `None` disables event publication
    pub events: Option<RabbitMqConfig>,
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub uploads: UploadPolicy,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    /// Base URL clients reach this service at (used for local signed URLs)
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 secret shared with the token issuer
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Local,
    S3,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for local storage backend
    pub local_storage_path: String,
    /// HMAC secret for local signed URLs
    pub local_signing_secret: String,
    /// Bucket settings (required when backend is s3)
    pub s3: Option<S3Config>,
}

/// Limits applied when an upload is initiated.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_file_size_bytes: u64,
    /// Empty means every content type is accepted
    pub allowed_content_types: BTreeSet<String>,
    /// Validity window of issued upload and download URLs
    pub presigned_expires_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
            local_signing_secret: "local-dev-signing-secret".to_string(),
            s3: None,
        }
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 50 * 1024 * 1024, // 50MB
            allowed_content_types: parse_content_types(
                "application/pdf,application/zip,application/x-zip-compressed",
            ),
            presigned_expires_seconds: 900,
        }
    }
}

impl UploadPolicy {
    pub fn allows(&self, content_type: &str) -> bool {
        self.allowed_content_types.is_empty() || self.allowed_content_types.contains(content_type)
    }
}

fn parse_content_types(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address = env_or("BIND_ADDRESS", "0.0.0.0:3004");
        let data_dir = env_or("DATA_DIR", "./data");
        let public_url = env_or("PUBLIC_URL", "http://localhost:3004");

        let test_mode = env_flag("TEST_MODE");
        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_default();

        let defaults = UploadPolicy::default();
        let max_file_size_bytes = std::env::var("MAX_FILE_SIZE_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_file_size_bytes);
        let allowed_content_types = std::env::var("ALLOWED_CONTENT_TYPES")
            .map(|raw| parse_content_types(&raw))
            .unwrap_or(defaults.allowed_content_types);
        let presigned_expires_seconds = std::env::var("PRESIGNED_EXPIRES_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.presigned_expires_seconds);

        let backend = match env_or("STORAGE_BACKEND", "local").to_lowercase().as_str() {
            "s3" | "minio" => StorageBackend::S3,
            _ => StorageBackend::Local,
        };

        let s3 = match std::env::var("S3_BUCKET") {
            Ok(bucket) => Some(S3Config {
                endpoint: env_or("S3_ENDPOINT_INTERNAL", "http://minio:9000"),
                public_endpoint: std::env::var("S3_PUBLIC_ENDPOINT").ok(),
                bucket,
                region: env_or("S3_REGION", "us-east-1"),
                access_key: std::env::var("S3_ACCESS_KEY").unwrap_or_default(),
                secret_key: std::env::var("S3_SECRET_KEY").unwrap_or_default(),
                virtual_hosted: env_flag("S3_VIRTUAL_HOSTED"),
            }),
            Err(_) => None,
        };

        let local_defaults = StorageConfig::default();
        let local_signing_secret = std::env::var("LOCAL_SIGNING_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                if jwt_secret.is_empty() {
                    local_defaults.local_signing_secret.clone()
                } else {
                    jwt_secret.clone()
                }
            });

        let events = std::env::var("RABBITMQ_API_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|api_url| RabbitMqConfig {
                api_url,
                username: env_or("RABBITMQ_USERNAME", "guest"),
                password: env_or("RABBITMQ_PASSWORD", "guest"),
                vhost: env_or("RABBITMQ_VHOST", "/"),
                exchange: env_or("RABBITMQ_EXCHANGE", "events"),
                queue: env_or("RABBITMQ_QUEUE", "notifications.file_uploaded"),
                routing_key: env_or("RABBITMQ_ROUTING_KEY", "file.uploaded"),
            });

        let config = Config {
            auth: AuthConfig { jwt_secret },
            events,
            node: NodeConfig {
                bind_address,
                data_dir,
                public_url,
            },
            storage: StorageConfig {
                backend,
                local_storage_path: env_or(
                    "LOCAL_STORAGE_PATH",
                    &local_defaults.local_storage_path,
                ),
                local_signing_secret,
                s3,
            },
            uploads: UploadPolicy {
                max_file_size_bytes,
                allowed_content_types,
                presigned_expires_seconds,
            },
            test_mode,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.is_empty() && !self.test_mode {
            return Err(ConfigError::ValidationError(
                "JWT_SECRET is required".to_string(),
            ));
        }

        if matches!(self.storage.backend, StorageBackend::S3) {
            let Some(s3) = &self.storage.s3 else {
                return Err(ConfigError::ValidationError(
                    "S3_BUCKET is required when STORAGE_BACKEND=s3".to_string(),
                ));
            };
            if s3.access_key.is_empty() || s3.secret_key.is_empty() {
                return Err(ConfigError::ValidationError(
                    "S3_ACCESS_KEY and S3_SECRET_KEY are required when STORAGE_BACKEND=s3"
                        .to_string(),
                ));
            }
        }

        let expires = self.uploads.presigned_expires_seconds;
        if expires == 0 || expires > MAX_PRESIGNED_EXPIRES_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "PRESIGNED_EXPIRES_SECONDS must be between 1 and {MAX_PRESIGNED_EXPIRES_SECONDS}"
            )));
        }

        if self.uploads.allowed_content_types.is_empty() {
            tracing::warn!("ALLOWED_CONTENT_TYPES is empty; every content type will be accepted");
        }

        Ok(())
    }
}
