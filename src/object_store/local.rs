use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ring::hmac;
use std::path::{Component, Path, PathBuf};

use super::sigv4::uri_encode;
use super::{ObjectStoreError, UploadDelegate};

/// Which byte transfer a signed local URL grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOperation {
    Read,
    Write,
}

impl ObjectOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectOperation::Read => "read",
            ObjectOperation::Write => "write",
        }
    }
}

/// Local filesystem upload delegate for development and testing.
///
/// Issues HMAC-signed, expiring URLs pointing back at this service's
/// `/_local/objects/` routes, which stand in for a real bucket.
pub struct LocalStore {
    base_path: PathBuf,
    public_url: String,
    signing_key: hmac::Key,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(
        base_path: P,
        public_url: &str,
        signing_secret: &str,
    ) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            public_url: public_url.trim_end_matches('/').to_string(),
            signing_key: hmac::Key::new(hmac::HMAC_SHA256, signing_secret.as_bytes()),
        })
    }

    /// Resolve a key below the base path, refusing anything that could escape it.
    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(relative))
    }

    fn message(
        op: ObjectOperation,
        key: &str,
        expires: i64,
        content_type: Option<&str>,
    ) -> String {
        format!(
            "{}\n{key}\n{expires}\n{}",
            op.as_str(),
            content_type.unwrap_or_default()
        )
    }

    /// Build a URL granting `op` on `key` until `now + ttl_seconds`.
    pub fn signed_url(
        &self,
        op: ObjectOperation,
        key: &str,
        content_type: Option<&str>,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> String {
        let expires = now.timestamp() + ttl_seconds as i64;
        let tag = hmac::sign(
            &self.signing_key,
            Self::message(op, key, expires, content_type).as_bytes(),
        );
        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag.as_ref());
        format!(
            "{}/_local/objects/{}?op={}&expires={expires}&signature={signature}",
            self.public_url,
            uri_encode(key, false),
            op.as_str()
        )
    }

    /// Check a signature produced by [`signed_url`](Self::signed_url).
    pub fn verify(
        &self,
        op: ObjectOperation,
        key: &str,
        expires: i64,
        content_type: Option<&str>,
        signature: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let Ok(tag) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        hmac::verify(
            &self.signing_key,
            Self::message(op, key, expires, content_type).as_bytes(),
            &tag,
        )
        .is_ok()
    }

    pub async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        Ok(())
    }

    pub async fn open(&self, key: &str) -> Result<tokio::fs::File, ObjectStoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl UploadDelegate for LocalStore {
    async fn issue_write_handle(
        &self,
        key: &str,
        content_type: &str,
        ttl_seconds: u64,
    ) -> Result<String, ObjectStoreError> {
        self.object_path(key)?;
        Ok(self.signed_url(
            ObjectOperation::Write,
            key,
            Some(content_type),
            ttl_seconds,
            Utc::now(),
        ))
    }

    async fn issue_read_handle(
        &self,
        key: &str,
        ttl_seconds: u64,
    ) -> Result<String, ObjectStoreError> {
        self.object_path(key)?;
        Ok(self.signed_url(ObjectOperation::Read, key, None, ttl_seconds, Utc::now()))
    }

    async fn remove_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
