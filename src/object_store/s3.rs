use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};

use super::sigv4::{self, CanonicalRequest};
use super::{ObjectStoreError, UploadDelegate};

/// Connection settings for an S3-compatible bucket (AWS, MinIO).
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Endpoint this service talks to directly (e.g. `http://minio:9000`)
    pub endpoint: String,
    /// Endpoint clients use; presigned URLs are signed for this host
    pub public_endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Address the bucket as `{bucket}.{host}` instead of `{host}/{bucket}`
    pub virtual_hosted: bool,
}

/// S3-compatible upload delegate: presigned PUT/GET URLs and signed deletes.
pub struct S3Store {
    client: Client,
    config: S3Config,
    internal: Url,
    public: Url,
}

impl S3Store {
    pub fn new(config: S3Config) -> Result<Self, ObjectStoreError> {
        let internal = parse_endpoint(&config.endpoint)?;
        let public = match config.public_endpoint.as_deref() {
            Some(endpoint) => parse_endpoint(endpoint)?,
            None => internal.clone(),
        };
        let client = Client::builder()
            .build()
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        Ok(Self {
            client,
            config,
            internal,
            public,
        })
    }

    /// Host header value and request path for `key` against `endpoint`.
    fn locate(&self, endpoint: &Url, key: &str) -> (String, String) {
        let mut host = endpoint.host_str().unwrap_or_default().to_string();
        if let Some(port) = endpoint.port() {
            host = format!("{host}:{port}");
        }
        let key = sigv4::uri_encode(key, false);
        if self.config.virtual_hosted {
            (format!("{}.{host}", self.config.bucket), format!("/{key}"))
        } else {
            (host, format!("/{}/{key}", self.config.bucket))
        }
    }

    /// Build a presigned URL for `method` on `key`, signed as of `now`.
    /// When `content_type` is given the client must send the same header.
    pub fn presign_at(
        &self,
        method: &str,
        key: &str,
        content_type: Option<&str>,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> String {
        let (host, path) = self.locate(&self.public, key);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = sigv4::scope(&amz_date[..8], &self.config.region);

        let mut headers: Vec<(&str, &str)> = Vec::with_capacity(2);
        if let Some(ct) = content_type {
            headers.push(("content-type", ct));
        }
        headers.push(("host", host.as_str()));

        let signed_headers = headers
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(";");
        let query = sigv4::canonical_query(&[
            ("X-Amz-Algorithm", sigv4::ALGORITHM.to_string()),
            (
                "X-Amz-Credential",
                format!("{}/{scope}", self.config.access_key),
            ),
            ("X-Amz-Date", amz_date.clone()),
            ("X-Amz-Expires", ttl_seconds.to_string()),
            ("X-Amz-SignedHeaders", signed_headers),
        ]);

        let signature = sigv4::sign(
            &self.config.secret_key,
            &self.config.region,
            &amz_date,
            &CanonicalRequest {
                method,
                path: &path,
                query: &query,
                headers: &headers,
                payload_hash: sigv4::UNSIGNED_PAYLOAD,
            },
        );

        format!(
            "{}://{host}{path}?{query}&X-Amz-Signature={signature}",
            self.public.scheme()
        )
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ObjectStoreError> {
    let url = Url::parse(endpoint)
        .map_err(|e| ObjectStoreError::Backend(format!("invalid endpoint '{endpoint}': {e}")))?;
    if url.host_str().is_none() {
        return Err(ObjectStoreError::Backend(format!(
            "endpoint '{endpoint}' has no host"
        )));
    }
    Ok(url)
}

#[async_trait]
impl UploadDelegate for S3Store {
    async fn issue_write_handle(
        &self,
        key: &str,
        content_type: &str,
        ttl_seconds: u64,
    ) -> Result<String, ObjectStoreError> {
        Ok(self.presign_at("PUT", key, Some(content_type), ttl_seconds, Utc::now()))
    }

    async fn issue_read_handle(
        &self,
        key: &str,
        ttl_seconds: u64,
    ) -> Result<String, ObjectStoreError> {
        Ok(self.presign_at("GET", key, None, ttl_seconds, Utc::now()))
    }

    async fn remove_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        let (host, path) = self.locate(&self.internal, key);
        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let headers = [
            ("host", host.as_str()),
            ("x-amz-content-sha256", sigv4::EMPTY_PAYLOAD_SHA256),
            ("x-amz-date", amz_date.as_str()),
        ];
        let request = CanonicalRequest {
            method: "DELETE",
            path: &path,
            query: "",
            headers: &headers,
            payload_hash: sigv4::EMPTY_PAYLOAD_SHA256,
        };
        let signature = sigv4::sign(
            &self.config.secret_key,
            &self.config.region,
            &amz_date,
            &request,
        );
        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={signature}",
            sigv4::ALGORITHM,
            self.config.access_key,
            sigv4::scope(&amz_date[..8], &self.config.region),
            request.signed_headers(),
        );

        let resp = self
            .client
            .delete(format!("{}://{host}{path}", self.internal.scheme()))
            .header("x-amz-content-sha256", sigv4::EMPTY_PAYLOAD_SHA256)
            .header("x-amz-date", amz_date.as_str())
            .header("authorization", authorization)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "S3 delete failed ({status}): {body}"
            )));
        }

        Ok(())
    }
}
