use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{
    aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder, local::LocalFileSystem, path::Path,
    ObjectStore,
};
use reqwest::header::{CONTENT_TYPE, ETAG};
use serde::Serialize;
use url::Url;

use crate::error::ArchiveError;
use crate::params::RequestDescriptor;
use crate::signer::{BodySigning, RequestSigner};
use crate::utils::console_url;

/// Where an archive landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub bucket: String,
    pub object_name: String,
    pub etag: Option<String>,
    pub url: String,
}

/// Destination for a serialized log archive. One `put` per invocation.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn put(&self, object_name: &str, body: Bytes) -> Result<UploadResult, ArchiveError>;
}

/// Writes straight to the provider's native object-storage API with a signed PUT.
pub struct ObjectStorageSink {
    http: reqwest::Client,
    endpoint: Url,
    namespace: String,
    bucket: String,
    signer: Arc<dyn RequestSigner>,
}

impl ObjectStorageSink {
    pub fn new(
        http: reqwest::Client,
        endpoint: Url,
        descriptor: &RequestDescriptor,
        signer: Arc<dyn RequestSigner>,
    ) -> Self {
        ObjectStorageSink {
            http,
            endpoint,
            namespace: descriptor.namespace.clone(),
            bucket: descriptor.bucket.clone(),
            signer,
        }
    }

    fn object_url(&self, object_name: &str) -> Result<Url, ArchiveError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ArchiveError::write(format!("cannot use {} as a base", self.endpoint)))?
            .pop_if_empty()
            .extend(["n", self.namespace.as_str(), "b", self.bucket.as_str(), "o"])
            .push(object_name);
        Ok(url)
    }
}

#[async_trait]
impl ArchiveSink for ObjectStorageSink {
    async fn put(&self, object_name: &str, body: Bytes) -> Result<UploadResult, ArchiveError> {
        let size = body.len();
        let mut request = self
            .http
            .put(self.object_url(object_name)?)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .build()
            .map_err(ArchiveError::write)?;
        // object uploads are signed without the body, as the provider SDK does
        self.signer
            .sign(&mut request, BodySigning::Exclude)
            .map_err(ArchiveError::write)?;

        let response = self
            .http
            .execute(request)
            .await
            .map_err(ArchiveError::write)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ArchiveError::write(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text
            )));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(trim_etag);
        log::info!(
            "uploaded {} bytes to {}/{}",
            size,
            self.bucket,
            object_name
        );

        Ok(UploadResult {
            bucket: self.bucket.clone(),
            object_name: object_name.to_string(),
            etag,
            url: console_url(
                self.endpoint.as_str(),
                &self.namespace,
                &self.bucket,
                object_name,
            ),
        })
    }
}

fn trim_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

/// Opens any `object_store` backend by URL: `file://`, a bare local path, `gs://bucket/prefix`
/// or `s3://bucket/prefix`. Cloud credentials come from the usual environment variables.
pub fn new<S: AsRef<str>>(store_url: S) -> Result<StoreSink, anyhow::Error> {
    let store_url = store_url.as_ref();
    let url = match Url::parse(store_url) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let absolute_path = std::fs::canonicalize(store_url)
                .map_err(|e| anyhow::anyhow!("Invalid store URL: {}: {}", store_url, e))?;

            Url::parse(&format!("file://{}", absolute_path.to_string_lossy()))
                .with_context(|| format!("Invalid store URL: {}", store_url))?
        }
        Err(e) => Err(e).with_context(|| format!("Invalid store URL: {}", store_url))?,
    };

    let bucket = || url.host_str().ok_or_else(|| anyhow::anyhow!("No bucket"));
    let prefix = url.path().trim_start_matches('/').to_string();

    match url.scheme() {
        "s3" => {
            let bucket = bucket()?;
            let store = AmazonS3Builder::from_env()
                .with_bucket_name(bucket.to_string())
                .build()?;

            Ok(StoreSink {
                store: Arc::new(store),
                bucket: bucket.to_string(),
                base: prefix,
                display: url.to_string(),
            })
        }
        "gs" => {
            let bucket = bucket()?;
            let store = GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(bucket.to_string())
                .build()?;

            Ok(StoreSink {
                store: Arc::new(store),
                bucket: bucket.to_string(),
                base: prefix,
                display: url.to_string(),
            })
        }
        "file" => {
            let store = LocalFileSystem::new_with_prefix(url.path()).context("new local store")?;

            Ok(StoreSink {
                store: Arc::new(store),
                bucket: url.path().to_string(),
                base: "".to_string(),
                display: url.to_string(),
            })
        }
        _ => Err(anyhow::anyhow!("Unsupported scheme: {}", url.scheme()))?,
    }
}

/// Archives into an `object_store` backend instead of the native API.
pub struct StoreSink {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    base: String,
    display: String,
}

impl StoreSink {
    /// Places objects under `<namespace>/<bucket>/` of the backend and reports `bucket`
    /// as the archive's bucket, so the positional bucket and namespace keep their meaning.
    pub fn within(mut self, namespace: &str, bucket: &str) -> Self {
        self.base = [self.base.trim_matches('/'), namespace, bucket]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        self.bucket = bucket.to_string();
        self
    }

    fn join_path(&self, path: &str) -> Path {
        if self.base.is_empty() {
            Path::from(path.trim_start_matches('/'))
        } else {
            Path::from(format!(
                "{}/{}",
                self.base.trim_end_matches('/'),
                path.trim_start_matches('/')
            ))
        }
    }
}

#[async_trait]
impl ArchiveSink for StoreSink {
    async fn put(&self, object_name: &str, body: Bytes) -> Result<UploadResult, ArchiveError> {
        let location = self.join_path(object_name);
        let result = self.store.put(&location, body).await?;
        log::info!("stored archive at {} in {}", location, self.display);

        Ok(UploadResult {
            bucket: self.bucket.clone(),
            object_name: object_name.to_string(),
            etag: result.e_tag.as_deref().map(trim_etag),
            url: format!("{}/{}", self.display.trim_end_matches('/'), location),
        })
    }
}
