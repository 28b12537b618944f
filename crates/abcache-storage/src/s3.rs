//! S3 backend over `aws-sdk-s3`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use tracing::{debug, info, warn};

use crate::backend::{
    read_part, Connector, ObjectMeta, ObjectStoreBackend, StreamSource, MULTIPART_PART_SIZE,
};
use crate::config::S3Settings;
use crate::error::{StorageError, StorageResult};

/// Object-store backend backed by an S3 client.
#[derive(Clone)]
pub struct S3Backend {
    client: Client,
}

impl S3Backend {
    /// Build a client from validated settings. No network I/O happens here.
    pub fn new(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "abcache",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        source: &mut StreamSource,
    ) -> StorageResult<(Vec<CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut chunk = first;
        let mut part_number = 1;

        loop {
            let len = chunk.len();
            total += len as u64;

            let response = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| {
                    StorageError::upload_failed(format!(
                        "part {}: {}",
                        part_number,
                        DisplayErrorContext(&e)
                    ))
                })?;

            debug!(key = %key, part = part_number, bytes = len, "Uploaded part");

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(response.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );

            if len < MULTIPART_PART_SIZE {
                break;
            }

            chunk = read_part(source, MULTIPART_PART_SIZE)
                .await
                .map_err(|e| StorageError::upload_failed(format!("reading source: {}", e)))?;
            if chunk.is_empty() {
                break;
            }
            part_number += 1;
        }

        Ok((parts, total))
    }
}

#[async_trait]
impl ObjectStoreBackend for S3Backend {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        debug!("Uploading {} bytes to {}", body.len(), key);

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        mut source: StreamSource,
        content_type: &str,
    ) -> StorageResult<u64> {
        let first = read_part(&mut source, MULTIPART_PART_SIZE)
            .await
            .map_err(|e| StorageError::upload_failed(format!("reading source: {}", e)))?;

        // Sources that fit in one part skip the multipart handshake.
        if first.len() < MULTIPART_PART_SIZE {
            let len = first.len() as u64;
            self.put_object(bucket, key, first, content_type).await?;
            return Ok(len);
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(DisplayErrorContext(&e).to_string()))?;

        let upload_id = created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::upload_failed("store returned no upload id"))?;

        debug!(key = %key, upload_id = %upload_id, "Started multipart upload");

        // Aborts the upload if this future is dropped before completion.
        let guard = AbortOnDrop::new(self.client.clone(), bucket, key, &upload_id);

        let result = async {
            let (parts, total) = self
                .upload_parts(bucket, key, &upload_id, first, &mut source)
                .await?;

            self.client
                .complete_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(&upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(parts))
                        .build(),
                )
                .send()
                .await
                .map_err(|e| StorageError::upload_failed(DisplayErrorContext(&e).to_string()))?;

            Ok::<_, StorageError>(total)
        }
        .await;

        match result {
            Ok(total) => {
                guard.disarm();
                info!(key = %key, bytes = total, "Completed multipart upload");
                Ok(total)
            }
            Err(e) => {
                guard.abort().await;
                Err(e)
            }
        }
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(response) => Ok(ObjectMeta {
                size: response.content_length().unwrap_or(0).max(0) as u64,
                content_type: response.content_type().map(str::to_string),
            }),
            Err(e) => {
                let err = e.into_service_error();
                if err.is_not_found() {
                    Err(StorageError::not_found(key))
                } else {
                    Err(StorageError::backend(DisplayErrorContext(&err).to_string()))
                }
            }
        }
    }

    async fn head_bucket(&self, bucket: &str) -> StorageResult<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = e.into_service_error();
                if err.is_not_found() {
                    Err(StorageError::connectivity(format!("bucket {} does not exist", bucket)))
                } else {
                    Err(StorageError::connectivity(DisplayErrorContext(&err).to_string()))
                }
            }
        }
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::sign_failed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::sign_failed(DisplayErrorContext(&e).to_string()))?;

        Ok(presigned.uri().to_string())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        debug!("Deleting {}", key);

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::backend(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}

/// Connector producing [`S3Backend`] handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Connector;

#[async_trait]
impl Connector for S3Connector {
    async fn connect(&self, settings: &S3Settings) -> StorageResult<Arc<dyn ObjectStoreBackend>> {
        Ok(Arc::new(S3Backend::new(settings)))
    }
}

/// Aborts an in-flight multipart upload unless disarmed.
///
/// On drop (caller cancelled the upload future) the abort is spawned onto the
/// current runtime, so no orphaned parts outlive the cancelled request.
struct AbortOnDrop {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl AbortOnDrop {
    fn new(client: Client, bucket: &str, key: &str, upload_id: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn abort(mut self) {
        self.armed = false;
        abort_upload(&self.client, &self.bucket, &self.key, &self.upload_id).await;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, upload_id = %self.upload_id, "No runtime to abort multipart upload");
            return;
        };

        let client = self.client.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        runtime.spawn(async move {
            abort_upload(&client, &bucket, &key, &upload_id).await;
        });
    }
}

async fn abort_upload(client: &Client, bucket: &str, key: &str, upload_id: &str) {
    match client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .send()
        .await
    {
        Ok(_) => debug!(key = %key, upload_id = %upload_id, "Aborted multipart upload"),
        Err(e) => warn!(
            key = %key,
            upload_id = %upload_id,
            error = %DisplayErrorContext(&e),
            "Failed to abort multipart upload"
        ),
    }
}
