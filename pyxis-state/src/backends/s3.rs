//! S3 object store for snapshots
//!
//! Snapshots are JSON objects under `{prefix}/{state_id}.json`. Conditional
//! writes use the object ETag (`If-Match` / `If-None-Match: *`) so every
//! write is versioned even for callers that bypass the lock table. The
//! bucket keeps version history and server-side encryption.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketVersioningStatus, PublicAccessBlockConfiguration, ServerSideEncryption,
    VersioningConfiguration,
};

use crate::backend::{BackendConfig, BackendError, BackendResult, ObjectStore, Version};
use crate::snapshot::Snapshot;

/// S3-based object store
pub struct S3ObjectStore {
    /// S3 client
    client: Client,
    /// Bucket name
    bucket: String,
    /// Key prefix for snapshot objects
    prefix: Option<String>,
    /// AWS region
    region: String,
    /// Whether to encrypt snapshots (default: true)
    encrypt: bool,
    /// Whether to auto-create the bucket if it doesn't exist (default: true)
    auto_create: bool,
}

impl S3ObjectStore {
    /// Create a new S3ObjectStore from configuration
    pub async fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let bucket = config
            .get_string("bucket")
            .ok_or_else(|| BackendError::configuration("Missing required attribute: bucket"))?
            .to_string();

        let region = config
            .get_string("region")
            .ok_or_else(|| BackendError::configuration("Missing required attribute: region"))?
            .to_string();

        let prefix = config.get_string("prefix").map(str::to_string);
        let encrypt = config.get_bool_or("encrypt", true);
        let auto_create = config.get_bool_or("auto_create", true);

        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region.clone()))
            .load()
            .await;

        let client = Client::new(&aws_config);

        Ok(Self {
            client,
            bucket,
            prefix,
            region,
            encrypt,
            auto_create,
        })
    }

    /// Object key for a state identifier
    fn object_key(&self, state_id: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}.json", prefix.trim_end_matches('/'), state_id),
            None => format!("{}.json", state_id),
        }
    }

    /// Get the bucket name
    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    /// Fetch the current ETag for conflict reporting
    async fn current_etag(&self, state_id: &str) -> String {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(state_id))
            .send()
            .await;

        match result {
            Ok(output) => output
                .e_tag()
                .map(str::to_string)
                .unwrap_or_else(|| "unknown".to_string()),
            Err(_) => "unknown".to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn read_latest(
        &self,
        state_id: &str,
    ) -> BackendResult<Option<(Snapshot, Version)>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(state_id))
            .send()
            .await;

        match result {
            Ok(output) => {
                let etag = output
                    .e_tag()
                    .map(str::to_string)
                    .ok_or_else(|| BackendError::Aws("Response carried no ETag".to_string()))?;
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| BackendError::Io(e.to_string()))?;
                let snapshot: Snapshot = serde_json::from_slice(&body.into_bytes())
                    .map_err(|e| BackendError::InvalidSnapshot(e.to_string()))?;
                Ok(Some((snapshot, Version::new(etag))))
            }
            Err(err) => {
                if is_not_found_error(&err) {
                    Ok(None)
                } else {
                    Err(BackendError::Aws(err.to_string()))
                }
            }
        }
    }

    async fn write_if_version_matches(
        &self,
        state_id: &str,
        snapshot: &Snapshot,
        expected: Option<&Version>,
    ) -> BackendResult<Version> {
        let body = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(state_id))
            .body(ByteStream::from(body))
            .content_type("application/json");

        request = match expected {
            Some(version) => request.if_match(version.as_str()),
            None => request.if_none_match("*"),
        };

        if self.encrypt {
            request = request.server_side_encryption(ServerSideEncryption::Aes256);
        }

        match request.send().await {
            Ok(output) => {
                let etag = output
                    .e_tag()
                    .map(str::to_string)
                    .ok_or_else(|| BackendError::Aws("Response carried no ETag".to_string()))?;
                Ok(Version::new(etag))
            }
            Err(err) => {
                if is_precondition_error(&err) {
                    let actual = self.current_etag(state_id).await;
                    Err(BackendError::conflict(state_id, expected, actual))
                } else {
                    Err(BackendError::Aws(err.to_string()))
                }
            }
        }
    }

    async fn delete(&self, state_id: &str) -> BackendResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(state_id))
            .send()
            .await
            .map_err(|e| BackendError::Aws(e.to_string()))?;

        Ok(())
    }

    async fn storage_exists(&self) -> BackendResult<bool> {
        let result = self.client.head_bucket().bucket(&self.bucket).send().await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                // HeadBucket returns 404 for non-existent buckets
                if err.as_service_error().is_some() {
                    Ok(false)
                } else {
                    let raw = err.raw_response();
                    if raw.is_some_and(|r| r.status().as_u16() == 404) {
                        Ok(false)
                    } else {
                        Err(BackendError::Aws(err.to_string()))
                    }
                }
            }
        }
    }

    async fn create_storage(&self) -> BackendResult<()> {
        let mut create_request = self.client.create_bucket().bucket(&self.bucket);

        if self.region != "us-east-1" {
            use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};

            let constraint = BucketLocationConstraint::from(self.region.as_str());
            let config = CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build();
            create_request = create_request.create_bucket_configuration(config);
        }

        create_request
            .send()
            .await
            .map_err(|e| BackendError::BucketCreationFailed(e.to_string()))?;

        // Enable versioning so older snapshots remain recoverable
        let versioning_config = VersioningConfiguration::builder()
            .status(BucketVersioningStatus::Enabled)
            .build();

        self.client
            .put_bucket_versioning()
            .bucket(&self.bucket)
            .versioning_configuration(versioning_config)
            .send()
            .await
            .map_err(|e| BackendError::Aws(format!("Failed to enable versioning: {}", e)))?;

        // Block public access
        let public_access_block = PublicAccessBlockConfiguration::builder()
            .block_public_acls(true)
            .block_public_policy(true)
            .ignore_public_acls(true)
            .restrict_public_buckets(true)
            .build();

        self.client
            .put_public_access_block()
            .bucket(&self.bucket)
            .public_access_block_configuration(public_access_block)
            .send()
            .await
            .map_err(|e| BackendError::Aws(format!("Failed to block public access: {}", e)))?;

        Ok(())
    }

    async fn init(&self) -> BackendResult<()> {
        if !self.storage_exists().await? {
            if self.auto_create {
                self.create_storage().await?;
            } else {
                return Err(BackendError::BucketNotFound(self.bucket.clone()));
            }
        }

        Ok(())
    }
}

/// Check if an S3 error is a "not found" error
fn is_not_found_error<E: std::fmt::Debug>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    if let Some(raw) = err.raw_response() {
        return raw.status().as_u16() == 404;
    }
    false
}

/// Check if an S3 error is a failed conditional write
///
/// 412 is a failed precondition; 409 is a concurrent conditional write that
/// lost the race. Both mean the caller's version is stale.
fn is_precondition_error<E: std::fmt::Debug>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    if let Some(raw) = err.raw_response() {
        let status = raw.status().as_u16();
        return status == 412 || status == 409;
    }
    false
}

#[cfg(test)]
mod tests {
    #[test]
    fn object_key_layout() {
        // Key layout is {prefix}/{state_id}.json; verify the format directly
        let state_id = "orbit/dev";
        assert_eq!(format!("{}.json", state_id), "orbit/dev.json");
        assert_eq!(
            format!("{}/{}.json", "states", state_id),
            "states/orbit/dev.json"
        );
    }
}
