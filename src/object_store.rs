use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::R2Config;
use crate::error::CartoonError;

/// 已上传对象的元数据。
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub bucket: String,
    pub content_type: String,
    pub size: usize,
}

/// Fresh object key per operation: UUID plus epoch milliseconds, so keys
/// can neither collide nor be enumerated.
pub fn generate_object_key() -> String {
    format!(
        "cartoon/{}-{}.jpeg",
        Uuid::new_v4(),
        Utc::now().timestamp_millis()
    )
}

/// Seam between the pipeline and the remote object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        bytes: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<ObjectInfo, CartoonError>;

    /// Time-limited signed GET URL for a previously uploaded object.
    async fn presign(&self, key: &str, expiry: Duration) -> Result<String, CartoonError>;
}

/// Cloudflare R2 backend, driven through the S3 API.
pub struct R2Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl R2Store {
    pub fn new(config: &R2Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.access_key_secret.clone(),
            None,
            None,
            "r2-static",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for R2Store {
    async fn put(
        &self,
        bytes: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<ObjectInfo, CartoonError> {
        let size = bytes.len();
        debug!(bucket = %self.bucket, key = %key, size, "uploading object to R2");
        let response = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| CartoonError::ObjectStorage(err.to_string()))?;
        info!(key = %key, etag = ?response.e_tag(), "object uploaded to R2");
        Ok(ObjectInfo {
            key: key.to_string(),
            bucket: self.bucket.clone(),
            content_type: content_type.to_string(),
            size,
        })
    }

    async fn presign(&self, key: &str, expiry: Duration) -> Result<String, CartoonError> {
        let presign_config = PresigningConfig::expires_in(expiry)
            .map_err(|err| CartoonError::LinkIssuance(err.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|err| CartoonError::LinkIssuance(err.to_string()))?;
        info!(key = %key, expiry_secs = expiry.as_secs(), "presigned URL issued");
        Ok(request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn object_keys_follow_the_cartoon_pattern() {
        let key = generate_object_key();
        let rest = key.strip_prefix("cartoon/").expect("missing prefix");
        let stem = rest.strip_suffix(".jpeg").expect("missing extension");
        // uuid (36 chars, four dashes) followed by -millis
        let (uuid_part, millis) = stem.split_at(36);
        assert!(Uuid::parse_str(uuid_part).is_ok(), "bad uuid in {key}");
        assert!(millis.starts_with('-'));
        assert!(millis[1..].parse::<i64>().is_ok(), "bad millis in {key}");
    }

    #[test]
    fn object_keys_are_pairwise_distinct() {
        let keys: HashSet<String> = (0..500).map(|_| generate_object_key()).collect();
        assert_eq!(keys.len(), 500);
    }
}
