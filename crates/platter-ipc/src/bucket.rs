//! S3-compatible bucket adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{ObjectClient, ObjectStream, RemoteError, RemoteObject, Result};

/// User metadata key carrying an object's content hash.
pub const CONTENT_HASH_METADATA: &str = "content-hash";

/// Serves objects from one bucket, optionally below a key prefix.
#[derive(Debug, Clone)]
pub struct BucketClient {
    client: Client,
    bucket: String,
    prefix: String,
}

impl BucketClient {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: String::new(),
        }
    }

    /// Build a client from the environment's AWS configuration.
    ///
    /// A custom `endpoint` switches to path-style addressing, as most
    /// self-hosted S3 implementations expect.
    pub async fn from_env(
        bucket: impl Into<String>,
        endpoint: Option<String>,
        region: Option<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let conf = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(endpoint.is_some())
            .build();
        Self::new(Client::from_conf(conf), bucket)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Bucket key for `path` below `prefix`. Leading slashes in `path` are ignored.
fn object_key(prefix: &str, path: &str) -> String {
    format!("{}{}", prefix, path.trim_start_matches('/'))
}

/// Name reported for an object: its content hash when the uploader recorded
/// one, else the last component of its key.
fn object_name(key: &str, metadata: Option<&HashMap<String, String>>) -> String {
    metadata
        .and_then(|m| m.get(CONTENT_HASH_METADATA))
        .cloned()
        .unwrap_or_else(|| key.rsplit('/').next().unwrap_or(key).to_string())
}

#[async_trait]
impl ObjectClient for BucketClient {
    async fn fetch(&self, path: &str) -> Result<RemoteObject> {
        let key = object_key(&self.prefix, path);
        debug!(bucket = %self.bucket, key = %key, "Fetching from bucket");

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.is_no_such_key() {
                    RemoteError::NotFound { path: key.clone() }
                } else {
                    RemoteError::Backend(err.to_string())
                }
            })?;

        let size = output.content_length().unwrap_or(0).max(0) as u64;
        let mod_time = output
            .last_modified()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
            .unwrap_or_default();
        let name = object_name(&key, output.metadata());

        let stream: ObjectStream = Box::new(Box::pin(output.body.into_async_read()));
        Ok(RemoteObject {
            stream,
            name,
            mod_time,
            size,
        })
    }
}
