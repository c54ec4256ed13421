//! Access to the Garage admin API.
//!
//! [GarageAdmin] is the seam the controllers talk through. [GarageConnector] turns a
//! GarageS3Instance into an authenticated [GarageAdmin]; the HTTP implementation of
//! both lives in [client].

pub mod client;
mod models;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error as ThisError;

pub use models::*;

use crate::crd::GarageS3Instance;
use crate::error::Result;

#[derive(ThisError, Debug)]
pub enum GarageError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("admin API answered {status}: {message}")]
    Api { status: u16, message: String },
}

impl GarageError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GarageError::Api { status, .. } => Some(*status),
            GarageError::Http(error) => error.status().map(|status| status.as_u16()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

pub type GarageResult<T> = std::result::Result<T, GarageError>;

/// Operations of the admin API the controllers rely on.
#[async_trait]
pub trait GarageAdmin: Send + Sync {
    async fn cluster_health(&self) -> GarageResult<ClusterHealth>;

    async fn list_keys(&self) -> GarageResult<Vec<KeyListItem>>;

    async fn create_key(&self, request: &UpdateKeyRequest) -> GarageResult<KeyInfo>;

    async fn update_key(&self, id: &str, request: &UpdateKeyRequest) -> GarageResult<KeyInfo>;

    /// Fetches a key including its secret access key.
    async fn key_info_with_secret(&self, id: &str) -> GarageResult<KeyInfo>;

    async fn delete_key(&self, id: &str) -> GarageResult<()>;

    async fn list_buckets(&self) -> GarageResult<Vec<BucketListItem>>;

    async fn bucket_info(&self, id: &str) -> GarageResult<BucketInfo>;

    async fn create_bucket(&self, global_alias: &str) -> GarageResult<BucketInfo>;

    async fn update_bucket(&self, id: &str, request: &UpdateBucketRequest) -> GarageResult<()>;

    async fn delete_bucket(&self, id: &str) -> GarageResult<()>;

    async fn add_bucket_alias(&self, bucket_id: &str, alias: &str) -> GarageResult<()>;

    async fn remove_bucket_alias(&self, bucket_id: &str, alias: &str) -> GarageResult<()>;

    async fn allow_bucket_key(&self, change: &PermissionChange) -> GarageResult<()>;

    async fn deny_bucket_key(&self, change: &PermissionChange) -> GarageResult<()>;
}

/// Builds an authenticated admin client for an instance.
#[async_trait]
pub trait GarageConnector: Send + Sync {
    async fn connect(&self, instance: &GarageS3Instance) -> Result<Arc<dyn GarageAdmin>>;
}

/// Id of the key named exactly `name`, if any.
pub async fn find_key_id(admin: &dyn GarageAdmin, name: &str) -> GarageResult<Option<String>> {
    let keys = admin.list_keys().await?;
    Ok(keys.into_iter().find(|key| key.name == name).map(|key| key.id))
}

/// Id of the bucket having `name` among its global or local aliases, if any.
pub async fn find_bucket_id(admin: &dyn GarageAdmin, name: &str) -> GarageResult<Option<String>> {
    let buckets = admin.list_buckets().await?;
    Ok(buckets
        .into_iter()
        .find(|bucket| {
            bucket.global_aliases.iter().any(|alias| alias == name)
                || bucket.local_aliases.iter().any(|local| local.alias == name)
        })
        .map(|bucket| bucket.id))
}
