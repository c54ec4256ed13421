//! Request and response bodies of the Garage admin API (v2).

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHealth {
    /// `healthy`, `degraded` or `unavailable`.
    pub status: String,
    #[serde(default)]
    pub known_nodes: u64,
    #[serde(default)]
    pub connected_nodes: u64,
    #[serde(default)]
    pub storage_nodes: u64,
    #[serde(default, alias = "storageNodesOk")]
    pub storage_nodes_up: u64,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyListItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyPerm {
    #[serde(default)]
    pub create_bucket: bool,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub access_key_id: String,
    #[serde(default)]
    pub name: String,
    /// Only present on creation or when explicitly requested.
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub permissions: KeyPerm,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

/// Body of both key creation and key update.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKeyRequest {
    pub name: Option<String>,
    pub allow: Option<KeyPerm>,
    pub deny: Option<KeyPerm>,
    pub expiration: Option<DateTime<Utc>>,
    pub never_expires: bool,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketLocalAlias {
    pub access_key_id: String,
    pub alias: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketListItem {
    pub id: String,
    #[serde(default)]
    pub global_aliases: Vec<String>,
    #[serde(default)]
    pub local_aliases: Vec<BucketLocalAlias>,
}

/// Permission flags of one key on one bucket. Missing flags read as false.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BucketKeyPerm {
    #[serde(default)]
    pub owner: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

impl BucketKeyPerm {
    pub fn any(&self) -> bool {
        self.owner || self.read || self.write
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketKeyGrant {
    pub access_key_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permissions: BucketKeyPerm,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BucketQuotas {
    pub max_size: Option<u64>,
    pub max_objects: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    pub id: String,
    #[serde(default)]
    pub global_aliases: Vec<String>,
    #[serde(default)]
    pub website_access: bool,
    #[serde(default)]
    pub keys: Vec<BucketKeyGrant>,
    #[serde(default)]
    pub quotas: Option<BucketQuotas>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateBucketRequest {
    pub global_alias: Option<String>,
    pub local_alias: Option<serde_json::Value>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteAccessUpdate {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_document: Option<String>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBucketRequest {
    pub website_access: Option<WebsiteAccessUpdate>,
    pub quotas: Option<BucketQuotas>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BucketAliasRequest {
    pub bucket_id: String,
    pub global_alias: String,
}

/// Body of both allow and deny calls. Flags set to true are granted or revoked.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionChange {
    pub bucket_id: String,
    pub access_key_id: String,
    pub permissions: BucketKeyPerm,
}
