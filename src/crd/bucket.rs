use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use super::InstanceRef;
use crate::status::Condition;
use crate::status::HasConditions;
use crate::ObserveGeneration;

/// A bucket on a Garage instance, addressed by its name and any additional aliases.
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "garage-s3-operator.io",
    version = "v1",
    kind = "GarageS3Bucket",
    plural = "garages3buckets",
    shortname = "gs3b",
    status = "GarageS3BucketStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GarageS3BucketSpec {
    pub instance_ref: InstanceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_access: Option<WebsiteAccess>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<Quota>,
    /// Global aliases besides the bucket name, which is always an alias.
    #[serde(default)]
    pub additional_aliases: Vec<String>,
    /// Grants for access keys living in the bucket's namespace.
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteAccess {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub index_document: String,
    #[serde(default)]
    pub error_document: String,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_objects: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    /// Name of a GarageS3AccessKey in the bucket's namespace.
    pub access_key_name: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub owner: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GarageS3BucketStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ObserveGeneration for GarageS3BucketStatus {
    fn add(&mut self, observed_generation: i64) {
        self.observed_generation = Some(observed_generation);
    }
}

impl HasConditions for GarageS3BucketStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}
