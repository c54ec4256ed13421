use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use super::InstanceRef;
use crate::status::Condition;
use crate::status::HasConditions;
use crate::ObserveGeneration;

/// An access key provisioned on a Garage instance.
///
/// The remote key is named after this resource. Its credentials are written to a
/// Secret named `<name>-gs3ak` in the same namespace.
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "garage-s3-operator.io",
    version = "v1",
    kind = "GarageS3AccessKey",
    plural = "garages3accesskeys",
    shortname = "gs3ak",
    status = "GarageS3AccessKeyStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Secret","type":"string","jsonPath":".status.secret"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GarageS3AccessKeySpec {
    pub instance_ref: InstanceRef,
    /// Allows the key to create buckets on its own.
    #[serde(default)]
    pub can_create_bucket: bool,
    /// RFC3339 timestamp after which the key expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    #[serde(default)]
    pub never_expires: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GarageS3AccessKeyStatus {
    /// Name of the Secret holding the credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ObserveGeneration for GarageS3AccessKeyStatus {
    fn add(&mut self, observed_generation: i64) {
        self.observed_generation = Some(observed_generation);
    }
}

impl HasConditions for GarageS3AccessKeyStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl GarageS3AccessKeySpec {
    /// The expiration, unless it is unset or blank.
    pub fn expiration(&self) -> Option<&str> {
        self.expiration
            .as_deref()
            .map(str::trim)
            .filter(|expiration| !expiration.is_empty())
    }
}
