//! Custom resources owned by the operator and the registry describing them.
//!
//! [registry] is built once at startup and handed to whoever needs the definitions:
//! the `crds` subcommand and the optional installation on startup.

mod access_key;
mod bucket;
mod instance;

pub use access_key::GarageS3AccessKey;
pub use access_key::GarageS3AccessKeySpec;
pub use access_key::GarageS3AccessKeyStatus;
pub use bucket::GarageS3Bucket;
pub use bucket::GarageS3BucketSpec;
pub use bucket::GarageS3BucketStatus;
pub use bucket::Permission;
pub use bucket::Quota;
pub use bucket::WebsiteAccess;
pub use instance::GarageS3Instance;
pub use instance::GarageS3InstanceSpec;
pub use instance::GarageS3InstanceStatus;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::Api;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::Client;
use kube::CustomResourceExt;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;

/// Field manager used for server side apply.
pub const FIELD_MANAGER: &str = "garage-s3-operator";

/// Reference from an access key or bucket to the instance it lives on.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRef {
    pub name: String,
    /// Defaults to the namespace of the referencing resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Fully resolved identity of a GarageS3Instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub name: String,
    pub namespace: String,
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl InstanceRef {
    /// Resolves the reference as seen from a resource in `namespace`.
    pub fn resolve(&self, namespace: &str) -> InstanceKey {
        InstanceKey {
            name: self.name.clone(),
            namespace: self
                .namespace
                .as_deref()
                .filter(|namespace| !namespace.is_empty())
                .unwrap_or(namespace)
                .to_owned(),
        }
    }
}

/// A single definition in the registry.
#[derive(Debug, Clone)]
pub struct CrdDef {
    pub name: &'static str,
    pub crd: CustomResourceDefinition,
}

/// All definitions owned by the operator.
pub fn registry() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "garages3instances.garage-s3-operator.io",
            crd: GarageS3Instance::crd(),
        },
        CrdDef {
            name: "garages3accesskeys.garage-s3-operator.io",
            crd: GarageS3AccessKey::crd(),
        },
        CrdDef {
            name: "garages3buckets.garage-s3-operator.io",
            crd: GarageS3Bucket::crd(),
        },
    ]
}

/// Renders the definitions as a multi-document YAML stream.
pub fn to_yaml(definitions: &[CrdDef]) -> Result<String> {
    let documents = definitions
        .iter()
        .map(|definition| serde_yaml::to_string(&definition.crd))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {e}"))?;

    Ok(documents.join("---\n"))
}

/// Installs or upgrades the definitions with server side apply.
pub async fn install(client: &Client, definitions: &[CrdDef]) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for definition in definitions {
        tracing::info!(crd = definition.name, "Installing CRD");
        crds.patch(definition.name, &params, &Patch::Apply(&definition.crd))
            .await?;
    }

    Ok(())
}
