use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use reqwest::Url;
use serde::Serialize;

use crate::status::Condition;
use crate::status::HasConditions;
use crate::ObserveGeneration;

/// A Garage cluster reachable through its admin API.
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "garage-s3-operator.io",
    version = "v1",
    kind = "GarageS3Instance",
    plural = "garages3instances",
    shortname = "gs3i",
    status = "GarageS3InstanceStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Message","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].message"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GarageS3InstanceSpec {
    /// Admin API host, with or without scheme. `http://` is assumed when missing.
    pub url: String,
    /// Admin API port.
    pub port: u16,
    /// Name of a Secret in the same namespace holding the admin token under `token`.
    pub admin_token_secret: String,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GarageS3InstanceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ObserveGeneration for GarageS3InstanceStatus {
    fn add(&mut self, observed_generation: i64) {
        self.observed_generation = Some(observed_generation);
    }
}

impl HasConditions for GarageS3InstanceStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl GarageS3InstanceSpec {
    /// Base URL of the admin API, e.g. `http://garage.storage:3903`.
    ///
    /// A bare host gets the `http` scheme. `port` replaces any port in `url` and a path
    /// prefix is kept.
    pub fn admin_endpoint(&self) -> crate::error::Result<String> {
        let raw = self.url.trim();
        let candidate = if raw.contains("://") {
            raw.to_owned()
        } else {
            format!("http://{raw}")
        };
        let invalid = |reason: &str| crate::error::Error::InvalidEndpoint(self.url.clone(), reason.to_owned());

        let mut url = Url::parse(&candidate).map_err(|error| invalid(&error.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query and fragment are not allowed"));
        }
        url.set_port(Some(self.port)).map_err(|_| invalid("URL has no host"))?;

        Ok(url.as_str().trim_end_matches('/').to_owned())
    }
}
