//! Error types shared by the framework layer and the controllers.
//!
//! Controllers return [Error] from their hooks. Admin API failures are wrapped from
//! [GarageError] so the retry path and the status reporting see the same value.

use thiserror::Error as ThisError;

use crate::garage::GarageError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("Kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Garage admin API error: {0}")]
    Garage(#[from] GarageError),

    #[error("Object has no name")]
    UnnamedObject,

    #[error("User input error: {0}")]
    UserInput(String),

    #[error("No API cached for namespace '{0}'")]
    NamespaceNotCached(String),

    #[error("GarageS3Instance {namespace}/{name} not found")]
    InstanceNotFound { name: String, namespace: String },

    #[error("Invalid admin endpoint '{0}': {1}")]
    InvalidEndpoint(String, String),

    #[error("Admin token for instance {0} is unavailable: {1}")]
    AdminToken(String, String),

    #[error("Invalid expiration '{value}': {source}")]
    InvalidExpiration {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Garage did not reveal the secret of access key {0}")]
    MissingSecretKey(String),

    #[error("Cannot build an owner reference for {0}")]
    OwnerReference(String),

    #[error("Access keys not resolvable yet: {}", .0.join(", "))]
    PermissionsIncomplete(Vec<String>),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Returns true for a Kubernetes API response with HTTP status 404.
    pub fn is_kube_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(response)) if response.code == 404)
    }
}
