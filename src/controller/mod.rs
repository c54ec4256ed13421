//! Reconcilers for the three resource kinds and the pieces they share.
//!
//! Every failing step of a reconcile is turned into a [Failure]: the Ready condition to
//! report and the error to hand back to the retry path. [Collaborators::fail] does both
//! and emits a warning event on the way.

pub mod access_key;
pub mod bucket;
pub mod instance;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt::Debug;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::StaticApiProvider;
use crate::crd::GarageS3Instance;
use crate::crd::InstanceKey;
use crate::crd::InstanceRef;
use crate::error::Error;
use crate::events::EmitEvent;
use crate::events::EventData;
use crate::garage::GarageAdmin;
use crate::garage::GarageConnector;
use crate::k8s::ResourceStore;
use crate::status::HasConditions;
use crate::status::ReadyCondition;
use crate::status::Reason;
use crate::Finalize;
use crate::ObserveGeneration;

pub const INSTANCE_FINALIZER: &str = "garage-s3-operator.io/instance-finalizer";
pub const ACCESS_KEY_FINALIZER: &str = "garage-s3-operator.io/accesskey-finalizer";
pub const BUCKET_FINALIZER: &str = "garage-s3-operator.io/bucket-finalizer";

/// Periodic re-check of a converged resource.
pub const REQUEUE_READY: Duration = Duration::from_secs(300);
/// Retry after a failed instance or bucket reconcile.
pub const REQUEUE_ERROR: Duration = Duration::from_secs(30);
/// Retry of an instance deletion held back by dependents.
pub const REQUEUE_BLOCKED: Duration = Duration::from_secs(5);

/// API provider type every controller uses for its own kind.
pub type Provider<R> = StaticApiProvider<R>;

/// A failed reconcile step: what to report and what to retry on.
#[derive(Debug)]
pub struct Failure {
    pub condition: ReadyCondition,
    pub error: Error,
}

impl Failure {
    /// Ready=False with `message` followed by the error.
    pub fn not_ready(reason: Reason, message: &str, error: impl Into<Error>) -> Self {
        let error = error.into();
        Self {
            condition: ReadyCondition::not_ready(reason, format!("{message}: {error}")),
            error,
        }
    }

    /// Ready=Unknown, for when the remote state could not be determined.
    pub fn unknown(reason: Reason, message: &str, error: impl Into<Error>) -> Self {
        let error = error.into();
        Self {
            condition: ReadyCondition::unknown(reason, format!("{message}: {error}")),
            error,
        }
    }
}

/// Attaches a Ready=False reason to the error of a step.
pub trait Stage<T> {
    fn stage(self, reason: Reason, message: &str) -> StdResult<T, Failure>;
}

impl<T, E> Stage<T> for StdResult<T, E>
where
    E: Into<Error>,
{
    fn stage(self, reason: Reason, message: &str) -> StdResult<T, Failure> {
        self.map_err(|error| Failure::not_ready(reason, message, error))
    }
}

/// Everything a controller talks to besides its own repository.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ResourceStore>,
    pub garage: Arc<dyn GarageConnector>,
    pub events: Arc<dyn EmitEvent<Reason>>,
}

impl Collaborators {
    /// Looks up the instance `reference` points to, as seen from `namespace`.
    pub async fn resolve_instance(
        &self,
        reference: &InstanceRef,
        namespace: &str,
    ) -> StdResult<GarageS3Instance, Failure> {
        let key = reference.resolve(namespace);
        self.store
            .instance(&key)
            .await
            .stage(Reason::InstanceNotFound, "Failed to look up GarageS3Instance")?
            .ok_or_else(|| instance_not_found(&key))
    }

    /// Resolves the instance and connects to its admin API.
    pub async fn admin_for(
        &self,
        reference: &InstanceRef,
        namespace: &str,
    ) -> StdResult<Arc<dyn GarageAdmin>, Failure> {
        let instance = self.resolve_instance(reference, namespace).await?;
        self.garage
            .connect(&instance)
            .await
            .stage(Reason::GarageClientError, "Failed to create Garage client")
    }

    /// Reports a failed step and returns the error for the retry path.
    pub async fn fail<R, S, F>(&self, repository: &F, object: &R, status: S, failure: Failure) -> Error
    where
        R: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Serialize
            + DeserializeOwned
            + Debug
            + Clone
            + Send
            + Sync
            + 'static,
        S: Serialize + ObserveGeneration + HasConditions + Debug + Send + Sync,
        F: Finalize<R, Provider<R>>,
    {
        let Failure { condition, error } = failure;
        tracing::warn!(
            reason = %condition.reason,
            status = %condition.status,
            error = %error,
            "Reconcile step failed"
        );

        self.events
            .emit(
                &object.object_ref(&()),
                EventData::warning(condition.reason, condition.message.clone()),
            )
            .await;
        repository.report_ready(object, status, &condition).await;

        error
    }

    /// Emits a normal event for `object`.
    pub async fn announce<R>(&self, object: &R, reason: Reason, note: impl Into<String>)
    where
        R: Resource<DynamicType = ()> + Sync,
    {
        let mut data = EventData::normal(reason, note);
        if reason == Reason::CleanedUp {
            data = data.with_action("Cleanup");
        }
        self.events.emit(&object.object_ref(&()), data).await;
    }
}

fn instance_not_found(key: &InstanceKey) -> Failure {
    Failure::not_ready(
        Reason::InstanceNotFound,
        "Referenced GarageS3Instance is missing",
        Error::InstanceNotFound {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
        },
    )
}
