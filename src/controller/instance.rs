//! GarageS3Instance: health reporting and dependency-gated deletion.

use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config;
use kube::Api;

use super::Collaborators;
use super::Failure;
use super::Provider;
use super::Stage;
use super::INSTANCE_FINALIZER;
use super::REQUEUE_BLOCKED;
use super::REQUEUE_ERROR;
use super::REQUEUE_READY;
use crate::crd::GarageS3AccessKey;
use crate::crd::GarageS3Bucket;
use crate::crd::GarageS3Instance;
use crate::crd::InstanceKey;
use crate::error::Result;
use crate::garage::ClusterHealth;
use crate::status::ReadyCondition;
use crate::status::Reason;
use crate::Cleanup;
use crate::Context;
use crate::Finalize;
use crate::Reconcile;
use crate::TryResource;

/// Maps the reported cluster state to the Ready condition.
pub fn health_condition(health: &ClusterHealth) -> ReadyCondition {
    let message = format!("Nodes: {}/{}", health.storage_nodes_up, health.storage_nodes);
    match health.status.as_str() {
        "healthy" => ReadyCondition::ready(Reason::Healthy, message),
        "degraded" => ReadyCondition::ready(Reason::Degraded, message),
        _ => ReadyCondition::not_ready(Reason::Unavailable, message),
    }
}

/// Access keys and buckets referencing `instance`, as `Kind namespace/name`.
pub fn dependents(instance: &InstanceKey, keys: &[GarageS3AccessKey], buckets: &[GarageS3Bucket]) -> Vec<String> {
    let key_refs = keys.iter().filter_map(|key| {
        let namespace = key.metadata.namespace.as_deref()?;
        (key.spec.instance_ref.resolve(namespace) == *instance)
            .then(|| format!("GarageS3AccessKey {namespace}/{}", key.metadata.name.as_deref().unwrap_or_default()))
    });
    let bucket_refs = buckets.iter().filter_map(|bucket| {
        let namespace = bucket.metadata.namespace.as_deref()?;
        (bucket.spec.instance_ref.resolve(namespace) == *instance)
            .then(|| format!("GarageS3Bucket {namespace}/{}", bucket.metadata.name.as_deref().unwrap_or_default()))
    });

    key_refs.chain(bucket_refs).collect()
}

pub struct InstanceContext<F> {
    repository: Arc<F>,
    collaborators: Collaborators,
}

impl<F> InstanceContext<F> {
    pub fn new(repository: Arc<F>, collaborators: Collaborators) -> Self {
        Self {
            repository,
            collaborators,
        }
    }
}

impl<F> InstanceContext<F>
where
    F: Finalize<GarageS3Instance, Provider<GarageS3Instance>>,
{
    async fn check_health(&self, instance: &GarageS3Instance) -> StdResult<ClusterHealth, Failure> {
        let admin = self
            .collaborators
            .garage
            .connect(instance)
            .await
            .stage(Reason::GarageClientError, "Failed to create Garage client")?;

        admin
            .cluster_health()
            .await
            .stage(Reason::ConnectionError, "Failed to connect to Garage instance")
    }

    async fn find_dependents(&self, instance: &GarageS3Instance) -> StdResult<Vec<String>, Failure> {
        let key = InstanceKey {
            name: instance.try_name().stage(Reason::KubernetesError, "Invalid instance")?.to_owned(),
            namespace: instance.try_namespace().stage(Reason::KubernetesError, "Invalid instance")?,
        };

        let store = &self.collaborators.store;
        let keys = store
            .list_access_keys()
            .await
            .stage(Reason::KubernetesError, "Failed to list GarageS3AccessKeys")?;
        let buckets = store
            .list_buckets()
            .await
            .stage(Reason::KubernetesError, "Failed to list GarageS3Buckets")?;

        Ok(dependents(&key, &keys, &buckets))
    }
}

#[async_trait]
impl<F> Context<GarageS3Instance, F, Provider<GarageS3Instance>> for InstanceContext<F>
where
    F: Finalize<GarageS3Instance, Provider<GarageS3Instance>> + 'static,
{
    fn k8s_repository(&self) -> Arc<F> {
        Arc::clone(&self.repository)
    }

    fn finalizer(&self) -> &'static str {
        INSTANCE_FINALIZER
    }

    async fn handle_apply(&self, object: Arc<GarageS3Instance>) -> Result<Action> {
        let status = object.status.clone().unwrap_or_default();

        let health = match self.check_health(&object).await {
            Ok(health) => health,
            Err(failure) => {
                return Err(self
                    .collaborators
                    .fail(&*self.repository, &*object, status, failure)
                    .await)
            }
        };

        tracing::info!(health = %health.status, "Connected to Garage instance");
        let condition = health_condition(&health);
        let requeue = if condition.reason == Reason::Unavailable {
            self.collaborators
                .announce(&*object, Reason::Unavailable, condition.message.clone())
                .await;
            REQUEUE_ERROR
        } else {
            REQUEUE_READY
        };

        self.repository.report_ready(&*object, status, &condition).await;
        Ok(Action::requeue(requeue))
    }

    async fn handle_cleanup(&self, object: Arc<GarageS3Instance>) -> Result<Cleanup> {
        let status = object.status.clone().unwrap_or_default();

        let dependents = match self.find_dependents(&object).await {
            Ok(dependents) => dependents,
            Err(failure) => {
                return Err(self
                    .collaborators
                    .fail(&*self.repository, &*object, status, failure)
                    .await)
            }
        };

        if dependents.is_empty() {
            tracing::info!("No dependents left, releasing instance");
            return Ok(Cleanup::Released);
        }

        tracing::info!(dependents = dependents.len(), "Deletion blocked by dependents");
        let condition = ReadyCondition::not_ready(
            Reason::ChildResourcesExist,
            format!("Waiting for dependents to be deleted: {}", dependents.join(", ")),
        );
        self.repository.report_ready(&*object, status, &condition).await;

        Ok(Cleanup::Blocked(REQUEUE_BLOCKED))
    }
}

pub struct InstanceReconciler<F> {
    api: Api<GarageS3Instance>,
    context: Arc<InstanceContext<F>>,
}

impl<F> InstanceReconciler<F> {
    pub fn new(api: Api<GarageS3Instance>, context: InstanceContext<F>) -> Self {
        Self {
            api,
            context: Arc::new(context),
        }
    }
}

impl<F> Reconcile<GarageS3Instance, InstanceContext<F>, F, Provider<GarageS3Instance>> for InstanceReconciler<F>
where
    F: Finalize<GarageS3Instance, Provider<GarageS3Instance>> + 'static,
{
    fn requeue_after_error_seconds() -> Option<Duration> {
        Some(REQUEUE_ERROR)
    }

    fn destruct(self) -> (Api<GarageS3Instance>, Config, Arc<InstanceContext<F>>) {
        (self.api, Config::default(), self.context)
    }
}
