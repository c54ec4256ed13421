//! `garage-s3-operator` keeps a Garage object storage cluster in line with three kinds of
//! Kubernetes custom resources:
//!
//! - `GarageS3Instance`: a cluster reachable through its admin API. Its deletion is held
//!   back while access keys or buckets still reference it.
//! - `GarageS3AccessKey`: a key on that cluster, whose credentials are written to a Secret
//!   named `<name>-gs3ak`.
//! - `GarageS3Bucket`: a bucket with quota, website access, global aliases and per key
//!   permissions.
//!
//! ## Layout
//!
//! The crate root holds the controller runtime plumbing shared by all kinds:
//!
//! - [Reconcile] starts a `kube` [Controller] for one kind and drives the reconciliation loop.
//! - [Context] holds the per kind logic. [Context::handle_reconciliation] derives the
//!   [Lifecycle] of the snapshot it was handed and dispatches to [Context::handle_apply] or
//!   [Context::handle_cleanup].
//! - [Finalize] is the per kind Kubernetes repository: finalizers and status.
//!
//! The kinds themselves live in [crd], their reconcilers in [controller], and the admin API
//! client in [garage].
//!
//! ## Status Object Handling
//!
//! Status objects implement [ObserveGeneration] so that every status write also records the
//! generation it was computed from, and [status::HasConditions] so that the single `Ready`
//! condition can be maintained by [Finalize::report_ready].
//!
//! ```
//! use garage_s3_operator::ObserveGeneration;
//!
//! pub struct MyStatus {
//!     pub observed_generation: Option<i64>,
//! }
//!
//! impl ObserveGeneration for MyStatus {
//!     fn add(&mut self, observed_generation: i64) {
//!         self.observed_generation = Some(observed_generation);
//!     }
//! }
//! ```
//!
//! ## Error Handling
//!
//! Hooks return [error::Result]. An error returned from [Context::handle_apply] or
//! [Context::handle_cleanup] is handed to [Context::handle_error], which decides when the
//! resource is retried. The Ready condition describing the failure has been persisted by
//! then.

pub mod cache;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod garage;
pub mod k8s;
pub mod operator;
pub mod status;
pub mod telemetry;

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::ObjectMeta;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::runtime::controller::Action;
use kube::runtime::controller::Error as KubeControllerError;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::runtime::Controller;
use kube::Api;
use kube::Resource;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::ProvideApi;
use crate::error::Error;
use crate::error::Result;
use crate::status::HasConditions;
use crate::status::ReadyCondition;

const REQUEUE_AFTER_ERROR_SECONDS: u64 = 60;

type ReconciliationResult<R, RE, QE> = StdResult<(ObjectRef<R>, Action), KubeControllerError<RE, QE>>;

/// The Reconcile trait takes care of the starting of the controller and the reconciliation loop.
///
/// The implementor provides [Reconcile::destruct], a component F that implements [Finalize]
/// and a component C that implements [Context] and uses component F.
#[async_trait]
pub trait Reconcile<R, C, F, P>: Sized
where
    R: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    R::DynamicType: Default + Eq + Hash + Clone + Debug + Unpin,
    C: Context<R, F, P> + 'static,
    F: Finalize<R, P>,
    P: ProvideApi<R> + 'static,
{
    /// Starts the controller and runs the reconciliation loop, where as reconciliations run
    /// synchronously. If you want asynchronous reconciliations, use [Reconcile::start_concurrent].
    async fn start<G>(self, graceful_trigger: Option<G>)
    where
        G: Future<Output = ()> + Send + Sync + 'static,
    {
        let (crd_api, config, context) = self.destruct();

        controller(crd_api, config, graceful_trigger)
            .run(Self::reconcile, Self::error_policy, context)
            .for_each(Self::handle_reconciliation_result)
            .await;
    }

    /// Starts the controller and runs the reconciliation loop, where as reconciliations run
    /// concurrently.
    ///
    /// `limit` is the maximum number of concurrent reconciliations that can be processed.
    /// If it is set to `None` there is no hard limit on the number of concurrent reconciliations.
    /// `Some(0)` has the same effect as `None`.
    async fn start_concurrent<G>(self, limit: Option<usize>, graceful_trigger: Option<G>)
    where
        G: Future<Output = ()> + Send + Sync + 'static,
    {
        let (crd_api, config, context) = self.destruct();

        controller(crd_api, config, graceful_trigger)
            .run(Self::reconcile, Self::error_policy, context)
            .for_each_concurrent(limit, Self::handle_reconciliation_result)
            .await;
    }

    /// Callback method for the controller that is called when a resource is reconciled and that
    /// is hooked into [Reconcile::start].
    #[tracing::instrument(
        name = "garage_s3_operator.reconcile",
        skip(resource, context),
        fields(
            kind = %R::kind(&R::DynamicType::default()),
            resource_name = %resource.try_name().unwrap_or_default(),
            resource_namespace = %resource.try_namespace().unwrap_or_default(),
            resource_generation = %resource.meta().generation.unwrap_or(0),
        )
    )]
    async fn reconcile(resource: Arc<R>, context: Arc<C>) -> Result<Action> {
        tracing::info!("Reconciliation started");
        context.handle_reconciliation(resource).await
    }

    /// Callback method for the controller that is called when an error occurs during
    /// reconciliation. The method is hooked into [Reconcile::start].
    #[tracing::instrument(
        name = "garage_s3_operator.error_policy",
        skip(resource, error, context),
        fields(
            resource_name = %resource.try_name().unwrap_or_default(),
            resource_namespace = %resource.try_namespace().unwrap_or_default(),
        )
    )]
    fn error_policy(resource: Arc<R>, error: &Error, context: Arc<C>) -> Action {
        context.handle_error(resource, error, Self::requeue_after_error_seconds())
    }

    /// Handles the result of a reconciliation and is called by the controller in the
    /// [Reconcile::start] method for each reconciliation.
    async fn handle_reconciliation_result<RE, QE>(reconciliation_result: ReconciliationResult<R, RE, QE>)
    where
        RE: Debug + Send,
        QE: Debug + Send,
    {
        match reconciliation_result {
            Ok(resource) => {
                tracing::info!("Reconciliation successful. Resource: {resource:?}");
            }
            Err(error) => {
                tracing::error!("Reconciliation error: {error:?}");
            }
        }
    }

    /// Returns the duration after which a resource is requeued after an error occurred.
    ///
    /// Kinds that want a faster retry than the default override it.
    fn requeue_after_error_seconds() -> Option<Duration> {
        Some(Duration::from_secs(REQUEUE_AFTER_ERROR_SECONDS))
    }

    /// Destructs components from the implementing struct that are injected into the controller.
    ///
    /// This method consumes `self` and extracts the three components needed to start the controller:
    /// - [`Api<R>`] - The Kubernetes API client for the resource type
    /// - [`Config`] - The watcher configuration
    /// - [`Arc<C>`] - The shared context containing reconciliation logic
    fn destruct(self) -> (Api<R>, Config, Arc<C>);
}

fn controller<R, G>(crd_api: Api<R>, config: Config, graceful_trigger: Option<G>) -> Controller<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    R::DynamicType: Default + Eq + Hash + Clone + Debug + Unpin,
    G: Future<Output = ()> + Send + Sync + 'static,
{
    let controller = Controller::new(crd_api, config);

    if let Some(trigger) = graceful_trigger {
        return controller.graceful_shutdown_on(trigger);
    };

    controller
}

/// Where a resource stands with respect to deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Not being deleted. The finalizer is ensured before applying.
    Active,
    /// Deletion requested and our finalizer still holds the object.
    PendingCleanup,
    /// Deletion requested and our finalizer is gone. Nothing left to do.
    Deleted,
}

impl Lifecycle {
    pub fn observe(meta: &ObjectMeta, finalizer: &str) -> Self {
        if meta.deletion_timestamp.is_none() {
            return Lifecycle::Active;
        }

        let holds = meta
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer));

        if holds {
            Lifecycle::PendingCleanup
        } else {
            Lifecycle::Deleted
        }
    }
}

/// Outcome of [Context::handle_cleanup].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    /// Cleanup cannot proceed yet. The finalizer stays and the resource is retried.
    Blocked(Duration),
    /// Cleanup is done and the finalizer may be removed.
    Released,
}

/// The Context trait takes care of the apply and cleanup logic of a resource.
#[async_trait]
pub trait Context<R, F, P>: Send + Sync
where
    R: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    R::DynamicType: Default,
    F: Finalize<R, P>,
    P: ProvideApi<R>,
{
    /// Handles a reconciliation of a resource.
    ///
    /// The object is an immutable snapshot. The method takes care of the finalizer of the
    /// resource and delegates to [Context::handle_apply] and [Context::handle_cleanup].
    #[tracing::instrument(
        name = "garage_s3_operator.handle_reconciliation",
        skip(self, object),
        fields(
            resource_name = %object.try_name().unwrap_or_default(),
            resource_namespace = %object.try_namespace().unwrap_or_default(),
            finalizer = %self.finalizer(),
            has_deletion_timestamp = %object.meta().deletion_timestamp.is_some(),
        )
    )]
    async fn handle_reconciliation(&self, object: Arc<R>) -> Result<Action> {
        let repository = self.k8s_repository();

        match Lifecycle::observe(object.meta(), self.finalizer()) {
            Lifecycle::Active => {
                repository.ensure_finalizer(&object, self.finalizer()).await?;
                self.handle_apply(object).await
            }
            Lifecycle::PendingCleanup => match self.handle_cleanup(Arc::clone(&object)).await? {
                Cleanup::Blocked(requeue) => {
                    tracing::info!(requeue_seconds = requeue.as_secs(), "Cleanup blocked");
                    Ok(Action::requeue(requeue))
                }
                Cleanup::Released => {
                    repository.remove_finalizer(&object, self.finalizer()).await?;
                    Ok(Action::await_change())
                }
            },
            Lifecycle::Deleted => Ok(Action::await_change()),
        }
    }

    /// Handles an error that occurs during reconciliation.
    ///
    /// Logs the error and requeues the resource or not depending on the requeue parameter.
    fn handle_error(&self, object: Arc<R>, error: &Error, requeue: Option<Duration>) -> Action {
        tracing::error!(
            resource_name = %object.try_name().unwrap_or_default(),
            resource_namespace = %object.try_namespace().unwrap_or_default(),
            error = %error,
            "Reconciliation error"
        );
        requeue.map_or_else(Action::await_change, Action::requeue)
    }

    fn k8s_repository(&self) -> Arc<F>;

    /// The finalizer owned by this kind.
    fn finalizer(&self) -> &'static str;

    /// Handles creation and updates. Must be idempotent.
    async fn handle_apply(&self, object: Arc<R>) -> Result<Action>;

    /// Handles deletion while the finalizer holds the object. Must be idempotent.
    async fn handle_cleanup(&self, object: Arc<R>) -> Result<Cleanup>;
}

/// The Finalize trait takes care of the finalizers of a resource as well as its status.
///
/// Finalizer changes are JSON merge patches that carry the `resourceVersion` of the
/// snapshot, so a concurrent change of the object makes them fail with a conflict
/// instead of overwriting it.
#[async_trait]
pub trait Finalize<R, P>: Send + Sync
where
    R: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    R::DynamicType: Default,
    P: ProvideApi<R>,
{
    /// Returns the provider for k8s Api.
    fn api_provider(&self) -> &P;

    /// Adds `finalizer` unless the snapshot already carries it.
    #[tracing::instrument(
        name = "garage_s3_operator.ensure_finalizer",
        skip(self, object),
        fields(
            resource_name = %object.try_name().unwrap_or_default(),
            resource_namespace = %object.try_namespace().unwrap_or_default(),
        )
    )]
    async fn ensure_finalizer(&self, object: &R, finalizer: &str) -> Result<()> {
        let mut finalizers = object.finalizers().to_vec();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_owned());

        let api = self.api_provider().get(&object.try_namespace()?)?;
        api.patch(
            object.try_name()?,
            &PatchParams::default(),
            &Patch::Merge(k8s::finalizer_patch(object, finalizers)),
        )
        .await?;

        tracing::debug!("Finalizer added");
        Ok(())
    }

    /// Removes `finalizer`. An object that is already gone counts as done.
    #[tracing::instrument(
        name = "garage_s3_operator.remove_finalizer",
        skip(self, object),
        fields(
            resource_name = %object.try_name().unwrap_or_default(),
            resource_namespace = %object.try_namespace().unwrap_or_default(),
        )
    )]
    async fn remove_finalizer(&self, object: &R, finalizer: &str) -> Result<()> {
        let finalizers: Vec<String> = object
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != finalizer)
            .cloned()
            .collect();

        let api = self.api_provider().get(&object.try_namespace()?)?;
        let result = api
            .patch(
                object.try_name()?,
                &PatchParams::default(),
                &Patch::Merge(k8s::finalizer_patch(object, finalizers)),
            )
            .await;

        match result.map_err(Error::from) {
            Ok(_) => {
                tracing::debug!("Finalizer removed");
                Ok(())
            }
            Err(error) if error.is_kube_not_found() => {
                tracing::debug!("Object already gone while removing finalizer");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Updates the status object of a resource.
    ///
    /// Updating the status does not trigger a new reconciliation loop.
    #[tracing::instrument(
        name = "garage_s3_operator.update_status",
        skip(self, object, status),
        fields(
            resource_name = %object.try_name().unwrap_or_default(),
            resource_namespace = %object.try_namespace().unwrap_or_default(),
            resource_generation = %object.meta().generation.unwrap_or(0),
        )
    )]
    async fn update_status<S>(&self, object: &R, mut status: S) -> Result<()>
    where
        S: Serialize + ObserveGeneration + Debug + Send + Sync,
    {
        let api = self.api_provider().get(&object.try_namespace()?)?;

        status.with_observed_gen(object.meta());
        let new_status = Status { status };
        api.patch_status(object.try_name()?, &PatchParams::default(), &Patch::Merge(&new_status))
            .await?;

        tracing::debug!("Status updated successfully");
        Ok(())
    }

    /// Sets the Ready condition on `status` and persists it.
    ///
    /// A failed write is logged and swallowed: the remote side has already been touched
    /// and the next reconcile writes the status again.
    async fn report_ready<S>(&self, object: &R, mut status: S, ready: &ReadyCondition)
    where
        S: Serialize + ObserveGeneration + HasConditions + Debug + Send + Sync,
    {
        status.set_ready(ready, Utc::now());

        if let Err(error) = self.update_status(object, status).await {
            tracing::warn!(
                resource_name = %object.try_name().unwrap_or_default(),
                resource_namespace = %object.try_namespace().unwrap_or_default(),
                reason = %ready.reason,
                error = %error,
                "Failed to persist Ready condition"
            );
        }
    }
}

/// The Status struct is a serializable wrapper around the status object S of a resource.
#[derive(Debug, Serialize)]
struct Status<S>
where
    S: Serialize + ObserveGeneration + Debug,
{
    status: S,
}

/// The ObserveGeneration trait is used to update the observed generation of a resource.
pub trait ObserveGeneration {
    /// Updates the observed generation, e.g. a property of the status object.
    fn add(&mut self, observed_generation: i64);

    /// Updates the observed generation with the generation of the resource's metadata.
    fn with_observed_gen(&mut self, meta: &ObjectMeta) {
        let observed_generation = meta.generation;
        if let Some(observed_generation) = observed_generation {
            self.add(observed_generation)
        }
    }
}

/// The TryResource trait is used to try to extract the name and the namespace of a resources
/// metadata and encapsulates the error handling.
pub trait TryResource {
    fn try_name(&self) -> Result<&str>;
    fn try_namespace(&self) -> Result<String>;
}

impl<R> TryResource for R
where
    R: Resource,
{
    fn try_name(&self) -> Result<&str> {
        self.meta().name.as_deref().ok_or(Error::UnnamedObject)
    }

    fn try_namespace(&self) -> Result<String> {
        self.namespace().ok_or(Error::UserInput({
            "Expected resource to be namespaced. Can't deploy to an unknown namespace.".to_owned()
        }))
    }
}
