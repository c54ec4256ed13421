//! GarageS3Bucket: the remote bucket, its aliases and the per key grants.
//!
//! The diffing steps are plain functions over observed and desired state, so a reconcile
//! only issues the calls that move the bucket towards its spec:
//!
//! - aliases are removed before new ones are added,
//! - permissions are granted before they are revoked, flag by flag.

use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config;
use kube::Api;

use super::access_key::secret_name;
use super::access_key::ACCESS_KEY_ID_FIELD;
use super::Collaborators;
use super::Failure;
use super::Provider;
use super::Stage;
use super::BUCKET_FINALIZER;
use super::REQUEUE_ERROR;
use super::REQUEUE_READY;
use crate::crd::GarageS3Bucket;
use crate::crd::GarageS3BucketSpec;
use crate::crd::Permission;
use crate::error::Error;
use crate::error::Result;
use crate::garage::find_bucket_id;
use crate::garage::BucketKeyGrant;
use crate::garage::BucketKeyPerm;
use crate::garage::BucketQuotas;
use crate::garage::PermissionChange;
use crate::garage::UpdateBucketRequest;
use crate::garage::WebsiteAccessUpdate;
use crate::k8s::ResourceStore;
use crate::status::ReadyCondition;
use crate::status::Reason;
use crate::Cleanup;
use crate::Context;
use crate::Finalize;
use crate::Reconcile;
use crate::TryResource;

/// Additional aliases followed by the bucket name, without duplicates.
pub fn desired_aliases(name: &str, spec: &GarageS3BucketSpec) -> Vec<String> {
    let mut aliases: Vec<String> = Vec::with_capacity(spec.additional_aliases.len() + 1);
    for alias in spec.additional_aliases.iter().map(String::as_str).chain([name]) {
        if !aliases.iter().any(|existing| existing == alias) {
            aliases.push(alias.to_owned());
        }
    }
    aliases
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AliasChanges {
    pub remove: Vec<String>,
    pub add: Vec<String>,
}

pub fn alias_changes(current: &[String], desired: &[String]) -> AliasChanges {
    AliasChanges {
        remove: current.iter().filter(|alias| !desired.contains(alias)).cloned().collect(),
        add: desired.iter().filter(|alias| !current.contains(alias)).cloned().collect(),
    }
}

/// A permission entry whose access key name resolved to a remote id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGrant {
    pub access_key_id: String,
    pub permissions: BucketKeyPerm,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PermissionChanges {
    pub allow: Vec<PermissionChange>,
    pub deny: Vec<PermissionChange>,
}

/// Calls turning the `existing` grants of a bucket into the `desired` ones.
pub fn permission_changes(bucket_id: &str, desired: &[ResolvedGrant], existing: &[BucketKeyGrant]) -> PermissionChanges {
    let change = |access_key_id: &str, permissions| PermissionChange {
        bucket_id: bucket_id.to_owned(),
        access_key_id: access_key_id.to_owned(),
        permissions,
    };
    let mut changes = PermissionChanges::default();

    for grant in desired {
        let Some(current) = existing
            .iter()
            .find(|current| current.access_key_id == grant.access_key_id)
            .map(|current| current.permissions)
        else {
            changes.allow.push(change(&grant.access_key_id, grant.permissions));
            continue;
        };

        let wanted = grant.permissions;
        let allow = BucketKeyPerm {
            owner: wanted.owner && !current.owner,
            read: wanted.read && !current.read,
            write: wanted.write && !current.write,
        };
        let deny = BucketKeyPerm {
            owner: !wanted.owner && current.owner,
            read: !wanted.read && current.read,
            write: !wanted.write && current.write,
        };

        if allow.any() {
            changes.allow.push(change(&grant.access_key_id, allow));
        }
        if deny.any() {
            changes.deny.push(change(&grant.access_key_id, deny));
        }
    }

    // A key listed with all flags false already holds nothing, a deny would change nothing.
    let stale = existing
        .iter()
        .filter(|current| current.permissions.any())
        .filter(|current| !desired.iter().any(|grant| grant.access_key_id == current.access_key_id));
    for current in stale {
        changes.deny.push(change(&current.access_key_id, current.permissions));
    }

    changes
}

/// The full quota and website configuration. Absent settings clear the remote ones.
pub fn update_request(spec: &GarageS3BucketSpec) -> UpdateBucketRequest {
    let website_access = match &spec.website_access {
        Some(website) if website.enabled => WebsiteAccessUpdate {
            enabled: true,
            index_document: Some(website.index_document.clone()),
            error_document: Some(website.error_document.clone()).filter(|document| !document.is_empty()),
        },
        _ => WebsiteAccessUpdate::default(),
    };

    let quotas = spec
        .quota
        .as_ref()
        .map(|quota| BucketQuotas {
            max_size: quota.max_bytes,
            max_objects: quota.max_objects,
        })
        .unwrap_or_default();

    UpdateBucketRequest {
        website_access: Some(website_access),
        quotas: Some(quotas),
    }
}

/// Outcome of resolving permission entries to access key ids.
#[derive(Debug, Default)]
pub struct Resolution {
    pub grants: Vec<ResolvedGrant>,
    /// Access key names that could not be resolved yet.
    pub unresolved: Vec<String>,
}

/// Resolves each entry through the credentials Secret of the named access key.
///
/// The first entry for an access key wins; later ones are ignored.
pub async fn resolve_grants(store: &dyn ResourceStore, namespace: &str, permissions: &[Permission]) -> Resolution {
    let mut resolution = Resolution::default();

    for permission in permissions {
        let name = &permission.access_key_name;
        let Some(access_key_id) = access_key_id(store, namespace, name).await else {
            tracing::info!(access_key = %name, "Access key not resolvable yet");
            resolution.unresolved.push(name.clone());
            continue;
        };

        if resolution.grants.iter().any(|grant| grant.access_key_id == access_key_id) {
            tracing::warn!(access_key = %name, "Duplicate permission entry ignored");
            continue;
        }

        resolution.grants.push(ResolvedGrant {
            access_key_id,
            permissions: BucketKeyPerm {
                owner: permission.owner,
                read: permission.read,
                write: permission.write,
            },
        });
    }

    resolution
}

async fn access_key_id(store: &dyn ResourceStore, namespace: &str, name: &str) -> Option<String> {
    let access_key = match store.access_key(namespace, name).await {
        Ok(access_key) => access_key?,
        Err(error) => {
            tracing::warn!(access_key = %name, error = %error, "Failed to read access key");
            return None;
        }
    };

    let secret = access_key
        .status
        .and_then(|status| status.secret)
        .unwrap_or_else(|| secret_name(name));
    let secret = match store.secret(namespace, &secret).await {
        Ok(secret) => secret?,
        Err(error) => {
            tracing::warn!(access_key = %name, error = %error, "Failed to read credentials Secret");
            return None;
        }
    };

    let value = secret.data?.remove(ACCESS_KEY_ID_FIELD)?;
    String::from_utf8(value.0).ok().filter(|id| !id.is_empty())
}

pub struct BucketContext<F> {
    repository: Arc<F>,
    collaborators: Collaborators,
}

impl<F> BucketContext<F> {
    pub fn new(repository: Arc<F>, collaborators: Collaborators) -> Self {
        Self {
            repository,
            collaborators,
        }
    }
}

impl<F> BucketContext<F>
where
    F: Finalize<GarageS3Bucket, Provider<GarageS3Bucket>>,
{
    /// Brings the remote bucket in line and returns its id with the unresolved key names.
    async fn converge(&self, bucket: &GarageS3Bucket, name: &str, namespace: &str) -> StdResult<(String, Vec<String>), Failure> {
        let spec = &bucket.spec;
        let admin = self.collaborators.admin_for(&spec.instance_ref, namespace).await?;

        let existing = find_bucket_id(&*admin, name).await.map_err(|error| {
            Failure::unknown(Reason::UnknownGarageState, "Failed to check for existing bucket", error)
        })?;

        let info = match existing {
            Some(id) => admin
                .bucket_info(&id)
                .await
                .stage(Reason::GarageClientError, "Failed to fetch bucket")?,
            None => {
                let info = admin
                    .create_bucket(name)
                    .await
                    .stage(Reason::GarageClientError, "Failed to create bucket")?;
                tracing::info!(bucket_id = %info.id, "Bucket created");
                self.collaborators
                    .announce(bucket, Reason::Provisioned, format!("Created bucket {}", info.id))
                    .await;
                info
            }
        };

        admin
            .update_bucket(&info.id, &update_request(spec))
            .await
            .stage(Reason::GarageClientError, "Failed to update quota and website access")?;

        let aliases = alias_changes(&info.global_aliases, &desired_aliases(name, spec));
        for alias in &aliases.remove {
            admin
                .remove_bucket_alias(&info.id, alias)
                .await
                .stage(Reason::GarageClientError, "Failed to remove bucket alias")?;
        }
        for alias in &aliases.add {
            admin
                .add_bucket_alias(&info.id, alias)
                .await
                .stage(Reason::GarageClientError, "Failed to add bucket alias")?;
        }
        if aliases != AliasChanges::default() {
            tracing::debug!(removed = ?aliases.remove, added = ?aliases.add, "Aliases reconciled");
        }

        let resolution = resolve_grants(&*self.collaborators.store, namespace, &spec.permissions).await;
        let permissions = permission_changes(&info.id, &resolution.grants, &info.keys);
        for change in &permissions.allow {
            admin
                .allow_bucket_key(change)
                .await
                .stage(Reason::GarageClientError, "Failed to allow bucket key")?;
        }
        for change in &permissions.deny {
            admin
                .deny_bucket_key(change)
                .await
                .stage(Reason::GarageClientError, "Failed to deny bucket key")?;
        }

        Ok((info.id, resolution.unresolved))
    }

    /// Deletes the remote bucket and returns its id, if there was one.
    async fn delete_remote_bucket(&self, bucket: &GarageS3Bucket, name: &str, namespace: &str) -> Result<Option<String>> {
        let instance = self
            .collaborators
            .resolve_instance(&bucket.spec.instance_ref, namespace)
            .await
            .map_err(|failure| failure.error)?;
        let admin = self.collaborators.garage.connect(&instance).await?;

        let Some(id) = find_bucket_id(&*admin, name).await? else {
            tracing::info!("Remote bucket already gone");
            return Ok(None);
        };

        match admin.delete_bucket(&id).await {
            Err(error) if error.is_not_found() => tracing::info!(bucket_id = %id, "Remote bucket already gone"),
            result => {
                result?;
                tracing::info!(bucket_id = %id, "Remote bucket deleted");
            }
        }

        Ok(Some(id))
    }
}

#[async_trait]
impl<F> Context<GarageS3Bucket, F, Provider<GarageS3Bucket>> for BucketContext<F>
where
    F: Finalize<GarageS3Bucket, Provider<GarageS3Bucket>> + 'static,
{
    fn k8s_repository(&self) -> Arc<F> {
        Arc::clone(&self.repository)
    }

    fn finalizer(&self) -> &'static str {
        BUCKET_FINALIZER
    }

    async fn handle_apply(&self, object: Arc<GarageS3Bucket>) -> Result<Action> {
        let name = object.try_name()?;
        let namespace = object.try_namespace()?;
        let mut status = object.status.clone().unwrap_or_default();

        let failure = match self.converge(&object, name, &namespace).await {
            Ok((bucket_id, unresolved)) => {
                status.bucket_id = Some(bucket_id);
                if unresolved.is_empty() {
                    let condition = ReadyCondition::ready(Reason::Ready, "Bucket is ready");
                    self.repository.report_ready(&*object, status, &condition).await;
                    return Ok(Action::requeue(REQUEUE_READY));
                }
                Failure::not_ready(
                    Reason::PermissionsIncomplete,
                    "Some permissions could not be applied",
                    Error::PermissionsIncomplete(unresolved),
                )
            }
            Err(failure) => failure,
        };

        Err(self
            .collaborators
            .fail(&*self.repository, &*object, status, failure)
            .await)
    }

    async fn handle_cleanup(&self, object: Arc<GarageS3Bucket>) -> Result<Cleanup> {
        let name = object.try_name()?;
        let namespace = object.try_namespace()?;

        match self
            .delete_remote_bucket(&object, name, &namespace)
            .await
            .stage(Reason::FinalizationError, "Failed to delete bucket")
        {
            Ok(deleted) => {
                if let Some(id) = deleted {
                    self.collaborators
                        .announce(&*object, Reason::CleanedUp, format!("Deleted bucket {id}"))
                        .await;
                }
                Ok(Cleanup::Released)
            }
            Err(failure) => {
                let status = object.status.clone().unwrap_or_default();
                Err(self
                    .collaborators
                    .fail(&*self.repository, &*object, status, failure)
                    .await)
            }
        }
    }
}

pub struct BucketReconciler<F> {
    api: Api<GarageS3Bucket>,
    context: Arc<BucketContext<F>>,
}

impl<F> BucketReconciler<F> {
    pub fn new(api: Api<GarageS3Bucket>, context: BucketContext<F>) -> Self {
        Self {
            api,
            context: Arc::new(context),
        }
    }
}

impl<F> Reconcile<GarageS3Bucket, BucketContext<F>, F, Provider<GarageS3Bucket>> for BucketReconciler<F>
where
    F: Finalize<GarageS3Bucket, Provider<GarageS3Bucket>> + 'static,
{
    fn requeue_after_error_seconds() -> Option<Duration> {
        Some(REQUEUE_ERROR)
    }

    fn destruct(self) -> (Api<GarageS3Bucket>, Config, Arc<BucketContext<F>>) {
        (self.api, Config::default(), self.context)
    }
}
