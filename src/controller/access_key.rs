//! GarageS3AccessKey: the remote key and the Secret carrying its credentials.

use std::collections::BTreeMap;
use std::fmt;
use std::result::Result as StdResult;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config;
use kube::Api;
use kube::Resource;

use super::Collaborators;
use super::Failure;
use super::Provider;
use super::Stage;
use super::ACCESS_KEY_FINALIZER;
use super::REQUEUE_READY;
use crate::crd::GarageS3AccessKey;
use crate::crd::GarageS3AccessKeySpec;
use crate::error::Error;
use crate::error::Result;
use crate::garage::find_key_id;
use crate::garage::GarageAdmin;
use crate::garage::KeyPerm;
use crate::garage::UpdateKeyRequest;
use crate::status::ReadyCondition;
use crate::status::Reason;
use crate::Cleanup;
use crate::Context;
use crate::Finalize;
use crate::Reconcile;
use crate::TryResource;

pub const ACCESS_KEY_ID_FIELD: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_FIELD: &str = "AWS_SECRET_ACCESS_KEY";
pub const MANAGED_BY_ANNOTATION: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "garage-s3-operator";

/// Name of the Secret holding the credentials of access key `name`.
pub fn secret_name(name: &str) -> String {
    format!("{name}-gs3ak")
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// The create/update body for the key named `name`.
///
/// A non-blank expiration must be RFC3339 even when `neverExpires` discards it.
pub fn key_request(name: &str, spec: &GarageS3AccessKeySpec) -> Result<UpdateKeyRequest> {
    let expiration = spec
        .expiration()
        .map(|value| {
            DateTime::parse_from_rfc3339(value)
                .map(|expiration| expiration.with_timezone(&Utc))
                .map_err(|source| Error::InvalidExpiration {
                    value: value.to_owned(),
                    source,
                })
        })
        .transpose()?
        .filter(|_| !spec.never_expires);

    Ok(UpdateKeyRequest {
        name: Some(name.to_owned()),
        allow: Some(KeyPerm {
            create_bucket: spec.can_create_bucket,
        }),
        deny: None,
        expiration,
        never_expires: spec.never_expires,
    })
}

/// The credentials Secret as it should look, owned by `access_key`.
pub fn desired_secret(access_key: &GarageS3AccessKey, credentials: &Credentials) -> Result<Secret> {
    let name = access_key.try_name()?;
    let namespace = access_key.try_namespace()?;
    let owner = access_key
        .controller_owner_ref(&())
        .ok_or_else(|| Error::OwnerReference(format!("GarageS3AccessKey {namespace}/{name}")))?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(name)),
            namespace: Some(namespace),
            annotations: Some(BTreeMap::from([(MANAGED_BY_ANNOTATION.to_owned(), MANAGED_BY.to_owned())])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (
                ACCESS_KEY_ID_FIELD.to_owned(),
                ByteString(credentials.access_key_id.as_bytes().to_vec()),
            ),
            (
                SECRET_ACCESS_KEY_FIELD.to_owned(),
                ByteString(credentials.secret_access_key.as_bytes().to_vec()),
            ),
        ])),
        ..Default::default()
    })
}

/// `existing` with the data fields and the managed-by annotation of `desired` applied,
/// or `None` when nothing differs.
pub fn merge_secret(existing: &Secret, desired: &Secret) -> Option<Secret> {
    let mut merged = existing.clone();
    let mut changed = false;

    let data = merged.data.get_or_insert_with(BTreeMap::new);
    for (field, value) in desired.data.iter().flatten() {
        if data.get(field) != Some(value) {
            data.insert(field.clone(), value.clone());
            changed = true;
        }
    }

    let annotations = merged.metadata.annotations.get_or_insert_with(BTreeMap::new);
    if annotations.get(MANAGED_BY_ANNOTATION).map(String::as_str) != Some(MANAGED_BY) {
        annotations.insert(MANAGED_BY_ANNOTATION.to_owned(), MANAGED_BY.to_owned());
        changed = true;
    }

    changed.then_some(merged)
}

fn revealed(secret: Option<String>) -> Option<String> {
    secret.filter(|secret| !secret.is_empty())
}

pub struct AccessKeyContext<F> {
    repository: Arc<F>,
    collaborators: Collaborators,
}

impl<F> AccessKeyContext<F> {
    pub fn new(repository: Arc<F>, collaborators: Collaborators) -> Self {
        Self {
            repository,
            collaborators,
        }
    }
}

impl<F> AccessKeyContext<F>
where
    F: Finalize<GarageS3AccessKey, Provider<GarageS3AccessKey>>,
{
    /// Creates or updates the remote key and returns its credentials.
    async fn provision(&self, access_key: &GarageS3AccessKey, name: &str, namespace: &str) -> StdResult<Credentials, Failure> {
        let admin = self
            .collaborators
            .admin_for(&access_key.spec.instance_ref, namespace)
            .await?;

        let existing = find_key_id(&*admin, name).await.map_err(|error| {
            Failure::unknown(Reason::UnknownGarageState, "Failed to check for existing access key", error)
        })?;
        let request = key_request(name, &access_key.spec).stage(Reason::SyntaxError, "Invalid access key spec")?;

        let info = match existing {
            Some(id) => {
                tracing::debug!(access_key_id = %id, "Updating existing access key");
                admin
                    .update_key(&id, &request)
                    .await
                    .stage(Reason::GarageClientError, "Failed to update access key")?
            }
            None => {
                let info = admin
                    .create_key(&request)
                    .await
                    .stage(Reason::GarageClientError, "Failed to create access key")?;
                tracing::info!(access_key_id = %info.access_key_id, "Access key created");
                self.collaborators
                    .announce(access_key, Reason::Provisioned, format!("Created access key {}", info.access_key_id))
                    .await;
                info
            }
        };

        let secret_access_key = match revealed(info.secret_access_key) {
            Some(secret) => secret,
            None => self.reveal_secret(&*admin, &info.access_key_id).await?,
        };

        Ok(Credentials {
            access_key_id: info.access_key_id,
            secret_access_key,
        })
    }

    async fn reveal_secret(&self, admin: &dyn GarageAdmin, access_key_id: &str) -> StdResult<String, Failure> {
        let info = admin
            .key_info_with_secret(access_key_id)
            .await
            .stage(Reason::GarageClientError, "Failed to fetch secret access key")?;

        revealed(info.secret_access_key)
            .ok_or_else(|| Error::MissingSecretKey(access_key_id.to_owned()))
            .stage(Reason::GarageClientError, "Failed to fetch secret access key")
    }

    /// Writes the credentials Secret, touching it only when a value differs.
    async fn materialize(&self, access_key: &GarageS3AccessKey, credentials: &Credentials) -> StdResult<String, Failure> {
        let desired = desired_secret(access_key, credentials)
            .stage(Reason::OwnerReferenceError, "Failed to build credentials Secret")?;
        let namespace = desired.metadata.namespace.clone().unwrap_or_default();
        let name = desired.metadata.name.clone().unwrap_or_default();

        let store = &self.collaborators.store;
        let existing = store
            .secret(&namespace, &name)
            .await
            .stage(Reason::KubernetesError, "Failed to read credentials Secret")?;

        match existing {
            None => {
                store
                    .create_secret(&desired)
                    .await
                    .stage(Reason::KubernetesError, "Failed to create credentials Secret")?;
                tracing::info!(secret = %name, "Credentials Secret created");
            }
            Some(existing) => match merge_secret(&existing, &desired) {
                Some(updated) => {
                    store
                        .replace_secret(&updated)
                        .await
                        .stage(Reason::KubernetesError, "Failed to update credentials Secret")?;
                    tracing::info!(secret = %name, "Credentials Secret updated");
                }
                None => tracing::debug!(secret = %name, "Credentials Secret unchanged"),
            },
        }

        Ok(name)
    }

    /// Deletes the remote key. A vanished instance leaves nothing to delete.
    async fn remove_remote_key(&self, access_key: &GarageS3AccessKey, name: &str, namespace: &str) -> StdResult<(), Failure> {
        let instance = match self
            .collaborators
            .resolve_instance(&access_key.spec.instance_ref, namespace)
            .await
        {
            Ok(instance) => instance,
            Err(Failure {
                error: Error::InstanceNotFound { .. },
                ..
            }) => {
                tracing::info!("Instance is gone, nothing to clean up remotely");
                return Ok(());
            }
            Err(failure) => return Err(failure),
        };

        let admin = self
            .collaborators
            .garage
            .connect(&instance)
            .await
            .stage(Reason::GarageClientError, "Failed to create Garage client")?;

        let Some(id) = find_key_id(&*admin, name)
            .await
            .stage(Reason::GarageClientError, "Failed to look up access key")?
        else {
            tracing::info!("Remote access key already gone");
            return Ok(());
        };

        match admin.delete_key(&id).await {
            Err(error) if error.is_not_found() => tracing::info!(access_key_id = %id, "Remote access key already gone"),
            result => {
                result.stage(Reason::GarageClientError, "Failed to delete access key")?;
                tracing::info!(access_key_id = %id, "Remote access key deleted");
                self.collaborators
                    .announce(access_key, Reason::CleanedUp, format!("Deleted access key {id}"))
                    .await;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<F> Context<GarageS3AccessKey, F, Provider<GarageS3AccessKey>> for AccessKeyContext<F>
where
    F: Finalize<GarageS3AccessKey, Provider<GarageS3AccessKey>> + 'static,
{
    fn k8s_repository(&self) -> Arc<F> {
        Arc::clone(&self.repository)
    }

    fn finalizer(&self) -> &'static str {
        ACCESS_KEY_FINALIZER
    }

    async fn handle_apply(&self, object: Arc<GarageS3AccessKey>) -> Result<Action> {
        let name = object.try_name()?;
        let namespace = object.try_namespace()?;
        let mut status = object.status.clone().unwrap_or_default();

        let outcome = match self.provision(&object, name, &namespace).await {
            Ok(credentials) => self
                .materialize(&object, &credentials)
                .await
                .map(|secret| (secret, credentials.access_key_id)),
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok((secret, access_key_id)) => {
                status.secret = Some(secret);
                status.access_key_id = Some(access_key_id);
                let condition = ReadyCondition::ready(Reason::Ready, "Access Key is ready");
                self.repository.report_ready(&*object, status, &condition).await;
                Ok(Action::requeue(REQUEUE_READY))
            }
            Err(failure) => Err(self
                .collaborators
                .fail(&*self.repository, &*object, status, failure)
                .await),
        }
    }

    async fn handle_cleanup(&self, object: Arc<GarageS3AccessKey>) -> Result<Cleanup> {
        let name = object.try_name()?;
        let namespace = object.try_namespace()?;

        match self.remove_remote_key(&object, name, &namespace).await {
            Ok(()) => Ok(Cleanup::Released),
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

pub struct AccessKeyReconciler<F> {
    api: Api<GarageS3AccessKey>,
    context: Arc<AccessKeyContext<F>>,
}

impl<F> AccessKeyReconciler<F> {
    pub fn new(api: Api<GarageS3AccessKey>, context: AccessKeyContext<F>) -> Self {
        Self {
            api,
            context: Arc::new(context),
        }
    }
}

impl<F> Reconcile<GarageS3AccessKey, AccessKeyContext<F>, F, Provider<GarageS3AccessKey>> for AccessKeyReconciler<F>
where
    F: Finalize<GarageS3AccessKey, Provider<GarageS3AccessKey>> + 'static,
{
    fn destruct(self) -> (Api<GarageS3AccessKey>, Config, Arc<AccessKeyContext<F>>) {
        (self.api, Config::default(), self.context)
    }
}
