//! Kubernetes side of the operator: the generic repository behind [Finalize] and the
//! [ResourceStore] the controllers read their collaborators from.

use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::api::ListParams;
use kube::api::PostParams;
use kube::Client;
use kube::Resource;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

use crate::cache::CachingStrategy;
use crate::cache::ProvideApi;
use crate::cache::StaticApiProvider;
use crate::crd::GarageS3AccessKey;
use crate::crd::GarageS3Bucket;
use crate::crd::GarageS3Instance;
use crate::crd::InstanceKey;
use crate::crd::FIELD_MANAGER;
use crate::error::Result;
use crate::Finalize;
use crate::TryResource;

/// Merge patch replacing the finalizer list.
///
/// Carries the snapshot's `resourceVersion` when known, which turns the patch into an
/// optimistic update.
pub(crate) fn finalizer_patch<R: Resource>(object: &R, finalizers: Vec<String>) -> Value {
    let mut metadata = json!({ "finalizers": finalizers });
    if let Some(resource_version) = object.resource_version() {
        metadata["resourceVersion"] = Value::String(resource_version);
    }

    json!({ "metadata": metadata })
}

/// [Finalize] implementation for any namespaced resource.
pub struct K8sRepository<R, P> {
    api_provider: P,
    _resource: PhantomData<fn() -> R>,
}

impl<R, P> K8sRepository<R, P> {
    pub fn new(api_provider: P) -> Self {
        Self {
            api_provider,
            _resource: PhantomData,
        }
    }
}

impl<R, P> Finalize<R, P> for K8sRepository<R, P>
where
    R: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + std::fmt::Debug + Clone + Send + Sync + 'static,
    R::DynamicType: Default,
    P: ProvideApi<R>,
{
    fn api_provider(&self) -> &P {
        &self.api_provider
    }
}

/// Reads and writes the objects a reconcile needs besides the one it reconciles.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn instance(&self, key: &InstanceKey) -> Result<Option<GarageS3Instance>>;

    async fn access_key(&self, namespace: &str, name: &str) -> Result<Option<GarageS3AccessKey>>;

    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    /// Replaces a Secret previously read through [ResourceStore::secret]. The carried
    /// `resourceVersion` makes a concurrent change fail the write.
    async fn replace_secret(&self, secret: &Secret) -> Result<()>;

    /// Access keys in all namespaces.
    async fn list_access_keys(&self) -> Result<Vec<GarageS3AccessKey>>;

    /// Buckets in all namespaces.
    async fn list_buckets(&self) -> Result<Vec<GarageS3Bucket>>;
}

/// [ResourceStore] talking to the API server.
pub struct KubeStore {
    instances: StaticApiProvider<GarageS3Instance>,
    access_keys: StaticApiProvider<GarageS3AccessKey>,
    buckets: StaticApiProvider<GarageS3Bucket>,
    secrets: StaticApiProvider<Secret>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            instances: StaticApiProvider::new(client.clone(), vec![], CachingStrategy::Adhoc),
            access_keys: StaticApiProvider::new(client.clone(), vec![], CachingStrategy::Adhoc),
            buckets: StaticApiProvider::new(client.clone(), vec![], CachingStrategy::Adhoc),
            secrets: StaticApiProvider::new(client, vec![], CachingStrategy::Adhoc),
        }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_owned()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn instance(&self, key: &InstanceKey) -> Result<Option<GarageS3Instance>> {
        Ok(self.instances.get(&key.namespace)?.get_opt(&key.name).await?)
    }

    async fn access_key(&self, namespace: &str, name: &str) -> Result<Option<GarageS3AccessKey>> {
        Ok(self.access_keys.get(namespace)?.get_opt(name).await?)
    }

    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secrets.get(namespace)?.get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        self.secrets
            .get(&secret.try_namespace()?)?
            .create(&Self::post_params(), secret)
            .await?;
        Ok(())
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<()> {
        self.secrets
            .get(&secret.try_namespace()?)?
            .replace(secret.try_name()?, &Self::post_params(), secret)
            .await?;
        Ok(())
    }

    async fn list_access_keys(&self) -> Result<Vec<GarageS3AccessKey>> {
        Ok(self.access_keys.all().list(&ListParams::default()).await?.items)
    }

    async fn list_buckets(&self) -> Result<Vec<GarageS3Bucket>> {
        Ok(self.buckets.all().list(&ListParams::default()).await?.items)
    }
}
