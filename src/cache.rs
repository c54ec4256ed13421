//! Caching of namespaced [Api] handles.
//!
//! Building an [Api] is cheap but not free, and the controllers ask for the same
//! handles on every reconcile. A [StaticApiProvider] keeps them around per namespace.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;

use k8s_openapi::NamespaceResourceScope;
use kube::Api;
use kube::Client;
use kube::Resource;

use crate::error::Error;
use crate::error::Result;

/// Decides what happens when an [Api] for an unknown namespace is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachingStrategy {
    /// Only the namespaces handed to the provider at construction are served.
    Strict,
    /// Handles for unknown namespaces are built on demand and cached.
    Adhoc,
}

/// Hands out [Api] handles for a resource type.
pub trait ProvideApi<R>: Send + Sync
where
    R: Resource<Scope = NamespaceResourceScope>,
    R::DynamicType: Default,
{
    /// Returns the namespaced handle for `namespace`.
    fn get(&self, namespace: &str) -> Result<Api<R>>;

    /// Returns a cluster-wide handle, used for listing across namespaces.
    fn all(&self) -> Api<R>;
}

pub struct StaticApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope>,
{
    client: Client,
    apis: RwLock<HashMap<String, Api<R>>>,
    strategy: CachingStrategy,
}

impl<R> StaticApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + Debug,
    R::DynamicType: Default,
{
    pub fn new(client: Client, namespaces: Vec<&str>, strategy: CachingStrategy) -> Self {
        let apis = namespaces
            .into_iter()
            .map(|namespace| (namespace.to_owned(), Api::namespaced(client.clone(), namespace)))
            .collect();

        Self {
            client,
            apis: RwLock::new(apis),
            strategy,
        }
    }

    pub fn strategy(&self) -> CachingStrategy {
        self.strategy
    }
}

impl<R> ProvideApi<R> for StaticApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + Debug + Send + Sync,
    R::DynamicType: Default,
{
    fn get(&self, namespace: &str) -> Result<Api<R>> {
        if let Some(api) = self
            .apis
            .read()
            .map_err(|_| anyhow::anyhow!("api cache lock poisoned"))?
            .get(namespace)
        {
            return Ok(api.clone());
        }

        match self.strategy {
            CachingStrategy::Strict => Err(Error::NamespaceNotCached(namespace.to_owned())),
            CachingStrategy::Adhoc => {
                let api: Api<R> = Api::namespaced(self.client.clone(), namespace);
                self.apis
                    .write()
                    .map_err(|_| anyhow::anyhow!("api cache lock poisoned"))?
                    .insert(namespace.to_owned(), api.clone());
                tracing::debug!(namespace, "Cached new namespaced api");
                Ok(api)
            }
        }
    }

    fn all(&self) -> Api<R> {
        Api::all(self.client.clone())
    }
}
