//! In-memory stand-ins for the admin API, the Kubernetes store and the repository.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::ByteString;
use k8s_openapi::NamespaceResourceScope;
use kube::client::Body;
use kube::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tower_test::mock;

use super::Collaborators;
use super::Provider;
use crate::cache::CachingStrategy;
use crate::cache::StaticApiProvider;
use crate::crd::GarageS3AccessKey;
use crate::crd::GarageS3AccessKeySpec;
use crate::crd::GarageS3AccessKeyStatus;
use crate::crd::GarageS3Bucket;
use crate::crd::GarageS3BucketSpec;
use crate::crd::GarageS3Instance;
use crate::crd::GarageS3InstanceSpec;
use crate::crd::InstanceKey;
use crate::crd::InstanceRef;
use crate::error::Error;
use crate::error::Result;
use crate::events::tests::MockEventRecorder;
use crate::garage::*;
use crate::k8s::ResourceStore;
use crate::status::Reason;
use crate::Finalize;
use crate::ObserveGeneration;

/// A call received by [FakeGarage].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ClusterHealth,
    ListKeys,
    CreateKey(UpdateKeyRequest),
    UpdateKey(String, UpdateKeyRequest),
    KeyInfoWithSecret(String),
    DeleteKey(String),
    ListBuckets,
    BucketInfo(String),
    CreateBucket(String),
    UpdateBucket(String, UpdateBucketRequest),
    DeleteBucket(String),
    AddAlias(String),
    RemoveAlias(String),
    Allow(String, BucketKeyPerm),
    Deny(String, BucketKeyPerm),
}

impl Call {
    /// Calls that change remote state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::ClusterHealth | Call::ListKeys | Call::KeyInfoWithSecret(_) | Call::ListBuckets | Call::BucketInfo(_)
        )
    }
}

#[derive(Debug, Clone)]
struct FakeKey {
    id: String,
    name: String,
    secret: String,
    create_bucket: bool,
}

#[derive(Debug, Clone, Default)]
struct FakeBucket {
    id: String,
    global_aliases: Vec<String>,
    local_aliases: Vec<BucketLocalAlias>,
    grants: Vec<BucketKeyGrant>,
}

#[derive(Default)]
struct GarageState {
    calls: Vec<Call>,
    keys: Vec<FakeKey>,
    buckets: Vec<FakeBucket>,
    health: ClusterHealth,
    bare_create: bool,
    failures: HashMap<&'static str, u16>,
    next_id: u32,
}

/// Stateful admin API recording every call.
#[derive(Default)]
pub struct FakeGarage {
    state: Mutex<GarageState>,
}

impl FakeGarage {
    pub fn new() -> Self {
        let garage = Self::default();
        garage.set_health("healthy", 3, 3);
        garage
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GarageState> {
        self.state.lock().unwrap()
    }

    pub fn insert_key(&self, id: &str, name: &str, secret: &str) {
        self.state().keys.push(FakeKey {
            id: id.into(),
            name: name.into(),
            secret: secret.into(),
            create_bucket: false,
        });
    }

    pub fn insert_bucket(&self, id: &str, aliases: &[&str]) {
        self.state().buckets.push(FakeBucket {
            id: id.into(),
            global_aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
            ..Default::default()
        });
    }

    pub fn insert_local_alias(&self, bucket_id: &str, key_id: &str, alias: &str) {
        let mut state = self.state();
        let bucket = state.buckets.iter_mut().find(|bucket| bucket.id == bucket_id).unwrap();
        bucket.local_aliases.push(BucketLocalAlias {
            access_key_id: key_id.into(),
            alias: alias.into(),
        });
    }

    pub fn insert_grant(&self, bucket_id: &str, key_id: &str, permissions: BucketKeyPerm) {
        let mut state = self.state();
        let bucket = state.buckets.iter_mut().find(|bucket| bucket.id == bucket_id).unwrap();
        bucket.grants.push(BucketKeyGrant {
            access_key_id: key_id.into(),
            name: String::new(),
            permissions,
        });
    }

    pub fn set_health(&self, status: &str, up: u64, total: u64) {
        self.state().health = ClusterHealth {
            status: status.into(),
            known_nodes: total,
            connected_nodes: up,
            storage_nodes: total,
            storage_nodes_up: up,
        };
    }

    /// Makes bucket creation return a bucket without aliases.
    pub fn bare_create(&self) {
        self.state().bare_create = true;
    }

    /// Makes `operation` fail with `status` until [FakeGarage::recover] is called.
    pub fn fail(&self, operation: &'static str, status: u16) {
        self.state().failures.insert(operation, status);
    }

    pub fn recover(&self, operation: &'static str) {
        self.state().failures.remove(operation);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn bucket_ids(&self) -> Vec<String> {
        self.state().buckets.iter().map(|bucket| bucket.id.clone()).collect()
    }

    pub fn key_names(&self) -> Vec<String> {
        self.state().keys.iter().map(|key| key.name.clone()).collect()
    }

    pub fn aliases(&self, bucket_id: &str) -> Vec<String> {
        self.state()
            .buckets
            .iter()
            .find(|bucket| bucket.id == bucket_id)
            .map(|bucket| bucket.global_aliases.clone())
            .unwrap_or_default()
    }

    pub fn grants(&self, bucket_id: &str) -> Vec<(String, BucketKeyPerm)> {
        self.state()
            .buckets
            .iter()
            .find(|bucket| bucket.id == bucket_id)
            .map(|bucket| {
                bucket
                    .grants
                    .iter()
                    .map(|grant| (grant.access_key_id.clone(), grant.permissions))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn record(&self, call: Call, operation: &'static str) -> GarageResult<()> {
        let mut state = self.state();
        state.calls.push(call);
        match state.failures.get(operation) {
            Some(status) => Err(GarageError::Api {
                status: *status,
                message: format!("{operation} failed"),
            }),
            None => Ok(()),
        }
    }

    fn not_found(what: &str) -> GarageError {
        GarageError::Api {
            status: 404,
            message: format!("{what} not found"),
        }
    }

    fn key_info(key: &FakeKey, reveal: bool) -> KeyInfo {
        KeyInfo {
            access_key_id: key.id.clone(),
            name: key.name.clone(),
            secret_access_key: reveal.then(|| key.secret.clone()),
            permissions: KeyPerm {
                create_bucket: key.create_bucket,
            },
            expiration: None,
        }
    }

    fn bucket_info(bucket: &FakeBucket) -> BucketInfo {
        BucketInfo {
            id: bucket.id.clone(),
            global_aliases: bucket.global_aliases.clone(),
            website_access: false,
            keys: bucket.grants.clone(),
            quotas: None,
        }
    }

    fn change_grant(&self, change: &PermissionChange, allow: bool) -> GarageResult<()> {
        let mut state = self.state();
        let bucket = state
            .buckets
            .iter_mut()
            .find(|bucket| bucket.id == change.bucket_id)
            .ok_or_else(|| Self::not_found("bucket"))?;

        let position = bucket
            .grants
            .iter()
            .position(|grant| grant.access_key_id == change.access_key_id);
        let index = position.unwrap_or_else(|| {
            bucket.grants.push(BucketKeyGrant {
                access_key_id: change.access_key_id.clone(),
                ..Default::default()
            });
            bucket.grants.len() - 1
        });

        let permissions = &mut bucket.grants[index].permissions;
        let wanted = change.permissions;
        if wanted.owner {
            permissions.owner = allow;
        }
        if wanted.read {
            permissions.read = allow;
        }
        if wanted.write {
            permissions.write = allow;
        }

        bucket.grants.retain(|grant| grant.permissions.any());
        Ok(())
    }
}

#[async_trait]
impl GarageAdmin for FakeGarage {
    async fn cluster_health(&self) -> GarageResult<ClusterHealth> {
        self.record(Call::ClusterHealth, "GetClusterHealth")?;
        Ok(self.state().health.clone())
    }

    async fn list_keys(&self) -> GarageResult<Vec<KeyListItem>> {
        self.record(Call::ListKeys, "ListKeys")?;
        Ok(self
            .state()
            .keys
            .iter()
            .map(|key| KeyListItem {
                id: key.id.clone(),
                name: key.name.clone(),
            })
            .collect())
    }

    async fn create_key(&self, request: &UpdateKeyRequest) -> GarageResult<KeyInfo> {
        self.record(Call::CreateKey(request.clone()), "CreateKey")?;
        let mut state = self.state();
        state.next_id += 1;
        let key = FakeKey {
            id: format!("GK{}", state.next_id),
            name: request.name.clone().unwrap_or_default(),
            secret: format!("secret-{}", state.next_id),
            create_bucket: request.allow.is_some_and(|allow| allow.create_bucket),
        };
        state.keys.push(key.clone());
        Ok(Self::key_info(&key, true))
    }

    async fn update_key(&self, id: &str, request: &UpdateKeyRequest) -> GarageResult<KeyInfo> {
        self.record(Call::UpdateKey(id.into(), request.clone()), "UpdateKey")?;
        let mut state = self.state();
        let key = state
            .keys
            .iter_mut()
            .find(|key| key.id == id)
            .ok_or_else(|| Self::not_found("key"))?;
        key.create_bucket = request.allow.is_some_and(|allow| allow.create_bucket);
        Ok(Self::key_info(key, false))
    }

    async fn key_info_with_secret(&self, id: &str) -> GarageResult<KeyInfo> {
        self.record(Call::KeyInfoWithSecret(id.into()), "GetKeyInfo")?;
        let state = self.state();
        let key = state
            .keys
            .iter()
            .find(|key| key.id == id)
            .ok_or_else(|| Self::not_found("key"))?;
        Ok(Self::key_info(key, true))
    }

    async fn delete_key(&self, id: &str) -> GarageResult<()> {
        self.record(Call::DeleteKey(id.into()), "DeleteKey")?;
        let mut state = self.state();
        let before = state.keys.len();
        state.keys.retain(|key| key.id != id);
        if state.keys.len() == before {
            return Err(Self::not_found("key"));
        }
        Ok(())
    }

    async fn list_buckets(&self) -> GarageResult<Vec<BucketListItem>> {
        self.record(Call::ListBuckets, "ListBuckets")?;
        Ok(self
            .state()
            .buckets
            .iter()
            .map(|bucket| BucketListItem {
                id: bucket.id.clone(),
                global_aliases: bucket.global_aliases.clone(),
                local_aliases: bucket.local_aliases.clone(),
            })
            .collect())
    }

    async fn bucket_info(&self, id: &str) -> GarageResult<BucketInfo> {
        self.record(Call::BucketInfo(id.into()), "GetBucketInfo")?;
        let state = self.state();
        state
            .buckets
            .iter()
            .find(|bucket| bucket.id == id)
            .map(Self::bucket_info)
            .ok_or_else(|| Self::not_found("bucket"))
    }

    async fn create_bucket(&self, global_alias: &str) -> GarageResult<BucketInfo> {
        self.record(Call::CreateBucket(global_alias.into()), "CreateBucket")?;
        let mut state = self.state();
        state.next_id += 1;
        let bucket = FakeBucket {
            id: format!("bucket-{}", state.next_id),
            global_aliases: if state.bare_create {
                vec![]
            } else {
                vec![global_alias.to_owned()]
            },
            ..Default::default()
        };
        state.buckets.push(bucket.clone());
        Ok(Self::bucket_info(&bucket))
    }

    async fn update_bucket(&self, id: &str, request: &UpdateBucketRequest) -> GarageResult<()> {
        self.record(Call::UpdateBucket(id.into(), request.clone()), "UpdateBucket")
    }

    async fn delete_bucket(&self, id: &str) -> GarageResult<()> {
        self.record(Call::DeleteBucket(id.into()), "DeleteBucket")?;
        let mut state = self.state();
        let before = state.buckets.len();
        state.buckets.retain(|bucket| bucket.id != id);
        if state.buckets.len() == before {
            return Err(Self::not_found("bucket"));
        }
        Ok(())
    }

    async fn add_bucket_alias(&self, bucket_id: &str, alias: &str) -> GarageResult<()> {
        self.record(Call::AddAlias(alias.into()), "AddBucketAlias")?;
        let mut state = self.state();
        let bucket = state
            .buckets
            .iter_mut()
            .find(|bucket| bucket.id == bucket_id)
            .ok_or_else(|| Self::not_found("bucket"))?;
        if !bucket.global_aliases.iter().any(|existing| existing == alias) {
            bucket.global_aliases.push(alias.to_owned());
        }
        Ok(())
    }

    async fn remove_bucket_alias(&self, bucket_id: &str, alias: &str) -> GarageResult<()> {
        self.record(Call::RemoveAlias(alias.into()), "RemoveBucketAlias")?;
        let mut state = self.state();
        let bucket = state
            .buckets
            .iter_mut()
            .find(|bucket| bucket.id == bucket_id)
            .ok_or_else(|| Self::not_found("bucket"))?;
        bucket.global_aliases.retain(|existing| existing != alias);
        Ok(())
    }

    async fn allow_bucket_key(&self, change: &PermissionChange) -> GarageResult<()> {
        self.record(Call::Allow(change.access_key_id.clone(), change.permissions), "AllowBucketKey")?;
        self.change_grant(change, true)
    }

    async fn deny_bucket_key(&self, change: &PermissionChange) -> GarageResult<()> {
        self.record(Call::Deny(change.access_key_id.clone(), change.permissions), "DenyBucketKey")?;
        self.change_grant(change, false)
    }
}

/// Hands out the shared [FakeGarage] for every instance.
pub struct FakeConnector {
    garage: Arc<FakeGarage>,
    failing: Mutex<bool>,
}

impl FakeConnector {
    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

#[async_trait]
impl GarageConnector for FakeConnector {
    async fn connect(&self, instance: &GarageS3Instance) -> Result<Arc<dyn GarageAdmin>> {
        if *self.failing.lock().unwrap() {
            return Err(Error::AdminToken(
                instance.metadata.name.clone().unwrap_or_default(),
                "secret 'garage-admin' not found".into(),
            ));
        }
        Ok(Arc::clone(&self.garage) as Arc<dyn GarageAdmin>)
    }
}

#[derive(Default)]
struct StoreState {
    instances: Vec<GarageS3Instance>,
    access_keys: Vec<GarageS3AccessKey>,
    buckets: Vec<GarageS3Bucket>,
    secrets: BTreeMap<(String, String), Secret>,
    secret_writes: Vec<String>,
    failing_secret_writes: bool,
}

/// In-memory [ResourceStore].
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn add_instance(&self, instance: GarageS3Instance) {
        self.state().instances.push(instance);
    }

    pub fn add_access_key(&self, access_key: GarageS3AccessKey) {
        self.state().access_keys.push(access_key);
    }

    pub fn add_bucket(&self, bucket: GarageS3Bucket) {
        self.state().buckets.push(bucket);
    }

    pub fn add_secret(&self, secret: Secret) {
        let key = (
            secret.metadata.namespace.clone().unwrap_or_default(),
            secret.metadata.name.clone().unwrap_or_default(),
        );
        self.state().secrets.insert(key, secret);
    }

    pub fn stored_secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state()
            .secrets
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Writes as `create <ns>/<name>` or `replace <ns>/<name>`.
    pub fn secret_writes(&self) -> Vec<String> {
        self.state().secret_writes.clone()
    }

    pub fn fail_secret_writes(&self) {
        self.state().failing_secret_writes = true;
    }

    fn write_secret(&self, verb: &str, secret: &Secret) -> Result<()> {
        let mut state = self.state();
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();
        if state.failing_secret_writes {
            return Err(Error::UserInput(format!("cannot {verb} secret {namespace}/{name}")));
        }
        state.secret_writes.push(format!("{verb} {namespace}/{name}"));
        state.secrets.insert((namespace, name), secret.clone());
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for FakeStore {
    async fn instance(&self, key: &InstanceKey) -> Result<Option<GarageS3Instance>> {
        Ok(self
            .state()
            .instances
            .iter()
            .find(|instance| {
                instance.metadata.name.as_deref() == Some(key.name.as_str())
                    && instance.metadata.namespace.as_deref() == Some(key.namespace.as_str())
            })
            .cloned())
    }

    async fn access_key(&self, namespace: &str, name: &str) -> Result<Option<GarageS3AccessKey>> {
        Ok(self
            .state()
            .access_keys
            .iter()
            .find(|key| key.metadata.name.as_deref() == Some(name) && key.metadata.namespace.as_deref() == Some(namespace))
            .cloned())
    }

    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.stored_secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        self.write_secret("create", secret)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<()> {
        self.write_secret("replace", secret)
    }

    async fn list_access_keys(&self) -> Result<Vec<GarageS3AccessKey>> {
        Ok(self.state().access_keys.clone())
    }

    async fn list_buckets(&self) -> Result<Vec<GarageS3Bucket>> {
        Ok(self.state().buckets.clone())
    }
}

/// Repository recording finalizer changes and status writes instead of patching.
pub struct FakeRepo<R>
where
    R: Resource<Scope = NamespaceResourceScope>,
{
    api_provider: StaticApiProvider<R>,
    finalizer_calls: Mutex<Vec<String>>,
    statuses: Mutex<Vec<Value>>,
    _resource: PhantomData<fn() -> R>,
}

impl<R> FakeRepo<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + Debug,
    R::DynamicType: Default,
{
    pub fn new() -> Self {
        let (mock_service, _handle) = mock::pair::<http::Request<Body>, http::Response<Body>>();
        let client = Client::new(mock_service, "default");
        Self {
            api_provider: StaticApiProvider::new(client, vec![], CachingStrategy::Adhoc),
            finalizer_calls: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            _resource: PhantomData,
        }
    }

    /// Finalizer changes as `add <finalizer>` or `remove <finalizer>`.
    pub fn finalizer_calls(&self) -> Vec<String> {
        self.finalizer_calls.lock().unwrap().clone()
    }

    /// Last status written, deserialized as `S`.
    pub fn last_status<S: DeserializeOwned>(&self) -> Option<S> {
        self.statuses
            .lock()
            .unwrap()
            .last()
            .map(|status| serde_json::from_value(status.clone()).unwrap())
    }

    pub fn status_writes(&self) -> usize {
        self.statuses.lock().unwrap().len()
    }
}

#[async_trait]
impl<R> Finalize<R, Provider<R>> for FakeRepo<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    R::DynamicType: Default,
{
    fn api_provider(&self) -> &Provider<R> {
        &self.api_provider
    }

    async fn ensure_finalizer(&self, object: &R, finalizer: &str) -> Result<()> {
        let present = object
            .meta()
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer));
        if !present {
            self.finalizer_calls.lock().unwrap().push(format!("add {finalizer}"));
        }
        Ok(())
    }

    async fn remove_finalizer(&self, _object: &R, finalizer: &str) -> Result<()> {
        self.finalizer_calls.lock().unwrap().push(format!("remove {finalizer}"));
        Ok(())
    }

    async fn update_status<S>(&self, object: &R, mut status: S) -> Result<()>
    where
        S: Serialize + ObserveGeneration + Debug + Send + Sync,
    {
        status.with_observed_gen(object.meta());
        self.statuses
            .lock()
            .unwrap()
            .push(serde_json::to_value(&status).unwrap());
        Ok(())
    }
}

/// The fakes wired together.
pub struct Harness {
    pub garage: Arc<FakeGarage>,
    pub connector: Arc<FakeConnector>,
    pub store: Arc<FakeStore>,
    pub events: Arc<MockEventRecorder<Reason>>,
}

impl Harness {
    pub fn new() -> Self {
        let garage = Arc::new(FakeGarage::new());
        Self {
            connector: Arc::new(FakeConnector {
                garage: Arc::clone(&garage),
                failing: Mutex::new(false),
            }),
            garage,
            store: Arc::new(FakeStore::default()),
            events: Arc::new(MockEventRecorder::new()),
        }
    }

    /// A harness that already knows the instance `default/garage`.
    pub fn with_instance() -> Self {
        let harness = Self::new();
        harness.store.add_instance(instance("garage", "default"));
        harness
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: Arc::clone(&self.store) as Arc<dyn ResourceStore>,
            garage: Arc::clone(&self.connector) as Arc<dyn GarageConnector>,
            events: Arc::clone(&self.events) as _,
        }
    }

    pub fn event_reasons(&self) -> Vec<Reason> {
        self.events.events().into_iter().map(|(_, reason, _)| reason).collect()
    }
}

fn stamp<R: Resource>(object: &mut R, namespace: &str) {
    let meta = object.meta_mut();
    meta.namespace = Some(namespace.into());
    meta.uid = Some(format!("uid-{}", meta.name.clone().unwrap_or_default()));
    meta.generation = Some(1);
}

pub fn instance(name: &str, namespace: &str) -> GarageS3Instance {
    let mut instance = GarageS3Instance::new(
        name,
        GarageS3InstanceSpec {
            url: "garage.storage".into(),
            port: 3903,
            admin_token_secret: "garage-admin".into(),
        },
    );
    stamp(&mut instance, namespace);
    instance
}

pub fn instance_ref(name: &str) -> InstanceRef {
    InstanceRef {
        name: name.into(),
        namespace: None,
    }
}

pub fn access_key(name: &str, namespace: &str, instance: &str) -> GarageS3AccessKey {
    let mut key = GarageS3AccessKey::new(
        name,
        GarageS3AccessKeySpec {
            instance_ref: instance_ref(instance),
            can_create_bucket: false,
            expiration: None,
            never_expires: false,
        },
    );
    stamp(&mut key, namespace);
    key
}

/// An access key whose credentials Secret already carries `access_key_id`.
pub fn materialized_access_key(store: &FakeStore, name: &str, access_key_id: &str) {
    let secret_name = format!("{name}-gs3ak");
    let mut key = access_key(name, "default", "garage");
    key.status = Some(GarageS3AccessKeyStatus {
        secret: Some(secret_name.clone()),
        access_key_id: Some(access_key_id.into()),
        ..Default::default()
    });
    store.add_access_key(key);
    store.add_secret(Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(secret_name),
            namespace: Some("default".into()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "AWS_ACCESS_KEY_ID".to_owned(),
            ByteString(access_key_id.as_bytes().to_vec()),
        )])),
        ..Default::default()
    });
}

pub fn bucket(name: &str, namespace: &str, instance: &str) -> GarageS3Bucket {
    let mut bucket = GarageS3Bucket::new(
        name,
        GarageS3BucketSpec {
            instance_ref: instance_ref(instance),
            website_access: None,
            quota: None,
            additional_aliases: vec![],
            permissions: vec![],
        },
    );
    stamp(&mut bucket, namespace);
    bucket
}

/// Marks `object` as being deleted while `finalizer` holds it.
pub fn deleting<R: Resource>(mut object: R, finalizer: &str) -> R {
    let meta = object.meta_mut();
    meta.deletion_timestamp = Some(Time(Utc::now()));
    meta.finalizers = Some(vec![finalizer.to_owned()]);
    object
}
