//! HTTP implementation of the admin API on top of `reqwest`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use reqwest::Method;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::*;
use crate::cache::ProvideApi;
use crate::error::Error;
use crate::TryResource;

/// Key of the admin token inside the instance's token Secret.
pub const ADMIN_TOKEN_KEY: &str = "token";

/// Admin API client bound to one endpoint and token.
#[derive(Clone)]
pub struct AdminClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl AdminClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, operation: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/v2/{operation}", self.endpoint))
            .bearer_auth(&self.token)
    }

    async fn send(request: RequestBuilder) -> GarageResult<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(GarageError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get<T: DeserializeOwned>(&self, operation: &str, query: &[(&str, &str)]) -> GarageResult<T> {
        let response = Self::send(self.request(Method::GET, operation).query(query)).await?;
        Ok(response.json().await?)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> GarageResult<T> {
        let response = Self::send(self.request(Method::POST, operation).query(query).json(body)).await?;
        Ok(response.json().await?)
    }

    /// POST whose response body is irrelevant.
    async fn call<B: Serialize + ?Sized>(&self, operation: &str, query: &[(&str, &str)], body: Option<&B>) -> GarageResult<()> {
        let mut request = self.request(Method::POST, operation).query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl GarageAdmin for AdminClient {
    async fn cluster_health(&self) -> GarageResult<ClusterHealth> {
        self.get("GetClusterHealth", &[]).await
    }

    async fn list_keys(&self) -> GarageResult<Vec<KeyListItem>> {
        self.get("ListKeys", &[]).await
    }

    async fn create_key(&self, request: &UpdateKeyRequest) -> GarageResult<KeyInfo> {
        self.post("CreateKey", &[], request).await
    }

    async fn update_key(&self, id: &str, request: &UpdateKeyRequest) -> GarageResult<KeyInfo> {
        self.post("UpdateKey", &[("id", id)], request).await
    }

    async fn key_info_with_secret(&self, id: &str) -> GarageResult<KeyInfo> {
        self.get("GetKeyInfo", &[("id", id), ("showSecretKey", "true")]).await
    }

    async fn delete_key(&self, id: &str) -> GarageResult<()> {
        self.call::<()>("DeleteKey", &[("id", id)], None).await
    }

    async fn list_buckets(&self) -> GarageResult<Vec<BucketListItem>> {
        self.get("ListBuckets", &[]).await
    }

    async fn bucket_info(&self, id: &str) -> GarageResult<BucketInfo> {
        self.get("GetBucketInfo", &[("id", id)]).await
    }

    async fn create_bucket(&self, global_alias: &str) -> GarageResult<BucketInfo> {
        let request = CreateBucketRequest {
            global_alias: Some(global_alias.to_owned()),
            local_alias: None,
        };
        self.post("CreateBucket", &[], &request).await
    }

    async fn update_bucket(&self, id: &str, request: &UpdateBucketRequest) -> GarageResult<()> {
        self.call("UpdateBucket", &[("id", id)], Some(request)).await
    }

    async fn delete_bucket(&self, id: &str) -> GarageResult<()> {
        self.call::<()>("DeleteBucket", &[("id", id)], None).await
    }

    async fn add_bucket_alias(&self, bucket_id: &str, alias: &str) -> GarageResult<()> {
        let request = BucketAliasRequest {
            bucket_id: bucket_id.to_owned(),
            global_alias: alias.to_owned(),
        };
        self.call("AddBucketAlias", &[], Some(&request)).await
    }

    async fn remove_bucket_alias(&self, bucket_id: &str, alias: &str) -> GarageResult<()> {
        let request = BucketAliasRequest {
            bucket_id: bucket_id.to_owned(),
            global_alias: alias.to_owned(),
        };
        self.call("RemoveBucketAlias", &[], Some(&request)).await
    }

    async fn allow_bucket_key(&self, change: &PermissionChange) -> GarageResult<()> {
        self.call("AllowBucketKey", &[], Some(change)).await
    }

    async fn deny_bucket_key(&self, change: &PermissionChange) -> GarageResult<()> {
        self.call("DenyBucketKey", &[], Some(change)).await
    }
}

/// Connects to instances over HTTP, reading the admin token from the cluster.
pub struct HttpConnector<P> {
    http: reqwest::Client,
    secrets: P,
}

impl<P> HttpConnector<P>
where
    P: ProvideApi<Secret>,
{
    pub fn new(secrets: P, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(GarageError::from)?;

        Ok(Self { http, secrets })
    }

    async fn admin_token(&self, instance: &GarageS3Instance) -> Result<String> {
        let identity = format!("{}/{}", instance.try_namespace()?, instance.try_name()?);
        let api = self.secrets.get(&instance.try_namespace()?)?;

        let secret = api
            .get_opt(&instance.spec.admin_token_secret)
            .await?
            .ok_or_else(|| {
                Error::AdminToken(identity.clone(), format!("secret '{}' not found", instance.spec.admin_token_secret))
            })?;

        let token = secret
            .data
            .as_ref()
            .and_then(|data| data.get(ADMIN_TOKEN_KEY))
            .map(|token| String::from_utf8_lossy(&token.0).trim().to_owned())
            .filter(|token| !token.is_empty())
            .or_else(|| {
                secret
                    .string_data
                    .as_ref()
                    .and_then(|data| data.get(ADMIN_TOKEN_KEY))
                    .cloned()
            })
            .ok_or_else(|| {
                Error::AdminToken(
                    identity,
                    format!("key '{ADMIN_TOKEN_KEY}' missing in secret '{}'", secret.name_any()),
                )
            })?;

        Ok(token)
    }
}

#[async_trait]
impl<P> GarageConnector for HttpConnector<P>
where
    P: ProvideApi<Secret>,
{
    async fn connect(&self, instance: &GarageS3Instance) -> Result<Arc<dyn GarageAdmin>> {
        let token = self.admin_token(instance).await?;
        let endpoint = instance.spec.admin_endpoint()?;
        tracing::debug!(endpoint = %endpoint, "Connecting to Garage admin API");

        Ok(Arc::new(AdminClient::new(self.http.clone(), endpoint, token)))
    }
}
