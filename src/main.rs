//! garage-s3-operator - converges Garage S3 instances, access keys and buckets

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::Api;
use kube::Client;
use kube::Resource;
use serde::de::DeserializeOwned;

use garage_s3_operator::cache::CachingStrategy;
use garage_s3_operator::cache::StaticApiProvider;
use garage_s3_operator::config::Cli;
use garage_s3_operator::config::Command;
use garage_s3_operator::config::Config;
use garage_s3_operator::controller::access_key::AccessKeyContext;
use garage_s3_operator::controller::access_key::AccessKeyReconciler;
use garage_s3_operator::controller::bucket::BucketContext;
use garage_s3_operator::controller::bucket::BucketReconciler;
use garage_s3_operator::controller::instance::InstanceContext;
use garage_s3_operator::controller::instance::InstanceReconciler;
use garage_s3_operator::controller::Collaborators;
use garage_s3_operator::crd;
use garage_s3_operator::crd::GarageS3AccessKey;
use garage_s3_operator::crd::GarageS3Bucket;
use garage_s3_operator::crd::GarageS3Instance;
use garage_s3_operator::events::EventRecorder;
use garage_s3_operator::garage::client::HttpConnector;
use garage_s3_operator::k8s::K8sRepository;
use garage_s3_operator::k8s::KubeStore;
use garage_s3_operator::operator::shutdown_signal;
use garage_s3_operator::operator::Operator;
use garage_s3_operator::telemetry;
use garage_s3_operator::Reconcile;

const COMPONENT: &str = "garage-s3-operator";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.command() == Command::Crds {
        print!("{}", crd::to_yaml(&crd::registry())?);
        return Ok(());
    }

    telemetry::init_tracing(cli.config.log_format)?;
    run(cli.config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    if config.install_crds {
        crd::install(&client, &crd::registry())
            .await
            .context("Failed to install CRDs")?;
        tracing::info!("CRDs installed");
    }

    let namespaces = config.watched_namespaces();
    let strategy = if namespaces.is_empty() {
        CachingStrategy::Adhoc
    } else {
        CachingStrategy::Strict
    };
    tracing::info!(
        namespaces = ?namespaces,
        concurrency = ?config.concurrency_limit(),
        "Starting garage-s3-operator"
    );

    let secrets: StaticApiProvider<Secret> = StaticApiProvider::new(client.clone(), vec![], CachingStrategy::Adhoc);
    let collaborators = Collaborators {
        store: Arc::new(KubeStore::new(client.clone())),
        garage: Arc::new(HttpConnector::new(secrets, config.request_timeout())?),
        events: Arc::new(EventRecorder::new(client.clone(), COMPONENT)),
    };

    let instances = InstanceReconciler::new(
        watched_api(&client, &config),
        InstanceContext::new(
            repository::<GarageS3Instance>(&client, &namespaces, strategy),
            collaborators.clone(),
        ),
    );
    let access_keys = AccessKeyReconciler::new(
        watched_api(&client, &config),
        AccessKeyContext::new(
            repository::<GarageS3AccessKey>(&client, &namespaces, strategy),
            collaborators.clone(),
        ),
    );
    let buckets = BucketReconciler::new(
        watched_api(&client, &config),
        BucketContext::new(
            repository::<GarageS3Bucket>(&client, &namespaces, strategy),
            collaborators,
        ),
    );

    let shutdown = shutdown_signal();
    let limit = config.concurrency_limit();

    Operator::new()
        .register(
            GarageS3Instance::kind(&()),
            instances.start_concurrent(limit, Some(shutdown.clone())),
        )
        .register(
            GarageS3AccessKey::kind(&()),
            access_keys.start_concurrent(limit, Some(shutdown.clone())),
        )
        .register(
            GarageS3Bucket::kind(&()),
            buckets.start_concurrent(limit, Some(shutdown)),
        )
        .run()
        .await;

    tracing::info!("garage-s3-operator stopped");
    Ok(())
}

fn repository<R>(
    client: &Client,
    namespaces: &[&str],
    strategy: CachingStrategy,
) -> Arc<K8sRepository<R, StaticApiProvider<R>>>
where
    R: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + Debug,
{
    Arc::new(K8sRepository::new(StaticApiProvider::new(
        client.clone(),
        namespaces.to_vec(),
        strategy,
    )))
}

fn watched_api<R>(client: &Client, config: &Config) -> Api<R>
where
    R: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    match config.namespace.as_deref().filter(|namespace| !namespace.is_empty()) {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}
