//! Command line and environment configuration.

use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

/// Kubernetes operator for Garage S3 instances, access keys and buckets
#[derive(Parser, Debug)]
#[command(name = "garage-s3-operator", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the controllers (default)
    Run,
    /// Print the CustomResourceDefinitions as YAML and exit
    Crds,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(clap::Args, Debug, Clone)]
pub struct Config {
    /// Namespace to watch. All namespaces when unset.
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Concurrent reconciles per kind, 0 for no limit
    #[arg(long, env = "MAX_CONCURRENT_RECONCILES", default_value_t = 4)]
    pub concurrency: usize,

    /// Timeout of a single admin API request
    #[arg(long, env = "GARAGE_REQUEST_TIMEOUT_SECONDS", default_value_t = 10)]
    pub request_timeout_seconds: u64,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Install or upgrade the CRDs before starting the controllers
    #[arg(long, env = "INSTALL_CRDS")]
    pub install_crds: bool,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Limit handed to the controllers. `None` means unbounded.
    pub fn concurrency_limit(&self) -> Option<usize> {
        (self.concurrency > 0).then_some(self.concurrency)
    }

    pub fn watched_namespaces(&self) -> Vec<&str> {
        self.namespace
            .as_deref()
            .filter(|namespace| !namespace.is_empty())
            .into_iter()
            .collect()
    }
}
