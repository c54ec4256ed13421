//! Runs the controllers of all kinds side by side until shutdown.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use futures::future::Shared;
use futures::FutureExt;

/// Shutdown trigger shared by all controllers.
pub type Shutdown = Shared<BoxFuture<'static, ()>>;

/// Resolves on SIGINT or, on unix, SIGTERM.
pub fn shutdown_signal() -> Shutdown {
    async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::signal;
            use tokio::signal::unix::SignalKind;

            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = interrupt() => {}
                        _ = terminate.recv() => {}
                    }
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Cannot listen for SIGTERM, only SIGINT stops the operator");
                    interrupt().await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            interrupt().await;
        }

        tracing::info!("Shutdown signal received");
    }
    .boxed()
    .shared()
}

/// Waits for SIGINT. Never resolves when the handler cannot be installed.
async fn interrupt() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "Cannot listen for SIGINT");
        futures::future::pending::<()>().await;
    }
}

/// The running controllers, keyed by the kind they reconcile.
#[derive(Default)]
pub struct Operator {
    controllers: BTreeMap<String, BoxFuture<'static, ()>>,
}

impl Operator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the controller loop of `kind`. A later registration of the same kind replaces
    /// the earlier one.
    pub fn register(mut self, kind: impl Into<String>, controller: BoxFuture<'static, ()>) -> Self {
        let kind = kind.into();
        if self.controllers.insert(kind.clone(), controller).is_some() {
            tracing::warn!(kind = %kind, "Controller registered twice");
        }
        self
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.controllers.keys().map(String::as_str).collect()
    }

    /// Drives every controller until all of them have stopped.
    pub async fn run(self) {
        tracing::info!(kinds = ?self.kinds(), "Starting controllers");

        futures::future::join_all(self.controllers.into_iter().map(|(kind, controller)| async move {
            controller.await;
            tracing::info!(kind = %kind, "Controller stopped");
        }))
        .await;
    }
}
