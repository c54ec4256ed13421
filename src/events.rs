//! Kubernetes event emission.
//!
//! Events show up in `kubectl describe` next to the Ready condition and give a short
//! history of what the operator did to the remote side.
//!
//! Emitting is best effort: [EmitEvent::emit] logs a failure as a warning and moves on,
//! so an unreachable events API never fails a reconciliation. Use [EmitEvent::try_emit]
//! where the error matters.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::Event;
use kube::runtime::events::EventType;
use kube::runtime::events::Recorder;
use kube::runtime::events::Reporter;
use kube::Client;

use crate::error::Result;

/// Machine readable reason attached to an event.
pub trait Reason: AsRef<str> + Debug + Clone + Send + Sync + 'static {}

/// Payload of a single event.
#[derive(Debug, Clone)]
pub struct EventData<Rs: Reason> {
    pub event_type: EventType,
    pub reason: Rs,
    pub note: String,
    pub action: &'static str,
}

impl<Rs: Reason> EventData<Rs> {
    pub fn normal(reason: Rs, note: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Normal,
            reason,
            note: note.into(),
            action: "Reconcile",
        }
    }

    pub fn warning(reason: Rs, note: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Warning,
            reason,
            note: note.into(),
            action: "Reconcile",
        }
    }

    /// Overrides the action, which defaults to `Reconcile`.
    pub fn with_action(mut self, action: &'static str) -> Self {
        self.action = action;
        self
    }
}

#[async_trait]
pub trait EmitEvent<Rs: Reason>: Send + Sync {
    /// Publishes an event and reports failures to the caller.
    async fn try_emit(&self, reference: &ObjectReference, data: EventData<Rs>) -> Result<()>;

    /// Publishes an event, logging instead of returning failures.
    async fn emit(&self, reference: &ObjectReference, data: EventData<Rs>) {
        let reason = data.reason.clone();
        if let Err(error) = self.try_emit(reference, data).await {
            tracing::warn!(
                object = ?reference.name,
                namespace = ?reference.namespace,
                reason = reason.as_ref(),
                error = %error,
                "Failed to publish event"
            );
        }
    }
}

/// [EmitEvent] implementation backed by the kube runtime [Recorder].
pub struct EventRecorder {
    recorder: Recorder,
}

impl EventRecorder {
    /// `component` shows up as the reporting controller of every event.
    pub fn new(client: Client, component: &str) -> Self {
        let reporter = Reporter {
            controller: component.to_owned(),
            instance: std::env::var("POD_NAME").ok(),
        };

        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl<Rs: Reason> EmitEvent<Rs> for EventRecorder {
    async fn try_emit(&self, reference: &ObjectReference, data: EventData<Rs>) -> Result<()> {
        let event = Event {
            type_: data.event_type,
            reason: data.reason.as_ref().to_owned(),
            note: Some(data.note),
            action: data.action.to_owned(),
            secondary: None,
        };
        self.recorder.publish(&event, reference).await?;
        Ok(())
    }
}
