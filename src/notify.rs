//! Fire-and-forget notification of committed transitions.
use chrono::{DateTime, Utc};
use tracing::info;

use super::request::{RequestStatus, RequestType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    pub request_id: String,
    pub request_type: RequestType,
    pub initiator: String,
    pub actor: String,
    pub level: u32,
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub reset: bool,
    pub at: DateTime<Utc>,
}

/// Delivery side channel. Called only after the transition has committed;
/// a failure is logged and never undoes the transition.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &TransitionEvent) -> anyhow::Result<()>;
}

/// Default notifier, writes each event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &TransitionEvent) -> anyhow::Result<()> {
        info!(
            request_id = %event.request_id,
            request_type = %event.request_type,
            initiator = %event.initiator,
            actor = %event.actor,
            level = event.level,
            from = %event.from,
            to = %event.to,
            reset = event.reset,
            "approval request transitioned"
        );
        Ok(())
    }
}
