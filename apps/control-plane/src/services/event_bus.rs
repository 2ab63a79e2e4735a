//! Broadcast channel that fans server-side events out to every WebSocket
//! connection subscribed to them. Dispatch never blocks on a slow
//! subscriber — `tokio::sync::broadcast` drops the oldest buffered message
//! for a lagging receiver instead of back-pressuring the sender.

use tokio::sync::broadcast;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 4096;

/// Events pushed to connected WebSocket clients. `DeviceStatusChanged` and
/// `AlertFired` go to any operator watching that org's dashboard;
/// `CommandCompleted` lets a UI waiting on a command result resolve
/// immediately instead of polling; `RemoteSignal` relays WebRTC signaling
/// between a user's and an agent's WS connections for one session;
/// `DeviceFanoutComplete` lets a UI watching a deployment/patch rollout
/// resolve once every targeted device has reached a terminal command state.
#[derive(Debug, Clone)]
pub enum ControlPlaneEvent {
    DeviceStatusChanged {
        org_id: Uuid,
        device_id: Uuid,
        status: String,
    },
    AlertFired {
        org_id: Uuid,
        alert_id: Uuid,
        rule_id: Uuid,
        severity: String,
    },
    CommandCompleted {
        org_id: Uuid,
        command_id: Uuid,
        device_id: Uuid,
        succeeded: bool,
    },
    RemoteSignal {
        session_id: Uuid,
        payload: serde_json::Value,
    },
    DeviceFanoutComplete {
        org_id: Uuid,
        job_id: Uuid,
        succeeded: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ControlPlaneEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlPlaneEvent> {
        self.sender.subscribe()
    }

    #[instrument(skip(self, event))]
    pub fn publish(&self, event: ControlPlaneEvent) {
        match self.sender.send(event) {
            Ok(subscriber_count) => trace!(subscriber_count, "event dispatched"),
            Err(_) => debug!("event dropped, no active subscribers"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
