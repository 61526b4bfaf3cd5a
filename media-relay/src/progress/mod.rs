//! Per-operation progress notifications.
//!
//! Clients subscribe to an operation id and receive JSON-encoded
//! [`ProgressEvent`]s. Delivery is best-effort: events for ids nobody listens
//! to, or for subscribers whose buffer is full, are dropped. Each id gets at
//! most one terminal event (`complete` or `error`), after which the
//! subscription is removed.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::config::DEFAULT_PROGRESS_CHANNEL_CAPACITY;
use crate::downloader::MediaInfo;

/// Stage of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    FetchingInfo,
    Downloading,
    Processing,
    Streaming,
    Complete,
    Error,
}

impl ProgressStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// A progress notification for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub id: String,
    pub status: ProgressStatus,
    pub message: String,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_info: Option<MediaInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(
        id: impl Into<String>,
        status: ProgressStatus,
        message: impl Into<String>,
        percentage: f64,
    ) -> Self {
        Self {
            id: id.into(),
            status,
            message: message.into(),
            percentage,
            media_info: None,
            error: None,
        }
    }
}

/// Registry of progress subscribers keyed by operation id.
///
/// Holds at most one subscriber per id. Constructed once and shared through
/// `Arc`.
#[derive(Debug)]
pub struct ProgressBroadcaster {
    clients: RwLock<HashMap<String, mpsc::Sender<String>>>,
    capacity: usize,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_CHANNEL_CAPACITY)
    }
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to `id`. An existing subscriber for the same id is replaced
    /// and its channel closed.
    pub fn register_client(&self, id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if self.clients.write().insert(id.to_string(), tx).is_some() {
            debug!(id, "Replaced existing progress subscriber");
        } else {
            debug!(id, "Registered progress subscriber");
        }
        rx
    }

    /// Remove the subscriber for `id`, closing its channel. No-op when absent.
    pub fn unregister_client(&self, id: &str) {
        if self.clients.write().remove(id).is_some() {
            debug!(id, "Unregistered progress subscriber");
        }
    }

    /// Whether `id` currently has a subscriber.
    pub fn is_registered(&self, id: &str) -> bool {
        self.clients.read().contains_key(id)
    }

    /// Deliver a non-terminal event. Dropped when nobody listens or the
    /// subscriber is full.
    pub fn send_event(&self, event: &ProgressEvent) {
        if event.id.is_empty() {
            return;
        }
        let Some(payload) = encode(event) else {
            return;
        };

        let clients = self.clients.read();
        let Some(tx) = clients.get(&event.id) else {
            debug!(id = %event.id, status = ?event.status, "No subscriber for progress event");
            return;
        };
        deliver(tx, &event.id, payload);
    }

    /// Deliver the terminal `error` event for `id` and remove the subscriber.
    pub fn send_error(&self, id: &str, message: impl Into<String>, error: impl Into<String>) {
        let mut event = ProgressEvent::new(id, ProgressStatus::Error, message, 0.0);
        event.error = Some(error.into());
        self.send_terminal(event);
    }

    /// Deliver the terminal `complete` event for `id` and remove the subscriber.
    pub fn send_complete(&self, id: &str, message: impl Into<String>, media_info: Option<MediaInfo>) {
        let mut event = ProgressEvent::new(id, ProgressStatus::Complete, message, 100.0);
        event.media_info = media_info;
        self.send_terminal(event);
    }

    fn send_terminal(&self, event: ProgressEvent) {
        if event.id.is_empty() {
            return;
        }
        let payload = encode(&event);

        // Removal and delivery under one write lock: racing terminal sends
        // deliver at most one event.
        let mut clients = self.clients.write();
        let Some(tx) = clients.remove(&event.id) else {
            debug!(id = %event.id, status = ?event.status, "No subscriber for terminal event");
            return;
        };
        if let Some(payload) = payload {
            deliver(&tx, &event.id, payload);
        }
        drop(clients);
        debug!(id = %event.id, status = ?event.status, "Progress subscription finished");
    }
}

fn encode(event: &ProgressEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(id = %event.id, error = %e, "Failed to serialize progress event");
            None
        }
    }
}

fn deliver(tx: &mpsc::Sender<String>, id: &str, payload: String) {
    match tx.try_send(payload) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(id, "Progress subscriber is full, dropping event");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(id, "Progress subscriber went away, dropping event");
        }
    }
}
