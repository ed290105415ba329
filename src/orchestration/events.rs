//! Event fan-out to connected listeners.
//!
//! The hub holds only weak references: a listener disappears from the set as
//! soon as its owner drops it, and a listener whose delivery fails is evicted
//! on the spot. Publishing never blocks.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use super::command::CommandOutcome;
use super::director::DirectorSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    ConnectionEstablished {
        client_id: String,
        timestamp: DateTime<Utc>,
    },
    StatusUpdate {
        agent_count: usize,
        swarm_count: usize,
        director: DirectorSummary,
        timestamp: DateTime<Utc>,
    },
    BotEvent {
        agent_id: String,
        event: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        data: Value,
        timestamp: DateTime<Utc>,
    },
    CommandResult {
        command_id: String,
        result: CommandOutcome,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl BroadcastEvent {
    pub fn bot_event(agent_id: &str, event: &str, data: Value) -> Self {
        Self::BotEvent {
            agent_id: agent_id.to_string(),
            event: event.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn command_result(outcome: CommandOutcome) -> Self {
        Self::CommandResult {
            command_id: outcome.command_id.clone(),
            result: outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::StatusUpdate { .. } => "status_update",
            Self::BotEvent { .. } => "bot_event",
            Self::CommandResult { .. } => "command_result",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("listener buffer is full")]
    Full,
    #[error("listener is closed")]
    Closed,
}

/// Receiver of broadcast events. Must not block.
pub trait EventListener: Send + Sync {
    fn deliver(&self, event: &BroadcastEvent) -> Result<(), DeliveryError>;
}

/// Listener backed by a bounded channel.
pub struct ChannelListener {
    tx: mpsc::Sender<BroadcastEvent>,
}

impl ChannelListener {
    pub fn new(buffer: usize) -> (Arc<Self>, mpsc::Receiver<BroadcastEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Arc::new(Self { tx }), rx)
    }
}

impl EventListener for ChannelListener {
    fn deliver(&self, event: &BroadcastEvent) -> Result<(), DeliveryError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HubStats {
    pub listeners: usize,
    pub published: u64,
    pub evicted: u64,
}

#[derive(Default)]
pub struct EventHub {
    listeners: Mutex<Vec<Weak<dyn EventListener>>>,
    published: AtomicU64,
    evicted: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: &Arc<dyn EventListener>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|w| same_listener(w, listener)) {
            listeners.push(Arc::downgrade(listener));
        }
    }

    pub fn unsubscribe(&self, listener: &Arc<dyn EventListener>) {
        self.listeners.lock().retain(|w| !same_listener(w, listener));
    }

    /// Deliver to every live listener. Returns how many accepted the event.
    pub fn publish(&self, event: &BroadcastEvent) -> usize {
        // Deliver outside the lock so a listener may touch the hub.
        let live: Vec<Arc<dyn EventListener>> =
            self.listeners.lock().iter().filter_map(Weak::upgrade).collect();
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut failed: Vec<Arc<dyn EventListener>> = Vec::new();
        for listener in live {
            match listener.deliver(event) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(event = event.kind(), error = %e, "Evicting listener");
                    failed.push(listener);
                }
            }
        }

        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|w| {
            w.strong_count() > 0 && !failed.iter().any(|f| same_listener(w, f))
        });
        let removed = before - listeners.len();
        if removed > 0 {
            self.evicted.fetch_add(removed as u64, Ordering::Relaxed);
        }
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            listeners: self.listener_count(),
            published: self.published.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

fn same_listener(weak: &Weak<dyn EventListener>, arc: &Arc<dyn EventListener>) -> bool {
    std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(arc))
}
