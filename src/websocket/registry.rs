use std::collections::HashMap;
use std::sync::RwLock;

use actix_web::web::Bytes;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// One relayed frame. Payloads are opaque; the relay never inspects,
/// rewrites, or bounds them.
#[derive(Debug, Clone, PartialEq, actix::Message)]
#[rtype(result = "()")]
pub enum RelayPayload {
    Text(String),
    Binary(Bytes),
}

/// The authoritative set of open connections eligible to receive broadcasts.
///
/// Every session registers its outbound channel here on open and is removed
/// on the first read or write failure. The lock is the single synchronization
/// point for membership; `broadcast_all` snapshots the set before sending and
/// tolerates eviction mid-fan-out.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<RelayPayload>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a connection. A no-op if the id is already registered.
    pub fn register(&self, id: Uuid, sender: mpsc::UnboundedSender<RelayPayload>) {
        self.connections
            .write()
            .expect("connection registry lock poisoned")
            .entry(id)
            .or_insert(sender);
        info!("Registered connection {}", id);
    }

    /// Removes a connection if present. Idempotent: a session shutting down
    /// and a failed broadcast write may race to remove the same id.
    pub fn unregister(&self, id: &Uuid) -> bool {
        let removed = self
            .connections
            .write()
            .expect("connection registry lock poisoned")
            .remove(id)
            .is_some();
        if removed {
            info!("Unregistered connection {}", id);
        }
        removed
    }

    /// Delivers `payload` to every registered connection, the sender
    /// included. Best-effort: a connection whose write fails is unregistered
    /// and the fan-out continues; nothing is reported to the caller.
    pub fn broadcast_all(&self, payload: RelayPayload) {
        let targets: Vec<(Uuid, mpsc::UnboundedSender<RelayPayload>)> = self
            .connections
            .read()
            .expect("connection registry lock poisoned")
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();

        let mut failed = Vec::new();
        for (id, sender) in targets {
            if sender.send(payload.clone()).is_err() {
                warn!("Write to connection {} failed, evicting", id);
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut connections = self
                .connections
                .write()
                .expect("connection registry lock poisoned");
            for id in &failed {
                connections.remove(id);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .expect("connection registry lock poisoned")
            .len()
    }
}
