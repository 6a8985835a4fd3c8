use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Which side of a trip a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Driver,
    Rider,
}

pub type ConnectionId = Uuid;

struct Handle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

/// In-memory registry of live realtime connections, keyed by role and
/// user ID. Registration is additive (multi-device); delivery is
/// best-effort fan-out — a user with no connections simply misses the
/// push and re-fetches the authoritative trip state later.
pub struct ConnectionHub {
    connections: RwLock<HashMap<(Role, String), Vec<Handle>>>,
    write_timeout: Duration,
}

impl ConnectionHub {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            write_timeout,
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<(Role, String), Vec<Handle>>> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, role: Role, user_id: &str, tx: mpsc::Sender<String>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.write()
            .entry((role, user_id.to_string()))
            .or_default()
            .push(Handle { id, tx });
        id
    }

    /// Removes exactly the given handle; other connections of the same
    /// user stay registered.
    pub fn unregister(&self, role: Role, user_id: &str, id: ConnectionId) {
        let mut connections = self.write();
        let key = (role, user_id.to_string());
        if let Some(handles) = connections.get_mut(&key) {
            handles.retain(|h| h.id != id);
            if handles.is_empty() {
                connections.remove(&key);
            }
        }
    }

    pub fn connection_count(&self, role: Role, user_id: &str) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(role, user_id.to_string()))
            .map_or(0, Vec::len)
    }

    /// Best-effort delivery to every connection of the user. Never blocks
    /// past the write timeout: a connection that cannot take the message
    /// in time is forcibly unregistered (its socket task then closes).
    /// Returns how many connections accepted the message.
    pub async fn push(&self, role: Role, user_id: &str, message: &str) -> usize {
        let handles: Vec<(ConnectionId, mpsc::Sender<String>)> = {
            let connections = self
                .connections
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match connections.get(&(role, user_id.to_string())) {
                Some(handles) => handles.iter().map(|h| (h.id, h.tx.clone())).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in handles {
            match tokio::time::timeout(self.write_timeout, tx.send(message.to_string())).await {
                Ok(Ok(())) => delivered += 1,
                _ => dead.push(id),
            }
        }

        for id in dead {
            warn!(?role, user_id, connection = %id, "connection too slow, evicting");
            self.unregister(role, user_id, id);
        }
        delivered
    }
}
