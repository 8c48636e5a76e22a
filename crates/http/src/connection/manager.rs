use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionHandle, ConnectionId};
use crate::settings::Settings;

/// Process wide registry of live connections.
///
/// Every connection is registered under a generated id on creation. Removing an id
/// stops the connection, which cancels its pending I/O so that the task serving it
/// unwinds and drops the transport. Removal is the only way a connection ends and it
/// is idempotent.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: Mutex<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a freshly accepted transport and wraps it into a [`Connection`].
    pub fn create<T>(self: &Arc<Self>, io: T, remote_addr: Option<SocketAddr>, settings: Arc<Settings>) -> Connection
    where
        T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ConnectionHandle::new(id, remote_addr));
        self.connections.lock().insert(id, Arc::clone(&handle));
        trace!(connection = id, remote = ?remote_addr, "connection registered");

        Connection::new(io, handle, Arc::clone(self), settings)
    }

    /// Stops and forgets a connection. Returns false if it was not registered anymore.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.connections.lock().remove(&id);
        match removed {
            Some(handle) => {
                handle.stop();
                trace!(connection = id, "connection removed");
                true
            }
            None => false,
        }
    }

    /// Stops every registered connection.
    pub fn clear(&self) {
        let drained: Vec<_> = self.connections.lock().drain().map(|(_, handle)| handle).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "stopping all connections");
        }
        for handle in drained {
            handle.stop();
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(manager: &Arc<ConnectionManager>) -> Connection {
        let (_, server) = tokio::io::duplex(64);
        manager.create(server, None, Arc::new(Settings::default()))
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let manager = ConnectionManager::new();
        let first = register(&manager);
        let second = register(&manager);
        assert_ne!(first.id(), second.id());
        assert_eq!(manager.len(), 2);

        assert!(manager.remove(first.id()));
        assert!(!manager.remove(first.id()));
        assert!(first.handle().is_stopped());
        assert!(!second.handle().is_stopped());
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn clear_stops_everything() {
        let manager = ConnectionManager::new();
        let connections: Vec<_> = (0..3).map(|_| register(&manager)).collect();

        manager.clear();

        assert!(manager.is_empty());
        assert!(connections.iter().all(|c| c.handle().is_stopped()));
        assert!(connections.iter().all(|c| !c.handle().observer().is_alive()));
    }
}
