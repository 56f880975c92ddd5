// src/core/registry.rs

//! The authoritative mapping from connection id to live connection.

use crate::connection::Connection;
use crate::core::EngineError;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Allocates connection ids and tracks every connection that is `Connected`
/// or `Closing`. Connections leave the map in the same step that moves them to
/// `Closed` (see `Connection::complete_close`).
#[derive(Debug)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: DashMap<u64, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            // Id 0 is never handed out so callers can use it as "no connection".
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
        }
    }

    /// Returns a fresh id. Ids increase monotonically and are never reused,
    /// including ids whose connect attempt failed.
    pub fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a connection under its id. Fails if the id is already taken.
    pub fn insert(&self, connection: Arc<Connection>) -> Result<(), EngineError> {
        let id = connection.id();
        match self.connections.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::Internal(format!(
                "connection id {id} is already registered"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(connection);
                Ok(())
            }
        }
    }

    /// Looks up a connection, tolerating its absence.
    pub fn get(&self, id: u64) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Looks up a connection, signalling `NotFound` if it is absent.
    pub fn require(&self, id: u64) -> Result<Arc<Connection>, EngineError> {
        self.get(id).ok_or(EngineError::NotFound(id))
    }

    /// Unregisters `id`, returning the connection if it was present.
    pub fn remove(&self, id: u64) -> Option<Arc<Connection>> {
        self.connections.remove(&id).map(|(_, conn)| conn)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: u64) -> bool {
        self.connections.contains_key(&id)
    }

    /// The number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True when no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Returns the registered ids in ascending order.
    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Clones out every registered connection, ordered by id.
    ///
    /// Callers must inspect connection state only after this returns: the map's
    /// shard locks are released before any connection lock is taken.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut conns: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        conns.sort_unstable_by_key(|c| c.id());
        conns
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
