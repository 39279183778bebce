//! Session Persistence
//!
//! On detach, the durable cells of a session are serialized into a
//! [`SessionBlob`] and handed to a [`BlobStore`]. A resume after the live
//! session is gone (process restart, registry sweep) rebuilds the session
//! from the blob: durable cells get their saved values, everything else
//! reinitializes. The storage backend is injected; only the in-memory
//! store ships here.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::SessionId;

/// Everything a session persists across detach. The per-cell values are
/// already MessagePack bytes produced by the runtime's durable snapshot;
/// the blob wraps them with the route so a resumed client can be checked
/// against the page it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBlob {
    pub route: String,
    pub durable: BTreeMap<String, Vec<u8>>,
}

impl SessionBlob {
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Storage backend boundary. Implementations must be cheap to call from
/// the session loop; anything slow should buffer internally.
pub trait BlobStore: Send + Sync {
    fn put(&self, id: SessionId, blob: Vec<u8>);
    fn get(&self, id: SessionId) -> Option<Vec<u8>>;
    fn remove(&self, id: SessionId);
}

/// Process-local store, for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<SessionId, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, id: SessionId, blob: Vec<u8>) {
        self.blobs.insert(id, blob);
    }

    fn get(&self, id: SessionId) -> Option<Vec<u8>> {
        self.blobs.get(&id).map(|entry| entry.clone())
    }

    fn remove(&self, id: SessionId) {
        self.blobs.remove(&id);
    }
}

// ----------- Tests -----------
