//! Sessions
//!
//! A session is the durable server half of one client: a reactive runtime,
//! a retained tree snapshot, a handler table, and the loop that ties them
//! together. Sessions outlive connections; a dropped transport detaches
//! the session, and a reconnect inside the resume window picks the live
//! state back up. Only durable cells survive past the window, through the
//! persistence boundary in [`persist`].
//!
//! # How It Works
//!
//! Every session runs one tokio task consuming one FIFO queue of
//! [`UnitOfWork`]. That task owns the `Runtime` outright, which is the
//! single-writer guarantee: there is no handle type in this crate through
//! which a second thread could reach `&mut Runtime`. Background work gets
//! a [`LoopHandle`] and marshals closures onto the queue instead.

mod broadcast;
mod error;
mod event_loop;
mod persist;
mod registry;

use serde::{Deserialize, Serialize};

pub use broadcast::Broadcast;
pub use error::SessionError;
pub use event_loop::{
    App, HandlerFn, LoopHandle, Session, SessionConfig, SessionCx, UnitOfWork, ViewFn,
};
pub use persist::{BlobStore, MemoryBlobStore, SessionBlob};
pub use registry::Registry;

/// Process-unique session identifier, allocated by the [`Registry`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Opaque-to-the-client resume token.
    pub fn resume_token(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }

    pub fn from_resume_token(token: &[u8]) -> Option<SessionId> {
        let bytes: [u8; 8] = token.try_into().ok()?;
        Some(SessionId(u64::from_be_bytes(bytes)))
    }
}

/// Lifecycle of a session, distinct from the lifecycle of any connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, first render not yet delivered anywhere.
    Connecting,
    /// A transport is attached and receiving patch batches.
    Active,
    /// No transport; state retained for the resume window.
    Detached,
    /// Gone. Scopes disposed, cleanups run.
    Destroyed,
}


// ----------- Tests -----------
