//! Session Registry
//!
//! Process-wide index of live session loops, keyed by session id. The
//! registry is how a reconnecting transport finds the loop it wants to
//! resume, and where detached sessions wait out their resume window
//! before the sweeper shuts them down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::event_loop::{LoopHandle, UnitOfWork};
use super::SessionId;

enum Attachment {
    Attached,
    Detached { since: Instant },
}

struct Slot {
    handle: LoopHandle,
    attachment: Mutex<Attachment>,
}

pub struct Registry {
    sessions: DashMap<SessionId, Slot>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn allocate_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, handle: LoopHandle) {
        self.sessions.insert(
            handle.id(),
            Slot {
                handle,
                attachment: Mutex::new(Attachment::Attached),
            },
        );
    }

    pub fn get(&self, id: SessionId) -> Option<LoopHandle> {
        self.sessions.get(&id).map(|slot| slot.handle.clone())
    }

    pub fn mark_attached(&self, id: SessionId) {
        if let Some(slot) = self.sessions.get(&id) {
            *slot.attachment.lock() = Attachment::Attached;
        }
    }

    pub fn mark_detached(&self, id: SessionId) {
        if let Some(slot) = self.sessions.get(&id) {
            *slot.attachment.lock() = Attachment::Detached {
                since: Instant::now(),
            };
        }
    }

    pub fn remove(&self, id: SessionId) {
        self.sessions.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Shut down every session detached longer than `window`. Returns how
    /// many were expired.
    pub fn sweep(&self, window: Duration) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        for entry in self.sessions.iter() {
            if let Attachment::Detached { since } = *entry.value().attachment.lock() {
                if now.duration_since(since) >= window {
                    expired.push(*entry.key());
                }
            }
        }
        for id in &expired {
            if let Some((_, slot)) = self.sessions.remove(id) {
                slot.handle.send(UnitOfWork::Shutdown);
                debug!(session = id.0, "resume window expired");
            }
        }
        expired.len()
    }

    /// Periodic sweep on the runtime. The task runs until the registry is
    /// dropped from everywhere else; callers keep the join handle if they
    /// want a clean shutdown.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        window: Duration,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let expired = registry.sweep(window);
                if expired > 0 {
                    debug!(expired, "swept detached sessions");
                }
            }
        })
    }
}

// ----------- Tests -----------
