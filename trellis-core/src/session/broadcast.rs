//! Shared Cell Broadcast
//!
//! The seam between per-session state and state shared across sessions.
//! A session subscribes one of its own cells to a topic; any session
//! publishing to that topic has the value applied to every subscriber's
//! cell. The application never happens on the publisher's thread: each
//! delivery is marshalled onto the subscriber's own loop, so every write
//! still goes through exactly one writer per runtime.
//!
//! Values cross the seam as MessagePack bytes, which keeps the hub free
//! of the subscribers' concrete types and makes a broker-backed
//! implementation a drop-in replacement for this in-process one.

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::reactive::Cell;

use super::event_loop::LoopHandle;
use super::SessionId;

type Applier = Box<dyn Fn(&LoopHandle, Arc<[u8]>) -> bool + Send + Sync>;

struct Subscriber {
    session: SessionId,
    handle: LoopHandle,
    apply: Applier,
}

/// In-process topic hub. Clone an `Arc<Broadcast>` into every session.
#[derive(Default)]
pub struct Broadcast {
    topics: DashMap<String, Vec<Subscriber>>,
}

impl Broadcast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `cell` (owned by the session behind `handle`) to `topic`.
    /// Remote publishes deserialize into the cell on that session's loop.
    pub fn subscribe<T>(&self, topic: &str, handle: &LoopHandle, cell: Cell<T>)
    where
        T: DeserializeOwned + Send + 'static,
    {
        let apply: Applier = Box::new(move |handle, bytes| {
            handle.dispatch(move |cx| {
                if !cx.runtime.is_live(cell) {
                    return;
                }
                match rmp_serde::from_slice::<T>(&bytes) {
                    Ok(value) => cx.runtime.set(cell, value),
                    Err(err) => warn!(error = %err, "shared update failed to decode"),
                }
            })
        });
        self.topics
            .entry(topic.to_owned())
            .or_default()
            .push(Subscriber {
                session: handle.id(),
                handle: handle.clone(),
                apply,
            });
    }

    /// Deliver `value` to every subscriber of `topic` except `origin`.
    /// Subscribers whose loop has gone away are pruned. Returns the number
    /// of sessions the update was delivered to.
    pub fn publish<T: Serialize>(&self, topic: &str, origin: SessionId, value: &T) -> usize {
        let bytes: Arc<[u8]> = match rmp_serde::to_vec(value) {
            Ok(encoded) => Arc::from(encoded.into_boxed_slice()),
            Err(err) => {
                warn!(topic, error = %err, "shared publish failed to encode");
                return 0;
            }
        };
        let mut delivered = 0;
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            subscribers.retain(|sub| {
                if sub.session == origin {
                    return true;
                }
                let alive = (sub.apply)(&sub.handle, bytes.clone());
                if alive {
                    delivered += 1;
                }
                alive
            });
        }
        delivered
    }

    /// Drop every subscription held by `id`.
    pub fn remove_session(&self, id: SessionId) {
        for mut entry in self.topics.iter_mut() {
            entry.value_mut().retain(|sub| sub.session != id);
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|subs| subs.len()).unwrap_or(0)
    }
}
