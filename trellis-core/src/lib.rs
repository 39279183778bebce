//! Trellis Core
//!
//! This crate is the synchronization engine of Trellis, a server-driven UI
//! framework: application state, rendering, and event handling live on the
//! server, while the client holds a tree of nodes it does not interpret and
//! reports user events against them. It implements:
//!
//! - Reactive primitives (cells, derived cells, effects) over an explicit
//!   dependency graph
//! - Retained element trees with minimal ordered patch generation
//! - A binary wire protocol with bounded decoding
//! - Per-session event loops with detach/resume and durable state
//! - Async query/command cells with storm budgets
//! - A WebSocket transport adapter
//!
//! # Architecture
//!
//! - `graph`: dependency graph, dirty propagation, cycle rejection
//! - `reactive`: the per-session `Runtime` owning all cell storage
//! - `tree`: tree snapshots, HID assignment, diffing, HTML rendering
//! - `wire`: frame layouts and the varint codec
//! - `session`: the single-writer loop, registry, persistence, broadcast
//! - `task`: async cells and storm budgets
//! - `transport`: the socket boundary
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::session::App;
//! use trellis_core::tree::{el, text, EventKind};
//!
//! let app = App::new(|rt| {
//!     let count = rt.cell_durable("count", 0i64);
//!     let n = rt.get(count);
//!     Ok(el("div")
//!         .child(el("button").on(EventKind::Click, "inc").child(text("+")).build())
//!         .child(text(format!("count: {n}")))
//!         .build())
//! })
//! .handler("inc", |cx, _| { /* write cells through cx.runtime */ });
//! ```
//!
//! Every mutation of a session's state happens on that session's loop; the
//! `&mut Runtime` a handler receives is the only writer that exists.

pub mod graph;
pub mod reactive;
pub mod session;
pub mod task;
pub mod transport;
pub mod tree;
pub mod wire;

pub use reactive::{Cell, Derived, Runtime};
pub use session::{App, Session, SessionConfig, SessionCx};
pub use tree::{el, text, EventKind, VNode};
