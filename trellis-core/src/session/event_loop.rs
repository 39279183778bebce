//! Session Event Loop
//!
//! One tokio task per session owns that session's entire mutable world:
//! the reactive runtime, the mounted tree snapshot, and the handler table.
//! Everything that wants to mutate session state becomes a [`UnitOfWork`]
//! on one FIFO queue, so units observe a total order and no lock ever
//! guards the runtime. Writing from outside the loop is not forbidden at
//! runtime, it is unrepresentable: `&mut Runtime` only exists inside a
//! unit of work.
//!
//! # Unit of work
//!
//! Each unit runs to completion before the next is looked at:
//!
//! 1. apply the unit (run an event handler, a dispatched closure, or a
//!    control action),
//! 2. re-render component instances whose tracked reads changed,
//! 3. run due effects under the per-pass cap, repeating the render step if
//!    effects wrote,
//! 4. diff against the retained snapshot and transmit at most one
//!    `PatchBatch`.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, trace, warn};

use crate::graph::NodeId;
use crate::reactive::{FlushError, RenderError, Runtime, ScopeId};
use crate::task::{BudgetKind, StormBudget, StormConfig, StormError};
use crate::tree::{
    collect_bindings, diff, mount, EventKind, Hid, HidAllocator, MountedNode, Patch, VNode,
};
use crate::wire::{EventPayload, Message};

use super::broadcast::Broadcast;
use super::error::SessionError;
use super::persist::{BlobStore, SessionBlob};
use super::{SessionId, SessionState};

/// Root render function of the application, run once per render pass.
pub type ViewFn = Box<dyn FnMut(&mut Runtime) -> Result<VNode, RenderError> + Send>;

/// Named event handler. The name is what the view binds to an element;
/// the wire only ever carries HIDs.
pub type HandlerFn = Box<dyn FnMut(&mut SessionCx<'_>, &EventPayload) + Send>;

type DispatchFn = Box<dyn FnOnce(&mut SessionCx<'_>) + Send>;

/// A view plus its named handlers. One `App` is consumed per session.
pub struct App {
    view: ViewFn,
    handlers: IndexMap<String, HandlerFn>,
}

impl App {
    pub fn new(
        view: impl FnMut(&mut Runtime) -> Result<VNode, RenderError> + Send + 'static,
    ) -> Self {
        App {
            view: Box::new(view),
            handlers: IndexMap::new(),
        }
    }

    pub fn handler(
        mut self,
        name: impl Into<String>,
        f: impl FnMut(&mut SessionCx<'_>, &EventPayload) + Send + 'static,
    ) -> Self {
        self.handlers.insert(name.into(), Box::new(f));
        self
    }
}

/// One entry on a session's queue.
pub enum UnitOfWork {
    /// A decoded client frame.
    Inbound(Message),
    /// Work marshalled onto the loop by a background task.
    Dispatch(DispatchFn),
    /// A (re)connected transport: where outbound frames go now.
    Attach(UnboundedSender<Message>),
    /// The transport went away; keep state for the resume window.
    Detach,
    /// Tear the session down.
    Shutdown,
}

impl UnitOfWork {
    fn name(&self) -> &'static str {
        match self {
            UnitOfWork::Inbound(_) => "inbound",
            UnitOfWork::Dispatch(_) => "dispatch",
            UnitOfWork::Attach(_) => "attach",
            UnitOfWork::Detach => "detach",
            UnitOfWork::Shutdown => "shutdown",
        }
    }
}

/// Clonable address of one session's loop.
#[derive(Clone)]
pub struct LoopHandle {
    pub(crate) id: SessionId,
    pub(crate) tx: UnboundedSender<UnitOfWork>,
}

impl LoopHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Marshal `f` onto the session loop. Returns false if the session is
    /// gone; the closure is dropped in that case.
    pub fn dispatch(&self, f: impl FnOnce(&mut SessionCx<'_>) + Send + 'static) -> bool {
        self.tx.send(UnitOfWork::Dispatch(Box::new(f))).is_ok()
    }

    pub fn send(&self, unit: UnitOfWork) -> bool {
        self.tx.send(unit).is_ok()
    }
}

/// What a unit of work sees. Handlers, dispatched closures, and async-cell
/// completions all run with one of these; the runtime borrow lives only as
/// long as the unit.
pub struct SessionCx<'a> {
    pub runtime: &'a mut Runtime,
    pub(crate) handle: LoopHandle,
    pub(crate) storm: &'a mut StormBudget,
    pub(crate) shared: &'a Arc<Broadcast>,
}

impl SessionCx<'_> {
    pub fn session_id(&self) -> SessionId {
        self.handle.id
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn storm(&mut self) -> &mut StormBudget {
        self.storm
    }

    /// Charge one start against the background budget. Application code
    /// spawning its own work calls this before each start; query and
    /// command cells charge their budgets themselves.
    pub fn admit_background(&mut self) -> Result<(), StormError> {
        self.storm.admit(BudgetKind::Background)
    }

    /// Subscribe one of this session's cells to a shared topic.
    pub fn subscribe_shared<T>(&mut self, topic: &str, cell: crate::reactive::Cell<T>)
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        self.shared.subscribe(topic, &self.handle, cell);
    }

    /// Publish a value to every other session subscribed to `topic`.
    pub fn publish_shared<T: serde::Serialize>(&mut self, topic: &str, value: &T) -> usize {
        self.shared.publish(topic, self.handle.id, value)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Effect executions allowed per flush pass.
    pub effect_cap: usize,
    /// How long a detached session stays resumable.
    pub resume_window: Duration,
    pub storm: StormConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            effect_cap: 1024,
            resume_window: Duration::from_secs(30),
            storm: StormConfig::default(),
        }
    }
}

/// Render/effect ping-pong bound inside one unit of work.
const MAX_COMMIT_PASSES: usize = 32;

pub struct Session {
    id: SessionId,
    state: SessionState,
    runtime: Runtime,
    view: ViewFn,
    handlers: IndexMap<String, HandlerFn>,
    /// `(hid, kind) -> handler name`, rebuilt from the tree on every render.
    bindings: IndexMap<(Hid, EventKind), String>,
    root_render: NodeId,
    root_scope: ScopeId,
    snapshot: Option<MountedNode>,
    alloc: HidAllocator,
    route: String,
    out_seq: u64,
    last_event_seq: u64,
    outbound: Option<UnboundedSender<Message>>,
    storm: StormBudget,
    handle: LoopHandle,
    shared: Arc<Broadcast>,
    store: Arc<dyn BlobStore>,
    config: SessionConfig,
}

impl Session {
    /// Create the session and spawn its loop. The returned handle is the
    /// only way to reach the session afterwards.
    pub fn spawn(
        id: SessionId,
        route: impl Into<String>,
        app: App,
        config: SessionConfig,
        shared: Arc<Broadcast>,
        store: Arc<dyn BlobStore>,
        restore: Option<SessionBlob>,
    ) -> LoopHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = LoopHandle { id, tx };
        let mut runtime = Runtime::new();
        let root_scope = runtime.create_scope();
        let root_render = runtime.create_render_node();
        let session = Session {
            id,
            state: SessionState::Connecting,
            runtime,
            view: app.view,
            handlers: app.handlers,
            bindings: IndexMap::new(),
            root_render,
            root_scope,
            snapshot: None,
            alloc: HidAllocator::new(),
            route: route.into(),
            out_seq: 0,
            last_event_seq: 0,
            outbound: None,
            storm: StormBudget::new(config.storm),
            handle: handle.clone(),
            shared,
            store,
            config,
        };
        tokio::spawn(session.run(rx, restore));
        handle
    }

    async fn run(mut self, mut rx: UnboundedReceiver<UnitOfWork>, restore: Option<SessionBlob>) {
        if let Err(err) = self.bootstrap(restore) {
            error!(session = self.id.0, error = %err, "session bootstrap failed");
            self.fail(&err);
            self.destroy();
            return;
        }
        while let Some(unit) = rx.recv().await {
            trace!(session = self.id.0, unit = unit.name(), "unit of work");
            match self.handle_unit(unit) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    error!(session = self.id.0, error = %err, "session failed");
                    self.fail(&err);
                    break;
                }
            }
            if let Some(kind) = self.storm.tripped() {
                let err = SessionError::Storm(StormError::BreakerTripped { kind });
                error!(session = self.id.0, error = %err, "session failed");
                self.fail(&err);
                break;
            }
        }
        self.destroy();
    }

    /// First render, optional durable restore, first snapshot. No frames
    /// leave here; the first transport gets the full tree on attach.
    fn bootstrap(&mut self, restore: Option<SessionBlob>) -> Result<(), SessionError> {
        let vnode = self.render_root()?;
        let mounted = mount(&vnode, &mut self.alloc);
        self.rebind(&mounted);
        self.snapshot = Some(mounted);
        if let Some(blob) = restore {
            self.runtime.restore_durable(&blob.durable)?;
        }
        self.commit()
    }

    fn handle_unit(&mut self, unit: UnitOfWork) -> Result<bool, SessionError> {
        match unit {
            UnitOfWork::Inbound(msg) => self.handle_message(msg),
            UnitOfWork::Dispatch(f) => {
                self.with_cx(f);
                self.commit()?;
                Ok(true)
            }
            UnitOfWork::Attach(tx) => {
                self.outbound = Some(tx);
                let resumed = self.state == SessionState::Detached;
                self.state = SessionState::Active;
                debug!(session = self.id.0, resumed, "transport attached");
                self.send_full();
                Ok(true)
            }
            UnitOfWork::Detach => {
                self.detach()?;
                Ok(true)
            }
            UnitOfWork::Shutdown => Ok(false),
        }
    }

    fn handle_message(&mut self, msg: Message) -> Result<bool, SessionError> {
        match msg {
            Message::Event {
                seq,
                kind,
                target,
                payload,
            } => {
                if seq != self.last_event_seq + 1 {
                    // Lost client events cannot be replayed; resend the
                    // full tree so at least the view converges.
                    warn!(
                        session = self.id.0,
                        expected = self.last_event_seq + 1,
                        got = seq,
                        "event sequence gap"
                    );
                    self.send_full();
                }
                self.last_event_seq = seq;
                self.handle_event(kind, target, &payload)?;
                self.commit()?;
                Ok(true)
            }
            Message::Ping { nonce } => {
                self.send(Message::Pong { nonce });
                Ok(true)
            }
            Message::Pong { .. } => Ok(true),
            Message::Resync { last_seq } => {
                warn!(
                    session = self.id.0,
                    client_last_seq = last_seq,
                    server_seq = self.out_seq,
                    "client requested resync"
                );
                self.send_full();
                Ok(true)
            }
            Message::Close { code } => {
                debug!(session = self.id.0, code, "client closed");
                Ok(false)
            }
            other => Err(SessionError::UnexpectedFrame(other.frame_type())),
        }
    }

    fn handle_event(
        &mut self,
        kind: EventKind,
        target: Hid,
        payload: &EventPayload,
    ) -> Result<(), SessionError> {
        let name = match self.bindings.get(&(target, kind)) {
            Some(name) => name.clone(),
            None => return Err(SessionError::UnknownTarget(target)),
        };
        let Session {
            runtime,
            handlers,
            storm,
            handle,
            shared,
            ..
        } = self;
        let handler = handlers
            .get_mut(&name)
            .ok_or(SessionError::UnknownHandler(name.clone()))?;
        let mut cx = SessionCx {
            runtime,
            handle: handle.clone(),
            storm,
            shared,
        };
        handler(&mut cx, payload);
        Ok(())
    }

    fn with_cx(&mut self, f: DispatchFn) {
        let Session {
            runtime,
            storm,
            handle,
            shared,
            ..
        } = self;
        let mut cx = SessionCx {
            runtime,
            handle: handle.clone(),
            storm,
            shared,
        };
        f(&mut cx);
    }

    /// Re-render, run effects, repeat until settled, then transmit at most
    /// one patch batch for the whole unit of work.
    fn commit(&mut self) -> Result<(), SessionError> {
        let mut patches: Vec<Patch> = Vec::new();
        let mut passes = 0;
        loop {
            let dirty = self.runtime.take_dirty_renders()?;
            if !dirty.is_empty() {
                let vnode = self.render_root()?;
                let old = self.snapshot.take().expect("snapshot exists after bootstrap");
                let (step, next) = diff(&old, &vnode, &mut self.alloc);
                self.rebind(&next);
                self.snapshot = Some(next);
                patches.extend(step);
            }
            if !self.runtime.has_due_effects() {
                break;
            }
            match self.runtime.flush_effects(self.config.effect_cap) {
                Ok(ran) => trace!(session = self.id.0, ran, "effects flushed"),
                Err(err @ FlushError::CapExceeded { .. }) => {
                    return Err(SessionError::EffectStorm(err))
                }
                Err(FlushError::Graph(err)) => return Err(err.into()),
            }
            passes += 1;
            if passes > MAX_COMMIT_PASSES {
                return Err(SessionError::EffectStorm(FlushError::CapExceeded {
                    ran: self.config.effect_cap * passes,
                }));
            }
        }
        if !patches.is_empty() {
            self.out_seq += 1;
            debug!(
                session = self.id.0,
                seq = self.out_seq,
                patches = patches.len(),
                "patch batch"
            );
            self.send(Message::PatchBatch {
                seq: self.out_seq,
                full: false,
                patches,
            });
        }
        Ok(())
    }

    fn render_root(&mut self) -> Result<VNode, SessionError> {
        let Session {
            runtime,
            view,
            root_render,
            root_scope,
            ..
        } = self;
        let vnode = runtime.render_scope(*root_render, *root_scope, &mut |rt| view(rt))?;
        Ok(vnode)
    }

    fn rebind(&mut self, root: &MountedNode) {
        self.bindings.clear();
        let mut list = Vec::new();
        collect_bindings(root, &mut list);
        for (hid, kind, handler) in list {
            self.bindings.insert((hid, kind), handler);
        }
    }

    /// The current tree as one full-replace batch, for attach and resync.
    fn send_full(&mut self) {
        let Some(snapshot) = self.snapshot.clone() else {
            return;
        };
        self.out_seq += 1;
        let hid = snapshot.hid;
        self.send(Message::PatchBatch {
            seq: self.out_seq,
            full: true,
            patches: vec![Patch::ReplaceNode {
                hid,
                node: snapshot,
            }],
        });
    }

    fn send(&mut self, msg: Message) {
        if let Some(tx) = &self.outbound {
            if tx.send(msg).is_err() {
                debug!(session = self.id.0, "outbound channel closed");
                self.outbound = None;
            }
        }
    }

    fn detach(&mut self) -> Result<(), SessionError> {
        self.outbound = None;
        self.state = SessionState::Detached;
        let durable = self.runtime.snapshot_durable()?;
        let blob = SessionBlob {
            route: self.route.clone(),
            durable,
        };
        self.store.put(self.id, blob.to_bytes()?);
        debug!(session = self.id.0, "detached, durable state persisted");
        Ok(())
    }

    fn fail(&mut self, err: &SessionError) {
        self.send(Message::Error {
            code: err.close_code(),
            message: err.to_string(),
        });
        self.send(Message::Close {
            code: err.close_code(),
        });
    }

    fn destroy(&mut self) {
        self.state = SessionState::Destroyed;
        self.shared.remove_session(self.id);
        self.runtime.dispose_all();
        debug!(session = self.id.0, "session destroyed");
    }
}

// ----------- Tests -----------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Cell;
    use crate::session::MemoryBlobStore;
    use crate::tree::{el, text, MountedKind};
    use parking_lot::Mutex;
    use tokio::sync::mpsc::unbounded_channel;

    type CellSlot = Arc<Mutex<Option<Cell<i64>>>>;

    fn counter_app() -> (App, CellSlot) {
        let slot: CellSlot = Arc::new(Mutex::new(None));
        let view_slot = Arc::clone(&slot);
        let inc_slot = Arc::clone(&slot);
        let inc5_slot = Arc::clone(&slot);
        let app = App::new(move |rt| {
            let count = rt.cell_durable("count", 0i64);
            *view_slot.lock() = Some(count);
            let n = rt.get(count);
            Ok(el("div")
                .child(
                    el("button")
                        .on(EventKind::Click, "inc")
                        .child(text("+"))
                        .build(),
                )
                .child(
                    el("button")
                        .on(EventKind::Click, "inc5")
                        .child(text("+5"))
                        .build(),
                )
                .child(el("span").child(text(format!("count: {n}"))).build())
                .build())
        })
        .handler("inc", move |cx, _| {
            let cell = (*inc_slot.lock()).expect("cell registered");
            cx.runtime.update(cell, |n| n + 1);
        })
        .handler("inc5", move |cx, _| {
            let cell = (*inc5_slot.lock()).expect("cell registered");
            cx.runtime.batch(|rt| {
                for _ in 0..5 {
                    rt.update(cell, |n| n + 1);
                }
            });
        });
        (app, slot)
    }

    async fn start(
        id: SessionId,
        app: App,
        shared: Arc<Broadcast>,
        store: Arc<dyn BlobStore>,
        restore: Option<SessionBlob>,
    ) -> (
        LoopHandle,
        mpsc::UnboundedReceiver<Message>,
        MountedNode,
    ) {
        let handle = Session::spawn(
            id,
            "/",
            app,
            SessionConfig::default(),
            shared,
            store,
            restore,
        );
        let (tx, mut rx) = unbounded_channel();
        assert!(handle.send(UnitOfWork::Attach(tx)));
        let tree = match rx.recv().await.expect("full batch on attach") {
            Message::PatchBatch {
                full: true,
                mut patches,
                ..
            } => match patches.pop() {
                Some(Patch::ReplaceNode { node, .. }) => node,
                other => panic!("expected full replace, got {other:?}"),
            },
            other => panic!("expected patch batch, got {other:?}"),
        };
        (handle, rx, tree)
    }

    fn find_binding(tree: &MountedNode, handler: &str) -> Hid {
        let mut bindings = Vec::new();
        collect_bindings(tree, &mut bindings);
        bindings
            .iter()
            .find(|(_, _, name)| name == handler)
            .map(|(hid, _, _)| *hid)
            .expect("handler bound in tree")
    }

    fn tree_text(node: &MountedNode, out: &mut String) {
        match &node.kind {
            MountedKind::Text(t) => out.push_str(t),
            MountedKind::Element { children, .. } => {
                for child in children {
                    tree_text(child, out);
                }
            }
        }
    }

    async fn fresh(app: App) -> (LoopHandle, mpsc::UnboundedReceiver<Message>, MountedNode) {
        let shared = Arc::new(Broadcast::new());
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        start(SessionId(1), app, shared, store, None).await
    }

    #[tokio::test]
    async fn click_event_produces_one_set_text() {
        let (app, _) = counter_app();
        let (handle, mut rx, tree) = fresh(app).await;
        let button = find_binding(&tree, "inc");

        handle.send(UnitOfWork::Inbound(Message::Event {
            seq: 1,
            kind: EventKind::Click,
            target: button,
            payload: EventPayload::None,
        }));

        match rx.recv().await.expect("patch batch") {
            Message::PatchBatch {
                seq: 2,
                full: false,
                patches,
            } => {
                assert_eq!(patches.len(), 1);
                assert!(
                    matches!(&patches[0], Patch::SetText { text, .. } if text == "count: 1")
                );
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn batched_writes_yield_one_frame() {
        let (app, _) = counter_app();
        let (handle, mut rx, tree) = fresh(app).await;
        let button = find_binding(&tree, "inc");

        // The inc5 handler batches five increments; the intermediate
        // values 1..4 must never hit the wire.
        handle.send(UnitOfWork::Inbound(Message::Event {
            seq: 1,
            kind: EventKind::Click,
            target: button,
            payload: EventPayload::None,
        }));
        // Swallow the frame from the plain click.
        rx.recv().await.expect("first batch");

        let _ = handle.dispatch(|_| {});
        rx.try_recv().err().expect("no frame without writes");

        // Drive inc5 via dispatch so we exercise both entry points.
        let (app2, _) = counter_app();
        let (h2, mut rx2, t2) = fresh(app2).await;
        let b2 = find_binding(&t2, "inc5");
        h2.send(UnitOfWork::Inbound(Message::Event {
            seq: 1,
            kind: EventKind::Click,
            target: b2,
            payload: EventPayload::None,
        }));
        match rx2.recv().await.expect("batch") {
            Message::PatchBatch { patches, .. } => {
                assert_eq!(patches.len(), 1);
                assert!(
                    matches!(&patches[0], Patch::SetText { text, .. } if text == "count: 5")
                );
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_target_is_fatal() {
        let (app, _) = counter_app();
        let (handle, mut rx, _tree) = fresh(app).await;

        handle.send(UnitOfWork::Inbound(Message::Event {
            seq: 1,
            kind: EventKind::Click,
            target: Hid(9999),
            payload: EventPayload::None,
        }));

        match rx.recv().await.expect("error frame") {
            Message::Error { code, .. } => assert_eq!(code, 4002),
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(Message::Close { .. })));
        // The loop is gone; further units are rejected once it drains.
        let _ = handle.send(UnitOfWork::Detach);
    }

    #[tokio::test]
    async fn cyclic_render_read_fails_the_session_with_frames() {
        use crate::graph::GraphError;
        use crate::reactive::Derived;

        // Two deriveds that read each other. The inner read is rejected
        // with a cycle error; the view treats any rejection as fatal for
        // the render, so the loop must answer with Error + Close instead
        // of dying silently.
        let a_slot: Arc<Mutex<Option<Derived<i64>>>> = Arc::new(Mutex::new(None));
        let seen: Arc<Mutex<Option<GraphError>>> = Arc::new(Mutex::new(None));
        let armed_slot: Arc<Mutex<Option<Cell<bool>>>> = Arc::new(Mutex::new(None));
        let armed_for_handler = Arc::clone(&armed_slot);
        let app = App::new({
            let a_slot = Arc::clone(&a_slot);
            let seen = Arc::clone(&seen);
            move |rt| {
                let armed = rt.slot_cell(|| false)?;
                *armed_slot.lock() = Some(armed);
                if a_slot.lock().is_none() {
                    let a_for_b = Arc::clone(&a_slot);
                    let seen_inner = Arc::clone(&seen);
                    let b = rt.derived(move |rt| {
                        let a = (*a_for_b.lock()).expect("a registered");
                        match rt.read(a) {
                            Ok(v) => v + 1,
                            Err(err) => {
                                *seen_inner.lock() = Some(err);
                                0
                            }
                        }
                    });
                    let a = rt.derived(move |rt| rt.read(b).unwrap_or(0) + 1);
                    *a_slot.lock() = Some(a);
                }
                if rt.get(armed) {
                    let a = (*a_slot.lock()).expect("a registered");
                    let _ = rt.read(a);
                    if let Some(err) = seen.lock().take() {
                        return Err(err.into());
                    }
                }
                Ok(el("div")
                    .child(el("button").on(EventKind::Click, "arm").child(text("go")).build())
                    .build())
            }
        })
        .handler("arm", move |cx, _| {
            let armed = (*armed_for_handler.lock()).expect("armed cell registered");
            cx.runtime.set(armed, true);
        });

        let (handle, mut rx, tree) = fresh(app).await;
        let button = find_binding(&tree, "arm");
        handle.send(UnitOfWork::Inbound(Message::Event {
            seq: 1,
            kind: EventKind::Click,
            target: button,
            payload: EventPayload::None,
        }));

        match rx.recv().await.expect("error frame") {
            Message::Error { code, .. } => assert_eq!(code, 4003),
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(Message::Close { code }) if code == 4003));
    }

    #[tokio::test]
    async fn dispatch_marshals_writes_onto_the_loop() {
        let (app, slot) = counter_app();
        let (handle, mut rx, _tree) = fresh(app).await;

        let cell = (*slot.lock()).expect("cell registered");
        assert!(handle.dispatch(move |cx| cx.runtime.set(cell, 41)));

        match rx.recv().await.expect("batch") {
            Message::PatchBatch { patches, .. } => {
                assert!(
                    matches!(&patches[0], Patch::SetText { text, .. } if text == "count: 41")
                );
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn background_admission_charges_its_own_budget() {
        use crate::session::test_cx::TestLoop;
        use crate::task::{StormConfig, StormPolicy};
        use std::time::Duration;

        let mut config = StormConfig::default();
        config.background.max_starts = 1;
        config.background.policy = StormPolicy::Throttle;
        config.background.window = Duration::from_secs(1);
        let mut driver = TestLoop::with_storm(StormBudget::new(config));

        driver.with_cx(|cx| {
            assert!(cx.admit_background().is_ok());
            assert!(matches!(
                cx.admit_background(),
                Err(StormError::Throttled {
                    kind: BudgetKind::Background
                })
            ));
            // The query window is untouched.
            assert!(cx.storm().admit(BudgetKind::Query).is_ok());
        });
    }

    #[tokio::test]
    async fn resume_restores_durable_state_only() {
        let shared = Arc::new(Broadcast::new());
        let store = Arc::new(MemoryBlobStore::new());
        let (app, _) = counter_app();
        let id = SessionId(9);
        let (handle, mut rx, tree) =
            start(id, app, Arc::clone(&shared), store.clone(), None).await;
        let button = find_binding(&tree, "inc");

        handle.send(UnitOfWork::Inbound(Message::Event {
            seq: 1,
            kind: EventKind::Click,
            target: button,
            payload: EventPayload::None,
        }));
        rx.recv().await.expect("batch");

        handle.send(UnitOfWork::Detach);
        handle.send(UnitOfWork::Shutdown);
        assert!(rx.recv().await.is_none());

        let bytes = store.get(id).expect("blob persisted on detach");
        let blob = SessionBlob::from_bytes(&bytes).expect("blob decodes");

        let (app2, _) = counter_app();
        let (_h2, _rx2, tree2) = start(
            SessionId(10),
            app2,
            shared,
            store.clone(),
            Some(blob),
        )
        .await;
        let mut rendered = String::new();
        tree_text(&tree2, &mut rendered);
        assert!(rendered.contains("count: 1"), "got {rendered:?}");
    }
}
