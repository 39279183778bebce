//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects value cells, derived
//! cells, and effects. It owns the dependency graph, all cell storage, and
//! the tracking stack used for read-time dependency discovery.
//!
//! # How It Works
//!
//! 1. When a cell is created, the runtime allocates a graph node and stores
//!    the value in its arena.
//!
//! 2. While a derived cell, effect, or component render executes, the
//!    runtime keeps a tracking frame on its own stack. Every tracked read
//!    lands in that frame; when the computation finishes, the frame becomes
//!    the computation's exact dependency set. Reads that did not happen on
//!    this run are not tracked.
//!
//! 3. When a value cell is written, the runtime marks all transitive
//!    dependents maybe-dirty, queues dirty effects and renders, and leaves
//!    derived cells to recompute lazily on their next read.
//!
//! # Ownership
//!
//! There is no global registry and no thread-local context: the runtime is a
//! plain owned value, and every read/write takes `&mut Runtime`. A session's
//! event loop owns its runtime exclusively, which is what makes cell writes
//! from outside the loop structurally unrepresentable rather than a runtime
//! check.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};

use indexmap::IndexSet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use super::cell::{Cell, Derived, EffectHandle};
use super::scope::{HookOrderViolation, Scope, ScopeId, SlotKind};
use crate::graph::{DirtyState, Graph, GraphError, NodeId, NodeKind};

/// Cleanup callback returned by an effect, run before its next execution or
/// when its owner is disposed.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// A stored computation: the closure behind a derived or effect cell.
enum Computation {
    /// Runs the user function, stores the result, and reports whether the
    /// value actually changed.
    Derived(Box<dyn FnMut(&mut Runtime, NodeId) -> bool + Send>),

    /// Runs the side effect and optionally returns the next cleanup.
    Effect(Box<dyn FnMut(&mut Runtime) -> Option<Cleanup> + Send>),
}

/// One entry on the tracking stack: the computation currently executing and
/// the reads it has performed so far.
struct TrackFrame {
    subscriber: NodeId,
    /// `(dependency, version observed at read time)` in read order.
    reads: Vec<(NodeId, u64)>,
}

/// Serialization hooks for a durable cell.
struct DurableSlot {
    node: NodeId,
    save: Box<dyn Fn(&Runtime) -> Result<Vec<u8>, rmp_serde::encode::Error> + Send>,
    load: Box<dyn Fn(&mut Runtime, &[u8]) -> Result<(), rmp_serde::decode::Error> + Send>,
}

/// Errors from the post-commit effect pass.
#[derive(Debug, Error)]
pub enum FlushError {
    /// More effects came due in one pass than the per-iteration cap allows.
    /// The session loop treats this as a tripped storm breaker.
    #[error("effect budget exhausted after {ran} executions in one pass")]
    CapExceeded { ran: usize },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors from rendering a component instance.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Hook(#[from] HookOrderViolation),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// The reactive runtime for one session.
pub struct Runtime {
    graph: Graph,
    values: HashMap<NodeId, Box<dyn Any + Send>>,
    computations: HashMap<NodeId, Computation>,
    cleanups: HashMap<NodeId, Cleanup>,
    track_stack: Vec<TrackFrame>,

    scopes: HashMap<ScopeId, Scope>,
    scope_stack: Vec<ScopeId>,
    next_scope: u64,
    root_scope: ScopeId,

    batch_depth: u32,
    pending_sources: IndexSet<NodeId>,
    due_effects: IndexSet<NodeId>,
    dirty_renders: IndexSet<NodeId>,

    durables: BTreeMap<String, DurableSlot>,

    /// Development-mode conditional-read detector: warn when a computation's
    /// dependency set changes between consecutive runs.
    dep_check: bool,
}

impl Runtime {
    pub fn new() -> Self {
        let root_scope = ScopeId(0);
        let mut scopes = HashMap::new();
        scopes.insert(root_scope, Scope::new(root_scope));
        Self {
            graph: Graph::new(),
            values: HashMap::new(),
            computations: HashMap::new(),
            cleanups: HashMap::new(),
            track_stack: Vec::new(),
            scopes,
            scope_stack: Vec::new(),
            next_scope: 1,
            root_scope,
            batch_depth: 0,
            pending_sources: IndexSet::new(),
            due_effects: IndexSet::new(),
            dirty_renders: IndexSet::new(),
            durables: BTreeMap::new(),
            dep_check: cfg!(debug_assertions),
        }
    }

    /// Enable or disable the conditional-read detector.
    pub fn set_dep_check(&mut self, enabled: bool) {
        self.dep_check = enabled;
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// The dependency set of a node, for introspection and tests.
    pub fn dependencies_of(&self, id: NodeId) -> Vec<NodeId> {
        self.graph
            .get(id)
            .map(|n| n.dependencies().iter().copied().collect())
            .unwrap_or_default()
    }

    fn current_scope(&self) -> ScopeId {
        self.scope_stack.last().copied().unwrap_or(self.root_scope)
    }

    fn register_node(&mut self, kind: NodeKind) -> NodeId {
        let id = self.graph.add_node(kind);
        let scope = self.current_scope();
        if let Some(scope) = self.scopes.get_mut(&scope) {
            scope.owned.push(id);
        }
        id
    }

    fn value_ref<T: 'static>(&self, id: NodeId) -> &T {
        self.values
            .get(&id)
            .and_then(|v| v.downcast_ref::<T>())
            .expect("cell storage missing or type mismatch")
    }

    // ------------------------------------------------------------------
    // Value cells
    // ------------------------------------------------------------------

    /// Create a value cell owned by the current scope.
    pub fn cell<T: Send + 'static>(&mut self, value: T) -> Cell<T> {
        let id = self.register_node(NodeKind::Value);
        self.values.insert(id, Box::new(value));
        Cell::new(id)
    }

    /// Create a value cell that participates in the persisted session blob
    /// under `key`. Cells created without a key are non-durable and reset on
    /// resume. Calling again with a key already registered re-associates the
    /// existing cell, so render functions may call this unconditionally.
    pub fn cell_durable<T>(&mut self, key: &str, value: T) -> Cell<T>
    where
        T: Clone + Serialize + DeserializeOwned + Send + 'static,
    {
        if let Some(slot) = self.durables.get(key) {
            return Cell::new(slot.node);
        }
        let cell = self.cell(value);
        self.durables.insert(
            key.to_owned(),
            DurableSlot {
                node: cell.id,
                save: Box::new(move |rt| rmp_serde::to_vec(rt.value_ref::<T>(cell.id))),
                load: Box::new(move |rt, bytes| {
                    let value: T = rmp_serde::from_slice(bytes)?;
                    rt.set(cell, value);
                    Ok(())
                }),
            },
        );
        cell
    }

    fn track_read(&mut self, id: NodeId) {
        let version = self.graph.get(id).map(|n| n.version()).unwrap_or(0);
        if let Some(frame) = self.track_stack.last_mut() {
            frame.reads.push((id, version));
        }
    }

    /// Tracked read: registers the currently-executing computation (if any)
    /// as a subscriber of this cell.
    pub fn get<T: Clone + Send + 'static>(&mut self, cell: Cell<T>) -> T {
        self.track_read(cell.id);
        self.value_ref::<T>(cell.id).clone()
    }

    /// Untracked read. Never establishes a dependency.
    pub fn peek<T: Clone + Send + 'static>(&self, cell: Cell<T>) -> T {
        self.value_ref::<T>(cell.id).clone()
    }

    /// Untracked read that tolerates a disposed cell. Completion callbacks
    /// marshalled from background tasks use this: the owning scope may have
    /// been disposed while the work was in flight, and such a completion
    /// must be a no-op rather than a panic.
    pub fn try_peek<T: Clone + Send + 'static>(&self, cell: Cell<T>) -> Option<T> {
        self.values
            .get(&cell.id)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Whether a cell's storage is still live, i.e. its owner has not been
    /// disposed.
    pub fn is_live<T>(&self, cell: Cell<T>) -> bool {
        self.values.contains_key(&cell.id)
    }

    /// Write a cell and mark all dependents dirty. Inside a batch, the
    /// propagation is deferred to the end of the batch.
    pub fn set<T: Send + 'static>(&mut self, cell: Cell<T>, value: T) {
        self.values.insert(cell.id, Box::new(value));
        self.written(cell.id);
    }

    /// Update a cell from its current value.
    pub fn update<T, F>(&mut self, cell: Cell<T>, f: F)
    where
        T: Clone + Send + 'static,
        F: FnOnce(&T) -> T,
    {
        let next = f(self.value_ref::<T>(cell.id));
        self.set(cell, next);
    }

    fn written(&mut self, id: NodeId) {
        if self.batch_depth > 0 {
            self.pending_sources.insert(id);
        } else {
            self.propagate(id);
        }
    }

    fn propagate(&mut self, id: NodeId) {
        let affected = self.graph.mark_changed(id);
        for node_id in affected {
            match self.graph.get(node_id).map(|n| n.kind()) {
                Some(NodeKind::Effect) => {
                    self.due_effects.insert(node_id);
                }
                Some(NodeKind::Render) => {
                    self.dirty_renders.insert(node_id);
                }
                _ => {}
            }
        }
    }

    /// Run `f` with write propagation deferred: however many writes happen
    /// inside, dependents see exactly one dirty-propagation pass, effects
    /// come due at most once, and downstream re-render happens once.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.batch_depth += 1;
        let result = f(self);
        self.batch_depth -= 1;
        if self.batch_depth == 0 {
            let pending = std::mem::take(&mut self.pending_sources);
            for id in pending {
                self.propagate(id);
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Derived cells
    // ------------------------------------------------------------------

    /// Create a derived cell: a cached computation re-evaluated the first
    /// time it is read after any dependency changed. Change detection uses
    /// `PartialEq`, so a recompute that produces an equal value does not
    /// dirty dependents.
    pub fn derived<T, F>(&mut self, mut f: F) -> Derived<T>
    where
        T: Clone + PartialEq + Send + 'static,
        F: FnMut(&mut Runtime) -> T + Send + 'static,
    {
        let id = self.register_node(NodeKind::Derived);
        self.computations.insert(
            id,
            Computation::Derived(Box::new(move |rt, id| {
                let next = f(rt);
                let changed = match rt.values.get(&id).and_then(|v| v.downcast_ref::<T>()) {
                    Some(prev) => *prev != next,
                    None => true,
                };
                rt.values.insert(id, Box::new(next));
                changed
            })),
        );
        Derived::new(id)
    }

    /// Tracked read of a derived cell, recomputing first when stale.
    ///
    /// Fails when the read would close a dependency cycle; the subscription
    /// is rejected and no edge is recorded. Render closures propagate the
    /// error with `?`, which fails the render instead of the task.
    pub fn read<T: Clone + Send + 'static>(
        &mut self,
        derived: Derived<T>,
    ) -> Result<T, GraphError> {
        self.ensure(derived.id)?;
        self.track_read(derived.id);
        Ok(self.value_ref::<T>(derived.id).clone())
    }

    /// Bring a computation node up to date, recomputing only when one of its
    /// recorded inputs actually changed.
    fn ensure(&mut self, id: NodeId) -> Result<(), GraphError> {
        let state = match self.graph.get(id) {
            Some(node) => node.dirty_state(),
            None => return Ok(()),
        };
        match state {
            DirtyState::Clean => Ok(()),
            DirtyState::Dirty => self.recompute(id),
            DirtyState::MaybeDirty => {
                // Pull derived inputs first so their versions are current.
                let deps: Vec<NodeId> = self.dependencies_of(id);
                for dep in deps {
                    if self.graph.get(dep).map(|n| n.kind()) == Some(NodeKind::Derived) {
                        self.ensure(dep)?;
                    }
                }
                if self.graph.inputs_changed(id) {
                    self.recompute(id)
                } else {
                    if let Some(node) = self.graph.get_mut(id) {
                        node.mark_clean();
                    }
                    Ok(())
                }
            }
        }
    }

    /// Re-run a derived/effect computation, re-tracking its dependencies.
    fn recompute(&mut self, id: NodeId) -> Result<(), GraphError> {
        let Some(computation) = self.computations.remove(&id) else {
            // The computation is already mid-run on this stack: the read
            // that got us here closes a cycle.
            let dependent = self
                .track_stack
                .last()
                .map(|f| f.subscriber)
                .unwrap_or(id);
            return Err(GraphError::CycleDetected {
                dependency: id,
                dependent,
            });
        };

        let old_deps: IndexSet<NodeId> = self
            .graph
            .get(id)
            .map(|n| n.dependencies().clone())
            .unwrap_or_default();
        let first_run = self
            .graph
            .get(id)
            .map(|n| n.dep_versions().is_empty() && n.version() == 0)
            .unwrap_or(true);

        self.graph.clear_dependencies(id);
        self.track_stack.push(TrackFrame {
            subscriber: id,
            reads: Vec::new(),
        });

        let changed = match computation {
            Computation::Derived(mut run) => {
                let changed = run(self, id);
                self.computations.insert(id, Computation::Derived(run));
                changed
            }
            Computation::Effect(mut run) => {
                if let Some(cleanup) = self.cleanups.remove(&id) {
                    cleanup();
                }
                let next_cleanup = run(self);
                if let Some(cleanup) = next_cleanup {
                    self.cleanups.insert(id, cleanup);
                }
                self.computations.insert(id, Computation::Effect(run));
                false
            }
        };

        let frame = self
            .track_stack
            .pop()
            .expect("tracking stack underflow");

        // Deduplicate reads, keeping the first-observed version.
        let mut versions: Vec<(NodeId, u64)> = Vec::new();
        let mut seen: IndexSet<NodeId> = IndexSet::new();
        for (dep, ver) in frame.reads {
            if seen.insert(dep) {
                versions.push((dep, ver));
            }
        }
        for (dep, _) in &versions {
            self.graph.add_edge(*dep, id)?;
        }

        if self.dep_check && !first_run && seen != old_deps {
            warn!(
                node = id.raw(),
                before = old_deps.len(),
                after = seen.len(),
                "dependency set changed between runs; a conditional read may \
                 miss updates on the branch not taken"
            );
        }

        if let Some(node) = self.graph.get_mut(id) {
            node.record_dep_versions(versions);
            node.mark_clean();
            if changed {
                node.bump_version();
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Create an effect cell. The first run happens on the next effect
    /// flush (after the current unit of work commits), not at creation.
    pub fn effect<F>(&mut self, mut f: F) -> EffectHandle
    where
        F: FnMut(&mut Runtime) + Send + 'static,
    {
        self.effect_with(move |rt| {
            f(rt);
            None
        })
    }

    /// Create an effect cell whose closure may return a cleanup callback,
    /// invoked before the next run or on disposal.
    pub fn effect_with<F>(&mut self, f: F) -> EffectHandle
    where
        F: FnMut(&mut Runtime) -> Option<Cleanup> + Send + 'static,
    {
        let id = self.register_node(NodeKind::Effect);
        self.computations.insert(id, Computation::Effect(Box::new(f)));
        self.due_effects.insert(id);
        EffectHandle::new(id)
    }

    /// Dispose an effect: run its cleanup and remove it from the graph.
    pub fn dispose_effect(&mut self, handle: EffectHandle) {
        let id = handle.id;
        if let Some(cleanup) = self.cleanups.remove(&id) {
            cleanup();
        }
        self.computations.remove(&id);
        self.due_effects.shift_remove(&id);
        self.graph.remove_node(id);
    }

    pub fn has_due_effects(&self) -> bool {
        !self.due_effects.is_empty()
    }

    /// Run all due effects, including ones scheduled by the effects
    /// themselves, up to `cap` executions.
    ///
    /// An effect marked maybe-dirty runs only when one of its recorded
    /// inputs actually changed. Returns the number of executions.
    pub fn flush_effects(&mut self, cap: usize) -> Result<usize, FlushError> {
        let mut ran = 0usize;
        loop {
            let id = match self.due_effects.first() {
                Some(&id) => id,
                None => break,
            };
            self.due_effects.shift_remove(&id);

            let state = match self.graph.get(id) {
                Some(node) => node.dirty_state(),
                None => continue,
            };
            let should_run = match state {
                DirtyState::Dirty => true,
                // An effect can re-queue itself by writing a cell it reads,
                // in which case its node is Clean again by the time we get
                // here. Membership in the due queue means "verify inputs",
                // whatever the recorded state.
                DirtyState::Clean | DirtyState::MaybeDirty => {
                    let deps = self.dependencies_of(id);
                    for dep in deps {
                        if self.graph.get(dep).map(|n| n.kind()) == Some(NodeKind::Derived) {
                            self.ensure(dep)?;
                        }
                    }
                    if self.graph.inputs_changed(id) {
                        true
                    } else {
                        if let Some(node) = self.graph.get_mut(id) {
                            node.mark_clean();
                        }
                        false
                    }
                }
            };

            if should_run {
                if ran >= cap {
                    return Err(FlushError::CapExceeded { ran });
                }
                self.recompute(id)?;
                ran += 1;
            }
        }
        Ok(ran)
    }

    // ------------------------------------------------------------------
    // Component instances / render tracking
    // ------------------------------------------------------------------

    /// Create a fresh scope for a component instance.
    pub fn create_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.next_scope);
        self.next_scope += 1;
        self.scopes.insert(id, Scope::new(id));
        id
    }

    /// Allocate the render node backing a component instance.
    pub fn create_render_node(&mut self) -> NodeId {
        self.register_node(NodeKind::Render)
    }

    /// Dispose a scope: run effect cleanups and remove every owned node.
    pub fn dispose_scope(&mut self, scope_id: ScopeId) {
        let Some(scope) = self.scopes.remove(&scope_id) else {
            return;
        };
        for id in scope.owned.into_iter().rev() {
            if let Some(cleanup) = self.cleanups.remove(&id) {
                cleanup();
            }
            self.computations.remove(&id);
            self.values.remove(&id);
            self.due_effects.shift_remove(&id);
            self.dirty_renders.shift_remove(&id);
            self.graph.remove_node(id);
        }
        let graph = &self.graph;
        self.durables
            .retain(|_, slot| graph.get(slot.node).is_some());
    }

    /// Dispose everything owned by this runtime, including the root scope.
    pub fn dispose_all(&mut self) {
        let scope_ids: Vec<ScopeId> = self.scopes.keys().copied().collect();
        for id in scope_ids {
            self.dispose_scope(id);
        }
    }

    /// Run a component instance's render function with slot re-association
    /// and render-node dependency tracking.
    pub fn render_scope<V>(
        &mut self,
        render_node: NodeId,
        scope_id: ScopeId,
        f: &mut (dyn FnMut(&mut Runtime) -> Result<V, RenderError> + Send),
    ) -> Result<V, RenderError> {
        if let Some(scope) = self.scopes.get_mut(&scope_id) {
            scope.reset_cursor();
        }
        let old_deps: IndexSet<NodeId> = self
            .graph
            .get(render_node)
            .map(|n| n.dependencies().clone())
            .unwrap_or_default();
        let first_run = self
            .graph
            .get(render_node)
            .map(|n| n.dep_versions().is_empty() && n.version() == 0)
            .unwrap_or(true);

        self.graph.clear_dependencies(render_node);
        self.scope_stack.push(scope_id);
        self.track_stack.push(TrackFrame {
            subscriber: render_node,
            reads: Vec::new(),
        });

        let output = f(self);

        let frame = self
            .track_stack
            .pop()
            .expect("tracking stack underflow");
        self.scope_stack.pop();

        let output = output?;

        let mut versions: Vec<(NodeId, u64)> = Vec::new();
        let mut seen: IndexSet<NodeId> = IndexSet::new();
        for (dep, ver) in frame.reads {
            if seen.insert(dep) {
                versions.push((dep, ver));
            }
        }
        for (dep, _) in &versions {
            self.graph.add_edge(*dep, render_node)?;
        }

        if self.dep_check && !first_run && seen != old_deps {
            warn!(
                node = render_node.raw(),
                "render dependency set changed between runs"
            );
        }

        if let Some(node) = self.graph.get_mut(render_node) {
            node.record_dep_versions(versions);
            node.mark_clean();
            node.bump_version();
        }
        if let Some(scope) = self.scopes.get_mut(&scope_id) {
            scope.finish_render()?;
        }
        Ok(output)
    }

    /// Drain the render nodes whose tracked reads actually changed since
    /// their last render. Maybe-dirty nodes whose inputs are unchanged are
    /// marked clean and omitted.
    pub fn take_dirty_renders(&mut self) -> Result<Vec<NodeId>, GraphError> {
        let candidates = std::mem::take(&mut self.dirty_renders);
        let mut out = Vec::new();
        for id in candidates {
            let state = match self.graph.get(id) {
                Some(node) => node.dirty_state(),
                None => continue,
            };
            match state {
                DirtyState::Clean => {}
                DirtyState::Dirty => out.push(id),
                DirtyState::MaybeDirty => {
                    let deps = self.dependencies_of(id);
                    for dep in deps {
                        if self.graph.get(dep).map(|n| n.kind()) == Some(NodeKind::Derived) {
                            self.ensure(dep)?;
                        }
                    }
                    if self.graph.inputs_changed(id) {
                        out.push(id);
                    } else if let Some(node) = self.graph.get_mut(id) {
                        node.mark_clean();
                    }
                }
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Hook-order slots
    // ------------------------------------------------------------------

    /// Call-order-addressed value cell for the current render. On the first
    /// render this creates the cell from `init`; on re-renders the Nth call
    /// re-associates the Nth slot.
    pub fn slot_cell<T: Send + 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> Result<Cell<T>, HookOrderViolation> {
        let scope_id = self.current_scope();
        let claimed = self
            .scopes
            .get_mut(&scope_id)
            .expect("current scope missing")
            .claim_slot(SlotKind::Value, TypeId::of::<T>())?;
        if let Some(node) = claimed {
            return Ok(Cell::new(node));
        }
        let cell = self.cell(init());
        self.scopes
            .get_mut(&scope_id)
            .expect("current scope missing")
            .record_slot(SlotKind::Value, TypeId::of::<T>(), cell.id);
        Ok(cell)
    }

    /// Call-order-addressed derived cell.
    pub fn slot_derived<T, F>(&mut self, f: F) -> Result<Derived<T>, HookOrderViolation>
    where
        T: Clone + PartialEq + Send + 'static,
        F: FnMut(&mut Runtime) -> T + Send + 'static,
    {
        let scope_id = self.current_scope();
        let claimed = self
            .scopes
            .get_mut(&scope_id)
            .expect("current scope missing")
            .claim_slot(SlotKind::Derived, TypeId::of::<T>())?;
        if let Some(node) = claimed {
            return Ok(Derived::new(node));
        }
        let derived = self.derived(f);
        self.scopes
            .get_mut(&scope_id)
            .expect("current scope missing")
            .record_slot(SlotKind::Derived, TypeId::of::<T>(), derived.id);
        Ok(derived)
    }

    /// Call-order-addressed effect. The closure from the first render is
    /// retained; later renders only re-associate the handle.
    pub fn slot_effect<F>(&mut self, f: F) -> Result<EffectHandle, HookOrderViolation>
    where
        F: FnMut(&mut Runtime) + Send + 'static,
    {
        let scope_id = self.current_scope();
        let claimed = self
            .scopes
            .get_mut(&scope_id)
            .expect("current scope missing")
            .claim_slot(SlotKind::Effect, TypeId::of::<()>())?;
        if let Some(node) = claimed {
            return Ok(EffectHandle::new(node));
        }
        let handle = self.effect(f);
        self.scopes
            .get_mut(&scope_id)
            .expect("current scope missing")
            .record_slot(SlotKind::Effect, TypeId::of::<()>(), handle.id);
        Ok(handle)
    }

    // ------------------------------------------------------------------
    // Durable state
    // ------------------------------------------------------------------

    /// Serialize every durable cell. Non-durable cells never appear here.
    pub fn snapshot_durable(
        &self,
    ) -> Result<BTreeMap<String, Vec<u8>>, rmp_serde::encode::Error> {
        let mut out = BTreeMap::new();
        for (key, slot) in &self.durables {
            out.insert(key.clone(), (slot.save)(self)?);
        }
        Ok(out)
    }

    /// Restore durable cells from a persisted blob. Keys absent from the
    /// blob keep their connection-time values.
    pub fn restore_durable(
        &mut self,
        blob: &BTreeMap<String, Vec<u8>>,
    ) -> Result<(), rmp_serde::decode::Error> {
        let durables = std::mem::take(&mut self.durables);
        let mut result = Ok(());
        for (key, slot) in &durables {
            if let Some(bytes) = blob.get(key) {
                if let Err(err) = (slot.load)(self, bytes) {
                    result = Err(err);
                    break;
                }
            }
        }
        self.durables = durables;
        result
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("nodes", &self.graph.node_count())
            .field("due_effects", &self.due_effects.len())
            .field("dirty_renders", &self.dirty_renders.len())
            .field("batch_depth", &self.batch_depth)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
