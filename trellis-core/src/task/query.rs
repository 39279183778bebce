//! Query Cells
//!
//! Reactive wrappers around async reads. The future runs on the tokio
//! pool; its completion is marshalled back onto the owning session's loop,
//! so the state cell is only ever written by that loop. Every start bumps
//! a generation counter, and a completion carrying a stale generation is
//! dropped silently, which is what makes cancellation race-free: aborting
//! the task is an optimization, the generation check is the correctness.

use std::future::Future;

use tokio::task::AbortHandle;
use tracing::trace;

use crate::reactive::{Cell, Runtime};
use crate::session::SessionCx;

use super::storm::{BudgetKind, StormError};

/// Lifecycle of one async read. `Pending` means constructed but never
/// started; the first start moves to `Loading` and the cell never returns
/// to `Pending` except through [`QueryCell::cancel`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
    Pending,
    Loading,
    Ready(T),
    Error(String),
}

impl<T> QueryState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            QueryState::Ready(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct QueryCtl {
    generation: u64,
    abort: Option<AbortHandle>,
}

/// Handle to one async query. Copyable like any cell handle; the state
/// lives in the runtime.
pub struct QueryCell<T> {
    state: Cell<QueryState<T>>,
    ctl: Cell<QueryCtl>,
}

impl<T> Clone for QueryCell<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for QueryCell<T> {}

impl<T: Clone + Send + 'static> QueryCell<T> {
    pub fn new(rt: &mut Runtime) -> Self {
        QueryCell {
            state: rt.cell(QueryState::Pending),
            ctl: rt.cell(QueryCtl {
                generation: 0,
                abort: None,
            }),
        }
    }

    /// Tracked read of the query state.
    pub fn state(&self, rt: &mut Runtime) -> QueryState<T> {
        rt.get(self.state)
    }

    pub fn peek_state(&self, rt: &Runtime) -> QueryState<T> {
        rt.peek(self.state)
    }

    /// Start (or restart) the query. An in-flight run is superseded: its
    /// task is aborted and its completion, if already queued, is dropped
    /// by the generation check.
    pub fn start<Fut>(&self, cx: &mut SessionCx<'_>, fut: Fut) -> Result<(), StormError>
    where
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        cx.storm().admit(BudgetKind::Query)?;
        let mut ctl = cx.runtime.peek(self.ctl);
        if let Some(abort) = ctl.abort.take() {
            abort.abort();
        }
        let generation = ctl.generation + 1;
        cx.runtime.set(self.state, QueryState::Loading);

        let handle = cx.handle();
        let state = self.state;
        let ctl_cell = self.ctl;
        let task = tokio::spawn(async move {
            let outcome = fut.await;
            handle.dispatch(move |cx| {
                // A disposed owner counts as stale too.
                let current = cx.runtime.try_peek(ctl_cell).map(|ctl| ctl.generation);
                if current != Some(generation) {
                    trace!("stale query completion dropped");
                    return;
                }
                match outcome {
                    Ok(value) => cx.runtime.set(state, QueryState::Ready(value)),
                    Err(err) => cx.runtime.set(state, QueryState::Error(err)),
                }
            });
        });
        cx.runtime.set(
            self.ctl,
            QueryCtl {
                generation,
                abort: Some(task.abort_handle()),
            },
        );
        Ok(())
    }

    /// Abort any in-flight run. A `Loading` cell reverts to `Pending`;
    /// settled results stay put.
    pub fn cancel(&self, rt: &mut Runtime) {
        let mut ctl = rt.peek(self.ctl);
        if let Some(abort) = ctl.abort.take() {
            abort.abort();
        }
        rt.set(
            self.ctl,
            QueryCtl {
                generation: ctl.generation + 1,
                abort: None,
            },
        );
        if rt.peek(self.state).is_loading() {
            rt.set(self.state, QueryState::Pending);
        }
    }
}

/// A query parameterized by a key. Changing the key cancels the old key's
/// flight and starts the new one; re-ensuring the same key is free.
pub struct KeyedQueryCell<K, T> {
    query: QueryCell<T>,
    key: Cell<Option<K>>,
}

impl<K, T> Clone for KeyedQueryCell<K, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, T> Copy for KeyedQueryCell<K, T> {}

impl<K, T> KeyedQueryCell<K, T>
where
    K: Clone + PartialEq + Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new(rt: &mut Runtime) -> Self {
        KeyedQueryCell {
            query: QueryCell::new(rt),
            key: rt.cell(None),
        }
    }

    pub fn state(&self, rt: &mut Runtime) -> QueryState<T> {
        self.query.state(rt)
    }

    pub fn key(&self, rt: &Runtime) -> Option<K> {
        rt.peek(self.key)
    }

    /// Make the cell track `key`. Returns true if a new run was started,
    /// false if the current key's result (or flight) was reused.
    pub fn ensure<Fut>(
        &self,
        cx: &mut SessionCx<'_>,
        key: K,
        make: impl FnOnce(&K) -> Fut,
    ) -> Result<bool, StormError>
    where
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        let current = cx.runtime.peek(self.key);
        if current.as_ref() == Some(&key)
            && !matches!(cx.runtime.peek(self.query.state), QueryState::Pending)
        {
            return Ok(false);
        }
        let fut = make(&key);
        cx.runtime.set(self.key, Some(key));
        self.query.start(cx, fut)?;
        Ok(true)
    }

    pub fn cancel(&self, rt: &mut Runtime) {
        self.query.cancel(rt);
    }
}

// ----------- Tests -----------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::RenderError;
    use crate::session::test_cx::TestLoop;
    use crate::task::{StormBudget, StormConfig, StormPolicy};
    use std::time::Duration;

    #[tokio::test]
    async fn pending_until_first_start() {
        let mut driver = TestLoop::new();
        let query = QueryCell::<i32>::new(driver.runtime());
        assert_eq!(query.peek_state(driver.runtime()), QueryState::Pending);
    }

    #[tokio::test]
    async fn completion_arrives_through_the_loop() {
        let mut driver = TestLoop::new();
        let query = QueryCell::<i32>::new(driver.runtime());

        driver
            .with_cx(|cx| query.start(cx, async { Ok(7) }))
            .expect("admitted");
        assert!(query.peek_state(driver.runtime()).is_loading());

        driver.pump_one().await;
        assert_eq!(query.peek_state(driver.runtime()), QueryState::Ready(7));
    }

    #[tokio::test]
    async fn failure_becomes_error_state() {
        let mut driver = TestLoop::new();
        let query = QueryCell::<i32>::new(driver.runtime());

        driver
            .with_cx(|cx| query.start(cx, async { Err("backend down".to_owned()) }))
            .expect("admitted");
        driver.pump_one().await;
        assert_eq!(
            query.peek_state(driver.runtime()),
            QueryState::Error("backend down".to_owned())
        );
    }

    #[tokio::test]
    async fn superseded_start_never_delivers() {
        let mut driver = TestLoop::new();
        let query = QueryCell::<i32>::new(driver.runtime());

        // On a current-thread runtime neither spawned task has run yet
        // when the second start aborts the first.
        driver
            .with_cx(|cx| query.start(cx, async { Ok(1) }))
            .expect("admitted");
        driver
            .with_cx(|cx| query.start(cx, async { Ok(2) }))
            .expect("admitted");

        driver.pump_one().await;
        assert_eq!(query.peek_state(driver.runtime()), QueryState::Ready(2));
        assert!(driver.idle());
    }

    #[tokio::test]
    async fn stale_completion_is_dropped() {
        let mut driver = TestLoop::new();
        let query = QueryCell::<i32>::new(driver.runtime());

        driver
            .with_cx(|cx| query.start(cx, async { Ok(1) }))
            .expect("admitted");
        // Let the spawned task run and queue its completion.
        tokio::task::yield_now().await;
        // Bump the generation after the completion is already queued.
        query.cancel(driver.runtime());

        driver.pump_one().await;
        assert_eq!(query.peek_state(driver.runtime()), QueryState::Pending);
    }

    #[tokio::test]
    async fn completion_after_owner_disposal_is_a_no_op() {
        let mut driver = TestLoop::new();
        let scope = driver.runtime().create_scope();
        let node = driver.runtime().create_render_node();
        let mut slot: Option<QueryCell<i32>> = None;
        driver
            .runtime()
            .render_scope(node, scope, &mut |rt: &mut Runtime| {
                slot = Some(QueryCell::new(rt));
                Ok::<_, RenderError>(())
            })
            .expect("render");
        let query = slot.expect("created");

        driver
            .with_cx(|cx| query.start(cx, async { Ok(3) }))
            .expect("admitted");
        // Queue the completion, then pull the rug out.
        tokio::task::yield_now().await;
        driver.runtime().dispose_scope(scope);

        driver.pump_one().await;
        assert!(driver.idle());
    }

    #[tokio::test]
    async fn throttled_start_leaves_state_alone() {
        let mut config = StormConfig::default();
        config.query.max_starts = 0;
        config.query.policy = StormPolicy::Throttle;
        config.query.window = Duration::from_secs(1);
        let mut driver = TestLoop::with_storm(StormBudget::new(config));
        let query = QueryCell::<i32>::new(driver.runtime());

        let result = driver.with_cx(|cx| query.start(cx, async { Ok(1) }));
        assert!(matches!(result, Err(StormError::Throttled { .. })));
        assert_eq!(query.peek_state(driver.runtime()), QueryState::Pending);
    }

    #[tokio::test]
    async fn keyed_cell_restarts_on_key_change_only() {
        let mut driver = TestLoop::new();
        let keyed = KeyedQueryCell::<String, i32>::new(driver.runtime());

        let started = driver
            .with_cx(|cx| keyed.ensure(cx, "a".to_owned(), |_| async { Ok(1) }))
            .expect("admitted");
        assert!(started);
        driver.pump_one().await;
        assert_eq!(keyed.state(driver.runtime()), QueryState::Ready(1));

        // Same key: cached result stands, nothing starts.
        let started = driver
            .with_cx(|cx| keyed.ensure(cx, "a".to_owned(), |_| async { Ok(99) }))
            .expect("admitted");
        assert!(!started);
        assert!(driver.idle());

        // New key: fresh flight.
        let started = driver
            .with_cx(|cx| keyed.ensure(cx, "b".to_owned(), |_| async { Ok(2) }))
            .expect("admitted");
        assert!(started);
        assert!(keyed.state(driver.runtime()).is_loading());
        driver.pump_one().await;
        assert_eq!(keyed.state(driver.runtime()), QueryState::Ready(2));
    }
}
