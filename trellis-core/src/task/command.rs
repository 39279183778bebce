//! Command Cells
//!
//! Async writes with an explicit concurrency policy. Unlike queries,
//! commands are not idempotent, so "just restart it" is never the answer:
//! the policy decides what an invoke does while a previous invoke is still
//! running, and the caller learns whether its invoke was accepted.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::task::AbortHandle;
use tracing::warn;

use crate::reactive::{Cell, Runtime};
use crate::session::SessionCx;

use super::storm::{BudgetKind, StormError};

#[derive(Debug, Clone, PartialEq)]
pub enum CommandState<T> {
    Idle,
    Running,
    Succeeded(T),
    Failed(String),
}

/// What an invoke does while a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPolicy {
    /// Abort the in-flight run and start the new one.
    CancelLatest,
    /// Reject the new invoke.
    DropWhileRunning,
    /// Queue up to `n` inputs; they run in order as runs complete.
    BoundedQueue(usize),
}

type Runner<I, T> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<T, String>> + Send + Sync>;

struct CommandCtl<I, T> {
    generation: u64,
    abort: Option<AbortHandle>,
    queue: VecDeque<I>,
    running: bool,
    policy: CommandPolicy,
    runner: Runner<I, T>,
}

impl<I: Clone, T> Clone for CommandCtl<I, T> {
    fn clone(&self) -> Self {
        CommandCtl {
            generation: self.generation,
            abort: self.abort.clone(),
            queue: self.queue.clone(),
            running: self.running,
            policy: self.policy,
            runner: Arc::clone(&self.runner),
        }
    }
}

/// Handle to one command. The runner is fixed at construction; invokes
/// supply only the input.
pub struct CommandCell<I, T> {
    state: Cell<CommandState<T>>,
    ctl: Cell<CommandCtl<I, T>>,
}

impl<I, T> Clone for CommandCell<I, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I, T> Copy for CommandCell<I, T> {}

impl<I, T> CommandCell<I, T>
where
    I: Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new<F, Fut>(rt: &mut Runtime, policy: CommandPolicy, runner: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        let runner: Runner<I, T> = Arc::new(move |input| Box::pin(runner(input)));
        CommandCell {
            state: rt.cell(CommandState::Idle),
            ctl: rt.cell(CommandCtl {
                generation: 0,
                abort: None,
                queue: VecDeque::new(),
                running: false,
                policy,
                runner,
            }),
        }
    }

    /// Tracked read of the command state.
    pub fn state(&self, rt: &mut Runtime) -> CommandState<T> {
        rt.get(self.state)
    }

    pub fn peek_state(&self, rt: &Runtime) -> CommandState<T> {
        rt.peek(self.state)
    }

    /// Invoke the command. Returns `Ok(true)` if the input was started or
    /// queued, `Ok(false)` if the policy rejected it.
    pub fn invoke(&self, cx: &mut SessionCx<'_>, input: I) -> Result<bool, StormError> {
        let mut ctl = cx.runtime.peek(self.ctl);
        if ctl.running {
            match ctl.policy {
                CommandPolicy::DropWhileRunning => return Ok(false),
                CommandPolicy::BoundedQueue(depth) => {
                    if ctl.queue.len() >= depth {
                        return Ok(false);
                    }
                    ctl.queue.push_back(input);
                    cx.runtime.set(self.ctl, ctl);
                    return Ok(true);
                }
                CommandPolicy::CancelLatest => {
                    if let Some(abort) = ctl.abort.take() {
                        abort.abort();
                    }
                }
            }
        }
        self.start(cx, ctl, input).map(|_| true)
    }

    fn start(
        &self,
        cx: &mut SessionCx<'_>,
        mut ctl: CommandCtl<I, T>,
        input: I,
    ) -> Result<(), StormError> {
        cx.storm().admit(BudgetKind::Command)?;
        let generation = ctl.generation + 1;
        cx.runtime.set(self.state, CommandState::Running);

        let fut = (ctl.runner)(input);
        let handle = cx.handle();
        let cell = *self;
        let task = tokio::spawn(async move {
            let outcome = fut.await;
            handle.dispatch(move |cx| cell.complete(cx, generation, outcome));
        });

        ctl.generation = generation;
        ctl.abort = Some(task.abort_handle());
        ctl.running = true;
        cx.runtime.set(self.ctl, ctl);
        Ok(())
    }

    fn complete(&self, cx: &mut SessionCx<'_>, generation: u64, outcome: Result<T, String>) {
        // A completion from a cancelled run or a disposed owner.
        let Some(mut ctl) = cx.runtime.try_peek(self.ctl) else {
            return;
        };
        if ctl.generation != generation {
            return;
        }
        ctl.running = false;
        ctl.abort = None;
        match outcome {
            Ok(value) => cx.runtime.set(self.state, CommandState::Succeeded(value)),
            Err(err) => cx.runtime.set(self.state, CommandState::Failed(err)),
        }
        if let Some(next) = ctl.queue.pop_front() {
            if let Err(err) = self.start(cx, ctl, next) {
                warn!(error = %err, "queued command dropped by storm budget");
            }
            return;
        }
        cx.runtime.set(self.ctl, ctl);
    }
}

// ----------- Tests -----------
