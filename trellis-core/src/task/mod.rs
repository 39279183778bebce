//! Async Cells and Storm Budgets
//!
//! Bridges between the synchronous reactive runtime and async work. A
//! query or command runs its future on the tokio pool, but its state cell
//! is only ever written from the owning session's loop: completions are
//! marshalled back as units of work. Storm budgets sit in front of every
//! start so one busy view cannot flood the pool.

mod command;
mod query;
mod storm;

pub use command::{CommandCell, CommandPolicy, CommandState};
pub use query::{KeyedQueryCell, QueryCell, QueryState};
pub use storm::{
    BudgetConfig, BudgetKind, StormBudget, StormConfig, StormError, StormPolicy,
};
