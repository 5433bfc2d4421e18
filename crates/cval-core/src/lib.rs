#![forbid(unsafe_code)]

//! Core: observable values, subscriptions, executors, and logging setup.

pub mod executor;
pub mod logging;
pub mod observable;
pub mod sync;

pub use executor::{Executor, InlineExecutor, QueueExecutor, Task, ThreadExecutor, WorkerPool};
pub use observable::{Dependency, Observable, ObservableId, Subscription};
