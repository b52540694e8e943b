//! # engine
//!
//! Change/task engine for installed-package state.
//!
//! A [`Change`] is a user-visible operation (install, update, remove) made
//! of an ordered list of [`Task`]s. Planners in [`snapstate`] create changes
//! from fixed templates; the [`Runner`] executes their tasks through a
//! [`backend::Backend`] and, when one fails or the change is aborted,
//! compensates the completed tasks in reverse order.
//!
//! Everything the engine knows lives in a shared [`statestore::State`]:
//! the change table under `changes`, installed snaps under `snaps`, and
//! users under `auth`. Request handlers and the runner interleave at the
//! granularity of a single task transition.
//!
//! ## Example
//!
//! ```
//! use engine::backend::{InstallFlags, MockBackend};
//! use engine::{Runner, RunnerOptions, Status, snapstate};
//! use statestore::State;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let state = Arc::new(State::in_memory());
//! let backend = Arc::new(MockBackend::new());
//! let runner = Runner::new(Arc::clone(&state), backend, RunnerOptions::default()).unwrap();
//!
//! let change = snapstate::install(&mut state.lock(), "hello", "stable", InstallFlags::default(), None).unwrap();
//! runner.settle(Duration::from_secs(10)).unwrap();
//!
//! let change = engine::change::change(&state.lock(), &change.id).unwrap();
//! assert_eq!(change.status(), Status::Done);
//! ```

pub mod backend;
pub mod change;
pub mod error;
pub mod runner;
pub mod snapstate;

pub use change::{
    Change, ChangeInfo, ChangeSelector, ChangeTable, Status, Task, TaskProgress, abort, changes,
    prune,
};
pub use error::{Error, Result};
pub use runner::{Runner, RunnerHandle, RunnerOptions};
pub use snapstate::{Compensation, SnapSetup, SnapState, SnapsTable, TaskKind};
