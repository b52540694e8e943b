//! Runner - drives changes through their task lifecycle
//!
//! Every step follows the same pattern: lock the state, pick the next task
//! and mark it `Doing`/`Undoing`, unlock, call the backend, lock again and
//! record the outcome. Backend calls never run under the state lock, so
//! request handlers stay responsive while a download is in flight.
//!
//! Tasks of one change run strictly in order on a single worker. Separate
//! changes run concurrently on a bounded rayon pool; a stuck backend call
//! only stalls its own change.

use crate::backend::{Backend, Meter};
use crate::change::{CHANGES_KEY, Change, ChangeSelector, ChangeTable, Status, TaskProgress};
use crate::error::{Error, Result};
use crate::snapstate::{
    self, Compensation, SETUP_KEY, SNAPS_KEY, SnapSetup, SnapsTable, TaskContext, TaskKind,
};
use statestore::{State, StateGuard};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often `settle` and `wait_change` re-check the state
const SETTLE_INTERVAL: Duration = Duration::from_millis(10);

/// Runner configuration
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// Number of changes that may run at the same time
    pub jobs: usize,
    /// Pause between passes of the background loop
    pub poll_interval: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// What a change needs next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    /// Every task is terminal
    Ready,
    /// Nothing runnable right now
    Idle,
    Do(usize, TaskKind),
    Undo(usize, Compensation),
}

/// Decide the next step, applying the instantaneous transitions on the way
fn next_step(change: &mut Change) -> Next {
    if change.is_ready() {
        change.refresh_ready();
        return Next::Ready;
    }
    if change
        .tasks
        .iter()
        .any(|t| matches!(t.status, Status::Doing | Status::Undoing))
    {
        return Next::Idle;
    }

    if change.is_unwinding() {
        change.unwind();
        // Latest completed task is compensated first
        while let Some(index) = change.tasks.iter().rposition(|t| t.status == Status::Undo) {
            match change.tasks[index].kind.compensation() {
                Some(compensation) => return Next::Undo(index, compensation),
                None => change.tasks[index].set_status(Status::Undone),
            }
        }
    } else if let Some(index) = change.tasks.iter().position(|t| t.status != Status::Done)
        && change.tasks[index].status == Status::Do
    {
        return Next::Do(index, change.tasks[index].kind);
    }

    change.refresh_ready();
    if change.is_ready() { Next::Ready } else { Next::Idle }
}

/// Records meter updates as task progress
struct TaskMeter {
    state: Arc<State>,
    change_id: String,
    task_id: String,
    total: AtomicU64,
    last_percent: AtomicU64,
}

impl TaskMeter {
    fn new(state: Arc<State>, change_id: &str, task_id: &str) -> Self {
        Self {
            state,
            change_id: change_id.to_string(),
            task_id: task_id.to_string(),
            total: AtomicU64::new(0),
            last_percent: AtomicU64::new(u64::MAX),
        }
    }

    fn persist(&self, progress: TaskProgress) {
        let mut st = self.state.lock();
        if let Err(e) = record_progress(&mut st, &self.change_id, &self.task_id, progress) {
            log::debug!(
                "Cannot record progress of task {} in change {}: {e}",
                self.task_id,
                self.change_id
            );
        }
    }
}

fn record_progress(
    st: &mut StateGuard<'_>,
    change_id: &str,
    task_id: &str,
    progress: TaskProgress,
) -> Result<()> {
    let mut table = ChangeTable::load(st)?;
    let change = table.get_mut(change_id)?;
    if let Some(task) = change.tasks.iter_mut().find(|t| t.id == task_id)
        && task.progress != progress
    {
        task.progress = progress;
        table.save(st)?;
    }
    Ok(())
}

impl Meter for TaskMeter {
    fn start(&self, _label: &str, total: u64) {
        self.total.store(total, Ordering::SeqCst);
        self.last_percent.store(0, Ordering::SeqCst);
        self.persist(TaskProgress::new(0, total));
    }

    fn set(&self, done: u64) {
        let total = self.total.load(Ordering::SeqCst);
        let percent = if total == 0 {
            0
        } else {
            done.min(total) * 100 / total
        };
        // One checkpoint per percent is plenty
        if self.last_percent.swap(percent, Ordering::SeqCst) != percent {
            self.persist(TaskProgress::new(done, total));
        }
    }

    fn finished(&self) {}
}

/// Releases a claimed change when the worker is done with it, even on panic
struct Claim<'a> {
    runner: &'a Runner,
    id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.runner.running().remove(&self.id);
    }
}

/// Drives non-ready changes to completion
pub struct Runner {
    state: Arc<State>,
    backend: Arc<dyn Backend>,
    pool: rayon::ThreadPool,
    running: Mutex<HashSet<String>>,
    poll_interval: Duration,
}

impl Runner {
    pub fn new(
        state: Arc<State>,
        backend: Arc<dyn Backend>,
        opts: RunnerOptions,
    ) -> Result<Arc<Self>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.jobs.max(1))
            .thread_name(|i| format!("overlord-worker-{i}"))
            .panic_handler(|_| log::error!("Runner worker panicked"))
            .build()
            .map_err(|e| Error::Runner(format!("Failed to create thread pool: {e}")))?;

        Ok(Arc::new(Self {
            state,
            backend,
            pool,
            running: Mutex::new(HashSet::new()),
            poll_interval: opts.poll_interval,
        }))
    }

    fn running(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.running.lock() {
            Ok(running) => running,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn claim(&self, id: &str) -> Option<Claim<'_>> {
        if !self.running().insert(id.to_string()) {
            return None;
        }
        Some(Claim {
            runner: self,
            id: id.to_string(),
        })
    }

    /// Mark tasks left in `Doing`/`Undoing` by a previous process as failed
    ///
    /// A task found mid-flight at startup may or may not have had its
    /// effect; it is never re-executed. Call once before the first
    /// [`Runner::ensure`]. Returns the number of interrupted tasks.
    pub fn recover(&self) -> Result<usize> {
        let mut st = self.state.lock();
        let mut table = ChangeTable::load(&st)?;
        let mut interrupted = 0;

        for change in table.changes.values_mut().filter(|c| !c.is_ready()) {
            let mut hit = false;
            for task in change
                .tasks
                .iter_mut()
                .filter(|t| matches!(t.status, Status::Doing | Status::Undoing))
            {
                task.log_error("interrupted before completion");
                task.set_status(Status::Error);
                hit = true;
                interrupted += 1;
            }
            if hit {
                log::warn!("Change {} was interrupted, rolling it back", change.id);
                change.unwind();
                change.refresh_ready();
            }
        }

        if interrupted > 0 {
            table.save(&mut st)?;
        }
        Ok(interrupted)
    }

    /// Hand every non-ready change that isn't already running to the pool
    ///
    /// Returns the number of changes picked up by this pass.
    pub fn ensure(self: &Arc<Self>) -> Result<usize> {
        let pending: Vec<String> = {
            let st = self.state.lock();
            ChangeTable::load(&st)?
                .select(ChangeSelector::InProgress)
                .into_iter()
                .map(|c| c.id.clone())
                .collect()
        };

        let mut started = 0;
        for id in pending {
            if !self.running().insert(id.clone()) {
                continue;
            }
            let runner = Arc::clone(self);
            self.pool.spawn(move || {
                let _claim = Claim {
                    runner: &runner,
                    id: id.clone(),
                };
                runner.drive(&id);
            });
            started += 1;
        }
        Ok(started)
    }

    /// Run `id` on the calling thread until it is ready or blocked
    pub fn run_change(&self, id: &str) -> Result<()> {
        let Some(_claim) = self.claim(id) else {
            return Ok(());
        };
        while self.step(id)? {}
        Ok(())
    }

    fn drive(&self, id: &str) {
        loop {
            match self.step(id) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    log::warn!("Change {id} stalled: {e}");
                    break;
                }
            }
        }
    }

    /// Advance `id` by one task; false when there was nothing to do
    fn step(&self, id: &str) -> Result<bool> {
        let (next, setup, task_id) = {
            let mut st = self.state.lock();
            let mut table = ChangeTable::load(&st)?;
            let change = table.get_mut(id)?;
            let before = change.clone();

            let next = next_step(change);
            let setup: SnapSetup = change.get(SETUP_KEY)?.unwrap_or_default();
            let mut task_id = String::new();
            match next {
                Next::Do(index, _) => {
                    change.tasks[index].set_status(Status::Doing);
                    task_id = change.tasks[index].id.clone();
                }
                Next::Undo(index, _) => {
                    change.tasks[index].set_status(Status::Undoing);
                    task_id = change.tasks[index].id.clone();
                }
                Next::Ready | Next::Idle => {}
            }

            let finished = next == Next::Ready && before.ready_time.is_none();
            if finished {
                log::info!("Change {id} finished: {}", change.status());
            }
            if *change != before {
                table.save(&mut st)?;
            }
            (next, setup, task_id)
        };

        match next {
            Next::Ready | Next::Idle => Ok(false),
            Next::Do(index, kind) => {
                self.run_forward(id, index, &task_id, kind, setup)?;
                Ok(true)
            }
            Next::Undo(index, compensation) => {
                self.run_compensation(id, index, &task_id, compensation, &setup)?;
                Ok(true)
            }
        }
    }

    fn run_forward(
        &self,
        id: &str,
        index: usize,
        task_id: &str,
        kind: TaskKind,
        mut setup: SnapSetup,
    ) -> Result<()> {
        log::debug!("Change {id}: {kind} started");
        let meter = TaskMeter::new(Arc::clone(&self.state), id, task_id);
        let ctx = TaskContext {
            state: &self.state,
            backend: self.backend.as_ref(),
            meter: &meter,
        };
        let outcome = snapstate::do_task(&ctx, kind, &mut setup);

        let mut st = self.state.lock();
        let mut table = ChangeTable::load(&st)?;
        let mut snaps = SnapsTable::load(&st)?;
        let mut snaps_changed = false;
        let change = table.get_mut(id)?;

        match outcome {
            Ok(()) => {
                let task = &mut change.tasks[index];
                task.set_status(Status::Done);
                task.progress = TaskProgress::new(task.progress.total, task.progress.total);
                snaps_changed = snapstate::record(&mut snaps, kind, &setup);
                change.set(SETUP_KEY, &setup)?;
                log::debug!("Change {id}: {kind} done");
                if change.is_unwinding() {
                    change.unwind();
                }
            }
            Err(e) => {
                let failure = Error::BackendOperationFailed {
                    kind,
                    message: format!("{e:#}"),
                };
                log::warn!("Change {id}: {failure}");
                let task = &mut change.tasks[index];
                task.log_error(&failure.to_string());
                task.set_status(Status::Error);
                change.unwind();
            }
        }
        change.refresh_ready();

        let mut batch = st.batch();
        batch.set(CHANGES_KEY, &table)?;
        if snaps_changed {
            batch.set(SNAPS_KEY, &snaps)?;
        }
        batch.commit()?;
        Ok(())
    }

    fn run_compensation(
        &self,
        id: &str,
        index: usize,
        task_id: &str,
        compensation: Compensation,
        setup: &SnapSetup,
    ) -> Result<()> {
        log::debug!("Change {id}: {compensation} started");
        let meter = TaskMeter::new(Arc::clone(&self.state), id, task_id);
        let ctx = TaskContext {
            state: &self.state,
            backend: self.backend.as_ref(),
            meter: &meter,
        };
        let outcome = snapstate::undo_task(&ctx, compensation, setup);

        let mut st = self.state.lock();
        let mut table = ChangeTable::load(&st)?;
        let mut snaps = SnapsTable::load(&st)?;
        let mut snaps_changed = false;
        let change = table.get_mut(id)?;
        let task = &mut change.tasks[index];

        match outcome {
            Ok(()) => {
                task.set_status(Status::Undone);
                snaps_changed = snapstate::record_undo(&mut snaps, compensation, setup);
            }
            Err(e) => {
                let failure = Error::CompensationFailed {
                    kind: compensation,
                    message: format!("{e:#}"),
                };
                log::warn!("Change {id}: {failure}");
                task.log_error(&failure.to_string());
                task.set_status(Status::Error);
            }
        }
        change.refresh_ready();

        let mut batch = st.batch();
        batch.set(CHANGES_KEY, &table)?;
        if snaps_changed {
            batch.set(SNAPS_KEY, &snaps)?;
        }
        batch.commit()?;
        Ok(())
    }

    fn pending(&self) -> Result<usize> {
        let st = self.state.lock();
        Ok(ChangeTable::load(&st)?
            .select(ChangeSelector::InProgress)
            .len())
    }

    /// Keep running passes until every change is ready
    pub fn settle(self: &Arc<Self>, timeout: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            self.ensure()?;
            let pending = self.pending()?;
            if pending == 0 && self.running().is_empty() {
                return Ok(());
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(Error::SettleTimeout { pending });
            }
            thread::sleep(SETTLE_INTERVAL);
        }
    }

    /// Drive passes until change `id` is ready, reporting each new snapshot
    pub fn wait_change(
        self: &Arc<Self>,
        id: &str,
        timeout: Option<Duration>,
        mut on_update: impl FnMut(&Change),
    ) -> Result<Change> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut last: Option<Change> = None;
        loop {
            self.ensure()?;
            let change = crate::change::change(&self.state.lock(), id)?;
            if last.as_ref() != Some(&change) {
                on_update(&change);
            }
            if change.is_ready() {
                return Ok(change);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(Error::SettleTimeout { pending: 1 });
            }
            last = Some(change);
            thread::sleep(SETTLE_INTERVAL);
        }
    }

    /// Spawn the background loop
    ///
    /// The loop runs a pass every poll interval until the returned handle
    /// is stopped or dropped.
    pub fn start(self: &Arc<Self>) -> Result<RunnerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let runner = Arc::clone(self);
        let stop_flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("overlord-runner".to_string())
            .spawn(move || {
                log::info!("Runner loop started");
                while !stop_flag.load(Ordering::SeqCst) {
                    if let Err(e) = runner.ensure() {
                        log::warn!("Runner pass failed: {e}");
                    }
                    thread::park_timeout(runner.poll_interval);
                }
                log::info!("Runner loop stopped");
            })
            .map_err(|e| Error::Runner(format!("Failed to spawn runner loop: {e}")))?;

        Ok(RunnerHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Handle to the background loop; stops it on drop
#[derive(Debug)]
pub struct RunnerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RunnerHandle {
    /// Run the next pass now instead of waiting for the poll interval
    pub fn wake(&self) {
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }

    /// Stop the loop and wait for it to exit
    ///
    /// Backend calls already in flight finish on the worker pool.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::error!("Runner loop panicked");
            }
        }
    }
}
