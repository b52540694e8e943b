//! Changes, tasks and the persisted change table
//!
//! A [`Change`] is an ordered list of [`Task`]s created together by a
//! planner in [`crate::snapstate`]. Task statuses are the only thing the
//! runner mutates; a change's own status is always derived from them plus
//! its abort flag, see [`Change::status`].

use crate::error::{Error, Result};
use crate::snapstate::TaskKind;
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use statestore::StateGuard;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// State key holding the [`ChangeTable`]
pub const CHANGES_KEY: &str = "changes";

/// Lifecycle status of a task, and the derived status of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Do,
    Doing,
    Done,
    Undo,
    Undoing,
    Undone,
    Error,
    Abort,
    Hold,
}

impl Status {
    /// Whether no further transition can happen from this status
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            Status::Done | Status::Undone | Status::Error | Status::Abort
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Do => "Do",
            Status::Doing => "Doing",
            Status::Done => "Done",
            Status::Undo => "Undo",
            Status::Undoing => "Undoing",
            Status::Undone => "Undone",
            Status::Error => "Error",
            Status::Abort => "Abort",
            Status::Hold => "Hold",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a task; `total == 0` means indeterminate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub done: u64,
    pub total: u64,
}

impl TaskProgress {
    /// Build a progress value, clamping `done` to `total`
    pub fn new(done: u64, total: u64) -> Self {
        Self {
            done: done.min(total),
            total,
        }
    }
}

/// One step of a change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub summary: String,
    pub status: Status,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default)]
    pub progress: TaskProgress,
    pub spawn_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_time: Option<DateTime<Utc>>,
}

impl Task {
    fn new(id: String, kind: TaskKind, summary: String) -> Self {
        Self {
            id,
            kind,
            summary,
            status: Status::Do,
            log: Vec::new(),
            progress: TaskProgress::default(),
            spawn_time: Utc::now(),
            ready_time: None,
        }
    }

    /// Move to `status`; the ready time tracks whether the status is terminal
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
        if !status.is_ready() {
            self.ready_time = None;
        } else if self.ready_time.is_none() {
            self.ready_time = Some(Utc::now());
        }
    }

    pub fn log_info(&mut self, message: &str) {
        self.append_log("INFO", message);
    }

    pub fn log_error(&mut self, message: &str) {
        self.append_log("ERROR", message);
    }

    fn append_log(&mut self, level: &str, message: &str) {
        let stamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        self.log.push(format!("{stamp} {level} {message}"));
    }

    /// Messages of the `ERROR` entries in the log, oldest first
    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.log.iter().filter_map(|entry| {
            let (_, rest) = entry.split_once(' ')?;
            rest.strip_prefix("ERROR ")
        })
    }
}

/// A multi-step modification driven by the runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Change {
    pub id: String,
    pub kind: String,
    pub summary: String,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub abort_requested: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    data: BTreeMap<String, serde_json::Value>,
    pub spawn_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_time: Option<DateTime<Utc>>,
}

impl Change {
    fn new(id: String, kind: &str, summary: String) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            summary,
            tasks: Vec::new(),
            abort_requested: false,
            data: BTreeMap::new(),
            spawn_time: Utc::now(),
            ready_time: None,
        }
    }

    /// Append a task in `Do`; ids are positional, starting at 1
    pub fn add_task(&mut self, kind: TaskKind, summary: impl Into<String>) -> &mut Task {
        let id = (self.tasks.len() + 1).to_string();
        self.tasks.push(Task::new(id, kind, summary.into()));
        let last = self.tasks.len() - 1;
        &mut self.tasks[last]
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Every task is in a terminal status
    pub fn is_ready(&self) -> bool {
        self.tasks.iter().all(|task| task.status.is_ready())
    }

    /// Status derived from the task statuses and the abort flag
    ///
    /// Highest precedence first: `Error`, `Undoing` (also while compensated
    /// tasks exist and the change isn't ready yet), `Abort`, `Doing`,
    /// `Hold`, `Done`.
    pub fn status(&self) -> Status {
        let any = |status: Status| self.tasks.iter().any(|task| task.status == status);

        if any(Status::Error) {
            return Status::Error;
        }
        if any(Status::Undoing) || any(Status::Undo) || (any(Status::Undone) && !self.is_ready())
        {
            return Status::Undoing;
        }
        if self.abort_requested && !any(Status::Doing) {
            return Status::Abort;
        }
        if any(Status::Do) || any(Status::Doing) {
            return Status::Doing;
        }
        if any(Status::Hold) {
            return Status::Hold;
        }
        if self.tasks.iter().all(|task| task.status == Status::Done) {
            Status::Done
        } else {
            Status::Abort
        }
    }

    /// Aggregated description of every failed task, if any failed
    pub fn err(&self) -> Option<String> {
        let failures: Vec<String> = self
            .tasks
            .iter()
            .filter(|task| task.status == Status::Error)
            .map(|task| {
                let reason = task.errors().last().unwrap_or("unknown error");
                format!("- {} ({reason})", task.summary)
            })
            .collect();

        if failures.is_empty() {
            return None;
        }
        Some(format!(
            "cannot perform the following tasks:\n{}",
            failures.join("\n")
        ))
    }

    /// Whether the change is rolling back: aborted, or a task failed
    pub fn is_unwinding(&self) -> bool {
        self.abort_requested || self.tasks.iter().any(|t| t.status == Status::Error)
    }

    /// Queue the rollback
    ///
    /// Tasks still in `Do` become `Abort` and completed tasks that have a
    /// compensation become `Undo`, in the same write as the failure or abort
    /// that triggered it, so the change never looks ready in between.
    pub(crate) fn unwind(&mut self) {
        for task in &mut self.tasks {
            match task.status {
                Status::Do => task.set_status(Status::Abort),
                Status::Done if task.kind.compensation().is_some() => {
                    task.set_status(Status::Undo);
                }
                _ => {}
            }
        }
    }

    /// Stamp the ready time if every task just became terminal
    pub(crate) fn refresh_ready(&mut self) {
        if self.ready_time.is_none() && self.is_ready() {
            self.ready_time = Some(Utc::now());
        }
    }

    /// Decode the change-scoped value stored under `key`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(value) => T::deserialize(value).map(Some).map_err(|source| {
                statestore::Error::Decode {
                    key: key.to_string(),
                    source,
                }
                .into()
            }),
        }
    }

    /// Store a change-scoped value shared by the change's tasks
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(statestore::Error::from)?;
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    /// Snapshot for the control surface, with the derived fields filled in
    pub fn info(&self) -> ChangeInfo {
        ChangeInfo {
            id: self.id.clone(),
            kind: self.kind.clone(),
            summary: self.summary.clone(),
            status: self.status(),
            tasks: self.tasks.clone(),
            ready: self.is_ready(),
            err: self.err(),
            spawn_time: self.spawn_time,
            ready_time: self.ready_time,
        }
    }
}

/// Externally visible view of a change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChangeInfo {
    pub id: String,
    pub kind: String,
    pub summary: String,
    pub status: Status,
    pub tasks: Vec<Task>,
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    pub spawn_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_time: Option<DateTime<Utc>>,
}

/// Filter for listing changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangeSelector {
    #[default]
    InProgress,
    Ready,
    All,
}

impl ChangeSelector {
    pub fn matches(self, change: &Change) -> bool {
        match self {
            ChangeSelector::InProgress => !change.is_ready(),
            ChangeSelector::Ready => change.is_ready(),
            ChangeSelector::All => true,
        }
    }
}

impl FromStr for ChangeSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in-progress" => Ok(ChangeSelector::InProgress),
            "ready" => Ok(ChangeSelector::Ready),
            "all" => Ok(ChangeSelector::All),
            other => Err(Error::InvalidSelector {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ChangeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeSelector::InProgress => "in-progress",
            ChangeSelector::Ready => "ready",
            ChangeSelector::All => "all",
        })
    }
}

/// All changes, keyed by id, with their own id counter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChangeTable {
    pub last_id: u64,
    #[serde(default)]
    pub changes: BTreeMap<String, Change>,
}

impl ChangeTable {
    /// Load the table; a table that was never written is empty
    pub fn load(st: &StateGuard<'_>) -> Result<Self> {
        match st.get(CHANGES_KEY) {
            Ok(table) => Ok(table),
            Err(e) if e.is_no_state() => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, st: &mut StateGuard<'_>) -> Result<()> {
        st.set(CHANGES_KEY, self)?;
        Ok(())
    }

    /// Create an empty change with the next id
    pub fn new_change(&mut self, kind: &str, summary: impl Into<String>) -> &mut Change {
        self.last_id += 1;
        let id = self.last_id.to_string();
        self.changes
            .entry(id.clone())
            .or_insert_with(|| Change::new(id, kind, summary.into()))
    }

    pub fn get(&self, id: &str) -> Result<&Change> {
        self.changes.get(id).ok_or_else(|| Error::ChangeNotFound {
            id: id.to_string(),
        })
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Change> {
        self.changes.get_mut(id).ok_or_else(|| Error::ChangeNotFound {
            id: id.to_string(),
        })
    }

    /// Changes matching `selector`, ordered by numeric id
    pub fn select(&self, selector: ChangeSelector) -> Vec<&Change> {
        let mut selected: Vec<&Change> = self
            .changes
            .values()
            .filter(|change| selector.matches(change))
            .collect();
        selected.sort_by_key(|change| change.id.parse::<u64>().unwrap_or(u64::MAX));
        selected
    }
}

/// Look up a change by id
pub fn change(st: &StateGuard<'_>, id: &str) -> Result<Change> {
    ChangeTable::load(st)?.get(id).cloned()
}

/// Changes matching `selector`, ordered by numeric id
pub fn changes(st: &StateGuard<'_>, selector: ChangeSelector) -> Result<Vec<Change>> {
    let table = ChangeTable::load(st)?;
    Ok(table.select(selector).into_iter().cloned().collect())
}

/// Request abort of a non-ready change
///
/// Tasks that haven't started become `Abort` immediately. A task currently
/// in `Doing` runs to completion, after which the runner compensates the
/// completed tasks in reverse order.
pub fn abort(st: &mut StateGuard<'_>, id: &str) -> Result<Change> {
    let mut table = ChangeTable::load(st)?;
    let change = table.get_mut(id)?;
    if change.is_ready() {
        return Err(Error::ChangeReady { id: id.to_string() });
    }

    change.abort_requested = true;
    if change.tasks.iter().any(|t| t.status == Status::Doing) {
        for task in change.tasks.iter_mut().filter(|t| t.status == Status::Do) {
            task.set_status(Status::Abort);
        }
    } else {
        change.unwind();
    }
    change.refresh_ready();
    let aborted = change.clone();

    table.save(st)?;
    log::info!("Abort requested for change {id}");
    Ok(aborted)
}

/// Drop ready changes whose ready time is older than `older_than`
pub fn prune(st: &mut StateGuard<'_>, older_than: Duration) -> Result<usize> {
    let Some(cutoff) = TimeDelta::from_std(older_than)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
    else {
        return Ok(0);
    };

    let mut table = ChangeTable::load(st)?;
    let before = table.changes.len();
    table.changes.retain(|_, change| {
        !(change.is_ready() && change.ready_time.is_some_and(|ready| ready < cutoff))
    });
    let pruned = before - table.changes.len();

    if pruned > 0 {
        table.save(st)?;
        log::info!("Pruned {pruned} ready change(s)");
    }
    Ok(pruned)
}
