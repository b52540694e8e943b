//! In-memory backend for tests.
//!
//! Every call is recorded as `"<operation>:<snap>"`, e.g.
//! `"undo-copy-snap-data:hello"`. Operations can be made to fail with
//! [`MockBackend::fail`] or to block on a [`Gate`] with
//! [`MockBackend::hold`].
//!
//! ```
//! use engine::backend::{Backend, MockBackend, SnapInfo};
//!
//! let mock = MockBackend::new();
//! mock.fail("link-snap");
//! let info = SnapInfo { name: "hello".into(), revision: 1, ..Default::default() };
//! assert!(mock.link_snap(&info).is_err());
//! assert_eq!(mock.calls(), vec!["link-snap:hello"]);
//! ```

use super::{Backend, Checker, InstallFlags, Meter, SideInfo, SnapInfo, SnapType};
use anyhow::{Result, bail};
use auth::Authenticator;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Blocks an operation until opened
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    entered: bool,
    open: bool,
}

impl Gate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Wait until an operation is blocked on the gate
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        let state = self.lock();
        match self
            .changed
            .wait_timeout_while(state, timeout, |s| !s.entered)
        {
            Ok((state, _)) => state.entered,
            Err(poisoned) => poisoned.into_inner().0.entered,
        }
    }

    /// Release the blocked operation, and any later ones
    pub fn open(&self) {
        self.lock().open = true;
        self.changed.notify_all();
    }

    fn pass(&self) {
        let mut state = self.lock();
        state.entered = true;
        self.changed.notify_all();
        while !state.open {
            state = match self.changed.wait(state) {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<String>,
    failures: HashSet<String>,
    gates: HashMap<String, Arc<Gate>>,
    candidates: HashMap<String, SnapInfo>,
    authorizations: Vec<String>,
}

/// Recording backend double
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make every call of `operation` fail
    pub fn fail(&self, operation: &str) {
        self.lock().failures.insert(operation.to_string());
    }

    /// Block calls of `operation` until the returned gate is opened
    ///
    /// `operation` is either a bare operation (`"link-snap"`) or one
    /// scoped to a snap (`"link-snap:hello"`).
    pub fn hold(&self, operation: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.lock()
            .gates
            .insert(operation.to_string(), Arc::clone(&gate));
        gate
    }

    /// Serve `info` as the store candidate for its name
    pub fn set_candidate(&self, info: SnapInfo) {
        self.lock().candidates.insert(info.name.clone(), info);
    }

    /// Recorded calls, oldest first
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Authorization headers seen by `download`
    pub fn authorizations(&self) -> Vec<String> {
        self.lock().authorizations.clone()
    }

    fn record(&self, operation: &str, name: &str) -> Result<()> {
        let gate = {
            let mut inner = self.lock();
            let call = format!("{operation}:{name}");
            let gate = inner.gates.get(&call).or_else(|| inner.gates.get(operation)).cloned();
            inner.calls.push(call);
            gate
        };
        if let Some(gate) = gate {
            gate.pass();
        }

        if self.lock().failures.contains(operation) {
            bail!("mock {operation} failure for {name:?}");
        }
        Ok(())
    }
}

impl Backend for MockBackend {
    fn download(
        &self,
        name: &str,
        channel: &str,
        checker: Checker<'_>,
        meter: &dyn Meter,
        auth: Option<&dyn Authenticator>,
    ) -> Result<(SnapInfo, PathBuf)> {
        let candidate = {
            let mut inner = self.lock();
            if let Some(auth) = auth {
                inner.authorizations.push(auth.authorization());
            }
            inner.candidates.get(name).cloned()
        };
        self.record("download", name)?;

        let info = candidate.unwrap_or_else(|| SnapInfo {
            name: name.to_string(),
            revision: 1,
            version: "1.0".to_string(),
            channel: channel.to_string(),
            snap_type: SnapType::App,
            download_size: 100,
            ..Default::default()
        });
        checker(&info)?;

        meter.start(&format!("Download {name}"), info.download_size);
        meter.set(info.download_size);
        meter.finished();

        let path = PathBuf::from("/var/lib/mock/downloads").join(info.file_name());
        Ok((info, path))
    }

    fn check_snap(
        &self,
        path: &Path,
        _current: Option<&SnapInfo>,
        _flags: InstallFlags,
    ) -> Result<()> {
        // Downloads are named <name>_<revision>.snap
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.rsplit_once('_'))
            .map_or("-", |(name, _)| name);
        self.record("check-snap", name)
    }

    fn setup_snap(&self, _path: &Path, side: &SideInfo, _flags: InstallFlags) -> Result<()> {
        self.record("setup-snap", &side.name)
    }

    fn copy_snap_data(
        &self,
        new: &SnapInfo,
        _old: Option<&SnapInfo>,
        _flags: InstallFlags,
    ) -> Result<()> {
        self.record("copy-snap-data", &new.name)
    }

    fn link_snap(&self, info: &SnapInfo) -> Result<()> {
        self.record("link-snap", &info.name)
    }

    fn undo_setup_snap(&self, info: &SnapInfo) -> Result<()> {
        self.record("undo-setup-snap", &info.name)
    }

    fn undo_copy_snap_data(&self, new: &SnapInfo, _flags: InstallFlags) -> Result<()> {
        self.record("undo-copy-snap-data", &new.name)
    }

    fn can_remove(&self, info: &SnapInfo, active: bool) -> bool {
        // Matches the local backend: active non-app snaps stay
        !(active && info.snap_type != SnapType::App)
    }

    fn unlink_snap(&self, info: &SnapInfo, _meter: &dyn Meter) -> Result<()> {
        self.record("unlink-snap", &info.name)
    }

    fn remove_snap_files(&self, info: &SnapInfo, _meter: &dyn Meter) -> Result<()> {
        self.record("remove-snap-files", &info.name)
    }

    fn remove_snap_data(&self, info: &SnapInfo) -> Result<()> {
        self.record("remove-snap-data", &info.name)
    }
}
