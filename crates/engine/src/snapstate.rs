//! Snap operations: task templates, handlers and the installed-snap table.
//!
//! Planners ([`install`], [`update`], [`remove`]) create a change with a fixed
//! task list and a [`SnapSetup`] shared by its tasks. The runner calls
//! [`do_task`] and [`undo_task`] with the lock released, then records the
//! outcome with [`record`] in the same checkpoint as the task transition.

use crate::backend::{Backend, InstallFlags, Meter, SnapInfo};
use crate::change::{Change, ChangeTable};
use crate::error::{Error, Result};
use anyhow::{Context, bail};
use auth::Authenticator;
use serde::{Deserialize, Serialize};
use statestore::{State, StateGuard};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// State key holding the [`SnapsTable`]
pub const SNAPS_KEY: &str = "snaps";

/// Change-data key holding the [`SnapSetup`]
pub const SETUP_KEY: &str = "snap-setup";

/// Channel used when a request doesn't name one
pub const DEFAULT_CHANNEL: &str = "stable";

/// What a task does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    DownloadSnap,
    CheckSnap,
    SetupSnap,
    CopySnapData,
    LinkSnap,
    UnlinkSnap,
    RemoveSnapFiles,
    RemoveSnapData,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::DownloadSnap => "download-snap",
            TaskKind::CheckSnap => "check-snap",
            TaskKind::SetupSnap => "setup-snap",
            TaskKind::CopySnapData => "copy-snap-data",
            TaskKind::LinkSnap => "link-snap",
            TaskKind::UnlinkSnap => "unlink-snap",
            TaskKind::RemoveSnapFiles => "remove-snap-files",
            TaskKind::RemoveSnapData => "remove-snap-data",
        }
    }

    /// Operation that reverts this kind, if it has one
    pub fn compensation(self) -> Option<Compensation> {
        match self {
            TaskKind::SetupSnap => Some(Compensation::UndoSetupSnap),
            TaskKind::CopySnapData => Some(Compensation::UndoCopySnapData),
            TaskKind::LinkSnap => Some(Compensation::UnlinkSnap),
            TaskKind::DownloadSnap
            | TaskKind::CheckSnap
            | TaskKind::UnlinkSnap
            | TaskKind::RemoveSnapFiles
            | TaskKind::RemoveSnapData => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compensating operations
///
/// A linked revision is taken down with the backend's `unlink_snap`, after
/// which the revision that was current before the change is linked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compensation {
    UndoSetupSnap,
    UndoCopySnapData,
    UnlinkSnap,
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compensation::UndoSetupSnap => "undo-setup-snap",
            Compensation::UndoCopySnapData => "undo-copy-snap-data",
            Compensation::UnlinkSnap => "unlink-snap",
        })
    }
}

/// Parameters shared by the tasks of one snap change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapSetup {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(default)]
    pub flags: InstallFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    /// Downloaded file, set by download-snap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snap_path: Option<PathBuf>,
    /// Revision being installed or removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<SnapInfo>,
    /// Revision that was current when the change was planned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<SnapInfo>,
    /// Flags `previous` was installed with
    #[serde(default)]
    pub previous_flags: InstallFlags,
}

impl SnapSetup {
    fn info(&self) -> anyhow::Result<&SnapInfo> {
        self.info
            .as_ref()
            .with_context(|| format!("no revision of {:?} resolved yet", self.name))
    }

    fn snap_path(&self) -> anyhow::Result<&Path> {
        self.snap_path
            .as_deref()
            .with_context(|| format!("snap {:?} has not been downloaded", self.name))
    }
}

/// An installed snap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapState {
    pub current: SnapInfo,
    pub active: bool,
    #[serde(default)]
    pub flags: InstallFlags,
}

/// Installed snaps by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapsTable {
    pub snaps: BTreeMap<String, SnapState>,
}

impl SnapsTable {
    /// Load the table; a table that was never written is empty
    pub fn load(st: &StateGuard<'_>) -> Result<Self> {
        match st.get(SNAPS_KEY) {
            Ok(table) => Ok(table),
            Err(e) if e.is_no_state() => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SnapState> {
        self.snaps.get(name)
    }
}

/// Fail if a non-ready change already operates on `name`
fn check_conflict(table: &ChangeTable, name: &str) -> Result<()> {
    for change in table.changes.values().filter(|c| !c.is_ready()) {
        if let Ok(Some(setup)) = change.get::<SnapSetup>(SETUP_KEY)
            && setup.name == name
        {
            return Err(Error::ChangeConflict {
                name: name.to_string(),
                change: change.id.clone(),
            });
        }
    }
    Ok(())
}

fn channel_or_default(channel: &str) -> String {
    if channel.is_empty() {
        DEFAULT_CHANNEL.to_string()
    } else {
        channel.to_string()
    }
}

fn add_install_tasks(change: &mut Change, name: &str, channel: &str) {
    change.add_task(
        TaskKind::DownloadSnap,
        format!("Download snap {name:?} from channel {channel:?}"),
    );
    change.add_task(TaskKind::CheckSnap, format!("Check snap {name:?}"));
    change.add_task(TaskKind::SetupSnap, format!("Set up snap {name:?} files"));
    change.add_task(TaskKind::CopySnapData, format!("Copy snap {name:?} data"));
    change.add_task(
        TaskKind::LinkSnap,
        format!("Make snap {name:?} available to the system"),
    );
}

fn plan_install(
    st: &mut StateGuard<'_>,
    kind: &str,
    summary: String,
    setup: SnapSetup,
) -> Result<Change> {
    if let Some(id) = setup.user_id {
        // Fail at submission rather than at download time
        auth::user(st, id)?;
    }

    let mut table = ChangeTable::load(st)?;
    check_conflict(&table, &setup.name)?;

    let change = table.new_change(kind, summary);
    add_install_tasks(change, &setup.name, &setup.channel);
    change.set(SETUP_KEY, &setup)?;
    let created = change.clone();

    table.save(st)?;
    log::info!("Queued change {} ({})", created.id, created.summary);
    Ok(created)
}

/// Queue installation of `name` from `channel`
pub fn install(
    st: &mut StateGuard<'_>,
    name: &str,
    channel: &str,
    flags: InstallFlags,
    user_id: Option<u64>,
) -> Result<Change> {
    if SnapsTable::load(st)?.get(name).is_some() {
        return Err(Error::AlreadyInstalled {
            name: name.to_string(),
        });
    }

    let setup = SnapSetup {
        name: name.to_string(),
        channel: channel_or_default(channel),
        flags,
        user_id,
        ..Default::default()
    };
    plan_install(st, "install-snap", format!("Install {name:?} snap"), setup)
}

/// Queue a refresh of installed `name` to the latest revision in `channel`
pub fn update(
    st: &mut StateGuard<'_>,
    name: &str,
    channel: &str,
    flags: InstallFlags,
    user_id: Option<u64>,
) -> Result<Change> {
    let snaps = SnapsTable::load(st)?;
    let snap = snaps.get(name).ok_or_else(|| Error::NotInstalled {
        name: name.to_string(),
    })?;

    let channel = if channel.is_empty() {
        channel_or_default(&snap.current.channel)
    } else {
        channel.to_string()
    };
    let setup = SnapSetup {
        name: name.to_string(),
        channel,
        flags,
        user_id,
        previous: Some(snap.current.clone()),
        previous_flags: snap.flags,
        ..Default::default()
    };
    plan_install(st, "update-snap", format!("Update {name:?} snap"), setup)
}

/// Queue removal of installed `name`
///
/// The backend's `can_remove` verdict is taken with the state lock
/// released.
pub fn remove(state: &State, backend: &dyn Backend, name: &str) -> Result<Change> {
    let not_installed = || Error::NotInstalled {
        name: name.to_string(),
    };

    let snap = {
        let st = state.lock();
        SnapsTable::load(&st)?.get(name).cloned().ok_or_else(not_installed)?
    };
    if !backend.can_remove(&snap.current, snap.active) {
        return Err(Error::RemovalRefused {
            name: name.to_string(),
        });
    }

    let mut st = state.lock();
    let Some(current) = SnapsTable::load(&st)?.get(name).cloned() else {
        return Err(not_installed());
    };
    let mut table = ChangeTable::load(&st)?;
    check_conflict(&table, name)?;

    let change = table.new_change("remove-snap", format!("Remove {name:?} snap"));
    change.add_task(
        TaskKind::UnlinkSnap,
        format!("Make snap {name:?} unavailable to the system"),
    );
    change.add_task(TaskKind::RemoveSnapFiles, format!("Remove snap {name:?} files"));
    change.add_task(TaskKind::RemoveSnapData, format!("Remove data for snap {name:?}"));
    change.set(
        SETUP_KEY,
        &SnapSetup {
            name: name.to_string(),
            channel: current.current.channel.clone(),
            flags: current.flags,
            info: Some(current.current),
            ..Default::default()
        },
    )?;
    let created = change.clone();

    table.save(&mut st)?;
    log::info!("Queued change {} ({})", created.id, created.summary);
    Ok(created)
}

/// Installed snaps
pub fn snaps(st: &StateGuard<'_>) -> Result<SnapsTable> {
    SnapsTable::load(st)
}

/// Collaborators a handler may use while the state lock is released
pub struct TaskContext<'a> {
    pub state: &'a State,
    pub backend: &'a dyn Backend,
    pub meter: &'a dyn Meter,
}

/// Run the forward operation of `kind`, updating `setup` with its results
pub fn do_task(
    ctx: &TaskContext<'_>,
    kind: TaskKind,
    setup: &mut SnapSetup,
) -> anyhow::Result<()> {
    let backend = ctx.backend;
    match kind {
        TaskKind::DownloadSnap => {
            let authenticator = match setup.user_id {
                Some(id) => Some(auth::user(&ctx.state.lock(), id)?.authenticator()),
                None => None,
            };
            let previous = setup.previous.clone();
            let checker = move |candidate: &SnapInfo| -> anyhow::Result<()> {
                if let Some(previous) = &previous
                    && previous.revision == candidate.revision
                {
                    bail!(
                        "snap {:?} is already at revision {}",
                        candidate.name,
                        candidate.revision
                    );
                }
                Ok(())
            };

            let (info, path) = backend.download(
                &setup.name,
                &setup.channel,
                &checker,
                ctx.meter,
                authenticator.as_ref().map(|a| a as &dyn Authenticator),
            )?;
            setup.info = Some(info);
            setup.snap_path = Some(path);
        }
        TaskKind::CheckSnap => {
            backend.check_snap(setup.snap_path()?, setup.previous.as_ref(), setup.flags)?;
        }
        TaskKind::SetupSnap => {
            backend.setup_snap(setup.snap_path()?, &setup.info()?.side_info(), setup.flags)?;
        }
        TaskKind::CopySnapData => {
            backend.copy_snap_data(setup.info()?, setup.previous.as_ref(), setup.flags)?;
        }
        TaskKind::LinkSnap => backend.link_snap(setup.info()?)?,
        TaskKind::UnlinkSnap => backend.unlink_snap(setup.info()?, ctx.meter)?,
        TaskKind::RemoveSnapFiles => backend.remove_snap_files(setup.info()?, ctx.meter)?,
        TaskKind::RemoveSnapData => backend.remove_snap_data(setup.info()?)?,
    }
    Ok(())
}

/// Run a compensating operation
pub fn undo_task(
    ctx: &TaskContext<'_>,
    compensation: Compensation,
    setup: &SnapSetup,
) -> anyhow::Result<()> {
    match compensation {
        Compensation::UndoSetupSnap => ctx.backend.undo_setup_snap(setup.info()?),
        Compensation::UndoCopySnapData => {
            ctx.backend.undo_copy_snap_data(setup.info()?, setup.flags)
        }
        Compensation::UnlinkSnap => {
            ctx.backend.unlink_snap(setup.info()?, ctx.meter)?;
            match &setup.previous {
                Some(previous) => ctx.backend.link_snap(previous),
                None => Ok(()),
            }
        }
    }
}

/// Apply the installed-snap effect of a completed `kind`
///
/// Returns whether the table changed.
pub fn record(snaps: &mut SnapsTable, kind: TaskKind, setup: &SnapSetup) -> bool {
    match kind {
        TaskKind::LinkSnap => {
            let Some(info) = setup.info.clone() else {
                return false;
            };
            snaps.snaps.insert(
                setup.name.clone(),
                SnapState {
                    current: info,
                    active: true,
                    flags: setup.flags,
                },
            );
            true
        }
        TaskKind::UnlinkSnap => match snaps.snaps.get_mut(&setup.name) {
            Some(snap) => {
                snap.active = false;
                true
            }
            None => false,
        },
        TaskKind::RemoveSnapData => snaps.snaps.remove(&setup.name).is_some(),
        _ => false,
    }
}

/// Apply the installed-snap effect of a completed compensation
///
/// Returns whether the table changed.
pub fn record_undo(snaps: &mut SnapsTable, compensation: Compensation, setup: &SnapSetup) -> bool {
    match compensation {
        Compensation::UnlinkSnap => match &setup.previous {
            Some(previous) => {
                snaps.snaps.insert(
                    setup.name.clone(),
                    SnapState {
                        current: previous.clone(),
                        active: true,
                        flags: setup.previous_flags,
                    },
                );
                true
            }
            None => snaps.snaps.remove(&setup.name).is_some(),
        },
        Compensation::UndoSetupSnap | Compensation::UndoCopySnapData => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, SnapType};
    use crate::change::Status;

    fn installed(st: &mut StateGuard<'_>, name: &str, snap_type: SnapType) {
        let mut snaps = SnapsTable::load(st).unwrap();
        snaps.snaps.insert(
            name.to_string(),
            SnapState {
                current: SnapInfo {
                    name: name.to_string(),
                    revision: 5,
                    channel: "candidate".into(),
                    snap_type,
                    ..Default::default()
                },
                active: true,
                flags: InstallFlags::default(),
            },
        );
        st.set(SNAPS_KEY, &snaps).unwrap();
    }

    fn kinds(change: &Change) -> Vec<TaskKind> {
        change.tasks.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_compensation_table() {
        assert_eq!(
            TaskKind::SetupSnap.compensation(),
            Some(Compensation::UndoSetupSnap)
        );
        assert_eq!(
            TaskKind::CopySnapData.compensation(),
            Some(Compensation::UndoCopySnapData)
        );
        assert_eq!(
            TaskKind::LinkSnap.compensation(),
            Some(Compensation::UnlinkSnap)
        );
        for kind in [
            TaskKind::DownloadSnap,
            TaskKind::CheckSnap,
            TaskKind::UnlinkSnap,
            TaskKind::RemoveSnapFiles,
            TaskKind::RemoveSnapData,
        ] {
            assert_eq!(kind.compensation(), None, "{kind}");
        }
    }

    #[test]
    fn test_kind_names_match_serde() {
        for kind in [TaskKind::DownloadSnap, TaskKind::RemoveSnapFiles] {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.to_string())
            );
        }
        assert_eq!(
            serde_json::to_value(Compensation::UndoCopySnapData).unwrap(),
            "undo-copy-snap-data"
        );
    }

    #[test]
    fn test_install_plans_fixed_template() {
        let state = State::in_memory();
        let mut st = state.lock();

        let change = install(&mut st, "hello", "", InstallFlags { devmode: true }, None).unwrap();
        assert_eq!(change.id, "1");
        assert_eq!(change.kind, "install-snap");
        assert_eq!(change.summary, "Install \"hello\" snap");
        assert_eq!(
            kinds(&change),
            vec![
                TaskKind::DownloadSnap,
                TaskKind::CheckSnap,
                TaskKind::SetupSnap,
                TaskKind::CopySnapData,
                TaskKind::LinkSnap,
            ]
        );
        assert!(change.tasks.iter().all(|t| t.status == Status::Do));
        assert_eq!(
            change.tasks[0].summary,
            "Download snap \"hello\" from channel \"stable\""
        );

        let setup: SnapSetup = change.get(SETUP_KEY).unwrap().unwrap();
        assert_eq!(setup.channel, DEFAULT_CHANNEL);
        assert!(setup.flags.devmode);
        assert!(setup.previous.is_none());
    }

    #[test]
    fn test_install_rejects_installed_and_conflicting() {
        let state = State::in_memory();
        let mut st = state.lock();
        installed(&mut st, "core", SnapType::Os);

        assert!(matches!(
            install(&mut st, "core", "stable", InstallFlags::default(), None),
            Err(Error::AlreadyInstalled { .. })
        ));

        install(&mut st, "hello", "stable", InstallFlags::default(), None).unwrap();
        assert!(matches!(
            install(&mut st, "hello", "edge", InstallFlags::default(), None),
            Err(Error::ChangeConflict { ref change, .. }) if change == "1"
        ));
    }

    #[test]
    fn test_install_with_unknown_user_fails() {
        let state = State::in_memory();
        let mut st = state.lock();
        assert!(matches!(
            install(&mut st, "hello", "stable", InstallFlags::default(), Some(3)),
            Err(Error::Auth(auth::Error::InvalidUser { id: 3 }))
        ));
        assert!(ChangeTable::load(&st).unwrap().changes.is_empty());
    }

    #[test]
    fn test_update_keeps_previous_and_channel() {
        let state = State::in_memory();
        let mut st = state.lock();
        assert!(matches!(
            update(&mut st, "hello", "", InstallFlags::default(), None),
            Err(Error::NotInstalled { .. })
        ));

        installed(&mut st, "hello", SnapType::App);
        let change = update(&mut st, "hello", "", InstallFlags::default(), None).unwrap();
        assert_eq!(change.kind, "update-snap");
        let setup: SnapSetup = change.get(SETUP_KEY).unwrap().unwrap();
        assert_eq!(setup.channel, "candidate");
        assert_eq!(setup.previous.unwrap().revision, 5);
    }

    #[test]
    fn test_remove_plans_and_guards() {
        let state = State::in_memory();
        let backend = MockBackend::new();
        assert!(matches!(
            remove(&state, &backend, "hello"),
            Err(Error::NotInstalled { .. })
        ));

        installed(&mut state.lock(), "core", SnapType::Os);
        assert!(matches!(
            remove(&state, &backend, "core"),
            Err(Error::RemovalRefused { .. })
        ));

        installed(&mut state.lock(), "hello", SnapType::App);
        let change = remove(&state, &backend, "hello").unwrap();
        assert_eq!(change.kind, "remove-snap");
        assert_eq!(
            kinds(&change),
            vec![
                TaskKind::UnlinkSnap,
                TaskKind::RemoveSnapFiles,
                TaskKind::RemoveSnapData,
            ]
        );
        let setup: SnapSetup = change.get(SETUP_KEY).unwrap().unwrap();
        assert_eq!(setup.info.unwrap().revision, 5);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_record_tracks_installed_snaps() {
        let mut snaps = SnapsTable::default();
        let setup = SnapSetup {
            name: "hello".into(),
            info: Some(SnapInfo {
                name: "hello".into(),
                revision: 2,
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(!record(&mut snaps, TaskKind::SetupSnap, &setup));
        assert!(record(&mut snaps, TaskKind::LinkSnap, &setup));
        assert!(snaps.get("hello").unwrap().active);
        assert!(record(&mut snaps, TaskKind::UnlinkSnap, &setup));
        assert!(!snaps.get("hello").unwrap().active);
        assert!(record(&mut snaps, TaskKind::RemoveSnapData, &setup));
        assert!(snaps.get("hello").is_none());
        assert!(!record(&mut snaps, TaskKind::UnlinkSnap, &setup));
    }

    #[test]
    fn test_record_undo_of_link() {
        let revision = |revision| SnapInfo {
            name: "hello".into(),
            revision,
            ..Default::default()
        };
        let mut snaps = SnapsTable::default();
        let mut setup = SnapSetup {
            name: "hello".into(),
            info: Some(revision(2)),
            ..Default::default()
        };

        // A fresh install disappears again
        record(&mut snaps, TaskKind::LinkSnap, &setup);
        assert!(!record_undo(&mut snaps, Compensation::UndoSetupSnap, &setup));
        assert!(record_undo(&mut snaps, Compensation::UnlinkSnap, &setup));
        assert!(snaps.get("hello").is_none());

        // An update puts the previous revision back
        setup.previous = Some(revision(1));
        setup.previous_flags = InstallFlags { devmode: true };
        record(&mut snaps, TaskKind::LinkSnap, &setup);
        assert!(record_undo(&mut snaps, Compensation::UnlinkSnap, &setup));
        let hello = snaps.get("hello").unwrap();
        assert_eq!(hello.current.revision, 1);
        assert!(hello.active);
        assert!(hello.flags.devmode);
    }

    #[test]
    fn test_unlink_compensation_relinks_previous() {
        let state = State::in_memory();
        let backend = MockBackend::new();
        let ctx = TaskContext {
            state: &state,
            backend: &backend,
            meter: &crate::backend::NullMeter,
        };
        let setup = SnapSetup {
            name: "hello".into(),
            info: Some(SnapInfo {
                name: "hello".into(),
                revision: 2,
                ..Default::default()
            }),
            previous: Some(SnapInfo {
                name: "hello".into(),
                revision: 1,
                ..Default::default()
            }),
            ..Default::default()
        };

        undo_task(&ctx, Compensation::UnlinkSnap, &setup).unwrap();
        assert_eq!(backend.calls(), vec!["unlink-snap:hello", "link-snap:hello"]);
    }

    #[test]
    fn test_download_handler_uses_user_credentials() {
        let state = State::in_memory();
        let user = auth::new_user(&mut state.lock(), "alice", "m1", vec!["d1".into()]).unwrap();
        let backend = MockBackend::new();
        let ctx = TaskContext {
            state: &state,
            backend: &backend,
            meter: &crate::backend::NullMeter,
        };
        let mut setup = SnapSetup {
            name: "hello".into(),
            channel: "stable".into(),
            user_id: Some(user.id),
            ..Default::default()
        };

        do_task(&ctx, TaskKind::DownloadSnap, &mut setup).unwrap();
        assert_eq!(setup.info.as_ref().unwrap().revision, 1);
        assert!(setup.snap_path.is_some());
        assert_eq!(
            backend.authorizations(),
            vec![r#"Macaroon root="m1", discharge="d1""#]
        );
    }

    #[test]
    fn test_download_handler_refuses_same_revision() {
        let state = State::in_memory();
        let backend = MockBackend::new();
        let ctx = TaskContext {
            state: &state,
            backend: &backend,
            meter: &crate::backend::NullMeter,
        };
        let mut setup = SnapSetup {
            name: "hello".into(),
            channel: "stable".into(),
            previous: Some(SnapInfo {
                name: "hello".into(),
                revision: 1,
                ..Default::default()
            }),
            ..Default::default()
        };

        let err = do_task(&ctx, TaskKind::DownloadSnap, &mut setup).unwrap_err();
        assert!(err.to_string().contains("already at revision 1"));
        assert!(setup.info.is_none());
    }

    #[test]
    fn test_handlers_need_resolved_revision() {
        let state = State::in_memory();
        let backend = MockBackend::new();
        let ctx = TaskContext {
            state: &state,
            backend: &backend,
            meter: &crate::backend::NullMeter,
        };
        let mut setup = SnapSetup {
            name: "hello".into(),
            ..Default::default()
        };

        assert!(do_task(&ctx, TaskKind::LinkSnap, &mut setup).is_err());
        assert!(undo_task(&ctx, Compensation::UndoSetupSnap, &setup).is_err());
        assert!(backend.calls().is_empty());
    }
}
