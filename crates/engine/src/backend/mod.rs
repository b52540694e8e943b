//! Backend capability trait and implementations.
//!
//! The runner performs every system mutation through [`Backend`]. Forward
//! operations of the install family are paired with undo operations where a
//! rollback makes sense; the remove family has no undo and must be
//! idempotent on state that is already gone.
//!
//! [`local::LocalBackend`] manages snaps in a directory tree and downloads
//! from a store over HTTP. [`mock::MockBackend`] records calls in memory for
//! tests.

pub mod local;
pub mod mock;
pub mod retry;

pub use local::LocalBackend;
pub use mock::MockBackend;
pub use retry::RetryConfig;

use anyhow::Result;
use auth::Authenticator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of a snap, as reported by the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapType {
    #[default]
    App,
    Os,
    Kernel,
    Gadget,
}

impl fmt::Display for SnapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SnapType::App => "app",
            SnapType::Os => "os",
            SnapType::Kernel => "kernel",
            SnapType::Gadget => "gadget",
        })
    }
}

/// A specific revision of a snap
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapInfo {
    pub name: String,
    pub revision: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(default, rename = "type")]
    pub snap_type: SnapType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default)]
    pub download_size: u64,
    /// Hex blake3 digest of the snap file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl SnapInfo {
    pub fn side_info(&self) -> SideInfo {
        SideInfo {
            name: self.name.clone(),
            revision: self.revision,
            channel: self.channel.clone(),
        }
    }

    /// File name used for the downloaded snap
    pub fn file_name(&self) -> String {
        format!("{}_{}.snap", self.name, self.revision)
    }
}

/// Identity of a snap revision, carried into setup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideInfo {
    pub name: String,
    pub revision: u32,
    #[serde(default)]
    pub channel: String,
}

/// Options carried from the request into the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFlags {
    #[serde(default)]
    pub devmode: bool,
}

/// Progress sink for long backend operations
pub trait Meter: Send + Sync {
    /// Start a new phase with `total` units of work (0 if unknown)
    fn start(&self, label: &str, total: u64);

    /// Report `done` units completed so far
    fn set(&self, done: u64);

    fn finished(&self);
}

/// Meter that ignores all progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMeter;

impl Meter for NullMeter {
    fn start(&self, _label: &str, _total: u64) {}
    fn set(&self, _done: u64) {}
    fn finished(&self) {}
}

/// Validates a store candidate before it's downloaded
pub type Checker<'a> = &'a (dyn Fn(&SnapInfo) -> Result<()> + Send + Sync);

/// Backend capability for mutating installed-snap state.
///
/// Implementations must be safe to call from several runner workers at
/// once; the runner never holds the state lock while calling them.
pub trait Backend: Send + Sync {
    /// Resolve `name` in `channel`, let `checker` veto the candidate and
    /// download it, returning its info and the local file path
    fn download(
        &self,
        name: &str,
        channel: &str,
        checker: Checker<'_>,
        meter: &dyn Meter,
        auth: Option<&dyn Authenticator>,
    ) -> Result<(SnapInfo, PathBuf)>;

    /// Verify a downloaded snap file can be installed over `current`
    fn check_snap(&self, path: &Path, current: Option<&SnapInfo>, flags: InstallFlags)
    -> Result<()>;

    /// Stage the snap file for its revision
    fn setup_snap(&self, path: &Path, side: &SideInfo, flags: InstallFlags) -> Result<()>;

    /// Seed the new revision's data, copying from `old` when given
    fn copy_snap_data(
        &self,
        new: &SnapInfo,
        old: Option<&SnapInfo>,
        flags: InstallFlags,
    ) -> Result<()>;

    /// Make the revision the current one
    fn link_snap(&self, info: &SnapInfo) -> Result<()>;

    /// Undo [`Backend::setup_snap`]
    fn undo_setup_snap(&self, info: &SnapInfo) -> Result<()>;

    /// Undo [`Backend::copy_snap_data`]
    fn undo_copy_snap_data(&self, new: &SnapInfo, flags: InstallFlags) -> Result<()>;

    /// Whether the snap may be removed in its current state
    fn can_remove(&self, info: &SnapInfo, active: bool) -> bool;

    fn unlink_snap(&self, info: &SnapInfo, meter: &dyn Meter) -> Result<()>;

    /// Remove the staged files of every revision of the snap
    fn remove_snap_files(&self, info: &SnapInfo, meter: &dyn Meter) -> Result<()>;

    /// Remove the data of every revision of the snap
    fn remove_snap_data(&self, info: &SnapInfo) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_info_store_json() {
        let info: SnapInfo = serde_json::from_value(serde_json::json!({
            "name": "hello",
            "revision": 12,
            "version": "2.10",
            "channel": "stable",
            "type": "app",
            "download-url": "https://store.example/hello_12.snap",
            "download-size": 4096,
        }))
        .unwrap();

        assert_eq!(info.revision, 12);
        assert_eq!(info.snap_type, SnapType::App);
        assert_eq!(info.download_size, 4096);
        assert!(info.digest.is_none());
        assert_eq!(info.file_name(), "hello_12.snap");
        assert_eq!(
            info.side_info(),
            SideInfo {
                name: "hello".into(),
                revision: 12,
                channel: "stable".into()
            }
        );
    }

    #[test]
    fn test_snap_type_defaults_to_app() {
        let info: SnapInfo =
            serde_json::from_value(serde_json::json!({"name": "core", "revision": 1})).unwrap();
        assert_eq!(info.snap_type, SnapType::App);
        assert_eq!(SnapType::Os.to_string(), "os");
    }
}
