//! Where overlord keeps its files
//!
//! ```text
//! <config dir>/config.toml
//! <state dir>/state.json        changes, installed snaps, users
//! <state dir>/state.json.lock   held while a process has the state open
//! <state dir>/snaps/            snaps root of the local backend
//! ```
//!
//! The config dir is `$OVERLORD_CONFIG_DIR`, else `$XDG_CONFIG_HOME/overlord`,
//! else `~/.config/overlord` (`%APPDATA%\overlord` on Windows). The state
//! dir is `$OVERLORD_STATE_DIR`, else `$XDG_STATE_HOME/overlord`, else
//! `~/.local/state/overlord` (`%LOCALAPPDATA%\overlord` on Windows).

use anyhow::{Context, Result};
use std::path::PathBuf;

pub const ENV_CONFIG_DIR: &str = "OVERLORD_CONFIG_DIR";
pub const ENV_STATE_DIR: &str = "OVERLORD_STATE_DIR";

const APP_DIR: &str = "overlord";

/// One directory lookup: override variable, XDG variable, home fallback
struct Lookup {
    what: &'static str,
    env: &'static str,
    xdg: &'static str,
    home_relative: &'static [&'static str],
    #[cfg(windows)]
    platform: fn() -> Option<PathBuf>,
}

impl Lookup {
    fn resolve(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(self.env) {
            let path = expand(&dir);
            log::debug!("{} dir from {}: {}", self.what, self.env, path.display());
            return Ok(path);
        }
        if let Ok(base) = std::env::var(self.xdg) {
            return Ok(PathBuf::from(base).join(APP_DIR));
        }

        #[cfg(windows)]
        if let Some(base) = (self.platform)() {
            return Ok(base.join(APP_DIR));
        }

        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(self
            .home_relative
            .iter()
            .fold(home, |path, part| path.join(part))
            .join(APP_DIR))
    }
}

pub fn config_dir() -> Result<PathBuf> {
    Lookup {
        what: "Config",
        env: ENV_CONFIG_DIR,
        xdg: "XDG_CONFIG_HOME",
        home_relative: &[".config"],
        #[cfg(windows)]
        platform: dirs::config_dir,
    }
    .resolve()
}

pub fn state_dir() -> Result<PathBuf> {
    Lookup {
        what: "State",
        env: ENV_STATE_DIR,
        xdg: "XDG_STATE_HOME",
        home_relative: &[".local", "state"],
        #[cfg(windows)]
        platform: dirs::data_local_dir,
    }
    .resolve()
}

/// Default state file
pub fn state_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("state.json"))
}

/// Default snaps root
pub fn snaps_root() -> Result<PathBuf> {
    Ok(state_dir()?.join("snaps"))
}

/// Expand `~` and environment variables; unknown variables stay as written
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
