//! Backend that manages snaps in a local directory tree.
//!
//! Layout under the root directory:
//!
//! ```text
//! downloads/<name>_<rev>.snap      files fetched from the store
//! snaps/<name>/<rev>/<name>.snap   staged revisions
//! snaps/<name>/current             revision number of the active revision
//! data/<name>/<rev>/               per-revision data
//! ```
//!
//! Store metadata and snap files are fetched over HTTP with `ureq`.
//! Transient network failures are retried, see [`super::retry`].

use super::retry::{RetryConfig, with_retry};
use super::{Backend, Checker, InstallFlags, Meter, SideInfo, SnapInfo, SnapType};
use anyhow::{Context, Result, anyhow, bail};
use auth::Authenticator;
use blake3::Hasher;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

const USER_AGENT: &str = concat!("overlord/", env!("CARGO_PKG_VERSION"));

/// Local directory-tree backend
pub struct LocalBackend {
    root: PathBuf,
    store_url: String,
    agent: ureq::Agent,
    retry: RetryConfig,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>, store_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            store_url: store_url.into(),
            agent: ureq::Agent::new_with_defaults(),
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    fn snap_dir(&self, name: &str, revision: u32) -> PathBuf {
        self.root.join("snaps").join(name).join(revision.to_string())
    }

    fn data_dir(&self, name: &str, revision: u32) -> PathBuf {
        self.root.join("data").join(name).join(revision.to_string())
    }

    fn current_marker(&self, name: &str) -> PathBuf {
        self.root.join("snaps").join(name).join("current")
    }

    /// Revision the `current` marker points at, if the snap is linked
    pub fn current_revision(&self, name: &str) -> Result<Option<u32>> {
        let marker = self.current_marker(name);
        match fs::read_to_string(&marker) {
            Ok(content) => {
                let revision = content
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid revision in {}", marker.display()))?;
                Ok(Some(revision))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", marker.display())),
        }
    }

    /// Downloaded files of any revision of `name`
    fn downloaded_files(&self, name: &str) -> Result<Vec<PathBuf>> {
        let dir = self.downloads_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", dir.display())),
        };

        let prefix = format!("{name}_");
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".snap"));
            if matches {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn fetch_info(
        &self,
        name: &str,
        channel: &str,
        auth: Option<&dyn Authenticator>,
    ) -> Result<SnapInfo> {
        let url = format!(
            "{}/v2/snaps/info/{name}",
            self.store_url.trim_end_matches('/')
        );

        with_retry(&self.retry, &format!("Fetching {name} info"), || {
            let mut request = self
                .agent
                .get(&url)
                .query("channel", channel)
                .header("Accept", "application/json")
                .header("User-Agent", USER_AGENT);
            if let Some(auth) = auth {
                request = request.header("Authorization", auth.authorization());
            }

            let info: SnapInfo = request.call()?.body_mut().read_json()?;
            Ok(info)
        })
        .with_context(|| format!("Cannot find snap {name:?} in channel {channel:?}"))
    }

    fn fetch_file(
        &self,
        info: &SnapInfo,
        dest: &Path,
        meter: &dyn Meter,
        auth: Option<&dyn Authenticator>,
    ) -> Result<()> {
        let url = info
            .download_url
            .as_deref()
            .ok_or_else(|| anyhow!("Store returned no download URL for {:?}", info.name))?;
        let dir = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        with_retry(&self.retry, &format!("Downloading {}", info.name), || {
            let mut request = self.agent.get(url).header("User-Agent", USER_AGENT);
            if let Some(auth) = auth {
                request = request.header("Authorization", auth.authorization());
            }
            let mut response = request.call()?;
            let mut reader = response.body_mut().as_reader();

            let mut tmp = NamedTempFile::new_in(dir)?;
            let mut hasher = Hasher::new();
            let mut buffer = [0u8; 65536]; // 64KB chunks
            let mut done = 0u64;

            meter.start(&format!("Download snap {:?}", info.name), info.download_size);
            loop {
                // Read errors come from the connection, so they count as transient
                let bytes_read = reader.read(&mut buffer).map_err(ureq::Error::Io)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
                tmp.write_all(&buffer[..bytes_read])?;
                done += bytes_read as u64;
                meter.set(done);
            }
            meter.finished();

            if let Some(expected) = &info.digest {
                let actual = hasher.finalize().to_hex();
                if !actual.as_str().eq_ignore_ascii_case(expected) {
                    bail!(
                        "Digest mismatch for {}: expected {expected}, got {actual}",
                        info.file_name()
                    );
                }
            }

            tmp.as_file().sync_all()?;
            tmp.persist(dest).map_err(|e| e.error)?;
            Ok(())
        })
    }
}

/// Replace `path` with `content` via write-then-rename
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Drop `path` if it's an empty directory
fn prune_empty_dir(path: &Path) {
    if fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none()) {
        let _ = fs::remove_dir(path);
    }
}

/// Copy every file under `src` into `dest`, keeping relative paths
fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let target = dest.join(entry.path().strip_prefix(src)?);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

impl Backend for LocalBackend {
    fn download(
        &self,
        name: &str,
        channel: &str,
        checker: Checker<'_>,
        meter: &dyn Meter,
        auth: Option<&dyn Authenticator>,
    ) -> Result<(SnapInfo, PathBuf)> {
        let mut info = self.fetch_info(name, channel, auth)?;
        if info.name != name {
            bail!("Store returned {:?} when asked for {name:?}", info.name);
        }
        if info.channel.is_empty() {
            info.channel = channel.to_string();
        }
        checker(&info)?;

        let dest = self.downloads_dir().join(info.file_name());
        self.fetch_file(&info, &dest, meter, auth)?;
        log::info!("Downloaded {} revision {}", name, info.revision);
        Ok((info, dest))
    }

    fn check_snap(
        &self,
        path: &Path,
        current: Option<&SnapInfo>,
        flags: InstallFlags,
    ) -> Result<()> {
        let meta = fs::metadata(path)
            .with_context(|| format!("Cannot read snap file {}", path.display()))?;
        if !meta.is_file() || meta.len() == 0 {
            bail!("Snap file {} is empty", path.display());
        }

        if let Some(current) = current {
            let belongs = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&format!("{}_", current.name)));
            if !belongs {
                bail!(
                    "Snap file {} does not belong to {:?}",
                    path.display(),
                    current.name
                );
            }
        }
        if flags.devmode {
            log::debug!("Accepting {} in devmode", path.display());
        }
        Ok(())
    }

    fn setup_snap(&self, path: &Path, side: &SideInfo, flags: InstallFlags) -> Result<()> {
        let dir = self.snap_dir(&side.name, side.revision);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        fs::copy(path, dir.join(format!("{}.snap", side.name)))
            .with_context(|| format!("Failed to stage {}", path.display()))?;

        let meta = serde_json::json!({ "side-info": side, "devmode": flags.devmode });
        fs::write(dir.join("meta.json"), serde_json::to_vec_pretty(&meta)?)?;
        log::debug!("Staged {} revision {} in {}", side.name, side.revision, dir.display());
        Ok(())
    }

    fn copy_snap_data(
        &self,
        new: &SnapInfo,
        old: Option<&SnapInfo>,
        _flags: InstallFlags,
    ) -> Result<()> {
        let dest = self.data_dir(&new.name, new.revision);
        fs::create_dir_all(&dest).with_context(|| format!("Failed to create {}", dest.display()))?;

        if let Some(old) = old.filter(|old| old.revision != new.revision) {
            let src = self.data_dir(&old.name, old.revision);
            if src.is_dir() {
                let copied = copy_tree(&src, &dest)?;
                log::debug!(
                    "Copied {copied} file(s) of {} data from revision {} to {}",
                    new.name,
                    old.revision,
                    new.revision
                );
            }
        }
        Ok(())
    }

    fn link_snap(&self, info: &SnapInfo) -> Result<()> {
        if !self.snap_dir(&info.name, info.revision).is_dir() {
            bail!(
                "Revision {} of {:?} has not been set up",
                info.revision,
                info.name
            );
        }
        write_atomic(&self.current_marker(&info.name), &info.revision.to_string())
    }

    fn undo_setup_snap(&self, info: &SnapInfo) -> Result<()> {
        remove_dir_if_exists(&self.snap_dir(&info.name, info.revision))?;
        prune_empty_dir(&self.root.join("snaps").join(&info.name));
        Ok(())
    }

    fn undo_copy_snap_data(&self, new: &SnapInfo, _flags: InstallFlags) -> Result<()> {
        remove_dir_if_exists(&self.data_dir(&new.name, new.revision))?;
        prune_empty_dir(&self.root.join("data").join(&new.name));
        Ok(())
    }

    fn can_remove(&self, info: &SnapInfo, active: bool) -> bool {
        // Active base, kernel and gadget snaps hold the system up
        !(active && info.snap_type != SnapType::App)
    }

    fn unlink_snap(&self, info: &SnapInfo, meter: &dyn Meter) -> Result<()> {
        meter.start(&format!("Unlink {}", info.name), 0);
        if self.current_revision(&info.name)? == Some(info.revision) {
            remove_file_if_exists(&self.current_marker(&info.name))?;
        }
        meter.finished();
        Ok(())
    }

    fn remove_snap_files(&self, info: &SnapInfo, meter: &dyn Meter) -> Result<()> {
        let downloads = self.downloaded_files(&info.name)?;
        meter.start(&format!("Remove {} files", info.name), downloads.len() as u64 + 1);
        // Older revisions kept around by updates go too
        remove_dir_if_exists(&self.root.join("snaps").join(&info.name))?;
        meter.set(1);
        for (done, file) in downloads.iter().enumerate() {
            remove_file_if_exists(file)?;
            meter.set(done as u64 + 2);
        }
        meter.finished();
        Ok(())
    }

    fn remove_snap_data(&self, info: &SnapInfo) -> Result<()> {
        remove_dir_if_exists(&self.root.join("data").join(&info.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullMeter;
    use auth::MacaroonAuthenticator;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::tempdir;

    fn info(name: &str, revision: u32) -> SnapInfo {
        SnapInfo {
            name: name.into(),
            revision,
            ..Default::default()
        }
    }

    fn staged(backend: &LocalBackend, root: &Path, name: &str, revision: u32) {
        let file = root.join(format!("{name}_{revision}.snap"));
        fs::write(&file, b"snap payload").unwrap();
        backend
            .setup_snap(&file, &info(name, revision).side_info(), InstallFlags::default())
            .unwrap();
    }

    /// Serves `routes` (path prefix -> body) over plain HTTP and records
    /// the Authorization header of each request
    fn serve(routes: Vec<(&'static str, Vec<u8>)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_server = Arc::clone(&seen);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = io::BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                let mut line = String::new();
                loop {
                    line.clear();
                    reader.read_line(&mut line).unwrap();
                    if let Some(value) = line.strip_prefix("authorization: ")
                        .or_else(|| line.strip_prefix("Authorization: "))
                    {
                        seen_by_server.lock().unwrap().push(value.trim().to_string());
                    }
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                }

                let path = request_line.split(' ').nth(1).unwrap_or("/");
                let response = routes.iter().find(|(prefix, _)| path.starts_with(prefix));
                let (status, body) = match response {
                    Some((_, body)) => ("200 OK", body.clone()),
                    None => ("404 Not Found", Vec::new()),
                };
                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            }
        });

        (base, seen)
    }

    #[derive(Default)]
    struct RecordingMeter {
        updates: Mutex<Vec<(u64, u64)>>,
        total: Mutex<u64>,
    }

    impl Meter for RecordingMeter {
        fn start(&self, _label: &str, total: u64) {
            *self.total.lock().unwrap() = total;
        }
        fn set(&self, done: u64) {
            let total = *self.total.lock().unwrap();
            self.updates.lock().unwrap().push((done, total));
        }
        fn finished(&self) {}
    }

    #[test]
    fn test_download_verifies_digest_and_reports_progress() {
        let payload = b"squashfs bytes for hello".to_vec();
        let digest = blake3::hash(&payload).to_hex().to_string();

        // Files and metadata come from separate servers, like a CDN
        let (base, seen) = serve(vec![("/files/hello_3.snap", payload.clone())]);
        let info_json = serde_json::to_vec(&serde_json::json!({
            "name": "hello",
            "revision": 3,
            "download-url": format!("{base}/files/hello_3.snap"),
            "download-size": payload.len(),
            "digest": digest,
        }))
        .unwrap();
        let (store, _) = serve(vec![("/v2/snaps/info/hello", info_json)]);

        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), store).with_retry(RetryConfig::no_retry());
        let meter = RecordingMeter::default();
        let auth = MacaroonAuthenticator::new("m", vec!["d".into()]);
        let accept = |_: &SnapInfo| -> Result<()> { Ok(()) };

        let (got, path) = backend
            .download("hello", "beta", &accept, &meter, Some(&auth))
            .unwrap();

        assert_eq!(got.revision, 3);
        assert_eq!(got.channel, "beta");
        assert_eq!(fs::read(&path).unwrap(), payload);
        assert_eq!(path, dir.path().join("downloads").join("hello_3.snap"));
        let updates = meter.updates.lock().unwrap();
        assert_eq!(updates.last(), Some(&(payload.len() as u64, payload.len() as u64)));
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            [r#"Macaroon root="m", discharge="d""#.to_string()]
        );
    }

    #[test]
    fn test_download_rejects_bad_digest() {
        let (base, _) = serve(vec![("/files/hello_1.snap", b"tampered".to_vec())]);
        let info_json = serde_json::to_vec(&serde_json::json!({
            "name": "hello",
            "revision": 1,
            "download-url": format!("{base}/files/hello_1.snap"),
            "digest": blake3::hash(b"original").to_hex().to_string(),
        }))
        .unwrap();
        let (store, _) = serve(vec![("/v2/snaps/info/hello", info_json)]);

        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), store).with_retry(RetryConfig::no_retry());
        let accept = |_: &SnapInfo| -> Result<()> { Ok(()) };
        let err = backend
            .download("hello", "stable", &accept, &NullMeter, None)
            .unwrap_err();

        assert!(err.to_string().contains("Digest mismatch"));
        assert!(!dir.path().join("downloads").join("hello_1.snap").exists());
    }

    #[test]
    fn test_download_unknown_snap_fails() {
        let (store, _) = serve(Vec::new());
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), store).with_retry(RetryConfig::no_retry());
        let accept = |_: &SnapInfo| -> Result<()> { Ok(()) };

        let err = backend
            .download("missing", "stable", &accept, &NullMeter, None)
            .unwrap_err();
        assert!(err.to_string().contains("Cannot find snap \"missing\""));
    }

    #[test]
    fn test_setup_link_and_current_revision() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), "http://store.invalid");
        assert_eq!(backend.current_revision("hello").unwrap(), None);
        assert!(backend.link_snap(&info("hello", 1)).is_err());

        staged(&backend, dir.path(), "hello", 1);
        backend.link_snap(&info("hello", 1)).unwrap();
        assert_eq!(backend.current_revision("hello").unwrap(), Some(1));
        assert!(dir.path().join("snaps/hello/1/hello.snap").is_file());

        staged(&backend, dir.path(), "hello", 2);
        backend.link_snap(&info("hello", 2)).unwrap();
        assert_eq!(backend.current_revision("hello").unwrap(), Some(2));
    }

    #[test]
    fn test_copy_snap_data_from_previous_revision() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), "http://store.invalid");
        let old_data = dir.path().join("data/hello/1/config");
        fs::create_dir_all(&old_data).unwrap();
        fs::write(old_data.join("settings.toml"), "x = 1").unwrap();

        backend
            .copy_snap_data(&info("hello", 2), Some(&info("hello", 1)), InstallFlags::default())
            .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("data/hello/2/config/settings.toml")).unwrap(),
            "x = 1"
        );

        backend
            .undo_copy_snap_data(&info("hello", 2), InstallFlags::default())
            .unwrap();
        assert!(!dir.path().join("data/hello/2").exists());
        assert!(dir.path().join("data/hello/1/config/settings.toml").exists());
    }

    #[test]
    fn test_undo_setup_removes_revision() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), "http://store.invalid");
        staged(&backend, dir.path(), "hello", 4);

        backend.undo_setup_snap(&info("hello", 4)).unwrap();
        assert!(!dir.path().join("snaps/hello").exists());
        // Nothing left to undo is not an error
        backend.undo_setup_snap(&info("hello", 4)).unwrap();
    }

    #[test]
    fn test_check_snap() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), "http://store.invalid");
        let empty = dir.path().join("hello_1.snap");
        fs::write(&empty, b"").unwrap();
        assert!(backend.check_snap(&empty, None, InstallFlags::default()).is_err());

        let good = dir.path().join("hello_2.snap");
        fs::write(&good, b"payload").unwrap();
        assert!(backend.check_snap(&good, None, InstallFlags::default()).is_ok());
        assert!(
            backend
                .check_snap(&good, Some(&info("hello", 1)), InstallFlags { devmode: true })
                .is_ok()
        );
        assert!(
            backend
                .check_snap(&good, Some(&info("other", 1)), InstallFlags::default())
                .is_err()
        );
    }

    #[test]
    fn test_remove_family_is_idempotent() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), "http://store.invalid");
        staged(&backend, dir.path(), "hello", 1);
        backend.link_snap(&info("hello", 1)).unwrap();
        backend
            .copy_snap_data(&info("hello", 1), None, InstallFlags::default())
            .unwrap();

        for _ in 0..2 {
            backend.unlink_snap(&info("hello", 1), &NullMeter).unwrap();
            backend.remove_snap_files(&info("hello", 1), &NullMeter).unwrap();
            backend.remove_snap_data(&info("hello", 1)).unwrap();
        }

        assert_eq!(backend.current_revision("hello").unwrap(), None);
        assert!(!dir.path().join("snaps/hello").exists());
        assert!(!dir.path().join("data/hello").exists());
    }

    #[test]
    fn test_remove_after_update_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), "http://store.invalid");
        let downloads = dir.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        for revision in [1, 2] {
            fs::write(downloads.join(format!("hello_{revision}.snap")), b"payload").unwrap();
        }
        fs::write(downloads.join("hello-world_1.snap"), b"payload").unwrap();

        // install revision 1
        staged(&backend, dir.path(), "hello", 1);
        backend
            .copy_snap_data(&info("hello", 1), None, InstallFlags::default())
            .unwrap();
        fs::write(dir.path().join("data/hello/1/state"), "on").unwrap();
        backend.link_snap(&info("hello", 1)).unwrap();

        // update to revision 2
        staged(&backend, dir.path(), "hello", 2);
        backend
            .copy_snap_data(&info("hello", 2), Some(&info("hello", 1)), InstallFlags::default())
            .unwrap();
        backend.link_snap(&info("hello", 2)).unwrap();

        // remove
        backend.unlink_snap(&info("hello", 2), &NullMeter).unwrap();
        backend.remove_snap_files(&info("hello", 2), &NullMeter).unwrap();
        backend.remove_snap_data(&info("hello", 2)).unwrap();

        assert!(!dir.path().join("snaps/hello").exists());
        assert!(!dir.path().join("data/hello").exists());
        assert!(!downloads.join("hello_1.snap").exists());
        assert!(!downloads.join("hello_2.snap").exists());
        assert!(downloads.join("hello-world_1.snap").exists());
    }

    #[test]
    fn test_unlink_keeps_other_current_revision() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), "http://store.invalid");
        staged(&backend, dir.path(), "hello", 2);
        backend.link_snap(&info("hello", 2)).unwrap();

        backend.unlink_snap(&info("hello", 1), &NullMeter).unwrap();
        assert_eq!(backend.current_revision("hello").unwrap(), Some(2));
    }

    #[test]
    fn test_can_remove() {
        let backend = LocalBackend::new("/nonexistent", "http://store.invalid");
        let mut core = info("core", 1);
        core.snap_type = SnapType::Os;
        assert!(!backend.can_remove(&core, true));
        assert!(backend.can_remove(&core, false));
        assert!(backend.can_remove(&info("hello", 1), true));
    }
}
