use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{
    api::{Fetch, Probe},
    core::{
        archive::ArchiveFormat,
        manage::{install_archive, EntryStatus},
        signature::{classify, hex_dump, read_signature, ArchiveSignature, SIGNATURE_LEN},
        source::{ModpackSource, PartTemplate},
        utils::{has_extension, DownloadDir},
    },
    error::ModpackError,
    model::{DownloadTarget, InstallOutcome, ModpackConfig},
};

const DESTINATION_DONE: u8 = 10;
const DOWNLOAD_DONE: u8 = 65;
const VALIDATION_DONE: u8 = 70;
const INSTALL_DONE: u8 = 99;

/// Something the session wants its observer to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Overall progress, `0..=100`, never decreasing within a session
    Progress(u8),
    /// Human readable status line
    Status(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    EnsuringDestination,
    AcquiringSource,
    Validating,
    Installing,
    CleaningUp,
    Completed,
    Failed,
}

struct Reporter<'e> {
    sink: &'e mut dyn FnMut(SessionEvent),
    last: u8,
}

impl<'e> Reporter<'e> {
    fn new(sink: &'e mut dyn FnMut(SessionEvent)) -> Self {
        Self { sink, last: 0 }
    }

    fn status(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        info!("{msg}");
        (self.sink)(SessionEvent::Status(msg));
    }

    fn progress(&mut self, percent: u8) {
        let percent = percent.min(100);
        if percent > self.last {
            self.last = percent;
            (self.sink)(SessionEvent::Progress(percent));
        }
    }
}

/// One end-to-end run: make sure the mods folder exists, fetch the modpack, check it,
/// install it, and clean up the downloads.
///
/// A session runs once. Only one session should target a given mods folder at a time.
pub struct InstallSession<'a, T> {
    config: &'a ModpackConfig,
    transport: &'a T,
    format: &'a dyn ArchiveFormat,
    state: SessionState,
}

impl<'a, T: Probe + Fetch> InstallSession<'a, T> {
    pub fn new(config: &'a ModpackConfig, transport: &'a T, format: &'a dyn ArchiveFormat) -> Self {
        Self {
            config,
            transport,
            format,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion, sending progress and status to `events`.
    ///
    /// Downloaded files are removed whether or not the installation worked. Per-file
    /// failures are part of the returned outcome; anything else ends the session with
    /// an error.
    pub fn run(
        &mut self,
        events: &mut dyn FnMut(SessionEvent),
    ) -> Result<InstallOutcome, ModpackError> {
        if self.state != SessionState::Idle {
            return Err(ModpackError::MiscError(
                "Install session has already run".into(),
            ));
        }

        let mut reporter = Reporter::new(events);
        let mut downloads = None;
        let result = self.execute(&mut reporter, &mut downloads);

        self.enter(SessionState::CleaningUp);
        if let Some(mut dir) = downloads.take() {
            reporter.status("Cleaning up downloaded files...");
            dir.cleanup(|w| {
                warn!("{w}");
                reporter.status(w);
            });
        }

        match &result {
            Ok(outcome) => {
                self.enter(SessionState::Completed);
                reporter.status(outcome.summary());
                reporter.status(format!(
                    "Mods installed to: {}",
                    self.config.mods_dir.display()
                ));
                reporter.progress(100);
            }
            Err(e) => {
                self.enter(SessionState::Failed);
                reporter.status(format!("Installation failed: {e}"));
            }
        }

        result
    }

    fn enter(&mut self, state: SessionState) {
        debug!("Install session {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn execute(
        &mut self,
        reporter: &mut Reporter,
        downloads: &mut Option<DownloadDir>,
    ) -> Result<InstallOutcome, ModpackError> {
        self.enter(SessionState::EnsuringDestination);
        self.ensure_destination(reporter)?;
        reporter.progress(DESTINATION_DONE);

        self.enter(SessionState::AcquiringSource);
        let source = self.resolve_source(reporter)?;
        let archive = self.acquire(&source, reporter, downloads)?;
        reporter.progress(DOWNLOAD_DONE);

        self.enter(SessionState::Validating);
        self.validate(&archive, reporter)?;
        reporter.progress(VALIDATION_DONE);

        self.enter(SessionState::Installing);
        self.install(&archive, reporter)
    }

    fn ensure_destination(&self, reporter: &mut Reporter) -> Result<(), ModpackError> {
        let mods_dir = &self.config.mods_dir;
        if mods_dir.is_dir() {
            reporter.status(format!("Mods folder found at: {}", mods_dir.display()));
            if self.config.clear_existing {
                self.clear_existing(reporter);
            }
        } else {
            fs::create_dir_all(mods_dir)?;
            reporter.status(format!("Mods folder created at: {}", mods_dir.display()));
        }
        Ok(())
    }

    /// Delete mod files left over from a previous install. Never fails the session.
    fn clear_existing(&self, reporter: &mut Reporter) {
        reporter.status("Clearing existing mods...");
        let entries = match fs::read_dir(&self.config.mods_dir) {
            Ok(entries) => entries,
            Err(e) => {
                reporter.status(format!("Warning: Error clearing mods folder - {e}"));
                return;
            }
        };

        let mut deleted = 0;
        for path in entries.flatten().map(|e| e.path()) {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_file() || !has_extension(name, &self.config.mod_extension) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    deleted += 1;
                    reporter.status(format!("Deleted: {name}"));
                }
                Err(e) => {
                    warn!("Could not delete {}: {e}", path.display());
                    reporter.status(format!("Warning: Could not delete {name} - {e}"));
                }
            }
        }
        reporter.status(format!("Cleared {deleted} existing mod(s)."));
    }

    fn resolve_source(&self, reporter: &mut Reporter) -> Result<ModpackSource, ModpackError> {
        if let Some(path) = &self.config.local_archive {
            reporter.status(format!("Looking for {}...", path.display()));
            let source = ModpackSource::Local(path.clone());
            if !source.exists(self.transport, self.config.exists_timeout())? {
                return Err(ModpackError::MissingFile(path.clone()));
            }
            reporter.status(format!("Found {}.", path.display()));
            return Ok(source);
        }

        reporter.status("Checking for single modpack file...");
        let single = ModpackSource::Single(self.config.modpack_url.clone());
        match single.exists(self.transport, self.config.exists_timeout()) {
            Ok(true) => {
                reporter.status("Found single modpack file.");
                return Ok(single);
            }
            Ok(false) => {
                reporter.status("Single modpack file not found, will try multi-part archive...")
            }
            Err(e) => {
                warn!("Single modpack check failed: {e}");
                reporter.status(format!(
                    "Could not check single modpack file ({e}), will try multi-part archive..."
                ));
            }
        }

        let template = PartTemplate::new(self.config.part_url_template.clone())?;
        reporter.status("Discovering modpack parts...");
        Ok(ModpackSource::MultiPart(template))
    }

    /// Download everything the source needs and return the path to open the archive from
    fn acquire(
        &self,
        source: &ModpackSource,
        reporter: &mut Reporter,
        downloads: &mut Option<DownloadDir>,
    ) -> Result<PathBuf, ModpackError> {
        let parts = source.parts(
            self.transport,
            self.config.part_limit(),
            self.config.probe_timeout(),
            &self.config.temp_dir,
            &mut |index| reporter.status(format!("Found modpack part {index}")),
        );

        if let ModpackSource::MultiPart(template) = source {
            if parts.is_empty() {
                return Err(ModpackError::NotFound(format!(
                    "{} (no modpack parts found)",
                    template.as_str()
                )));
            }
            reporter.status(format!(
                "Found {} modpack part(s) to download.",
                parts.len()
            ));
        }

        let first = parts
            .first()
            .map(|p| p.local_path.clone())
            .ok_or_else(|| ModpackError::NotFound(format!("{source:?}")))?;
        if !source.is_remote() {
            return Ok(first);
        }

        let dir = downloads.insert(DownloadDir::create(&self.config.temp_dir)?);
        let count = parts.len();
        for (i, part) in parts.iter().enumerate() {
            let file_name = part
                .local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("part {}", part.index));
            dir.track(&file_name);

            reporter.status(format!("Downloading {file_name} ({}/{count})...", i + 1));
            let target = DownloadTarget::from(part);
            let bytes = self.transport.fetch(&target, &mut |percent| {
                reporter.progress(download_progress(i, count, percent))
            })?;
            debug!("{file_name}: {bytes} bytes");
            reporter.status(format!("Downloaded {file_name} successfully."));
        }
        if count > 1 {
            reporter.status(format!("All {count} modpack parts downloaded successfully."));
        }

        Ok(first)
    }

    /// Sniff the archive signature. An unknown signature is only a warning; opening the
    /// archive decides whether it's usable.
    fn validate(
        &self,
        archive: &Path,
        reporter: &mut Reporter,
    ) -> Result<ArchiveSignature, ModpackError> {
        if !archive.exists() {
            return Err(ModpackError::MissingFile(archive.to_path_buf()));
        }

        let bytes = read_signature(archive)?;
        if bytes.len() < SIGNATURE_LEN {
            reporter.status(format!(
                "File too small to be a valid RAR file (only {} bytes read).",
                bytes.len()
            ));
        } else {
            reporter.status(format!("File signature: {}", hex_dump(&bytes)));
        }

        let signature = classify(&bytes);
        match signature {
            ArchiveSignature::Unknown => {
                warn!(
                    "{} does not match a known RAR signature",
                    archive.display()
                );
                reporter.status(
                    "File signature does not match RAR format, attempting to open file anyway...",
                );
            }
            known => reporter.status(format!("Detected {known} format.")),
        }

        Ok(signature)
    }

    fn install(
        &self,
        archive: &Path,
        reporter: &mut Reporter,
    ) -> Result<InstallOutcome, ModpackError> {
        let ext = self.config.mod_extension.as_str();
        let filter = |name: &str| has_extension(name, ext);

        reporter.status(format!(
            "Extracting mods from {}...",
            archive
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default()
        ));
        let eligible = self
            .format
            .list(archive)?
            .iter()
            .filter(|e| !e.is_directory && e.install_name().is_some_and(|n| filter(n)))
            .count();
        if eligible == 0 {
            return Err(ModpackError::NoEligibleEntries);
        }
        reporter.status(format!("Found {eligible} mod file(s) in archive."));

        install_archive(
            self.format,
            archive,
            &self.config.mods_dir,
            &filter,
            self.config.existing_files,
            |report| {
                let name = &report.file_name;
                match &report.status {
                    EntryStatus::Installed => reporter.status(format!("Installed: {name}")),
                    EntryStatus::Skipped => {
                        reporter.status(format!("Skipped (already exists): {name}"))
                    }
                    EntryStatus::Failed(reason) => {
                        reporter.status(format!("Failed to install {name}: {reason}"))
                    }
                }
                reporter.progress(install_progress(report.position, eligible));
            },
        )
    }
}

/// Map part `index` of `count` at `percent` into the download share of overall progress
fn download_progress(index: usize, count: usize, percent: u8) -> u8 {
    let span = u64::from(DOWNLOAD_DONE - DESTINATION_DONE);
    let done = index as u64 * 100 + u64::from(percent.min(100));
    let total = count.max(1) as u64 * 100;
    DESTINATION_DONE + (span * done / total) as u8
}

fn install_progress(position: usize, eligible: usize) -> u8 {
    let span = (INSTALL_DONE - VALIDATION_DONE) as usize;
    VALIDATION_DONE + (span * position.min(eligible) / eligible.max(1)) as u8
}

#[cfg(feature = "rar")]
pub use self::background::{install_modpack, spawn_install};

#[cfg(feature = "rar")]
mod background {
    use std::{
        sync::mpsc::{self, Receiver},
        thread::{self, JoinHandle},
    };

    use tracing::trace;

    use super::{InstallSession, SessionEvent};
    use crate::{
        api::HttpTransport,
        core::archive::RarFormat,
        error::ModpackError,
        model::{InstallOutcome, ModpackConfig},
    };

    /// Download and install the modpack over HTTP, blocking until done
    pub fn install_modpack(
        config: &ModpackConfig,
        events: &mut dyn FnMut(SessionEvent),
    ) -> Result<InstallOutcome, ModpackError> {
        let transport = HttpTransport::new(config);
        let format = RarFormat;
        InstallSession::new(config, &transport, &format).run(events)
    }

    /// Run [`install_modpack`] on a worker thread.
    ///
    /// Events arrive on the returned receiver in order; the join handle yields the result.
    pub fn spawn_install(
        config: ModpackConfig,
    ) -> (
        JoinHandle<Result<InstallOutcome, ModpackError>>,
        Receiver<SessionEvent>,
    ) {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            install_modpack(&config, &mut |event| {
                if tx.send(event).is_err() {
                    trace!("Event receiver dropped");
                }
            })
        });

        (handle, rx)
    }
}

#[cfg(test)]
mod test {
    use std::{fs, path::Path};

    use tracing_test::traced_test;

    use super::{download_progress, install_progress, InstallSession, SessionEvent, SessionState};
    use crate::{
        error::ModpackError,
        model::ModpackConfig,
        test::{FakeRemote, MemoryEntry, MemoryFormat, RAR4_HEADER},
    };

    const SINGLE: &str = "https://example.test/raw/master/Modpack.rar";
    const TEMPLATE: &str = "https://example.test/raw/master/Modpack.part{N}.rar";

    fn part(n: u32) -> String {
        format!("https://example.test/raw/master/Modpack.part{n}.rar")
    }

    fn config(root: &Path) -> ModpackConfig {
        ModpackConfig {
            modpack_url: SINGLE.into(),
            part_url_template: TEMPLATE.into(),
            mods_dir: root.join("mods"),
            temp_dir: root.join("download"),
            ..Default::default()
        }
    }

    fn run(
        config: &ModpackConfig,
        remote: &FakeRemote,
        format: &MemoryFormat,
    ) -> (Result<crate::model::InstallOutcome, ModpackError>, SessionState, Vec<String>, Vec<u8>) {
        let mut statuses = vec![];
        let mut progress = vec![];
        let mut session = InstallSession::new(config, remote, format);
        let res = session.run(&mut |event| match event {
            SessionEvent::Status(s) => statuses.push(s),
            SessionEvent::Progress(p) => progress.push(p),
        });
        (res, session.state(), statuses, progress)
    }

    fn modpack_with_duplicates() -> MemoryFormat {
        MemoryFormat::new(vec![
            MemoryEntry::dir("mods/"),
            MemoryEntry::file("mods/jei.jar", b"jei"),
            MemoryEntry::file("mods/create.jar", b"create"),
            MemoryEntry::file("mods/sodium.jar", b"sodium"),
            MemoryEntry::file("mods/client/jei.jar", b"jei again"),
            MemoryEntry::file("mods/client/sodium.jar", b"sodium again"),
            MemoryEntry::file("mods/README.txt", b"hi"),
        ])
    }

    #[test]
    fn single_file_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let remote = FakeRemote::default().with_file(SINGLE, RAR4_HEADER);

        let (res, state, statuses, progress) = run(&config, &remote, &modpack_with_duplicates());

        let outcome = res.unwrap();
        assert_eq!(outcome.installed, 3);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(state, SessionState::Completed);

        assert!(config.mods_dir.is_dir());
        assert_eq!(fs::read(config.mods_dir.join("jei.jar")).unwrap(), b"jei");
        assert!(!config.temp_dir.join("Modpack.rar").exists());
        assert!(!config.temp_dir.exists());

        assert_eq!(remote.probes.borrow().as_slice(), [SINGLE]);
        assert_eq!(remote.fetches.borrow().as_slice(), [SINGLE]);

        for expected in [
            "Mods folder created at: ",
            "Downloading Modpack.rar (1/1)...",
            "Detected RAR 4.x format.",
            "Found 5 mod file(s) in archive.",
            "Skipped (already exists): jei.jar",
            "Installation complete! Installed: 3, Skipped: 2",
        ] {
            assert!(
                statuses.iter().any(|s| s.starts_with(expected)),
                "missing status {expected:?} in {statuses:#?}"
            );
        }

        let installed = statuses.iter().position(|s| s == "Installed: sodium.jar").unwrap();
        let summary = statuses.iter().position(|s| s.starts_with("Installation complete")).unwrap();
        assert!(installed < summary);

        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(progress.last(), Some(&100));
    }

    #[test]
    fn falls_back_to_parts() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let remote = FakeRemote::default()
            .with_file(&part(1), RAR4_HEADER)
            .with_file(&part(2), b"second volume");

        let (res, state, statuses, _) = run(&config, &remote, &modpack_with_duplicates());

        assert!(res.is_ok());
        assert_eq!(state, SessionState::Completed);
        assert_eq!(
            remote.probes.borrow().as_slice(),
            [SINGLE.to_string(), part(1), part(2), part(3)]
        );
        assert_eq!(remote.fetches.borrow().as_slice(), [part(1), part(2)]);
        assert!(statuses.iter().any(|s| s == "Found modpack part 2"));
        assert!(statuses.iter().any(|s| s == "Downloading Modpack.part2.rar (2/2)..."));
        assert!(!config.temp_dir.exists());
    }

    #[test]
    fn nothing_to_download() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let remote = FakeRemote::default();

        let (res, state, statuses, _) = run(&config, &remote, &modpack_with_duplicates());

        assert!(matches!(res, Err(ModpackError::NotFound(_))));
        assert_eq!(state, SessionState::Failed);
        assert!(remote.fetches.borrow().is_empty());
        assert!(config.mods_dir.is_dir());
        assert!(statuses.last().unwrap().starts_with("Installation failed: "));
    }

    #[test]
    #[traced_test]
    fn cleans_up_after_invalid_archive() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let remote = FakeRemote::default().with_file(SINGLE, b"<!DOCTYPE html>");

        let (res, state, statuses, _) = run(&config, &remote, &MemoryFormat::broken());

        assert!(matches!(res, Err(ModpackError::InvalidArchive { .. })));
        assert_eq!(state, SessionState::Failed);
        assert!(!config.temp_dir.join("Modpack.rar").exists());
        assert!(statuses
            .iter()
            .any(|s| s.starts_with("File signature does not match RAR format")));
        assert!(logs_contain("does not match a known RAR signature"));
    }

    #[test]
    fn no_mods_in_archive() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let remote = FakeRemote::default().with_file(SINGLE, RAR4_HEADER);
        let format = MemoryFormat::new(vec![MemoryEntry::file("config/options.txt", b"fov:90")]);

        let (res, _, _, _) = run(&config, &remote, &format);

        assert!(matches!(res, Err(ModpackError::NoEligibleEntries)));
        assert_eq!(fs::read_dir(&config.mods_dir).unwrap().count(), 0);
        assert!(!config.temp_dir.exists());
    }

    #[test]
    fn installs_from_local_archive() {
        let root = tempfile::tempdir().unwrap();
        let archive = root.path().join("Modpack.rar");
        fs::write(&archive, RAR4_HEADER).unwrap();
        let config = ModpackConfig {
            local_archive: Some(archive.clone()),
            ..config(root.path())
        };
        let remote = FakeRemote::default();

        let (res, _, _, _) = run(&config, &remote, &modpack_with_duplicates());

        assert_eq!(res.unwrap().installed, 3);
        assert!(remote.probes.borrow().is_empty());
        assert!(archive.exists());
        assert!(!config.temp_dir.exists());
    }

    #[test]
    fn missing_local_archive() {
        let root = tempfile::tempdir().unwrap();
        let config = ModpackConfig {
            local_archive: Some(root.path().join("Modpack.rar")),
            ..config(root.path())
        };

        let (res, state, _, _) = run(&config, &FakeRemote::default(), &modpack_with_duplicates());

        assert!(matches!(res, Err(ModpackError::MissingFile(_))));
        assert_eq!(state, SessionState::Failed);
    }

    #[test]
    fn clears_old_mods_first() {
        let root = tempfile::tempdir().unwrap();
        let config = ModpackConfig {
            clear_existing: true,
            ..config(root.path())
        };
        fs::create_dir_all(&config.mods_dir).unwrap();
        fs::write(config.mods_dir.join("outdated.jar"), b"old").unwrap();
        fs::write(config.mods_dir.join("jei.jar"), b"old jei").unwrap();
        fs::write(config.mods_dir.join("notes.txt"), b"keep").unwrap();
        let remote = FakeRemote::default().with_file(SINGLE, RAR4_HEADER);

        let (res, _, statuses, _) = run(&config, &remote, &modpack_with_duplicates());

        assert_eq!(res.unwrap().installed, 3);
        assert!(!config.mods_dir.join("outdated.jar").exists());
        assert!(config.mods_dir.join("notes.txt").exists());
        assert_eq!(fs::read(config.mods_dir.join("jei.jar")).unwrap(), b"jei");
        assert!(statuses.iter().any(|s| s == "Cleared 2 existing mod(s)."));
    }

    #[test]
    fn session_runs_once() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let remote = FakeRemote::default().with_file(SINGLE, RAR4_HEADER);
        let format = modpack_with_duplicates();
        let mut session = InstallSession::new(&config, &remote, &format);

        assert!(session.run(&mut |_| {}).is_ok());
        assert!(matches!(
            session.run(&mut |_| {}),
            Err(ModpackError::MiscError(_))
        ));
    }

    #[test]
    fn progress_ranges() {
        assert_eq!(download_progress(0, 1, 0), 10);
        assert_eq!(download_progress(0, 1, 100), 65);
        assert_eq!(download_progress(0, 2, 100), 37);
        assert_eq!(download_progress(1, 2, 100), 65);
        assert_eq!(install_progress(0, 4), 70);
        assert_eq!(install_progress(4, 4), 99);
    }
}
