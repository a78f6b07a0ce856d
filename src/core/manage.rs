use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use crate::{
    api::is_timeout,
    core::archive::{ArchiveFormat, ArchiveReader},
    error::ModpackError,
    model::{DownloadTarget, ExistingFilePolicy, InstallFailure, InstallOutcome},
};

use tracing::{debug, trace, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// Stream a response body into `target.destination` and report percentage progress.
///
/// With a known `total`, progress is exact; without one nothing is reported until the
/// body has been fully written, at which point `100` is sent.
/// # Params
/// * body - response body to read from
/// * target - where the body came from and where to write it
/// * total - expected body length, if known
/// * progress - called with each new percentage
pub fn download_with_progress(
    mut body: impl Read,
    target: &DownloadTarget,
    total: Option<u64>,
    progress: &mut dyn FnMut(u8),
) -> Result<u64, ModpackError> {
    let file_path = &target.destination;
    let total = total.filter(|t| *t > 0);

    let mut file = File::create(file_path)?;
    let mut downloaded: u64 = 0;
    let mut last_percent = 0;
    let mut buf = vec![0; CHUNK_SIZE];
    debug!("Starting download from {}", target.url);
    loop {
        let read = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => return Err(ModpackError::Timeout(target.url.clone())),
            Err(e) => {
                return Err(ModpackError::Transport {
                    url: target.url.clone(),
                    source: Box::new(e),
                })
            }
        };
        file.write_all(&buf[..read])?;
        downloaded += read as u64;

        if let Some(total) = total {
            let percent = (downloaded.min(total) * 100 / total) as u8;
            if percent > last_percent {
                last_percent = percent;
                trace!("{} {percent}%", target.url);
                progress(percent);
            }
        }
    }
    file.flush()?;

    if last_percent < 100 {
        progress(100);
    }
    debug!(
        "Finished download of {downloaded} bytes to {}",
        file_path.display()
    );

    Ok(downloaded)
}

/// What happened to one eligible archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    Installed,
    Skipped,
    Failed(String),
}

/// Per-file report passed to the install callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReport {
    pub file_name: String,
    pub status: EntryStatus,
    /// Eligible entries seen so far, this one included
    pub position: usize,
}

/// Open an archive and install its eligible entries into `target_dir`.
///
/// See [`install_from_reader`]
pub fn install_archive(
    format: &dyn ArchiveFormat,
    archive_path: impl AsRef<Path>,
    target_dir: impl AsRef<Path>,
    filter: &dyn Fn(&str) -> bool,
    policy: ExistingFilePolicy,
    on_entry: impl FnMut(&EntryReport),
) -> Result<InstallOutcome, ModpackError> {
    let archive_path = archive_path.as_ref();
    if !archive_path.exists() {
        return Err(ModpackError::MissingFile(archive_path.to_path_buf()));
    }
    let mut reader = format.open(archive_path)?;
    install_from_reader(reader.as_mut(), target_dir, filter, policy, on_entry)
}

/// Copy every file entry whose base name passes `filter` into `target_dir`.
///
/// Entries are flattened to their base name. A failure writing one entry is recorded in
/// the outcome and the remaining entries are still installed; only a broken archive ends
/// the pass early. Finding no eligible entries at all is
/// [`ModpackError::NoEligibleEntries`].
/// # Params
/// * reader - the open archive
/// * target_dir - directory to install to, must already exist
/// * filter - called with each entry's base name
/// * policy - what to do when the file is already in `target_dir`
/// * on_entry - called once per eligible entry, after it was handled
pub fn install_from_reader(
    reader: &mut dyn ArchiveReader,
    target_dir: impl AsRef<Path>,
    filter: &dyn Fn(&str) -> bool,
    policy: ExistingFilePolicy,
    mut on_entry: impl FnMut(&EntryReport),
) -> Result<InstallOutcome, ModpackError> {
    let target_dir = target_dir.as_ref();
    if !target_dir.is_dir() {
        return Err(ModpackError::MissingFile(target_dir.to_path_buf()));
    }
    debug!("Starting mod install into {}", target_dir.display());

    let mut outcome = InstallOutcome::default();
    let mut eligible = 0;
    while let Some(entry) = reader.next_entry()? {
        if entry.is_directory {
            trace!("Skip directory '{}'", entry.relative_name);
            continue;
        }
        let Some(file_name) = entry.install_name().map(String::from) else {
            warn!("Skip entry with unusable name '{}'", entry.relative_name);
            continue;
        };
        if !filter(&file_name) {
            trace!("Skip ineligible entry '{}'", entry.relative_name);
            continue;
        }
        eligible += 1;

        let out = target_dir.join(&file_name);
        let status = if out.exists() {
            match policy {
                ExistingFilePolicy::Skip => EntryStatus::Skipped,
                ExistingFilePolicy::Overwrite => write_entry(reader, &out, true)?,
                ExistingFilePolicy::Fail => {
                    EntryStatus::Failed(ModpackError::EntryExists(file_name.clone()).to_string())
                }
            }
        } else {
            write_entry(reader, &out, false)?
        };

        match &status {
            EntryStatus::Installed => outcome.installed += 1,
            EntryStatus::Skipped => outcome.skipped += 1,
            EntryStatus::Failed(reason) => {
                warn!("Failed to install {file_name}: {reason}");
                outcome.failures.push(InstallFailure {
                    file_name: file_name.clone(),
                    reason: reason.clone(),
                });
            }
        }

        on_entry(&EntryReport {
            file_name,
            status,
            position: eligible,
        });
    }

    if eligible == 0 {
        return Err(ModpackError::NoEligibleEntries);
    }

    Ok(outcome)
}

/// Extract the current entry next to `out` and move it into place once complete.
///
/// Anything but a broken archive becomes a per-entry failure, and a failed entry never
/// touches a file that was already at `out`.
fn write_entry(
    reader: &mut dyn ArchiveReader,
    out: &Path,
    overwrite: bool,
) -> Result<EntryStatus, ModpackError> {
    let staging = staging_path(out);
    if staging.exists() {
        remove_partial(&staging);
    }

    trace!("Write file {}", staging.display());
    let written = match reader.extract_entry(&staging) {
        Ok(written) => written,
        Err(e) => {
            remove_partial(&staging);
            return if e.is_fatal_for_entry() {
                Err(e)
            } else {
                Ok(EntryStatus::Failed(e.to_string()))
            };
        }
    };

    // something else created it while extracting
    if !overwrite && out.exists() {
        remove_partial(&staging);
        return Ok(EntryStatus::Skipped);
    }
    if let Err(e) = fs::rename(&staging, out) {
        remove_partial(&staging);
        return Ok(EntryStatus::Failed(e.to_string()));
    }

    trace!("Installed {} ({written} bytes)", out.display());
    Ok(EntryStatus::Installed)
}

/// `<name>.part` in the same directory, so the final rename never crosses filesystems
fn staging_path(out: &Path) -> PathBuf {
    let mut name = out.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    out.with_file_name(name)
}

fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            debug!("Unable to remove partial file {}: {e}", path.display());
        }
    }
}
