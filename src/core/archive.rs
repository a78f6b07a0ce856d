use std::path::Path;

use crate::{error::ModpackError, model::ArchiveEntry};

/// Forward-only cursor over the entries of an open archive
pub trait ArchiveReader {
    /// Move to the next entry. Data of an entry that wasn't extracted is skipped.
    fn next_entry(&mut self) -> Result<Option<ArchiveEntry>, ModpackError>;

    /// Write the data of the current entry to a file at `dest`, replacing any file there.
    ///
    /// Failures reading the archive are [`ModpackError::InvalidArchive`]; failures writing
    /// `dest` are returned as they are so the caller can pin them on this entry alone.
    /// Either way the reader can still move on to the next entry afterwards.
    fn extract_entry(&mut self, dest: &Path) -> Result<u64, ModpackError>;
}

/// Opens archives of one on-disk format
pub trait ArchiveFormat {
    /// Open an archive. For multi-volume archives this is the first volume; the rest are
    /// found next to it by name.
    fn open(&self, path: &Path) -> Result<Box<dyn ArchiveReader>, ModpackError>;

    /// List every entry without extracting anything
    fn list(&self, path: &Path) -> Result<Vec<ArchiveEntry>, ModpackError> {
        let mut reader = self.open(path)?;
        let mut entries = vec![];
        while let Some(entry) = reader.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(feature = "rar")]
pub use self::rar::RarFormat;

#[cfg(feature = "rar")]
mod rar {
    use std::{
        io,
        path::{Path, PathBuf},
    };

    use tracing::{debug, trace};
    use unrar::{
        error::{Code, UnrarError},
        Archive, CursorBeforeFile, CursorBeforeHeader, FileHeader, OpenArchive, Process,
    };

    use super::{ArchiveFormat, ArchiveReader};
    use crate::{error::ModpackError, model::ArchiveEntry};

    /// RAR 4 and RAR 5 archives, single or multi-volume, read through unrar
    #[derive(Debug, Default, Clone, Copy)]
    pub struct RarFormat;

    impl ArchiveFormat for RarFormat {
        fn open(&self, path: &Path) -> Result<Box<dyn ArchiveReader>, ModpackError> {
            Ok(Box::new(RarReader::open(path)?))
        }

        fn list(&self, path: &Path) -> Result<Vec<ArchiveEntry>, ModpackError> {
            let archive = Archive::new(path)
                .open_for_listing()
                .map_err(|e| invalid(path, e))?;

            archive
                .map(|header| header.map(|h| to_entry(&h)).map_err(|e| invalid(path, e)))
                .collect()
        }
    }

    enum Cursor {
        BeforeHeader(OpenArchive<Process, CursorBeforeHeader>),
        BeforeFile(OpenArchive<Process, CursorBeforeFile>),
    }

    pub(super) struct RarReader {
        path: PathBuf,
        /// Headers read so far
        position: usize,
        /// `None` once the archive is exhausted or broken
        cursor: Option<Cursor>,
    }

    impl RarReader {
        pub(super) fn open(path: &Path) -> Result<Self, ModpackError> {
            let archive = Archive::new(path)
                .open_for_processing()
                .map_err(|e| invalid(path, e))?;

            Ok(RarReader {
                path: path.to_path_buf(),
                position: 0,
                cursor: Some(Cursor::BeforeHeader(archive)),
            })
        }

        /// Reopen the archive and skip past every header already handed out.
        ///
        /// unrar drops its handle when an extraction fails, this puts the cursor back
        /// where it was.
        pub(super) fn restart(&mut self) -> Result<(), ModpackError> {
            debug!("Reopening {} at entry {}", self.path.display(), self.position);
            let mut archive = Archive::new(&self.path)
                .open_for_processing()
                .map_err(|e| invalid(&self.path, e))?;
            for _ in 0..self.position {
                match archive.read_header().map_err(|e| invalid(&self.path, e))? {
                    Some(header) => archive = header.skip().map_err(|e| invalid(&self.path, e))?,
                    None => {
                        self.cursor = None;
                        return Ok(());
                    }
                }
            }
            self.cursor = Some(Cursor::BeforeHeader(archive));
            Ok(())
        }
    }

    impl ArchiveReader for RarReader {
        fn next_entry(&mut self) -> Result<Option<ArchiveEntry>, ModpackError> {
            let archive = match self.cursor.take() {
                Some(Cursor::BeforeHeader(a)) => a,
                Some(Cursor::BeforeFile(a)) => a.skip().map_err(|e| invalid(&self.path, e))?,
                None => return Ok(None),
            };

            match archive.read_header().map_err(|e| invalid(&self.path, e))? {
                Some(header) => {
                    let entry = to_entry(header.entry());
                    trace!("Next rar entry {}", entry.relative_name);
                    self.position += 1;
                    self.cursor = Some(Cursor::BeforeFile(header));
                    Ok(Some(entry))
                }
                None => Ok(None),
            }
        }

        fn extract_entry(&mut self, dest: &Path) -> Result<u64, ModpackError> {
            let header = match self.cursor.take() {
                Some(Cursor::BeforeFile(h)) => h,
                other => {
                    self.cursor = other;
                    return Err(ModpackError::MiscError(
                        "No archive entry selected".into(),
                    ));
                }
            };

            let size = header.entry().unpacked_size;
            match header.extract_to(dest) {
                Ok(next) => {
                    self.cursor = Some(Cursor::BeforeHeader(next));
                    Ok(size)
                }
                Err(e) if is_write_error(&e) => {
                    self.restart()?;
                    Err(io::Error::other(format!("{e} writing {}", dest.display())).into())
                }
                Err(e) => Err(invalid(&self.path, e)),
            }
        }
    }

    /// unrar errors caused by the destination rather than the archive
    fn is_write_error(err: &UnrarError) -> bool {
        matches!(err.code, Code::ECreate | Code::EWrite | Code::EClose)
    }

    fn to_entry(header: &FileHeader) -> ArchiveEntry {
        ArchiveEntry {
            relative_name: header.filename.to_string_lossy().into_owned(),
            is_directory: header.is_directory(),
            size: header.unpacked_size,
        }
    }

    fn invalid(path: &Path, err: UnrarError) -> ModpackError {
        ModpackError::InvalidArchive {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }
}
