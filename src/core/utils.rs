use std::{
    fs,
    ops::Deref,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

/// Temporary directory that downloads are written to.
///
/// Only the files registered with [`DownloadDir::track`] are removed on cleanup, and the
/// directory itself only goes away once it is empty. Cleanup runs on drop if it wasn't
/// run explicitly.
pub struct DownloadDir {
    pub path: PathBuf,
    files: Vec<PathBuf>,
    cleaned: bool,
}

impl DownloadDir {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        fs::create_dir_all(path.as_ref())?;
        Ok(DownloadDir {
            path: path.as_ref().to_path_buf(),
            files: vec![],
            cleaned: false,
        })
    }

    /// Register a file under this directory for removal, returning its full path
    pub fn track(&mut self, file_name: impl AsRef<Path>) -> PathBuf {
        let path = self.path.join(file_name);
        self.files.push(path.clone());
        path
    }

    /// Best effort removal of tracked files and, if nothing else is left in it, the directory.
    ///
    /// Each failure is passed to `on_warning` and otherwise ignored.
    pub fn cleanup(&mut self, mut on_warning: impl FnMut(String)) {
        self.cleaned = true;
        for file in self.files.drain(..) {
            if !file.exists() {
                continue;
            }
            if let Err(e) = fs::remove_file(&file) {
                on_warning(format!(
                    "Warning: Could not delete {} - {e}",
                    file.display()
                ));
            } else {
                debug!("Removed {}", file.display());
            }
        }

        match fs::read_dir(&self.path) {
            Ok(mut entries) => {
                if entries.next().is_none() {
                    if let Err(e) = fs::remove_dir(&self.path) {
                        on_warning(format!(
                            "Warning: Could not clean up temp directory - {e}"
                        ));
                    } else {
                        debug!("Removed temp directory {}", self.path.display());
                    }
                }
            }
            Err(e) => debug!("Temp directory {} unreadable: {e}", self.path.display()),
        }
    }
}

impl Deref for DownloadDir {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.path
    }
}

impl Drop for DownloadDir {
    fn drop(&mut self) {
        if !self.cleaned {
            self.cleanup(|msg| warn!("{msg}"));
        }
    }
}

/// Last path segment of a URL, without query or fragment
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    let (_, name) = path.rsplit_once('/')?;
    (!name.is_empty()).then_some(name)
}

/// Case-insensitive extension check on a bare file name
pub fn has_extension(file_name: &str, ext: &str) -> bool {
    let ext = ext.trim_start_matches('.');
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::{file_name_from_url, has_extension, DownloadDir};

    #[test]
    fn url_file_names() {
        assert_eq!(
            file_name_from_url("https://github.com/a/b/raw/master/Modpack.part2.rar"),
            Some("Modpack.part2.rar")
        );
        assert_eq!(
            file_name_from_url("https://example.test/Modpack.rar?raw=true#x"),
            Some("Modpack.rar")
        );
        assert_eq!(file_name_from_url("https://example.test/"), None);
        assert_eq!(file_name_from_url("https://example.test"), None);
        assert_eq!(file_name_from_url("Modpack.rar"), None);
    }

    #[test]
    fn extension_match_ignores_case() {
        assert!(has_extension("jei.jar", "jar"));
        assert!(has_extension("JEI.JAR", "jar"));
        assert!(has_extension("jei.Jar", ".jar"));
        assert!(!has_extension("jei.jar.txt", "jar"));
        assert!(!has_extension("jar", "jar"));
        assert!(!has_extension(".jar", "jar"));
    }

    #[test]
    fn cleanup_removes_only_tracked_files() {
        let root = tempfile::tempdir().unwrap();
        let mut dir = DownloadDir::create(root.path().join("dl")).unwrap();
        let part = dir.track("Modpack.part1.rar");
        fs::write(&part, b"data").unwrap();
        fs::write(dir.path.join("keep.txt"), b"not ours").unwrap();

        let mut warnings = vec![];
        dir.cleanup(|w| warnings.push(w));

        assert!(warnings.is_empty());
        assert!(!part.exists());
        assert!(root.path().join("dl").join("keep.txt").exists());
    }

    #[test]
    fn cleanup_removes_empty_dir() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("dl");
        {
            let mut dir = DownloadDir::create(&path).unwrap();
            fs::write(dir.track("Modpack.rar"), b"data").unwrap();
            // tracked but never downloaded
            dir.track("Modpack.part2.rar");
        }
        assert!(!path.exists());
    }
}
