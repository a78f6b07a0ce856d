use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Component, Path, PathBuf},
    time::Duration,
};
use tracing::debug;

use directories::BaseDirs;

use crate::error::ModpackError;

/// Hard ceiling on how many numbered parts discovery will probe
pub const MAX_PARTS: u32 = 20;
/// Timeout for the single-file existence probe
pub const EXISTS_TIMEOUT: Duration = Duration::from_secs(3);
/// Timeout for each multi-part discovery probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Overall timeout for a single download, body included
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Extension of the files copied out of the modpack
pub const MOD_EXTENSION: &str = "jar";

pub const MODPACK_URL: &str =
    "https://github.com/ShadowSyntax/MinecraftModUpdater/raw/master/Modpack.rar";
pub const PART_URL_TEMPLATE: &str =
    "https://github.com/ShadowSyntax/MinecraftModUpdater/raw/master/Modpack.part{N}.rar";
pub const TEMP_DIR_NAME: &str = "minecraft_mod_update";

pub const USER_AGENT: &str = concat!("MinecraftModUpdater/", env!("CARGO_PKG_VERSION"));

/// One numbered fragment of a multi-part modpack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModpackPart {
    /// 1-based, assigned in discovery order
    pub index: u32,
    pub source_url: String,
    pub local_path: PathBuf,
}

/// A single file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: String,
    pub destination: PathBuf,
    /// Used for progress when the server doesn't send a content length
    pub expected_size: Option<u64>,
}

impl DownloadTarget {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            expected_size: None,
        }
    }
}

impl From<&ModpackPart> for DownloadTarget {
    fn from(part: &ModpackPart) -> Self {
        Self::new(part.source_url.clone(), part.local_path.clone())
    }
}

/// Read-only view of an entry inside an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub relative_name: String,
    pub is_directory: bool,
    pub size: u64,
}

impl ArchiveEntry {
    /// The last path component of the entry, accepting either separator
    pub fn base_name(&self) -> &str {
        self.relative_name
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
    }

    /// Base name to install the entry under, if it names a plain file.
    ///
    /// Names that would resolve anywhere but directly inside the target folder (`..`, a
    /// drive prefix like `C:evil.jar`, a root) give `None`. `:` is refused everywhere
    /// since it also selects NTFS alternate streams.
    pub fn install_name(&self) -> Option<&str> {
        let name = self.base_name();
        if name.contains(':') {
            return None;
        }
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(name),
            _ => None,
        }
    }
}

/// What to do when a file with the same name already exists in the mods folder
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExistingFilePolicy {
    #[default]
    Skip,
    Overwrite,
    /// Record the entry as a per-file failure and leave the existing file alone
    Fail,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InstallFailure {
    pub file_name: String,
    pub reason: String,
}

/// Result of one installation pass
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOutcome {
    pub installed: usize,
    pub skipped: usize,
    pub failures: Vec<InstallFailure>,
}

impl InstallOutcome {
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Installation complete! Installed: {}, Skipped: {}",
            self.installed, self.skipped
        );
        if !self.failures.is_empty() {
            summary.push_str(&format!(", Failed: {}", self.failures.len()));
        }
        summary
    }
}

/// Settings for an install session, loadable from a JSON5 file.
/// Any field missing from the file keeps its default.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ModpackConfig {
    pub modpack_url: String,
    pub part_url_template: String,
    /// Install from this archive instead of downloading
    pub local_archive: Option<PathBuf>,
    pub mods_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub max_parts: u32,
    pub exists_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub mod_extension: String,
    pub existing_files: ExistingFilePolicy,
    /// Delete existing mod files from `mods_dir` before installing
    pub clear_existing: bool,
}

impl Default for ModpackConfig {
    fn default() -> Self {
        Self {
            modpack_url: MODPACK_URL.into(),
            part_url_template: PART_URL_TEMPLATE.into(),
            local_archive: None,
            mods_dir: default_mods_dir(),
            temp_dir: env::temp_dir().join(TEMP_DIR_NAME),
            max_parts: MAX_PARTS,
            exists_timeout_secs: EXISTS_TIMEOUT.as_secs(),
            probe_timeout_secs: PROBE_TIMEOUT.as_secs(),
            connect_timeout_secs: CONNECT_TIMEOUT.as_secs(),
            download_timeout_secs: DOWNLOAD_TIMEOUT.as_secs(),
            mod_extension: MOD_EXTENSION.into(),
            existing_files: ExistingFilePolicy::default(),
            clear_existing: false,
        }
    }
}

impl ModpackConfig {
    /// Load a config file, filling in defaults for anything it doesn't set
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModpackError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModpackError::MissingFile(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        let config = json5::from_str(&raw)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_with_path(&self, path: impl AsRef<Path>) -> Result<(), ModpackError> {
        let path = path.as_ref();
        let parsed = json5::to_string(self)?;
        if let Some(p) = path.parent() {
            fs::create_dir_all(p)?;
        }
        fs::write(path, parsed)?;
        Ok(())
    }

    pub fn exists_timeout(&self) -> Duration {
        Duration::from_secs(self.exists_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// `max_parts`, never above [`MAX_PARTS`]
    pub fn part_limit(&self) -> u32 {
        self.max_parts.min(MAX_PARTS)
    }
}

/// The `mods` folder of the default Minecraft launcher install for this platform
pub fn default_mods_dir() -> PathBuf {
    let Some(base) = BaseDirs::new() else {
        return PathBuf::from(".minecraft").join("mods");
    };

    let minecraft = if cfg!(target_os = "windows") {
        base.data_dir().join(".minecraft")
    } else if cfg!(target_os = "macos") {
        base.data_dir().join("minecraft")
    } else {
        base.home_dir().join(".minecraft")
    };

    minecraft.join("mods")
}
