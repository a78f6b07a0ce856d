
pub mod api;
pub mod core;
pub mod error;
pub mod model;

// Important functions and structs
pub use crate::core::manage::{download_with_progress, install_archive, install_from_reader};
pub use crate::core::{InstallSession, ModpackSource, SessionEvent};
pub use crate::model::{InstallOutcome, ModpackConfig};

pub mod prelude {
    pub use crate::api::{Fetch, HttpTransport, Probe, ProbeStatus};
    pub use crate::core::archive::{ArchiveFormat, ArchiveReader};
    pub use crate::core::manage::{install_archive, EntryReport, EntryStatus};
    #[cfg(feature = "rar")]
    pub use crate::core::{install_modpack, spawn_install, RarFormat};
    pub use crate::core::{
        classify, discover_parts, ArchiveSignature, InstallSession, ModpackSource, PartTemplate,
        SessionEvent, SessionState,
    };
    pub use crate::error::ModpackError;
    pub use crate::model::{
        ExistingFilePolicy, InstallFailure, InstallOutcome, ModpackConfig, ModpackPart,
    };
}
