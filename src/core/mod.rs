pub mod archive;
pub mod manage;
pub mod session;
pub mod signature;
pub mod source;
pub mod utils;

#[cfg(feature = "rar")]
pub use archive::RarFormat;
#[cfg(feature = "rar")]
pub use session::{install_modpack, spawn_install};
pub use session::{InstallSession, SessionEvent, SessionState};
pub use signature::{classify, ArchiveSignature};
pub use source::{discover_parts, ModpackSource, PartTemplate};
