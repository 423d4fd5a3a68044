//! Concrete tasks run against the build library.

pub mod download;
pub mod extract;
pub mod remove;
pub mod rename;
pub mod scan;
pub mod template;

pub use download::DownloadTask;
pub use extract::{ArchiveKind, ExtractTask};
pub use remove::{DeleteAction, RemoveTask};
pub use rename::RenameTask;
pub use scan::LibraryScanTask;
pub use template::TemplateInstallTask;
