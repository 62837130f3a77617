//! Deck archives: flashcard packages for studying and lossless backups for re-import.
//!
//! - [`export`] renders every active card direction into a CrowdAnki-layout package (`.apkg`)
//! - [`backup`] writes and parses the raw deck data (`.awdeck`)
//! - [`import`] restores a parsed backup, resolving collisions with an [`import::ImportPolicy`]

pub mod backup;
pub mod export;
pub mod import;

pub use backup::{ParsedBackup, read_backup, write_backup};
pub use export::{build_package, download_filename};
pub use import::{ImportOutcome, ImportPolicy, import_backup};
