#![doc = "dm-backup-core: streaming backup pipeline for a remote document-management tree."]

//! This crate walks a hub → project → folder → item → version hierarchy exposed by a
//! [`contract::DataManagement`] implementation and writes the latest version of every item into
//! a single streaming ZIP archive whose entry paths mirror the hierarchy.
//!
//! Transport, authentication and HTTP handlers live outside this crate; see the `dm-backup`
//! binary for an HTTP client and CLI.
//!
//! # Usage
//! Build one [`BackupService`] at start-up and call
//! [`BackupService::produce_full_backup`] or [`BackupService::produce_scoped_backup`] per request.

pub mod archive;
pub mod backup;
pub mod config;
pub mod contract;
pub mod error;
pub mod fetcher;
pub mod sanitize;
pub mod timeout;
pub mod walker;

pub use backup::{ArchiveStream, BackupService};
pub use config::BackupConfig;
pub use error::{BackupError, Result};
pub use walker::{BackupReport, BackupScope};
