//! # contract: the remote document-management service as seen by the backup pipeline
//!
//! This module defines the plain data types produced by the remote service (hubs, projects,
//! folder/item nodes and versions) and a single trait, [`DataManagement`], that abstracts the
//! six collaborator calls the pipeline needs:
//!
//! - list hubs, list projects of a hub
//! - list the top-level contents of a project, list the contents of a folder
//! - list the versions of an item (index 0 is what the service considers most recent)
//! - open a streaming read against a version's storage location
//!
//! ## Implementors
//! - The `dm-backup` binary crate provides an HTTP client (`ApsClient`).
//! - Tests use the `mockall`-generated `MockDataManagement`, or hand-written fakes when a call
//!   needs to hang or stream slowly.
//!
//! All methods take the caller's [`Credential`] by reference; implementations must never
//! mutate or cache it.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use mockall::automock;
use serde::Serialize;

/// Error type returned by [`DataManagement`] implementors (simple boxed error, like any transport error).
pub type UpstreamError = Box<dyn std::error::Error + Send + Sync>;

/// A lazily-read body of a version's binary content.
pub type ContentStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

/// Bearer access token for the remote service. Read-only for the whole run.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// True when there is no usable token (empty or whitespace only).
    pub fn is_blank(&self) -> bool {
        self.token.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Top-level account/organisation container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hub {
    pub id: String,
    pub name: String,
}

/// Container of folders and items within a hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    Item,
}

/// A child of a project or folder. Folders and items come back interleaved, in service order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentNode {
    pub id: String,
    /// Untrusted display name; may contain path-hostile characters.
    pub name: String,
    pub kind: NodeKind,
}

impl ContentNode {
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::Folder,
        }
    }

    pub fn item(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::Item,
        }
    }
}

/// A specific revision of an item's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Version {
    pub id: String,
    pub display_name: String,
    /// Monotonic revision number when the service reports one.
    pub version_number: Option<u64>,
    /// Signed download location; absent for versions without stored content.
    pub storage_url: Option<String>,
}

/// The remote document-management service.
///
/// The trait is `Send` + `Sync` and intended for async/await usage; it is implemented by the
/// real HTTP client and by test mocks.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DataManagement: Send + Sync {
    /// Every hub the credential can see.
    async fn list_hubs(&self, credential: &Credential) -> Result<Vec<Hub>, UpstreamError>;

    async fn list_projects(
        &self,
        hub_id: &str,
        credential: &Credential,
    ) -> Result<Vec<Project>, UpstreamError>;

    /// Contents of a project with no parent folder.
    async fn list_top_level_contents(
        &self,
        hub_id: &str,
        project_id: &str,
        credential: &Credential,
    ) -> Result<Vec<ContentNode>, UpstreamError>;

    async fn list_folder_contents(
        &self,
        project_id: &str,
        folder_id: &str,
        credential: &Credential,
    ) -> Result<Vec<ContentNode>, UpstreamError>;

    /// Versions of an item, in service order.
    async fn list_item_versions(
        &self,
        project_id: &str,
        item_id: &str,
        credential: &Credential,
    ) -> Result<Vec<Version>, UpstreamError>;

    /// Opens a streaming read of a version's content, authenticated with the credential.
    async fn open_version_content(
        &self,
        storage_url: &str,
        credential: &Credential,
    ) -> Result<ContentStream, UpstreamError>;
}
