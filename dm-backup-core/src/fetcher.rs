//! Content Fetcher: resolves an item's latest version and opens its content as a lazy stream.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use crate::contract::{ContentStream, Credential, DataManagement, Version};
use crate::error::{BackupError, Result};
use crate::timeout::with_timeout;

/// The resolved version's display name plus its still-unread content.
///
/// The caller must consume or drop `stream`; nothing has been buffered locally.
pub struct FetchedContent {
    pub name: String,
    pub version_id: String,
    pub stream: ContentStream,
}

impl fmt::Debug for FetchedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedContent")
            .field("name", &self.name)
            .field("version_id", &self.version_id)
            .finish_non_exhaustive()
    }
}

/// Picks the version treated as current.
///
/// When every version reports a `version_number` the highest one wins; otherwise the
/// service order is trusted and the first entry is used.
pub fn select_latest(versions: &[Version]) -> Option<&Version> {
    if !versions.is_empty() && versions.iter().all(|v| v.version_number.is_some()) {
        return versions.iter().max_by_key(|v| v.version_number);
    }
    versions.first()
}

pub struct ContentFetcher<'a, C: ?Sized> {
    client: &'a C,
    version_timeout: Duration,
}

impl<'a, C> ContentFetcher<'a, C>
where
    C: DataManagement + ?Sized,
{
    pub fn new(client: &'a C, version_timeout: Duration) -> Self {
        Self {
            client,
            version_timeout,
        }
    }

    /// Resolves `item_id`'s latest version within `project_id` and opens its content.
    ///
    /// Fails with `Timeout` when the version list takes longer than the configured deadline,
    /// `NoVersionFound` when there is nothing downloadable, and `Upstream` on any service error.
    pub async fn fetch_content(
        &self,
        project_id: &str,
        item_id: &str,
        credential: &Credential,
    ) -> Result<FetchedContent> {
        let versions = with_timeout(
            "list item versions",
            self.version_timeout,
            self.client
                .list_item_versions(project_id, item_id, credential),
        )
        .await?;
        debug!(item_id, versions = versions.len(), "Resolved item versions");

        let latest = select_latest(&versions).ok_or_else(|| BackupError::NoVersionFound {
            item_id: item_id.to_string(),
        })?;
        let storage_url =
            latest
                .storage_url
                .as_deref()
                .ok_or_else(|| BackupError::NoVersionFound {
                    item_id: item_id.to_string(),
                })?;

        let stream = self
            .client
            .open_version_content(storage_url, credential)
            .await
            .map_err(|e| BackupError::upstream("open version content", e))?;

        info!(
            item_id,
            version_id = %latest.id,
            name = %latest.display_name,
            "Opened version content"
        );
        Ok(FetchedContent {
            name: latest.display_name.clone(),
            version_id: latest.id.clone(),
            stream,
        })
    }
}
