#![doc = "HTTP client for the document-management REST service: implements the core `DataManagement` trait over reqwest."]
//
//! # ApsClient
//!
//! Bridges the [`DataManagement`] abstraction in `dm-backup-core` to the JSON:API surface of
//! the remote service:
//!
//! - `GET /project/v1/hubs`
//! - `GET /project/v1/hubs/{hub_id}/projects`
//! - `GET /project/v1/hubs/{hub_id}/projects/{project_id}/topFolders`
//! - `GET /data/v1/projects/{project_id}/folders/{folder_id}/contents`
//! - `GET /data/v1/projects/{project_id}/items/{item_id}/versions`
//! - `GET {storage href}` for a version's binary content
//!
//! Every request carries the caller's bearer token. Listing responses are followed through
//! `links.next.href` until the last page. Content is returned as a lazy byte stream; nothing is
//! buffered here.

use async_trait::async_trait;
use dm_backup_core::contract::{
    ContentNode, ContentStream, Credential, DataManagement, Hub, Project, UpstreamError, Version,
};
use futures::TryStreamExt;
use serde::Deserialize;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://developer.api.autodesk.com";

pub struct ApsClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApsClient {
    pub fn new(base_url: &str) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("dm-backup/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        info!(base_url = %base_url, "Initialized ApsClient");
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches every page of a listing, starting at `path` relative to the base URL.
    async fn get_all(&self, path: &str, credential: &Credential) -> Result<Vec<Resource>, UpstreamError> {
        let mut url = format!("{}{}", self.base_url, path);
        let mut resources = Vec::new();
        loop {
            let page: Page = self
                .http
                .get(&url)
                .bearer_auth(credential.token())
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            debug!(url = %url, count = page.data.len(), "Fetched listing page");
            resources.extend(page.data);

            let next = page.links.and_then(|l| l.next).map(|l| l.href);
            match next {
                Some(href) if href != url => url = self.absolute(href),
                _ => break,
            }
        }
        Ok(resources)
    }

    fn absolute(&self, href: String) -> String {
        if href.starts_with('/') {
            format!("{}{}", self.base_url, href)
        } else {
            href
        }
    }
}

#[async_trait]
impl DataManagement for ApsClient {
    async fn list_hubs(&self, credential: &Credential) -> Result<Vec<Hub>, UpstreamError> {
        let resources = self.get_all("/project/v1/hubs", credential).await?;
        Ok(resources
            .into_iter()
            .map(|r| Hub {
                name: r.attributes.label(&r.id),
                id: r.id,
            })
            .collect())
    }

    async fn list_projects(
        &self,
        hub_id: &str,
        credential: &Credential,
    ) -> Result<Vec<Project>, UpstreamError> {
        let path = format!("/project/v1/hubs/{hub_id}/projects");
        let resources = self.get_all(&path, credential).await?;
        Ok(resources
            .into_iter()
            .map(|r| Project {
                name: r.attributes.label(&r.id),
                id: r.id,
            })
            .collect())
    }

    async fn list_top_level_contents(
        &self,
        hub_id: &str,
        project_id: &str,
        credential: &Credential,
    ) -> Result<Vec<ContentNode>, UpstreamError> {
        let path = format!("/project/v1/hubs/{hub_id}/projects/{project_id}/topFolders");
        let resources = self.get_all(&path, credential).await?;
        Ok(into_nodes(resources))
    }

    async fn list_folder_contents(
        &self,
        project_id: &str,
        folder_id: &str,
        credential: &Credential,
    ) -> Result<Vec<ContentNode>, UpstreamError> {
        let path = format!("/data/v1/projects/{project_id}/folders/{folder_id}/contents");
        let resources = self.get_all(&path, credential).await?;
        Ok(into_nodes(resources))
    }

    async fn list_item_versions(
        &self,
        project_id: &str,
        item_id: &str,
        credential: &Credential,
    ) -> Result<Vec<Version>, UpstreamError> {
        let path = format!("/data/v1/projects/{project_id}/items/{item_id}/versions");
        let resources = self.get_all(&path, credential).await?;
        Ok(resources
            .into_iter()
            .map(|r| {
                let storage_url = r
                    .relationships
                    .and_then(|rel| rel.storage)
                    .and_then(|s| s.meta)
                    .and_then(|m| m.link)
                    .map(|l| l.href);
                Version {
                    display_name: r.attributes.label(&r.id),
                    version_number: r.attributes.version_number,
                    storage_url,
                    id: r.id,
                }
            })
            .collect())
    }

    async fn open_version_content(
        &self,
        storage_url: &str,
        credential: &Credential,
    ) -> Result<ContentStream, UpstreamError> {
        let response = self
            .http
            .get(storage_url)
            .bearer_auth(credential.token())
            .send()
            .await?
            .error_for_status()?;
        debug!(status = %response.status(), content_length = ?response.content_length(), "Opened version content");
        let stream = response
            .bytes_stream()
            .map_err(|e| -> UpstreamError { Box::new(e) });
        Ok(Box::pin(stream))
    }
}

/// Keeps folders and items, in service order. Other resource types are ignored.
fn into_nodes(resources: Vec<Resource>) -> Vec<ContentNode> {
    resources
        .into_iter()
        .filter_map(|r| {
            let name = r.attributes.label(&r.id);
            match r.kind.as_str() {
                "folders" => Some(ContentNode::folder(r.id, name)),
                "items" => Some(ContentNode::item(r.id, name)),
                other => {
                    debug!(resource_type = other, id = %r.id, "Ignoring unsupported resource type");
                    None
                }
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    data: Vec<Resource>,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    relationships: Option<Relationships>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attributes {
    name: Option<String>,
    display_name: Option<String>,
    version_number: Option<u64>,
}

impl Attributes {
    /// Display name, then name, then the resource id.
    fn label(&self, id: &str) -> String {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(id)
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct Relationships {
    #[serde(default)]
    storage: Option<Storage>,
}

#[derive(Debug, Deserialize)]
struct Storage {
    #[serde(default)]
    meta: Option<StorageMeta>,
}

#[derive(Debug, Deserialize)]
struct StorageMeta {
    #[serde(default)]
    link: Option<Link>,
}
