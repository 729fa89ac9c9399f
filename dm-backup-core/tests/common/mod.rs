//! In-memory document-management service for integration tests.
//!
//! Unlike `MockDataManagement`, this fake can hang a call forever or fail a content stream
//! halfway through, which the timeout and spooling tests need.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dm_backup_core::contract::{
    ContentNode, ContentStream, Credential, DataManagement, Hub, Project, UpstreamError, Version,
};

#[derive(Default)]
pub struct FakeService {
    hubs: Vec<Hub>,
    projects: HashMap<String, Vec<Project>>,
    /// Keyed by project id (top level) or folder id.
    children: HashMap<String, Vec<ContentNode>>,
    versions: HashMap<String, Vec<Version>>,
    blobs: HashMap<String, Vec<u8>>,
    hanging_containers: HashSet<String>,
    failing_containers: HashSet<String>,
    failing_items: HashSet<String>,
    hanging_items: HashSet<String>,
    broken_blobs: HashSet<String>,
    stalled_blobs: HashSet<String>,
    slow_containers: HashMap<String, Duration>,
    failing_hubs: HashSet<String>,
    pub upstream_calls: AtomicUsize,
    /// Every call as `operation:id`, in the order they were made.
    requests: Mutex<Vec<String>>,
    open_streams: Arc<AtomicUsize>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hub(mut self, id: &str, name: &str) -> Self {
        self.hubs.push(Hub {
            id: id.into(),
            name: name.into(),
        });
        self.projects.entry(id.into()).or_default();
        self
    }

    pub fn project(mut self, hub_id: &str, id: &str, name: &str) -> Self {
        self.projects.entry(hub_id.into()).or_default().push(Project {
            id: id.into(),
            name: name.into(),
        });
        self
    }

    /// Adds a folder under a project (top level) or another folder.
    pub fn folder(mut self, parent_id: &str, id: &str, name: &str) -> Self {
        self.children
            .entry(parent_id.into())
            .or_default()
            .push(ContentNode::folder(id, name));
        self
    }

    /// Adds an item with a single downloadable version.
    pub fn item(mut self, parent_id: &str, id: &str, version_name: &str, content: &[u8]) -> Self {
        let url = format!("https://storage.test/{id}");
        self.children
            .entry(parent_id.into())
            .or_default()
            .push(ContentNode::item(id, format!("{version_name} (item)")));
        self.versions.insert(
            id.into(),
            vec![Version {
                id: format!("{id}-v1"),
                display_name: version_name.into(),
                version_number: Some(1),
                storage_url: Some(url.clone()),
            }],
        );
        self.blobs.insert(url, content.to_vec());
        self
    }

    /// Adds an item whose versions carry no storage location.
    pub fn item_without_storage(mut self, parent_id: &str, id: &str) -> Self {
        self.children
            .entry(parent_id.into())
            .or_default()
            .push(ContentNode::item(id, id));
        self.versions.insert(
            id.into(),
            vec![Version {
                id: format!("{id}-v1"),
                display_name: id.into(),
                version_number: Some(1),
                storage_url: None,
            }],
        );
        self
    }

    pub fn hang_listing(mut self, container_id: &str) -> Self {
        self.hanging_containers.insert(container_id.into());
        self
    }

    pub fn fail_listing(mut self, container_id: &str) -> Self {
        self.failing_containers.insert(container_id.into());
        self
    }

    pub fn fail_versions(mut self, item_id: &str) -> Self {
        self.failing_items.insert(item_id.into());
        self
    }

    pub fn hang_versions(mut self, item_id: &str) -> Self {
        self.hanging_items.insert(item_id.into());
        self
    }

    pub fn break_stream(mut self, item_id: &str) -> Self {
        self.broken_blobs
            .insert(format!("https://storage.test/{item_id}"));
        self
    }

    /// Content of `item_id` yields its first chunk, then never another.
    pub fn stall_stream(mut self, item_id: &str) -> Self {
        self.stalled_blobs
            .insert(format!("https://storage.test/{item_id}"));
        self
    }

    /// Listing `container_id` answers only after `delay`.
    pub fn slow_listing(mut self, container_id: &str, delay: Duration) -> Self {
        self.slow_containers.insert(container_id.into(), delay);
        self
    }

    pub fn fail_projects(mut self, hub_id: &str) -> Self {
        self.failing_hubs.insert(hub_id.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.upstream_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Content streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn record(&self, operation: &str, id: &str) {
        self.upstream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(format!("{operation}:{id}"));
    }

    async fn list(&self, container_id: &str) -> Result<Vec<ContentNode>, UpstreamError> {
        self.record("list", container_id);
        if let Some(delay) = self.slow_containers.get(container_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.hanging_containers.contains(container_id) {
            futures::future::pending::<()>().await;
        }
        if self.failing_containers.contains(container_id) {
            return Err(format!("listing {container_id} failed").into());
        }
        Ok(self.children.get(container_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl DataManagement for FakeService {
    async fn list_hubs(&self, _credential: &Credential) -> Result<Vec<Hub>, UpstreamError> {
        self.record("hubs", "");
        Ok(self.hubs.clone())
    }

    async fn list_projects(
        &self,
        hub_id: &str,
        _credential: &Credential,
    ) -> Result<Vec<Project>, UpstreamError> {
        self.record("projects", hub_id);
        if self.failing_hubs.contains(hub_id) {
            return Err(format!("projects of {hub_id} unavailable").into());
        }
        Ok(self.projects.get(hub_id).cloned().unwrap_or_default())
    }

    async fn list_top_level_contents(
        &self,
        _hub_id: &str,
        project_id: &str,
        _credential: &Credential,
    ) -> Result<Vec<ContentNode>, UpstreamError> {
        self.list(project_id).await
    }

    async fn list_folder_contents(
        &self,
        _project_id: &str,
        folder_id: &str,
        _credential: &Credential,
    ) -> Result<Vec<ContentNode>, UpstreamError> {
        self.list(folder_id).await
    }

    async fn list_item_versions(
        &self,
        _project_id: &str,
        item_id: &str,
        _credential: &Credential,
    ) -> Result<Vec<Version>, UpstreamError> {
        self.record("versions", item_id);
        if self.hanging_items.contains(item_id) {
            futures::future::pending::<()>().await;
        }
        if self.failing_items.contains(item_id) {
            return Err(format!("versions of {item_id} unavailable").into());
        }
        Ok(self.versions.get(item_id).cloned().unwrap_or_default())
    }

    async fn open_version_content(
        &self,
        storage_url: &str,
        _credential: &Credential,
    ) -> Result<ContentStream, UpstreamError> {
        self.record("content", storage_url);
        let blob = self
            .blobs
            .get(storage_url)
            .cloned()
            .ok_or_else(|| -> UpstreamError { format!("no blob at {storage_url}").into() })?;
        if self.broken_blobs.contains(storage_url) {
            let half = blob[..blob.len() / 2].to_vec();
            return Ok(Box::pin(futures::stream::iter(vec![
                Ok(Bytes::from(half)),
                Err::<Bytes, UpstreamError>("connection reset".into()),
            ])));
        }
        if self.stalled_blobs.contains(storage_url) {
            self.open_streams.fetch_add(1, Ordering::SeqCst);
            return Ok(Box::pin(StalledStream {
                first: Some(Bytes::from(blob)),
                open: Arc::clone(&self.open_streams),
            }));
        }
        Ok(byte_stream(&blob))
    }
}

/// Yields one chunk and then stays pending; counts itself out of `open` when dropped.
struct StalledStream {
    first: Option<Bytes>,
    open: Arc<AtomicUsize>,
}

impl futures::Stream for StalledStream {
    type Item = Result<Bytes, UpstreamError>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.first.take() {
            Some(chunk) => Poll::Ready(Some(Ok(chunk))),
            None => Poll::Pending,
        }
    }
}

impl Drop for StalledStream {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A content stream that yields `data` in a few small chunks.
pub fn byte_stream(data: &[u8]) -> ContentStream {
    let chunks: Vec<Result<Bytes, UpstreamError>> = data
        .chunks(7)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

pub fn credential() -> Credential {
    Credential::bearer("test-token")
}

/// Decompresses every entry of a ZIP archive into name → content.
pub fn read_zip(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip archive");
    let mut entries = BTreeMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).expect("readable entry");
        let mut content = Vec::new();
        file.read_to_end(&mut content).expect("entry decompresses");
        entries.insert(file.name().to_string(), content);
    }
    entries
}
