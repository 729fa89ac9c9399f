//! Tree Walker: scope resolution and the depth-first traversal that feeds the archive.
//!
//! # Failure policy
//! - Scope resolution (listing hubs, finding a scoped hub/project) is fatal: nothing has been
//!   written yet and the caller gets the error. Listing a hub's projects is fatal too, but in a
//!   full backup it happens when the walk reaches that hub, so earlier hubs may already be
//!   archived; the run still ends in an error.
//! - Listing a project's or folder's children, and fetching an item, are node-level: the error
//!   is logged with the node's ids, the node is skipped, and siblings carry on.
//! - Sink/encoder failures and cancellation abort the walk.
//!
//! The traversal uses an explicit work stack instead of recursion. Children are pushed in
//! reverse so they pop in service order, which keeps the walk pre-order.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::archive::{ArchiveEntry, ArchiveWriter};
use crate::config::BackupConfig;
use crate::contract::{ContentNode, Credential, DataManagement, Hub, NodeKind, Project};
use crate::error::{BackupError, Result, ScopeKind};
use crate::fetcher::ContentFetcher;
use crate::sanitize::ArchivePath;
use crate::timeout::with_timeout;

/// Which part of the tree a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupScope {
    /// Every hub the credential can see; entries are rooted at `{hub}/{project}`.
    Full,
    /// One hub+project pair; entries are rooted at `{project}`.
    Scoped { hub_id: String, project_id: String },
}

/// A project to traverse and the archive path its contents are written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    pub hub_id: String,
    pub project: Project,
    pub path: ArchivePath,
}

/// Where the walk starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeRoot {
    /// A hub whose projects are listed when the walk reaches it.
    Hub(Hub),
    Project(ProjectRoot),
}

/// Output of scope resolution: the starting set for the walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedScope {
    pub roots: Vec<ScopeRoot>,
}

/// What a run did, for logs and callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub entries_written: usize,
    pub bytes_written: u64,
    pub items_failed: usize,
    /// Projects or folders whose listing failed or timed out.
    pub containers_skipped: usize,
    pub empty_hubs: usize,
}

/// Resolves the scope's root set. Every error here is fatal to the run.
///
/// A full scope only lists hubs here; each hub's projects are listed when the walk reaches it.
pub async fn resolve_scope<C>(
    client: &C,
    config: &BackupConfig,
    scope: &BackupScope,
    credential: &Credential,
) -> Result<ResolvedScope>
where
    C: DataManagement + ?Sized,
{
    let timeout = config.listing_timeout();
    let hubs = with_timeout("list hubs", timeout, client.list_hubs(credential)).await?;
    info!(hubs = hubs.len(), "Listed hubs");

    match scope {
        BackupScope::Full => Ok(ResolvedScope {
            roots: hubs.into_iter().map(ScopeRoot::Hub).collect(),
        }),
        BackupScope::Scoped { hub_id, project_id } => {
            let hub = hubs
                .iter()
                .find(|h| &h.id == hub_id)
                .ok_or_else(|| BackupError::ScopeNotFound {
                    kind: ScopeKind::Hub,
                    id: hub_id.clone(),
                })?;
            let projects = with_timeout(
                "list projects",
                timeout,
                client.list_projects(&hub.id, credential),
            )
            .await?;
            let project = projects
                .into_iter()
                .find(|p| &p.id == project_id)
                .ok_or_else(|| BackupError::ScopeNotFound {
                    kind: ScopeKind::Project,
                    id: project_id.clone(),
                })?;
            Ok(ResolvedScope {
                roots: vec![ScopeRoot::Project(ProjectRoot {
                    hub_id: hub.id.clone(),
                    path: ArchivePath::root().child(&project.name),
                    project,
                })],
            })
        }
    }
}

enum Work {
    /// List a hub's projects and queue each one.
    Hub(Hub),
    /// List a project's top level (`folder_id == None`) or a folder.
    Container {
        root: Arc<ProjectRoot>,
        folder_id: Option<String>,
        path: ArchivePath,
    },
    Item {
        root: Arc<ProjectRoot>,
        item_id: String,
        path: ArchivePath,
    },
}

impl Work {
    fn project(root: ProjectRoot) -> Self {
        let path = root.path.clone();
        Work::Container {
            root: Arc::new(root),
            folder_id: None,
            path,
        }
    }
}

pub struct TreeWalker<'a, C: ?Sized> {
    client: &'a C,
    config: &'a BackupConfig,
    cancel: CancellationToken,
}

impl<'a, C> TreeWalker<'a, C>
where
    C: DataManagement + ?Sized,
{
    pub fn new(client: &'a C, config: &'a BackupConfig, cancel: CancellationToken) -> Self {
        Self {
            client,
            config,
            cancel,
        }
    }

    /// Walks every root depth-first, appending each fetched item to `archive`.
    ///
    /// Does not finalize the archive; the caller owns that step.
    pub async fn walk<W>(
        &self,
        roots: Vec<ScopeRoot>,
        credential: &Credential,
        archive: &mut ArchiveWriter<W>,
        report: &mut BackupReport,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut stack: Vec<Work> = roots
            .into_iter()
            .rev()
            .map(|root| match root {
                ScopeRoot::Hub(hub) => Work::Hub(hub),
                ScopeRoot::Project(project) => Work::project(project),
            })
            .collect();

        while let Some(work) = stack.pop() {
            if self.cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }
            match work {
                Work::Hub(hub) => {
                    // Listing a hub's projects stays fatal, as in scope resolution.
                    let projects = self
                        .cancellable(with_timeout(
                            "list projects",
                            self.config.listing_timeout(),
                            self.client.list_projects(&hub.id, credential),
                        ))
                        .await?;
                    if projects.is_empty() {
                        info!(hub_id = %hub.id, hub = %hub.name, "No projects found for hub, skipping");
                        report.empty_hubs += 1;
                        continue;
                    }
                    let hub_path = ArchivePath::root().child(&hub.name);
                    for project in projects.into_iter().rev() {
                        stack.push(Work::project(ProjectRoot {
                            hub_id: hub.id.clone(),
                            path: hub_path.child(&project.name),
                            project,
                        }));
                    }
                }
                Work::Container {
                    root,
                    folder_id,
                    path,
                } => {
                    let children = match self
                        .cancellable(self.list_children(&root, folder_id.as_deref(), credential))
                        .await
                    {
                        Ok(children) => children,
                        Err(e) if e.is_node_level() => {
                            let node_type = if folder_id.is_some() { "folder" } else { "project" };
                            warn!(
                                project_id = %root.project.id,
                                folder_id = folder_id.as_deref().unwrap_or("<top level>"),
                                node_type,
                                path = %path,
                                error = %e,
                                "Skipping container subtree"
                            );
                            report.containers_skipped += 1;
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    for child in children.into_iter().rev() {
                        stack.push(match child.kind {
                            NodeKind::Folder => Work::Container {
                                root: Arc::clone(&root),
                                path: path.child(&child.name),
                                folder_id: Some(child.id),
                            },
                            NodeKind::Item => Work::Item {
                                root: Arc::clone(&root),
                                item_id: child.id,
                                path: path.clone(),
                            },
                        });
                    }
                }
                Work::Item {
                    root,
                    item_id,
                    path,
                } => {
                    match self
                        .cancellable(self.backup_item(&root, &item_id, &path, credential, archive))
                        .await
                    {
                        Ok(entry) => {
                            report.entries_written += 1;
                            report.bytes_written += entry.size;
                        }
                        Err(e) if e.is_node_level() => {
                            error!(
                                project_id = %root.project.id,
                                item_id = %item_id,
                                node_type = "item",
                                path = %path,
                                error = %e,
                                "Error backing up item, skipping"
                            );
                            report.items_failed += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }

    async fn list_children(
        &self,
        root: &ProjectRoot,
        folder_id: Option<&str>,
        credential: &Credential,
    ) -> Result<Vec<ContentNode>> {
        let timeout = self.config.listing_timeout();
        match folder_id {
            None => {
                with_timeout(
                    "list top-level contents",
                    timeout,
                    self.client
                        .list_top_level_contents(&root.hub_id, &root.project.id, credential),
                )
                .await
            }
            Some(folder_id) => {
                with_timeout(
                    "list folder contents",
                    timeout,
                    self.client
                        .list_folder_contents(&root.project.id, folder_id, credential),
                )
                .await
            }
        }
    }

    async fn backup_item<W>(
        &self,
        root: &ProjectRoot,
        item_id: &str,
        path: &ArchivePath,
        credential: &Credential,
        archive: &mut ArchiveWriter<W>,
    ) -> Result<ArchiveEntry>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let fetcher = ContentFetcher::new(self.client, self.config.version_timeout());
        let content = fetcher
            .fetch_content(&root.project.id, item_id, credential)
            .await?;
        let entry_name = path.entry_name(&content.name);
        archive.append_stream(&entry_name, content.stream).await
    }

    /// Races `work` against cancellation; the losing future (and any open stream) is dropped.
    async fn cancellable<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BackupError::Cancelled),
            result = work => result,
        }
    }
}
