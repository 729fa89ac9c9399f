//! Archive Builder: the public entry point of the backup pipeline.
//!
//! [`BackupService`] is constructed once at process start around a shared
//! [`DataManagement`] client and handed to whatever serves requests. Each call runs one
//! independent backup:
//!
//! 1. pre-flight: a missing credential fails with `AuthMissing` before any upstream call
//! 2. scope resolution: fatal errors (`ScopeNotFound`, hub listing failures, the scoped hub's
//!    project listing) are returned before a single archive byte exists
//! 3. traversal: hubs' projects are listed as each hub is reached (fatal on failure);
//!    node-level failures are logged and skipped (see [`crate::walker`])
//! 4. finalization: the ZIP trailer is written exactly once; a failure here is fatal
//!
//! [`produce_full_backup`](BackupService::produce_full_backup) and
//! [`produce_scoped_backup`](BackupService::produce_scoped_backup) return an
//! [`ArchiveStream`] the caller pipes to its own transport. A run that fails after streaming
//! has started ends the stream with an `Err` item instead of a clean end, so a truncated
//! archive is never mistaken for a complete one. Dropping the stream cancels the run.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncWrite, DuplexStream};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::archive::ArchiveWriter;
use crate::config::BackupConfig;
use crate::contract::{Credential, DataManagement};
use crate::error::{BackupError, Result};
use crate::walker::{resolve_scope, BackupReport, BackupScope, ResolvedScope, TreeWalker};

/// In-flight bytes between the archive encoder and the consumer.
const PIPE_CAPACITY: usize = 256 * 1024;

pub struct BackupService<C: ?Sized> {
    client: Arc<C>,
    config: BackupConfig,
}

impl<C> BackupService<C>
where
    C: DataManagement + ?Sized + 'static,
{
    pub fn new(client: Arc<C>, config: BackupConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Streams an archive of every hub, project, folder and item the credential can see.
    pub async fn produce_full_backup(&self, credential: Option<Credential>) -> Result<ArchiveStream> {
        self.produce(BackupScope::Full, credential).await
    }

    /// Streams an archive of a single project. Entries are rooted at the project name.
    pub async fn produce_scoped_backup(
        &self,
        credential: Option<Credential>,
        hub_id: &str,
        project_id: &str,
    ) -> Result<ArchiveStream> {
        let scope = BackupScope::Scoped {
            hub_id: hub_id.to_string(),
            project_id: project_id.to_string(),
        };
        self.produce(scope, credential).await
    }

    /// Runs a whole backup into a caller-owned sink and finalizes it.
    ///
    /// Returns the sink (flushed, not shut down) together with the run report.
    pub async fn backup_into<W>(
        &self,
        scope: &BackupScope,
        credential: Option<Credential>,
        sink: W,
        cancel: CancellationToken,
    ) -> Result<(BackupReport, W)>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let run_id = Uuid::new_v4();
        async {
            let credential = preflight(credential)?;
            let resolved = resolve_scope(&*self.client, &self.config, scope, &credential).await?;
            run_resolved(&*self.client, &self.config, resolved, &credential, sink, cancel).await
        }
        .instrument(info_span!("backup", %run_id, ?scope))
        .await
    }

    async fn produce(&self, scope: BackupScope, credential: Option<Credential>) -> Result<ArchiveStream> {
        let run_id = Uuid::new_v4();
        let span = info_span!("backup", %run_id, ?scope);

        let (credential, resolved) = async {
            let credential = preflight(credential)?;
            let resolved = resolve_scope(&*self.client, &self.config, &scope, &credential).await?;
            info!(roots = resolved.roots.len(), "Scope resolved, starting archive stream");
            Ok::<_, BackupError>((credential, resolved))
        }
        .instrument(span.clone())
        .await?;

        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let client = Arc::clone(&self.client);
        let config = self.config.clone();
        let walk_cancel = cancel.clone();

        tokio::spawn(
            async move {
                let outcome = run_resolved(&*client, &config, resolved, &credential, writer, walk_cancel)
                    .await
                    .map(|(report, _sink)| report);
                if let Err(e) = &outcome {
                    error!(error = %e, "Backup run failed, archive stream aborted");
                }
                // The consumer may already be gone.
                let _ = outcome_tx.send(outcome);
            }
            .instrument(span),
        );

        Ok(ArchiveStream {
            body: ReaderStream::with_capacity(reader, 64 * 1024),
            outcome: Some(outcome_rx),
            report: None,
            _cancel_on_drop: cancel.drop_guard(),
        })
    }
}

fn preflight(credential: Option<Credential>) -> Result<Credential> {
    match credential {
        Some(credential) if !credential.is_blank() => Ok(credential),
        _ => {
            error!("Access token is missing, refusing to start backup");
            Err(BackupError::AuthMissing)
        }
    }
}

async fn run_resolved<C, W>(
    client: &C,
    config: &BackupConfig,
    resolved: ResolvedScope,
    credential: &Credential,
    sink: W,
    cancel: CancellationToken,
) -> Result<(BackupReport, W)>
where
    C: DataManagement + ?Sized,
    W: AsyncWrite + Unpin + Send,
{
    let mut report = BackupReport::default();
    let mut archive = ArchiveWriter::new(sink, config.compression_level);
    TreeWalker::new(client, config, cancel)
        .walk(resolved.roots, credential, &mut archive, &mut report)
        .await?;
    let sink = archive.finish().await?;
    info!(
        entries = report.entries_written,
        bytes = report.bytes_written,
        items_failed = report.items_failed,
        containers_skipped = report.containers_skipped,
        empty_hubs = report.empty_hubs,
        "Backup completed"
    );
    Ok((report, sink))
}

/// The archive as a stream of byte chunks, ready to be piped to a response body or a file.
///
/// Ends with `None` after a successful run, or with one `Err` item when the run failed after
/// streaming began. Dropping it cancels the run.
pub struct ArchiveStream {
    body: ReaderStream<DuplexStream>,
    outcome: Option<oneshot::Receiver<Result<BackupReport>>>,
    report: Option<BackupReport>,
    _cancel_on_drop: DropGuard,
}

impl ArchiveStream {
    /// The run report, available once the stream has ended successfully.
    pub fn report(&self) -> Option<&BackupReport> {
        self.report.as_ref()
    }
}

impl Stream for ArchiveStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(chunk) = ready!(Pin::new(&mut this.body).poll_next(cx)) {
            return Poll::Ready(Some(chunk));
        }
        let Some(outcome) = this.outcome.as_mut() else {
            return Poll::Ready(None);
        };
        let outcome = ready!(Pin::new(outcome).poll(cx));
        this.outcome = None;
        match outcome {
            Ok(Ok(report)) => {
                this.report = Some(report);
                Poll::Ready(None)
            }
            Ok(Err(e)) => Poll::Ready(Some(Err(io::Error::other(e)))),
            Err(_) => Poll::Ready(Some(Err(io::Error::other(
                "backup task ended without reporting an outcome",
            )))),
        }
    }
}
