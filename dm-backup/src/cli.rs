///
/// This module implements the CLI for dm-backup: command parsing, argument validation and
/// the async entrypoint shared by `main()` and the integration tests.
///
/// All pipeline logic (traversal, fetching, archiving) lives in the [`dm-backup-core`] crate.
/// This module only wires the HTTP client, config and output file around it.
///
/// ## Commands
/// - `backup` writes a ZIP archive of every accessible hub, or of one project when both
///   `--hub-id` and `--project-id` are given.
/// - `hubs` lists hub and project ids so a scope can be picked.
///
/// [`dm-backup-core`]: ../../dm-backup-core/
use crate::client::ApsClient;
use crate::load_config::{load_optional, CliConfig};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dm_backup_core::contract::{Credential, DataManagement};
use dm_backup_core::{ArchiveStream, BackupReport, BackupService};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// CLI for dm-backup: archive a document-management hub/project tree.
#[derive(Parser)]
#[clap(
    name = "dm-backup",
    version,
    about = "Back up the latest version of every file in a document-management hub into a ZIP archive"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a ZIP backup of all hubs, or of a single project
    Backup {
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// Where to write the archive
        #[clap(long, short, default_value = "backup.zip")]
        output: PathBuf,
        /// Hub containing the project to back up
        #[clap(long, requires = "project_id")]
        hub_id: Option<String>,
        /// Project to back up; entries are rooted at the project name
        #[clap(long, requires = "hub_id")]
        project_id: Option<String>,
        /// Bearer access token
        #[clap(long, env = "APS_ACCESS_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// List accessible hubs and their projects
    Hubs {
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// Bearer access token
        #[clap(long, env = "APS_ACCESS_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Backup {
            config,
            output,
            hub_id,
            project_id,
            token,
        } => {
            let config = load_optional(config.as_deref())?;
            let service = BackupService::new(Arc::new(build_client(&config)?), config.backup);
            let credential = token.map(Credential::bearer);

            let stream = match (hub_id.as_deref(), project_id.as_deref()) {
                (Some(hub_id), Some(project_id)) => {
                    tracing::info!(command = "backup", hub_id, project_id, "Starting scoped backup");
                    service
                        .produce_scoped_backup(credential, hub_id, project_id)
                        .await?
                }
                _ => {
                    tracing::info!(command = "backup", "Starting full backup");
                    service.produce_full_backup(credential).await?
                }
            };

            match write_archive(stream, &output).await {
                Ok(report) => {
                    tracing::info!(command = "backup", output = ?output, ?report, "Backup written");
                    println!(
                        "Wrote {} entries ({} bytes) to {}; {} items failed, {} folders skipped",
                        report.entries_written,
                        report.bytes_written,
                        output.display(),
                        report.items_failed,
                        report.containers_skipped
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "backup", error = %e, "Backup failed, no archive written");
                    Err(e)
                }
            }
        }
        Commands::Hubs { config, token } => {
            let config = load_optional(config.as_deref())?;
            let credential = token
                .filter(|t| !t.trim().is_empty())
                .map(Credential::bearer)
                .ok_or_else(|| anyhow!("access token is missing: pass --token or set APS_ACCESS_TOKEN"))?;
            let client = build_client(&config)?;

            let hubs = client
                .list_hubs(&credential)
                .await
                .map_err(|e| anyhow!("Failed to list hubs: {e}"))?;
            tracing::info!(command = "hubs", hubs = hubs.len(), "Listed hubs");
            for hub in hubs {
                println!("{}\t{}", hub.id, hub.name);
                let projects = client
                    .list_projects(&hub.id, &credential)
                    .await
                    .map_err(|e| anyhow!("Failed to list projects of hub {}: {e}", hub.id))?;
                for project in projects {
                    println!("  {}\t{}", project.id, project.name);
                }
            }
            Ok(())
        }
    }
}

fn build_client(config: &CliConfig) -> Result<ApsClient> {
    ApsClient::new(&config.service.base_url).map_err(|e| anyhow!("Failed to build HTTP client: {e}"))
}

/// Streams the archive into a temporary file next to `output` and moves it into place only
/// once the run has ended cleanly. A failed run leaves no file behind.
async fn write_archive(mut stream: ArchiveStream, output: &Path) -> Result<BackupReport> {
    let dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let staging = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create staging file in {}", dir.display()))?;
    let mut file = tokio::fs::File::from_std(staging.reopen()?);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Backup aborted while streaming")?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    let report = stream.report().cloned().unwrap_or_default();
    staging
        .persist(output)
        .with_context(|| format!("Failed to move archive to {}", output.display()))?;
    Ok(report)
}
