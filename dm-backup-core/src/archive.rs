//! Streaming ZIP writer over an async byte sink.
//!
//! The encoder runs in non-seeking stream mode and compressed bytes are forwarded to the sink
//! as soon as the encoder emits them, so peak memory does not grow with the size of the archive.
//!
//! Each item is first spooled to an anonymous temporary file. An upstream failure halfway
//! through a download therefore drops that item without leaving a truncated entry behind.
//!
//! Duplicate entry names are kept, not overwritten: the second `a.pdf` becomes `a (2).pdf`.

use std::collections::HashSet;
use std::io::{self, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use zip::write::{SimpleFileOptions, StreamWriter};
use zip::result::ZipError;
use zip::{CompressionMethod, ZipWriter};

use crate::contract::ContentStream;
use crate::error::{BackupError, Result};
use crate::sanitize::MAX_SEGMENT_CHARS;

const COPY_CHUNK: usize = 64 * 1024;

/// Bytes emitted by the encoder but not yet handed to the sink.
#[derive(Clone, Default)]
struct PendingBytes(Arc<Mutex<Vec<u8>>>);

impl PendingBytes {
    fn take(&self) -> Vec<u8> {
        let mut buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *buf)
    }
}

impl Write for PendingBytes {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One entry written to the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
}

pub struct ArchiveWriter<W> {
    zip: ZipWriter<StreamWriter<PendingBytes>>,
    pending: PendingBytes,
    sink: W,
    options: SimpleFileOptions,
    names: HashSet<String>,
    entries: usize,
    bytes_in: u64,
}

impl<W> ArchiveWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(sink: W, compression_level: Option<i64>) -> Self {
        let pending = PendingBytes::default();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(compression_level)
            .unix_permissions(0o644);
        Self {
            zip: ZipWriter::new_stream(pending.clone()),
            pending,
            sink,
            options,
            names: HashSet::new(),
            entries: 0,
            bytes_in: 0,
        }
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Total uncompressed bytes written across all entries.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Reads `stream` to the end and appends it as one entry named `name`.
    ///
    /// A stream error yields `BackupError::Upstream` and writes nothing to the archive.
    pub async fn append_stream(&mut self, name: &str, stream: ContentStream) -> Result<ArchiveEntry> {
        let (mut spool, size) = spool(stream).await?;

        let name = self.unique_name(name);
        let options = self.options.clone().large_file(size >= u64::from(u32::MAX));
        self.zip.start_file(name.as_str(), options)?;

        let mut buf = vec![0u8; COPY_CHUNK];
        loop {
            let n = spool.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.zip.write_all(&buf[..n])?;
            self.drain().await?;
        }

        self.entries += 1;
        self.bytes_in += size;
        debug!(entry = %name, size, "Archived entry");
        Ok(ArchiveEntry { name, size })
    }

    /// Writes the central directory and flushes the sink. No entries can follow.
    pub async fn finish(self) -> Result<W> {
        let ArchiveWriter {
            zip,
            pending,
            mut sink,
            entries,
            bytes_in,
            ..
        } = self;
        zip.finish().map_err(BackupError::ArchiveFinalization)?;
        let trailer = pending.take();
        let written = match sink.write_all(&trailer).await {
            Ok(()) => sink.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| BackupError::ArchiveFinalization(ZipError::Io(e)))?;
        info!(entries, bytes_in, "Archive finalized");
        Ok(sink)
    }

    async fn drain(&mut self) -> Result<()> {
        let chunk = self.pending.take();
        if !chunk.is_empty() {
            self.sink.write_all(&chunk).await?;
        }
        Ok(())
    }

    fn unique_name(&mut self, name: &str) -> String {
        if self.names.insert(name.to_string()) {
            return name.to_string();
        }
        let file_start = name.rfind('/').map_or(0, |i| i + 1);
        let (dir, file) = name.split_at(file_start);
        let (stem, ext) = match file.rfind('.') {
            Some(dot) if dot > 0 => file.split_at(dot),
            _ => (file, ""),
        };
        let mut n = 2;
        loop {
            let candidate = format!("{dir}{}", suffixed_segment(stem, n, ext));
            if self.names.insert(candidate.clone()) {
                debug!(original = name, renamed = %candidate, "Entry name collision");
                return candidate;
            }
            n += 1;
        }
    }
}

/// `{stem} ({n}){ext}`, shortened so the segment stays within [`MAX_SEGMENT_CHARS`] characters.
///
/// The stem gives way first; the extension is only cut when it alone leaves no room.
fn suffixed_segment(stem: &str, n: usize, ext: &str) -> String {
    let suffix = format!(" ({n})");
    let room = MAX_SEGMENT_CHARS.saturating_sub(suffix.chars().count());
    let ext: String = ext.chars().take(room).collect();
    let stem: String = stem
        .chars()
        .take(room - ext.chars().count())
        .collect();
    format!("{stem}{suffix}{ext}")
}

/// Copies the whole stream into an anonymous temporary file and rewinds it.
async fn spool(mut stream: ContentStream) -> Result<(tokio::fs::File, u64)> {
    let mut file = tokio::fs::File::from_std(tempfile::tempfile()?);
    let mut size = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| BackupError::upstream("stream version content", e))?;
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;
    file.seek(SeekFrom::Start(0)).await?;
    Ok((file, size))
}
