//! Ordered reassembly and hand-off to the save facility.
use crate::error::{ReassemblyError, SinkError};
use crate::state::{Chunk, ChunkState};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// The merged resource, ready to be saved.
#[derive(Debug)]
pub struct Artifact {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Where the save facility put an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef(pub String);

/// External save/open facility.
pub trait ArtifactSink: Send + Sync {
    fn save(&self, artifact: Artifact) -> BoxFuture<'_, Result<ArtifactRef, SinkError>>;

    /// Removes a saved artifact whose session was cancelled mid-save.
    fn discard(&self, artifact: ArtifactRef) -> BoxFuture<'_, Result<(), SinkError>>;

    fn open(&self, artifact: &ArtifactRef) -> Result<(), SinkError>;
}

/// Concatenates chunk buffers in index order.
///
/// Chunks may be supplied in any order. The first buffer becomes the output;
/// every later one is dropped as soon as it has been appended.
///
/// # Errors
///
/// Fails if a chunk is not complete or the merged length differs from
/// `declared_size`.
pub fn reassemble(mut chunks: Vec<Chunk>, declared_size: u64) -> Result<Vec<u8>, ReassemblyError> {
    chunks.sort_by_key(|c| c.index);

    for chunk in &chunks {
        if chunk.state != ChunkState::Complete || !chunk.is_filled() {
            return Err(ReassemblyError::IncompleteChunk {
                index: chunk.index,
                have: chunk.bytes_transferred(),
                want: chunk.len(),
            });
        }
    }

    let mut chunks = chunks.into_iter();
    let mut output = chunks.next().map(|c| c.buffer).unwrap_or_default();
    output.reserve((declared_size as usize).saturating_sub(output.len()));
    for chunk in chunks {
        output.extend_from_slice(&chunk.buffer);
    }

    if output.len() as u64 != declared_size {
        return Err(ReassemblyError::LengthMismatch {
            expected: declared_size,
            actual: output.len() as u64,
        });
    }

    Ok(output)
}

/// Saves artifacts as files inside a directory.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// `name.ext` for `n == 0`, otherwise `name (n).ext`.
fn numbered_name(filename: &str, n: usize) -> String {
    if n == 0 {
        return filename.to_string();
    }
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    }
}

impl ArtifactSink for FileSink {
    fn save(&self, artifact: Artifact) -> BoxFuture<'_, Result<ArtifactRef, SinkError>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await?;

            // Never overwrite: take the first free `name (n).ext`.
            let mut n = 0;
            let (path, mut file) = loop {
                let path = self.dir.join(numbered_name(&artifact.filename, n));
                match tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .await
                {
                    Ok(file) => break (path, file),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                    Err(e) => return Err(e.into()),
                }
            };
            file.write_all(&artifact.data).await?;
            file.flush().await?;

            info!(path = %path.display(), bytes = artifact.data.len(), "artifact saved");
            Ok(ArtifactRef(path.to_string_lossy().to_string()))
        })
    }

    fn discard(&self, artifact: ArtifactRef) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            tokio::fs::remove_file(&artifact.0).await?;
            info!(path = %artifact.0, "artifact discarded");
            Ok(())
        })
    }

    fn open(&self, artifact: &ArtifactRef) -> Result<(), SinkError> {
        if !Path::new(&artifact.0).exists() {
            return Err(SinkError::Missing(artifact.0.clone()));
        }

        let opener = if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "explorer"
        } else {
            "xdg-open"
        };
        std::process::Command::new(opener).arg(&artifact.0).spawn()?;
        Ok(())
    }
}
