//! Directory archiver
//!
//! Compresses a directory into a single zip file using deflate at the
//! highest level. Entries are stored relative to the directory root, so
//! extracting the archive recreates the directory's contents rather than
//! the directory itself.
//!
//! # Example
//!
//! ```no_run
//! use drive_uploadr::archive::compress_directory;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let summary = compress_directory(Path::new("/data/reports"), Path::new("/data/reports.zip")).await?;
//! println!("{} entries, {} bytes", summary.entries, summary.bytes);
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Deflate level used for every entry
pub const COMPRESSION_LEVEL: i64 = 9;

/// Archive errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("Path is not valid UTF-8: {}", .0.display())]
    InvalidName(PathBuf),

    #[error("Archive task failed: {0}")]
    Join(String),
}

/// Result of a finished archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    /// Files and directories written
    pub entries: usize,
    /// Size of the archive on disk
    pub bytes: u64,
}

/// Compress `source` into a zip file at `destination`.
///
/// The destination must not exist yet; an existing file is never
/// overwritten or removed. Returns once the archive has been finished and
/// synced, so its size can be read immediately. A partially written
/// archive is removed on failure.
#[tracing::instrument(
    name = "archive.compress",
    skip_all,
    fields(source = %source.display(), destination = %destination.display()),
    err
)]
pub async fn compress_directory(
    source: &Path,
    destination: &Path,
) -> Result<ArchiveSummary, ArchiveError> {
    let metadata = tokio::fs::metadata(source).await?;
    if !metadata.is_dir() {
        return Err(ArchiveError::NotADirectory(source.to_path_buf()));
    }

    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => {
                ArchiveError::DestinationExists(destination.to_path_buf())
            }
            _ => ArchiveError::Io(e),
        })?
        .into_std()
        .await;

    tracing::info!("Compressing directory");

    let src = source.to_path_buf();
    let dest = destination.to_path_buf();
    let written = tokio::task::spawn_blocking(move || write_archive(&src, &dest, file))
        .await
        .map_err(|e| ArchiveError::Join(e.to_string()))
        .and_then(|result| result);

    let measured = match written {
        Ok(entries) => tokio::fs::metadata(destination)
            .await
            .map(|metadata| (entries, metadata.len()))
            .map_err(ArchiveError::from),
        Err(e) => Err(e),
    };

    let (entries, bytes) = match measured {
        Ok(measured) => measured,
        Err(e) => {
            remove_partial(destination).await;
            return Err(e);
        }
    };

    tracing::info!(entries, bytes, "Compression completed");

    Ok(ArchiveSummary {
        path: destination.to_path_buf(),
        entries,
        bytes,
    })
}

fn write_archive(source: &Path, destination: &Path, file: File) -> Result<usize, ArchiveError> {
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let base_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    let mut entries = 0;
    for entry in WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry?;
        let path = entry.path();
        if path == destination {
            continue;
        }

        let name = entry_name(source, path)?;
        let file_type = entry.file_type();
        let options = with_permissions(base_options, &entry)?;

        if file_type.is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(path)?;
            zip.add_symlink(name, target.to_string_lossy().into_owned(), options)?;
        } else if file_type.is_file() {
            let size = entry.metadata()?.len();
            zip.start_file(name, options.large_file(size >= u32::MAX as u64))?;
            let mut input = File::open(path)?;
            io::copy(&mut input, &mut zip)?;
        } else {
            tracing::warn!(path = %path.display(), "Skipping special file");
            continue;
        }
        entries += 1;
    }

    let writer = zip.finish()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(entries)
}

/// Archive entry name for `path`, relative to `root` with `/` separators
fn entry_name(root: &Path, path: &Path) -> Result<String, ArchiveError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| ArchiveError::InvalidName(path.to_path_buf()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| ArchiveError::InvalidName(path.to_path_buf()))?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn with_permissions(
    options: SimpleFileOptions,
    entry: &walkdir::DirEntry,
) -> Result<SimpleFileOptions, ArchiveError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = entry.metadata()?.permissions().mode();
    Ok(options.unix_permissions(mode & 0o777))
}

#[cfg(not(unix))]
fn with_permissions(
    options: SimpleFileOptions,
    _entry: &walkdir::DirEntry,
) -> Result<SimpleFileOptions, ArchiveError> {
    Ok(options)
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial archive"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to remove partial archive"
        ),
    }
}
