use flate2::read::GzDecoder;
use nix::sys::stat::{Mode, umask};
use std::fs::{self, DirBuilder, File, FileTimes, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tar::{Archive, Entry, EntryType};
use thiserror::Error;
use tracing::{debug, instrument, trace};

/// umask is process wide, concurrent extractions must not interleave their guards.
static UMASK_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("could not open `{path}`: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("`{0}` does not name a package")]
    InvalidName(PathBuf),
    #[error("could not read archive entries: {0}")]
    Read(io::Error),
    #[error("entry `{entry}` is outside of the `{expected}` directory")]
    Layout { entry: String, expected: String },
    #[error("archive does not hold a `{0}` directory")]
    MissingDirectory(String),
    #[error("entry `{0}` is a link")]
    Link(String),
    #[error("entry `{entry}` has unsupported type {kind:?}")]
    UnsupportedEntry { entry: String, kind: EntryType },
    #[error("`{0}` exists and is not a directory")]
    NotADirectory(PathBuf),
    #[error("could not write `{path}`: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// An opened `<pkgname>.<suffix>` gzip-compressed tarball holding the buildable source of a
/// single package.
///
/// The bundle must hold one flat directory named after the package. Nested directories, links
/// and any special file are rejected. The handle stays open until [SourceBundle::close] is called.
pub struct SourceBundle {
    path: PathBuf,
    package_name: String,
    archive: Archive<GzDecoder<File>>,
}

impl SourceBundle {
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        let package_name = package_name_from_path(path)?;
        let file = File::open(path).map_err(|source| ExtractError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            package_name,
            archive: Archive::new(GzDecoder::new(file)),
        })
    }

    /// Name of the package, as derived from the bundle file name.
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Unpacks the bundle into `dest` and returns the path of the extracted source directory.
    #[instrument(skip_all, fields(bundle = %self.path.display(), dest = %dest.display()), name = "extract_source_bundle")]
    pub fn extract(&mut self, dest: &Path) -> Result<PathBuf, ExtractError> {
        let _umask = UmaskGuard::set(Mode::S_IWGRP | Mode::S_IXGRP | Mode::S_IWOTH | Mode::S_IXOTH);
        let source_dir = dest.join(&self.package_name);
        let mut has_source_dir = false;

        for entry in self.archive.entries().map_err(ExtractError::Read)? {
            let entry = entry.map_err(ExtractError::Read)?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let kind = entry.header().entry_type();
            trace!(entry = name, ?kind, "Processing entry");

            match kind {
                EntryType::Directory => {
                    expect_name(name.trim_end_matches('/'), &self.package_name, &name)?;
                    create_dir(&source_dir)?;
                    has_source_dir = true;
                }
                EntryType::Regular | EntryType::Continuous => {
                    let file_name = file_name_in(&name, &self.package_name)?;
                    create_dir(&source_dir)?;
                    has_source_dir = true;
                    write_file(entry, &source_dir.join(file_name))?;
                }
                EntryType::Symlink | EntryType::Link => return Err(ExtractError::Link(name)),
                // archive-wide metadata, such as the commit id `git archive` records
                EntryType::XGlobalHeader => debug!(entry = name, "Skipping global header"),
                kind => return Err(ExtractError::UnsupportedEntry { entry: name, kind }),
            }
        }

        if !has_source_dir {
            return Err(ExtractError::MissingDirectory(self.package_name.clone()));
        }
        Ok(source_dir)
    }

    /// Releases the archive and its underlying file.
    pub fn close(self) {
        trace!(bundle = %self.path.display(), "Closing source bundle");
        drop(self.archive);
    }
}

fn package_name_from_path(path: &Path) -> Result<String, ExtractError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.split_once('.'))
        .map(|(name, _)| name)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ExtractError::InvalidName(path.to_path_buf()))
}

fn expect_name(actual: &str, expected: &str, entry: &str) -> Result<(), ExtractError> {
    if actual != expected {
        return Err(ExtractError::Layout {
            entry: entry.to_string(),
            expected: expected.to_string(),
        });
    }
    Ok(())
}

/// Returns the file name of a regular entry, which must sit directly in the package directory.
fn file_name_in<'a>(entry: &'a str, package_name: &str) -> Result<&'a str, ExtractError> {
    let (parent, file_name) = entry.rsplit_once('/').unwrap_or(("", entry));
    expect_name(parent.trim_end_matches('/'), package_name, entry)?;
    if matches!(file_name, "" | "." | "..") {
        return Err(ExtractError::Layout {
            entry: entry.to_string(),
            expected: package_name.to_string(),
        });
    }
    Ok(file_name)
}

fn create_dir(path: &Path) -> Result<(), ExtractError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(ExtractError::NotADirectory(path.to_path_buf())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => DirBuilder::new()
            .mode(0o755)
            .create(path)
            .map_err(|source| ExtractError::Write {
                path: path.to_path_buf(),
                source,
            }),
        Err(source) => Err(ExtractError::Write {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_file<R: io::Read>(mut entry: Entry<'_, R>, path: &Path) -> Result<(), ExtractError> {
    let write_err = |source| ExtractError::Write {
        path: path.to_path_buf(),
        source,
    };
    let header = entry.header();
    let mode = header.mode().unwrap_or(0o644) & 0o777;
    let mtime = header
        .mtime()
        .ok()
        .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs));

    // an existing link would be followed on open
    if fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(path).map_err(write_err)?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(write_err)?;
    io::copy(&mut entry, &mut file).map_err(write_err)?;

    if let Some(mtime) = mtime {
        let times = FileTimes::new().set_modified(mtime).set_accessed(mtime);
        if let Err(err) = file.set_times(times) {
            debug!(path = %path.display(), %err, "Could not restore file times");
        }
    }
    Ok(())
}

/// Applies a file-creation mask and restores the previous one when dropped.
struct UmaskGuard {
    previous: Mode,
    _lock: MutexGuard<'static, ()>,
}

impl UmaskGuard {
    fn set(mask: Mode) -> Self {
        let lock = UMASK_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = umask(mask);
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.previous);
    }
}
