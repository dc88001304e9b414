//! Timestamp-conditional downloads into a local cache.
use chrono::{DateTime, Utc};
use http::StatusCode;
use http::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::blocking::{Client, Response};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, instrument};
use url::Url;

/// RFC 1123 date format as required by `If-Modified-Since`.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The remote copy was transferred and replaced the cached one.
    Downloaded,
    /// The cached copy is current, nothing was transferred.
    NotModified,
    /// The remote end does not know the requested resource.
    NotFound,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request to `{url}` failed: {source}")]
    Request { url: Url, source: reqwest::Error },
    #[error("unexpected status {status} from `{url}`")]
    UnexpectedStatus { url: Url, status: StatusCode },
    #[error("`{url}` answered not modified to an unconditional request")]
    UnsolicitedNotModified { url: Url },
    #[error("could not store `{path}`: {source}")]
    Store { path: PathBuf, source: io::Error },
}

/// Downloads resources into a cache path, skipping the transfer when the cached copy is current.
pub struct ConditionalDownloader {
    client: Client,
}

impl ConditionalDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetches `url` into `dest`. If `dest` exists its modification time is sent as
    /// `If-Modified-Since`, so an unchanged remote resource is never transferred twice.
    #[instrument(skip_all, fields(url = %url, dest = %dest.display()), name = "conditional_download")]
    pub fn download(&self, url: &Url, dest: &Path) -> Result<DownloadOutcome, DownloadError> {
        let cached_mtime = fs::metadata(dest).and_then(|m| m.modified()).ok();

        let mut request = self.client.get(url.clone());
        if let Some(mtime) = cached_mtime {
            request = request.header(IF_MODIFIED_SINCE, http_date(mtime));
        }
        let response = request.send().map_err(|source| DownloadError::Request {
            url: url.clone(),
            source,
        })?;

        match response.status() {
            StatusCode::OK => {
                store(response, dest)?;
                debug!("Downloaded");
                Ok(DownloadOutcome::Downloaded)
            }
            StatusCode::NOT_MODIFIED if cached_mtime.is_some() => {
                debug!("Cached copy is up to date");
                Ok(DownloadOutcome::NotModified)
            }
            StatusCode::NOT_MODIFIED => {
                error!("Server answered not modified without a conditional request or cached copy");
                Err(DownloadError::UnsolicitedNotModified { url: url.clone() })
            }
            StatusCode::NOT_FOUND => Ok(DownloadOutcome::NotFound),
            status => Err(DownloadError::UnexpectedStatus {
                url: url.clone(),
                status,
            }),
        }
    }
}

/// Streams the body into a temporary file next to `dest` and renames it over `dest` once
/// complete. A failed transfer never leaves a partial file behind.
fn store(mut response: Response, dest: &Path) -> Result<(), DownloadError> {
    let store_err = |source| DownloadError::Store {
        path: dest.to_path_buf(),
        source,
    };
    let dir = dest.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(store_err)?;
    io::copy(&mut response, &mut tmp).map_err(store_err)?;

    if let Some(modified) = last_modified(&response) {
        // best effort, the local time of the transfer is a valid fallback
        let _ = tmp.as_file().set_modified(modified);
    }
    let file: File = tmp.persist(dest).map_err(|err| store_err(err.error))?;
    file.sync_all().map_err(store_err)
}

fn last_modified(response: &Response) -> Option<SystemTime> {
    let value = response.headers().get(LAST_MODIFIED)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(SystemTime::from)
}

fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format(HTTP_DATE_FORMAT)
        .to_string()
}
