//! Vendor release lookup and bundle cache.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::{FlashEvent, FlashObserver, FlashPhase};

const DOWNLOAD_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("Could not get latest release: {0}")]
    Request(String),
    #[error("Error getting latest release: HTTP {0}")]
    Status(u16),
    #[error("Invalid release metadata: {0}")]
    Metadata(#[source] io::Error),
    #[error("Release file name {0:?} is not a plain file name")]
    InvalidFileName(String),
    #[error("Could not download update file: {0}")]
    Download(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<ureq::Error> for ReleaseError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => ReleaseError::Status(code),
            other => ReleaseError::Request(other.to_string()),
        }
    }
}

/// Latest-release metadata published by the vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub version: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub product: String,
    pub file: ReleaseFile,
    #[serde(default)]
    pub mandatory_versions: Vec<String>,
}

/// Downloadable bundle described by a [`Release`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseFile {
    pub url: String,
    /// Decimal byte count.
    #[serde(default)]
    pub size: String,
    pub name: String,
}

impl ReleaseFile {
    /// Advertised size, if it parses.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.trim().parse().ok()
    }

    /// Cache location for this bundle under `cache_dir`.
    pub fn cache_path(&self, cache_dir: &Path) -> Result<PathBuf, ReleaseError> {
        let name = Path::new(&self.name);
        match name.file_name() {
            Some(file) if file == name.as_os_str() => Ok(cache_dir.join(file)),
            _ => Err(ReleaseError::InvalidFileName(self.name.clone())),
        }
    }
}

/// HTTP client for the vendor release service.
pub struct ReleaseClient {
    url: String,
    agent: ureq::Agent,
}

impl ReleaseClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    /// Fetch metadata for the latest production release.
    #[instrument(skip(self), fields(url = %self.url))]
    pub fn latest(&self) -> Result<Release, ReleaseError> {
        let response = self.agent.get(&self.url).call()?;
        let release: Release = response.into_json().map_err(ReleaseError::Metadata)?;
        info!(
            version = %release.version,
            date = %release.date,
            file = %release.file.name,
            "Latest release"
        );
        Ok(release)
    }

    /// Return the path of the cached bundle, downloading it first if needed.
    ///
    /// A cached file is reused when its size matches the advertised size, or
    /// when no size is advertised. Downloads land in a `.part` file that is
    /// renamed into place once complete.
    #[instrument(skip(self, release, observer), fields(file = %release.file.name))]
    pub fn fetch_bundle<O: FlashObserver + ?Sized>(
        &self,
        release: &Release,
        cache_dir: &Path,
        observer: &O,
    ) -> Result<PathBuf, ReleaseError> {
        let dest = release.file.cache_path(cache_dir)?;
        let expected = release.file.size_bytes();

        if let Some(cached) = cached_len(&dest)? {
            match expected {
                Some(len) if len != cached => {
                    warn!(cached, expected = len, "Cached bundle size mismatch, downloading again");
                }
                _ => {
                    info!(path = %dest.display(), "Using cached update file");
                    return Ok(dest);
                }
            }
        }

        info!(url = %release.file.url, "Downloading update file: {}", release.file.name);
        let response = self.agent.get(&release.file.url).call()?;
        let total = response
            .header("Content-Length")
            .and_then(|v| v.parse().ok())
            .or(expected);

        let mut reader = response.into_reader();
        download_to(&mut reader, &dest, total, observer)?;
        Ok(dest)
    }
}

fn cached_len(path: &Path) -> Result<Option<u64>, ReleaseError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Stream `reader` into `dest` via a sibling `.part` file.
fn download_to<R: Read + ?Sized, O: FlashObserver + ?Sized>(
    reader: &mut R,
    dest: &Path,
    total: Option<u64>,
    observer: &O,
) -> Result<u64, ReleaseError> {
    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    let mut out = BufWriter::new(File::create(&part)?);
    let mut buf = vec![0u8; DOWNLOAD_BUFFER_SIZE];
    let mut written = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                drop(out);
                let _ = std::fs::remove_file(&part);
                return Err(ReleaseError::Download(e.to_string()));
            }
        };
        out.write_all(&buf[..n])?;
        written += n as u64;
        observer.on_event(&FlashEvent::Progress {
            phase: FlashPhase::Download,
            current: written,
            total: total.unwrap_or(0),
        });
    }
    out.flush()?;
    drop(out);

    if let Some(len) = total {
        if len != written {
            let _ = std::fs::remove_file(&part);
            return Err(ReleaseError::Download(format!(
                "received {written} bytes, expected {len}"
            )));
        }
    }

    std::fs::rename(&part, dest)?;
    debug!(bytes = written, path = %dest.display(), "Download complete");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use std::io::Cursor;
    use std::sync::Mutex;

    const RELEASE_JSON: &str = r#"{
        "version": "2.4.0",
        "date": "2024-03-01",
        "product": "BellHybrid",
        "file": {
            "url": "https://example.invalid/BellHybrid-2.4.0.tar",
            "size": "11",
            "name": "BellHybrid-2.4.0.tar"
        },
        "mandatoryVersions": ["1.8.0"]
    }"#;

    fn release() -> Release {
        serde_json::from_str(RELEASE_JSON).unwrap()
    }

    #[derive(Default)]
    struct ProgressLog(Mutex<Vec<(u64, u64)>>);

    impl FlashObserver for ProgressLog {
        fn on_event(&self, event: &FlashEvent) {
            if let FlashEvent::Progress {
                phase: FlashPhase::Download,
                current,
                total,
            } = event
            {
                self.0.lock().unwrap().push((*current, *total));
            }
        }
    }

    #[test]
    fn test_parse_release() {
        let r = release();
        assert_eq!(r.version, "2.4.0");
        assert_eq!(r.file.size_bytes(), Some(11));
        assert_eq!(r.mandatory_versions, vec!["1.8.0".to_string()]);
    }

    #[test]
    fn test_cache_path_rejects_directories() {
        let mut file = release().file;
        assert_eq!(
            file.cache_path(Path::new("/cache")).unwrap(),
            PathBuf::from("/cache/BellHybrid-2.4.0.tar")
        );

        file.name = "../escape.tar".into();
        assert!(matches!(
            file.cache_path(Path::new("/cache")),
            Err(ReleaseError::InvalidFileName(_))
        ));
    }

    #[test]
    fn test_cached_bundle_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("BellHybrid-2.4.0.tar");
        std::fs::write(&cached, b"hello world").unwrap();

        // The URL is never contacted when the cache hit is valid
        let client = ReleaseClient::new("http://127.0.0.1:1/unused");
        let path = client
            .fetch_bundle(&release(), dir.path(), &NullObserver)
            .unwrap();
        assert_eq!(path, cached);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn test_download_reports_progress_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bundle.tar");
        let body = vec![0xabu8; DOWNLOAD_BUFFER_SIZE + 10];
        let log = ProgressLog::default();

        let written =
            download_to(&mut Cursor::new(body.clone()), &dest, Some(body.len() as u64), &log)
                .unwrap();
        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!dir.path().join("bundle.tar.part").exists());

        let progress = log.0.lock().unwrap();
        assert_eq!(progress.last(), Some(&(body.len() as u64, body.len() as u64)));
        assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_short_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bundle.tar");

        let err = download_to(&mut Cursor::new(vec![1u8; 5]), &dest, Some(10), &NullObserver)
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Download(_)));
        assert!(!dest.exists());
        assert!(!dir.path().join("bundle.tar.part").exists());
    }
}
