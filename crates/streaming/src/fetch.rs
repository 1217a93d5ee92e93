use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::PathBuf;

use bytes::Bytes;
use futures::future::{FutureExt, LocalBoxFuture};
use tracing::debug;

/// Failure of a fetch. Cloneable because every requester sharing a
/// singleflight entry receives its own copy of the result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("resource not found: {location}")]
    NotFound { location: String },
    #[error("failed to read {location}: {message}")]
    Io { location: String, message: String },
    #[error("failed to extract {location}: {message}")]
    Archive { location: String, message: String },
    #[error("fetch of {location} was abandoned")]
    Cancelled { location: String },
}

impl FetchError {
    pub fn location(&self) -> &str {
        match self {
            FetchError::NotFound { location }
            | FetchError::Io { location, .. }
            | FetchError::Archive { location, .. }
            | FetchError::Cancelled { location } => location,
        }
    }
}

/// Source of document bytes.
///
/// Fetches are single-threaded futures: they complete on their own schedule
/// and are driven by whoever polls them (normally the session's task pool).
/// Implementations for remote transports live with the host application.
pub trait Fetcher {
    fn fetch(&self, location: &str) -> LocalBoxFuture<'static, Result<Bytes, FetchError>>;
}

/// Reads resources from the local filesystem, optionally below a root directory.
#[derive(Debug, Clone, Default)]
pub struct FsFetcher {
    root: Option<PathBuf>,
}

impl FsFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_for(&self, location: &str) -> PathBuf {
        let location = location.strip_prefix("file://").unwrap_or(location);
        match &self.root {
            Some(root) if !location.starts_with('/') => root.join(location),
            _ => PathBuf::from(location),
        }
    }
}

impl Fetcher for FsFetcher {
    fn fetch(&self, location: &str) -> LocalBoxFuture<'static, Result<Bytes, FetchError>> {
        let path = self.path_for(location);
        let location = location.to_string();
        async move {
            debug!(location = %location, path = %path.display(), "reading resource");
            match std::fs::read(&path) {
                Ok(bytes) => Ok(Bytes::from(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(FetchError::NotFound { location })
                }
                Err(e) => Err(FetchError::Io {
                    location,
                    message: e.to_string(),
                }),
            }
        }
        .boxed_local()
    }
}

/// Serves registered payloads from memory and records every fetch it performs.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    resources: RefCell<BTreeMap<String, Bytes>>,
    fetches: Cell<usize>,
    log: RefCell<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: impl Into<String>, payload: impl Into<Bytes>) {
        self.resources
            .borrow_mut()
            .insert(location.into(), payload.into());
    }

    pub fn remove(&self, location: &str) -> Option<Bytes> {
        self.resources.borrow_mut().remove(location)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }

    /// Locations in the order they were fetched.
    pub fn fetched(&self) -> Vec<String> {
        self.log.borrow().clone()
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, location: &str) -> LocalBoxFuture<'static, Result<Bytes, FetchError>> {
        self.fetches.set(self.fetches.get() + 1);
        self.log.borrow_mut().push(location.to_string());
        let result = self
            .resources
            .borrow()
            .get(location)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                location: location.to_string(),
            });
        async move { result }.boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::{FetchError, Fetcher, FsFetcher, MemoryFetcher};

    #[test]
    fn memory_fetcher_counts_and_serves() {
        let f = MemoryFetcher::new();
        f.insert("a.kml", "<kml/>");
        let bytes = block_on(f.fetch("a.kml")).unwrap();
        assert_eq!(&bytes[..], b"<kml/>");
        let err = block_on(f.fetch("b.kml")).unwrap_err();
        assert_eq!(
            err,
            FetchError::NotFound {
                location: "b.kml".to_string()
            }
        );
        assert_eq!(f.fetch_count(), 2);
        assert_eq!(f.fetched(), vec!["a.kml".to_string(), "b.kml".to_string()]);
    }

    #[test]
    fn fs_fetcher_reads_below_root() {
        let dir = std::env::temp_dir().join(format!("streaming_fs_fetcher_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("doc.kml"), "<kml/>").unwrap();

        let f = FsFetcher::with_root(&dir);
        assert_eq!(&block_on(f.fetch("doc.kml")).unwrap()[..], b"<kml/>");
        let err = block_on(f.fetch("nope.kml")).unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
        assert_eq!(err.location(), "nope.kml");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
