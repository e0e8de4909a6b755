//! Fetching catalog manifests and images.
//!
//! Paths in a manifest are relative to a base location. The base is either
//! an http(s) URL ([`HttpFetcher`]) or a local directory ([`DirFetcher`]);
//! [`BaseFetcher`] picks one from a string. Absolute http(s) paths bypass the
//! base entirely.

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::FetchError;

/// Retrieves bytes for manifest-relative paths.
#[allow(async_fn_in_trait)]
pub trait Fetcher {
    /// Where `path` resolves to, for log lines and error messages.
    fn location(&self, path: &str) -> String;

    /// Fetch `path`, bypassing any cache.
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError>;
}

/// Whether a manifest path is already an absolute remote URL.
pub fn is_remote(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Read a local file with the path in the error.
pub async fn read_local(path: &Path) -> Result<Vec<u8>, FetchError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Resolves paths against a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    /// Serve files from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Base directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Fetcher for DirFetcher {
    fn location(&self, path: &str) -> String {
        if is_remote(path) {
            return path.to_string();
        }
        self.root
            .join(path)
            .display()
            .to_string()
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        if is_remote(path) {
            return Err(FetchError::InvalidLocation {
                location: path.to_string(),
                reason: "remote images need an http(s) catalog base".to_string(),
            });
        }
        read_local(&self.root.join(path)).await
    }
}

/// Resolves paths against an http(s) base URL.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    base: reqwest::Url,
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    /// Create a fetcher for `base`. A trailing `/` is added when missing so
    /// relative paths land inside the base instead of replacing its last segment.
    pub fn new(base: &str) -> Result<Self, FetchError> {
        let normalized = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        let base = reqwest::Url::parse(&normalized).map_err(|e| FetchError::InvalidLocation {
            location: base.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            base,
            client: reqwest::Client::new(),
        })
    }

    fn resolve(&self, path: &str) -> Result<reqwest::Url, FetchError> {
        let resolved = if is_remote(path) {
            reqwest::Url::parse(path)
        } else {
            self.base.join(path)
        };
        resolved.map_err(|e| FetchError::InvalidLocation {
            location: path.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(feature = "http")]
impl Fetcher for HttpFetcher {
    fn location(&self, path: &str) -> String {
        self.resolve(path)
            .map_or_else(|_| path.to_string(), String::from)
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let location = self.location(path);
        let mut url = self.resolve(path)?;
        url.query_pairs_mut()
            .append_pair(
                "cache-bust",
                &chrono::Utc::now()
                    .timestamp_millis()
                    .to_string(),
            );
        debug!("GET {url}");

        let http_error = |source| FetchError::Http {
            location: location.clone(),
            source,
        };
        let response = self
            .client
            .get(url)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                location: location.clone(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(http_error)?;
        Ok(bytes.to_vec())
    }
}

/// Fetcher chosen from a base string: http(s) URL or local directory.
#[derive(Debug, Clone)]
pub enum BaseFetcher {
    /// Local directory.
    Dir(DirFetcher),
    /// Remote base URL.
    #[cfg(feature = "http")]
    Http(HttpFetcher),
}

impl BaseFetcher {
    /// Pick the fetcher for `base`.
    pub fn from_base(base: &str) -> Result<Self, FetchError> {
        if is_remote(base) {
            #[cfg(feature = "http")]
            return HttpFetcher::new(base).map(Self::Http);
            #[cfg(not(feature = "http"))]
            return Err(FetchError::InvalidLocation {
                location: base.to_string(),
                reason: "built without the `http` feature".to_string(),
            });
        }
        Ok(Self::Dir(DirFetcher::new(base)))
    }
}

impl Fetcher for BaseFetcher {
    fn location(&self, path: &str) -> String {
        match self {
            Self::Dir(f) => f.location(path),
            #[cfg(feature = "http")]
            Self::Http(f) => f.location(path),
        }
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        match self {
            Self::Dir(f) => f.fetch(path).await,
            #[cfg(feature = "http")]
            Self::Http(f) => f.fetch(path).await,
        }
    }
}
