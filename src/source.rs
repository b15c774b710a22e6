//! Record loading
//!
//! Primary path: cache-busted GET against the remote endpoint.
//! Fallback path: a local JSON file chosen through a [`FilePicker`]. Once a
//! file has been selected its handle is kept, and later remote failures read
//! it again without prompting.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::record::Record;

/// Transport for the remote record.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Where records come from, for logs and error messages.
    fn location(&self) -> &str;

    /// Fetch the raw body, passing `token` as the cache-busting version.
    async fn fetch(&self, token: &str) -> Result<String, LoadError>;
}

/// HTTP transport: `GET <url>?v=<token>` with no-cache headers.
pub struct HttpSource {
    client: Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cost-sheet-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|err| {
                warn!(error = %err, "HTTP client build failed, using defaults without timeout");
                Client::new()
            });

        Self {
            client,
            url: url.into(),
        }
    }

    fn network_error(&self, reason: impl fmt::Display) -> LoadError {
        LoadError::Network {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl RecordSource for HttpSource {
    fn location(&self) -> &str {
        &self.url
    }

    async fn fetch(&self, token: &str) -> Result<String, LoadError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("v", token)])
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.network_error(format!("HTTP {}", status)));
        }

        response.text().await.map_err(|e| self.network_error(e))
    }
}

/// User-driven local file selection.
#[async_trait]
pub trait FilePicker: Send + Sync {
    /// `Ok(None)` means the user dismissed the prompt.
    async fn pick(&self) -> Result<Option<PathBuf>, LoadError>;
}

/// Always selects the configured path.
pub struct FixedPicker {
    path: PathBuf,
}

impl FixedPicker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FilePicker for FixedPicker {
    async fn pick(&self) -> Result<Option<PathBuf>, LoadError> {
        Ok(Some(self.path.clone()))
    }
}

/// Prompts for a path on the terminal. An empty line or EOF cancels.
pub struct StdinPicker;

#[async_trait]
impl FilePicker for StdinPicker {
    async fn pick(&self) -> Result<Option<PathBuf>, LoadError> {
        let mut stdout = tokio::io::stdout();
        let prompt = b"Path to cost record (.json), empty to cancel: ";
        if stdout.write_all(prompt).await.is_err() || stdout.flush().await.is_err() {
            return Err(LoadError::UnsupportedEnvironment);
        }

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(0) => Ok(None),
            Ok(_) => {
                let trimmed = line.trim();
                Ok((!trimmed.is_empty()).then(|| PathBuf::from(trimmed)))
            }
            Err(_) => Err(LoadError::UnsupportedEnvironment),
        }
    }
}

/// A previously selected local record file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    path: PathBuf,
}

impl FileHandle {
    /// Only `.json` files are accepted.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, LoadError> {
        let path = path.into();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if !is_json {
            return Err(LoadError::UnsupportedFileType(path));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<Record, LoadError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| LoadError::LocalRead {
                path: self.path.clone(),
                source,
            })?;
        Record::from_json(&text, &self.path.display().to_string())
    }
}

/// Cache-busting tokens. A configured data version is used for the first
/// fetch only; after that tokens are strictly increasing millisecond stamps.
#[derive(Debug, Default)]
pub struct CacheBuster {
    pinned: Mutex<Option<String>>,
    last: AtomicI64,
}

impl CacheBuster {
    pub fn new(data_version: Option<String>) -> Self {
        Self {
            pinned: Mutex::new(data_version.filter(|v| !v.trim().is_empty())),
            last: AtomicI64::new(0),
        }
    }

    pub fn next_token(&self) -> String {
        if let Some(version) = self.pinned.lock().take() {
            return version;
        }
        let now = Utc::now().timestamp_millis();
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(prev + 1).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Remote,
    Local(PathBuf),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => f.write_str("remote"),
            Self::Local(path) => write!(f, "local file {}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Loaded {
    pub record: Record,
    pub origin: Origin,
}

pub struct SourceLoader {
    remote: Arc<dyn RecordSource>,
    picker: Option<Arc<dyn FilePicker>>,
    handle: Mutex<Option<FileHandle>>,
    cache_buster: CacheBuster,
}

impl SourceLoader {
    pub fn new(
        remote: Arc<dyn RecordSource>,
        picker: Option<Arc<dyn FilePicker>>,
        data_version: Option<String>,
    ) -> Self {
        Self {
            remote,
            picker,
            handle: Mutex::new(None),
            cache_buster: CacheBuster::new(data_version),
        }
    }

    /// Hold `handle` from the start, so remote failures fall back to it
    /// without a prior selection.
    pub fn with_file_handle(self, handle: FileHandle) -> Self {
        *self.handle.lock() = Some(handle);
        self
    }

    pub fn can_pick_files(&self) -> bool {
        self.picker.is_some()
    }

    pub fn file_handle(&self) -> Option<FileHandle> {
        self.handle.lock().clone()
    }

    /// Load a record. With `force_local_picker` the remote endpoint is skipped
    /// and a fresh selection is requested. Otherwise the remote endpoint is
    /// tried first and a held file handle is read if it fails.
    pub async fn load(&self, force_local_picker: bool) -> Result<Loaded, LoadError> {
        if force_local_picker {
            return self.load_local(true).await;
        }

        let primary = match self.load_remote().await {
            Ok(record) => {
                return Ok(Loaded {
                    record,
                    origin: Origin::Remote,
                })
            }
            Err(err) => err,
        };

        if self.file_handle().is_none() {
            return Err(primary);
        }

        warn!(error = %primary, "remote load failed, reading previously selected file");
        self.load_local(false).await.map_err(|fallback| {
            warn!(primary = %primary, fallback = %fallback, "local fallback failed too");
            fallback
        })
    }

    async fn load_remote(&self) -> Result<Record, LoadError> {
        let token = self.cache_buster.next_token();
        debug!(url = self.remote.location(), token = %token, "fetching cost record");
        let body = self.remote.fetch(&token).await?;
        Record::from_json(&body, self.remote.location())
    }

    async fn load_local(&self, force_selection: bool) -> Result<Loaded, LoadError> {
        let held = self.file_handle();
        let handle = match held {
            Some(handle) if !force_selection => handle,
            _ => {
                let picker = self.picker.as_ref().ok_or(LoadError::UnsupportedEnvironment)?;
                let path = picker.pick().await?.ok_or(LoadError::UserCancelled)?;
                let handle = FileHandle::new(path)?;
                info!(path = %handle.path().display(), "local cost file selected");
                *self.handle.lock() = Some(handle.clone());
                handle
            }
        };

        let record = handle.read().await?;
        Ok(Loaded {
            record,
            origin: Origin::Local(handle.path().to_path_buf()),
        })
    }
}
