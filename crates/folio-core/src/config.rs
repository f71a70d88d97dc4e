use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{FolioError, FolioResult};

/// Top-level configuration (loaded from folio.toml)
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FolioConfig {
    pub client: ClientConfig,
    pub endpoints: EndpointConfig,
    pub session: SessionConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
}

impl FolioConfig {
    /// Read and parse a TOML config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> FolioResult<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {} (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| FolioError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bearer token issued by the content service (JWT)
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    pub auth_token: Option<SecretString>,
    /// Secondary verification token sent with `initialise`
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    pub recaptcha_token: Option<SecretString>,
    /// Layout width requested for every page (default: 1200)
    pub page_width: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Metadata lookup base URL; the book id is appended
    pub metadata_url: String,
    /// Websocket endpoint of the page delivery service
    pub provider_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on waiting for one inbound message, in seconds (0 = wait forever)
    pub recv_timeout_secs: u64,
}

impl SessionConfig {
    pub fn recv_timeout(&self) -> Option<Duration> {
        (self.recv_timeout_secs > 0).then(|| Duration::from_secs(self.recv_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root of the per-book content caches
    pub dir: PathBuf,
}

impl CacheConfig {
    /// Cache snapshot path for one content item: `{dir}/{book_id}/chunks.dat`
    pub fn book_cache_path(&self, book_id: u64) -> PathBuf {
        expand_tilde(&self.dir)
            .join(book_id.to_string())
            .join("chunks.dat")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            recaptcha_token: None,
            page_width: 1200,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            metadata_url: "https://api.perlego.com/metadata/v2/metadata/books/".into(),
            provider_url: "wss://api-ws.perlego.com/book-delivery-new/".into(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recv_timeout_secs: 120,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()).map(SecretString::from))
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
