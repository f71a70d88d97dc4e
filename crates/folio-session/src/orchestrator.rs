//! Cache-aware, in-order retrieval of every unit of one content item.
//!
//! A fetch loads the content cache, opens a session, and then walks the unit
//! plan lazily: cached units are yielded without network I/O, the rest are
//! requested one at a time and written into the cache before being yielded.
//!
//! Teardown (cache flush + channel close) runs once on every exit path:
//! exhaustion, the first error, or [`ContentFetch::finish`]. Dropping a fetch
//! midway still persists completed units through the cache's own `Drop`.

use std::path::PathBuf;
use std::time::Duration;

use folio_core::config::{CacheConfig, ClientConfig, FolioConfig, SessionConfig};
use folio_core::{FetchedUnit, FolioResult};
use futures::Stream;
use tracing::{debug, info, warn};

use crate::cache::ContentCache;
use crate::channel::{Channel, WsChannel};
use crate::client::{Credentials, SessionClient};
use crate::structure::{StructuralMetadata, UnitRef};

pub struct FetchOrchestrator {
    credentials: Credentials,
    provider_url: String,
    cache: CacheConfig,
    page_width: u32,
    recv_timeout: Option<Duration>,
}

impl FetchOrchestrator {
    pub fn new(credentials: Credentials, provider_url: impl Into<String>, cache: CacheConfig) -> Self {
        Self {
            credentials,
            provider_url: provider_url.into(),
            cache,
            page_width: ClientConfig::default().page_width,
            recv_timeout: SessionConfig::default().recv_timeout(),
        }
    }

    pub fn from_config(config: &FolioConfig, credentials: Credentials) -> Self {
        Self::new(
            credentials,
            config.endpoints.provider_url.clone(),
            config.cache.clone(),
        )
        .with_page_width(config.client.page_width)
        .with_recv_timeout(config.session.recv_timeout())
    }

    pub fn with_page_width(mut self, page_width: u32) -> Self {
        self.page_width = page_width;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn cache_path(&self, book_id: u64) -> PathBuf {
        self.cache.book_cache_path(book_id)
    }

    /// Connect to the delivery service and start fetching `book_id`.
    pub async fn fetch(&self, book_id: u64) -> FolioResult<ContentFetch<WsChannel>> {
        let cache = ContentCache::open(&self.cache_path(book_id))?;
        let channel = WsChannel::connect(&self.provider_url).await?;
        self.start(channel, cache, book_id).await
    }

    /// Start fetching `book_id` over an already open channel.
    pub async fn fetch_over<C: Channel>(
        &self,
        channel: C,
        book_id: u64,
    ) -> FolioResult<ContentFetch<C>> {
        let cache = ContentCache::open(&self.cache_path(book_id))?;
        self.start(channel, cache, book_id).await
    }

    async fn start<C: Channel>(
        &self,
        channel: C,
        mut cache: ContentCache,
        book_id: u64,
    ) -> FolioResult<ContentFetch<C>> {
        let mut session = SessionClient::new(channel, self.credentials.clone(), self.page_width)?
            .with_recv_timeout(self.recv_timeout);

        let metadata = match session.initialize(book_id).await {
            Ok(metadata) => metadata,
            Err(e) => {
                if let Err(flush_err) = cache.flush() {
                    warn!(book_id, "failed to flush content cache: {flush_err}");
                }
                if let Err(close_err) = session.close().await {
                    debug!(book_id, "closing channel after failed initialise: {close_err}");
                }
                return Err(e);
            }
        };

        let plan = metadata.plan();
        let total_units = plan.len();
        info!(
            book_id,
            total_units,
            cached = plan.iter().filter(|u| cache.contains(u.index)).count(),
            "fetch started"
        );

        Ok(ContentFetch {
            book_id,
            session,
            cache: Some(cache),
            metadata,
            plan: plan.into_iter(),
            total_units,
        })
    }
}

/// A single-pass, lazy sequence of the units of one content item
pub struct ContentFetch<C: Channel> {
    book_id: u64,
    session: SessionClient<C>,
    /// `None` once torn down
    cache: Option<ContentCache>,
    metadata: StructuralMetadata,
    plan: std::vec::IntoIter<UnitRef>,
    total_units: usize,
}

impl<C: Channel> ContentFetch<C> {
    pub fn total_units(&self) -> usize {
        self.total_units
    }

    pub fn metadata(&self) -> &StructuralMetadata {
        &self.metadata
    }

    /// Yield the next unit in plan order.
    ///
    /// Returns `None` once every unit was yielded. After an error the fetch is
    /// torn down and every later call returns `None`.
    pub async fn next_unit(&mut self) -> Option<FolioResult<FetchedUnit>> {
        if self.cache.is_none() {
            return None;
        }

        let Some(unit) = self.plan.next() else {
            info!(book_id = self.book_id, total_units = self.total_units, "fetch complete");
            return self.teardown().await.err().map(Err);
        };

        if let Some(content) = self.cache.as_ref().and_then(|c| c.get(unit.index)) {
            debug!(book_id = self.book_id, index = unit.index, "unit served from cache");
            return Some(Ok(FetchedUnit {
                index: unit.index,
                content: content.to_owned(),
                total_units: self.total_units,
                from_cache: true,
            }));
        }

        let loaded = self
            .session
            .load_unit(&self.metadata.book_type, unit.page_id, unit.part_index)
            .await;

        match loaded {
            Ok(content) => {
                debug!(
                    book_id = self.book_id,
                    index = unit.index,
                    bytes = content.len(),
                    "unit loaded"
                );
                if let Some(cache) = self.cache.as_mut() {
                    cache.put(unit.index, content.clone());
                }
                Some(Ok(FetchedUnit {
                    index: unit.index,
                    content,
                    total_units: self.total_units,
                    from_cache: false,
                }))
            }
            Err(e) => {
                warn!(book_id = self.book_id, index = unit.index, "fetch failed: {e}");
                if let Err(teardown_err) = self.teardown().await {
                    warn!(book_id = self.book_id, "teardown after failure: {teardown_err}");
                }
                Some(Err(e))
            }
        }
    }

    /// Stop early, persisting whatever was fetched so far.
    pub async fn finish(mut self) -> FolioResult<()> {
        self.teardown().await
    }

    pub fn into_stream(self) -> impl Stream<Item = FolioResult<FetchedUnit>> {
        futures::stream::unfold(self, |mut fetch| async move {
            fetch.next_unit().await.map(|item| (item, fetch))
        })
    }

    async fn teardown(&mut self) -> FolioResult<()> {
        let flushed = match self.cache.take() {
            Some(mut cache) => cache.flush(),
            None => Ok(()),
        };
        let closed = self.session.close().await;
        flushed.and(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::FolioError;

    #[test]
    fn test_from_config() {
        let config: FolioConfig = toml::from_str(
            r#"
[client]
page_width = 800

[cache]
dir = "/var/cache/folio"

[session]
recv_timeout_secs = 0
"#,
        )
        .unwrap();

        let orchestrator = FetchOrchestrator::from_config(&config, Credentials::new("a.b.c", "r"));
        assert_eq!(orchestrator.page_width, 800);
        assert_eq!(orchestrator.recv_timeout, None);
        assert_eq!(
            orchestrator.cache_path(31),
            PathBuf::from("/var/cache/folio/31/chunks.dat")
        );
    }

    #[test]
    fn test_new_uses_config_defaults() {
        let orchestrator = FetchOrchestrator::new(
            Credentials::new("a.b.c", "r"),
            "ws://unused",
            CacheConfig::default(),
        );
        let defaults = FolioConfig::default();
        assert_eq!(orchestrator.page_width, defaults.client.page_width);
        assert_eq!(orchestrator.recv_timeout, defaults.session.recv_timeout());
        assert_eq!(orchestrator.recv_timeout, Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_bad_token_fails_before_any_io() {
        let tmp = tempfile::TempDir::new().unwrap();
        let orchestrator = FetchOrchestrator::new(
            Credentials::new("garbage", "r"),
            "ws://unused",
            CacheConfig {
                dir: tmp.path().to_path_buf(),
            },
        );
        let (client, mut server) = crate::channel::MemoryChannel::pair();

        let result = orchestrator.fetch_over(client, 5).await;
        assert!(matches!(result, Err(FolioError::Token(_))));
        assert!(!orchestrator.cache_path(5).exists());
        assert!(server.recv().await.is_err());
    }
}
