//! Session protocol state machine.
//!
//! ```text
//! Disconnected ──initialize──▶ Initializing ──▶ Ready ◀──▶ AwaitingUnit
//!        │                          │              │            │
//!        └──────────── any failure or close ───────┴────────────┴──▶ Closed
//! ```
//!
//! `Disconnected` means the channel carries no session yet. Exchanges are
//! strictly sequential: each one drains its responses to completion before
//! the next request is sent.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use folio_core::{FolioError, FolioResult};
use folio_crypto::{derive_passphrase, encrypt, Passphrase};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::channel::Channel;
use crate::protocol::{self, Command, InitialiseData, LoadPageData};
use crate::reassembly::{ChunkGroup, UnitAssembler};
use crate::structure::StructuralMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Initializing,
    Ready,
    AwaitingUnit,
    Closed,
}

/// Tokens presented to the delivery service
pub struct Credentials {
    pub auth_token: SecretString,
    pub recaptcha_token: SecretString,
}

impl Credentials {
    pub fn new(auth_token: impl Into<String>, recaptcha_token: impl Into<String>) -> Self {
        Self {
            auth_token: SecretString::from(auth_token.into()),
            recaptcha_token: SecretString::from(recaptcha_token.into()),
        }
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self::new(
            self.auth_token.expose_secret(),
            self.recaptcha_token.expose_secret(),
        )
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_token", &"[REDACTED]")
            .field("recaptcha_token", &"[REDACTED]")
            .finish()
    }
}

/// Drives the `initialise` / `loadPage` exchanges over one channel.
pub struct SessionClient<C: Channel> {
    channel: C,
    credentials: Credentials,
    passphrase: Passphrase,
    page_width: u32,
    recv_timeout: Option<Duration>,
    state: SessionState,
    channel_closed: bool,
}

impl<C: Channel> SessionClient<C> {
    /// Wrap an open channel. Fails with `Token` if the bearer token is malformed.
    pub fn new(channel: C, credentials: Credentials, page_width: u32) -> FolioResult<Self> {
        let passphrase = derive_passphrase(credentials.auth_token.expose_secret())?;
        Ok(Self {
            channel,
            credentials,
            passphrase,
            page_width,
            recv_timeout: None,
            state: SessionState::Disconnected,
            channel_closed: false,
        })
    }

    /// Bound every wait for an inbound message (`None` waits forever).
    pub fn with_recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the `initialise` exchange and return the book's structural metadata.
    pub async fn initialize(&mut self, book_id: u64) -> FolioResult<StructuralMetadata> {
        self.expect_state(SessionState::Disconnected, "initialize")?;
        self.state = SessionState::Initializing;

        let result = self.run_initialize(book_id).await;
        self.state = match result {
            Ok(_) => SessionState::Ready,
            Err(_) => SessionState::Closed,
        };
        result
    }

    async fn run_initialize(&mut self, book_id: u64) -> FolioResult<StructuralMetadata> {
        let command = Command::Initialise(InitialiseData {
            auth_token: self.credentials.auth_token.expose_secret().to_owned(),
            recaptcha_token: self.credentials.recaptcha_token.expose_secret().to_owned(),
            book_id,
        });
        self.channel.send(command.to_json()?).await?;

        let mut chunks = ChunkGroup::new();
        while !chunks.is_complete() {
            let message = self.next_message().await?;
            let chunk = protocol::parse_init_event(&message)?;
            debug!(
                book_id,
                chunk = chunk.chunk_number,
                total = chunk.number_of_chunks,
                "initialisation chunk"
            );
            chunks.insert(chunk.chunk_number, chunk.number_of_chunks, chunk.content);
        }

        let metadata = StructuralMetadata::parse(&chunks.into_content())?;
        info!(
            book_id,
            book_type = %metadata.book_type,
            chapters = metadata.num_chapters,
            "session initialised"
        );
        Ok(metadata)
    }

    /// Request one unit and return its reassembled content.
    pub async fn load_unit(
        &mut self,
        book_type: &str,
        page_id: u64,
        part_index: u64,
    ) -> FolioResult<String> {
        self.expect_state(SessionState::Ready, "load_unit")?;
        self.state = SessionState::AwaitingUnit;

        let result = self.run_load_unit(book_type, page_id, part_index).await;
        self.state = match result {
            Ok(_) => SessionState::Ready,
            Err(_) => SessionState::Closed,
        };
        result
    }

    async fn run_load_unit(
        &mut self,
        book_type: &str,
        page_id: u64,
        part_index: u64,
    ) -> FolioResult<String> {
        let request = LoadPageData {
            auth_token: self.credentials.auth_token.expose_secret().to_owned(),
            page_id,
            book_type: book_type.to_owned(),
            window_width: self.page_width,
            merged_chapter_part_index: part_index,
            client_timestamp: now_millis(),
        };
        let envelope = encrypt(&self.passphrase, serde_json::to_string(&request)?.as_bytes());
        self.channel
            .send(Command::LoadPage(envelope).to_json()?)
            .await?;

        let mut unit = UnitAssembler::new();
        loop {
            let message = self.next_message().await?;
            let chunk = protocol::parse_page_event(&message)?;
            debug!(
                page_id,
                part_index,
                group = chunk.group(),
                chunk = chunk.chunk_number,
                total = chunk.number_of_chunks,
                "page chunk"
            );
            if unit.push(chunk) {
                break;
            }
        }
        Ok(unit.into_content())
    }

    /// Close the channel, including after a failed exchange. Idempotent.
    pub async fn close(&mut self) -> FolioResult<()> {
        self.state = SessionState::Closed;
        if self.channel_closed {
            return Ok(());
        }
        self.channel_closed = true;
        self.channel.close().await
    }

    async fn next_message(&mut self) -> FolioResult<String> {
        match self.recv_timeout {
            Some(limit) => tokio::time::timeout(limit, self.channel.recv())
                .await
                .map_err(|_| FolioError::Timeout(limit.as_secs()))?,
            None => self.channel.recv().await,
        }
    }

    fn expect_state(&self, expected: SessionState, operation: &str) -> FolioResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(FolioError::protocol(format!(
                "{operation} called in state {:?} (expected {expected:?})",
                self.state
            )))
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use folio_crypto::decrypt_to_string;
    use serde_json::json;

    /// {"sub":"user-1234","iat":1700000000}
    const TOKEN: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.\
                         eyJzdWIiOiJ1c2VyLTEyMzQiLCJpYXQiOjE3MDAwMDAwMDB9.\
                         c2lnbmF0dXJl";

    fn client() -> (SessionClient<MemoryChannel>, MemoryChannel) {
        let (ours, server) = MemoryChannel::pair();
        let client = SessionClient::new(ours, Credentials::new(TOKEN, "captcha"), 1000).unwrap();
        (client, server)
    }

    fn init_chunk(number: u32, total: u32, content: &str) -> String {
        json!({
            "event": "initialisationDataChunk",
            "data": {"numberOfChunks": total, "chunkNumber": number, "content": content}
        })
        .to_string()
    }

    fn page_chunk(number: u32, total: u32, content: &str) -> String {
        json!({
            "event": "pageChunk-1",
            "data": {"numberOfChunks": total, "chunkNumber": number, "content": content}
        })
        .to_string()
    }

    async fn ready_client() -> (SessionClient<MemoryChannel>, MemoryChannel) {
        let (mut client, mut server) = client();
        server
            .send(init_chunk(0, 1, r#"{"bookType":"EPUB","numberOfChapters":1}"#))
            .await
            .unwrap();
        client.initialize(9).await.unwrap();
        server.recv().await.unwrap();
        (client, server)
    }

    #[test]
    fn test_rejects_malformed_token() {
        let (ours, _server) = MemoryChannel::pair();
        let result = SessionClient::new(ours, Credentials::new("not-a-jwt", "c"), 1000);
        assert!(matches!(result, Err(FolioError::Token(_))));
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let debug = format!("{:?}", Credentials::new(TOKEN, "cap-SECRET-42"));
        assert!(!debug.contains("cap-SECRET-42"));
        assert!(!debug.contains(TOKEN));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_load_unit_before_initialize() {
        tokio_test::block_on(async {
            let (mut client, _server) = client();
            let err = client.load_unit("EPUB", 1, 0).await.unwrap_err();
            assert!(matches!(err, FolioError::Protocol { code: None, .. }));
            assert_eq!(client.state(), SessionState::Disconnected);
        });
    }

    #[tokio::test]
    async fn test_initialize_out_of_order_double_encoded() {
        let (mut client, mut server) = client();
        let payload = serde_json::to_string(
            r#"{"bookType":"EPUB","numberOfChapters":2,"bookMap":{"1":[5],"3":[]}}"#,
        )
        .unwrap();
        let (head, tail) = payload.split_at(payload.len() / 2);

        server.send(init_chunk(1, 2, tail)).await.unwrap();
        server.send(init_chunk(0, 2, head)).await.unwrap();

        let metadata = client.initialize(77).await.unwrap();
        assert_eq!(metadata.book_type, "EPUB");
        assert_eq!(metadata.plan().len(), 3);
        assert_eq!(client.state(), SessionState::Ready);

        let request: serde_json::Value = serde_json::from_str(&server.recv().await.unwrap()).unwrap();
        assert_eq!(
            request,
            json!({
                "action": "initialise",
                "data": {"authToken": TOKEN, "reCaptchaToken": "captcha", "bookId": 77}
            })
        );
    }

    #[tokio::test]
    async fn test_initialize_error_event() {
        let (mut client, mut server) = client();
        server
            .send(json!({"event": "error", "data": {"code": 401, "message": "expired"}}).to_string())
            .await
            .unwrap();

        let err = client.initialize(1).await.unwrap_err();
        assert!(matches!(err, FolioError::Protocol { code: Some(401), .. }));
        assert_eq!(client.state(), SessionState::Closed);
        assert!(client.initialize(1).await.is_err());
    }

    #[tokio::test]
    async fn test_load_unit_encrypts_request() {
        let (mut client, mut server) = ready_client().await;
        server.send(page_chunk(1, 2, " world")).await.unwrap();
        server.send(page_chunk(0, 2, "hello")).await.unwrap();

        let content = client.load_unit("EPUB", 3, 1).await.unwrap();
        assert_eq!(content, "hello world");
        assert_eq!(client.state(), SessionState::Ready);

        let request: serde_json::Value = serde_json::from_str(&server.recv().await.unwrap()).unwrap();
        assert_eq!(request["action"], "loadPage");
        let passphrase = derive_passphrase(TOKEN).unwrap();
        let plaintext = decrypt_to_string(&passphrase, request["data"].as_str().unwrap()).unwrap();
        let data: LoadPageData = serde_json::from_str(&plaintext).unwrap();

        assert_eq!(data.auth_token, TOKEN);
        assert_eq!(data.page_id, 3);
        assert_eq!(data.merged_chapter_part_index, 1);
        assert_eq!(data.book_type, "EPUB");
        assert_eq!(data.window_width, 1000);
        assert!(data.client_timestamp > 1_600_000_000_000);
    }

    #[tokio::test]
    async fn test_load_unit_unexpected_event() {
        let (mut client, mut server) = ready_client().await;
        server
            .send(json!({"event": "presence", "data": {}}).to_string())
            .await
            .unwrap();

        match client.load_unit("EPUB", 1, 0).await.unwrap_err() {
            FolioError::Protocol { code: None, message } => {
                assert!(message.contains("unexpected event"), "{message}")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeout() {
        let (client, server) = client();
        let mut client = client.with_recv_timeout(Some(Duration::from_secs(5)));

        // one of two declared chunks, then silence
        let mut server = server;
        server.send(init_chunk(0, 2, "{")).await.unwrap();

        let err = client.initialize(1).await.unwrap_err();
        assert!(matches!(err, FolioError::Timeout(5)));
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_after_failure_hangs_up() {
        let (mut client, mut server) = client();
        server
            .send(json!({"event": "error", "data": {"code": 500, "message": "down"}}).to_string())
            .await
            .unwrap();
        assert!(client.initialize(1).await.is_err());

        client.close().await.unwrap();
        server.recv().await.unwrap(); // the initialise request
        assert!(server.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut client, mut server) = ready_client().await;
        client.close().await.unwrap();
        client.close().await.unwrap();

        assert_eq!(client.state(), SessionState::Closed);
        assert!(server.recv().await.is_err());
    }
}
