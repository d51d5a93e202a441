use crate::imap::error::ImapError;
use crate::imap::{MailConnector, MailSession, WaitOutcome};
use async_imap::extensions::idle::IdleResponse;
use async_imap::{Client as AsyncImapClient, Session as AsyncImapSession};
use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
use log;
use mail_parser::Message;
use rustls::pki_types::ServerName as PkiServerName;
use rustls::{ClientConfig, RootCertStore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream as TokioTcpStream;
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream as TokioTlsStreamClient, TlsConnector};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

// --- Type Aliases ---

type BaseTcpStream = TokioTcpStream;
type BaseTlsStream = TokioTlsStreamClient<BaseTcpStream>;

// Compatibility wrapper for async_imap
type CompatStream = Compat<BaseTlsStream>;

type UnderlyingImapSession = AsyncImapSession<CompatStream>;

/// Where and as whom to log in.
#[derive(Clone)]
pub struct ImapEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
}

impl fmt::Debug for ImapEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}

// --- Internal Connection Logic ---

fn build_tls_connector() -> Result<TlsConnector, ImapError> {
    let mut root_cert_store = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()?;
    let (added, ignored) = root_cert_store.add_parsable_certificates(certs);
    log::debug!("Loaded {} native certs, ignored {}.", added, ignored);
    if root_cert_store.is_empty() {
        log::warn!("Root certificate store is empty after loading native certs.");
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Establishes TCP connection and performs the TLS handshake.
async fn setup_tls_stream(
    host: &str,
    port: u16,
    tls_connector: &TlsConnector,
) -> Result<BaseTlsStream, ImapError> {
    let server_name: PkiServerName<'static> = PkiServerName::try_from(host.to_string())
        .map_err(|_| ImapError::Connection(format!("Invalid server name format: {}", host)))?;

    log::debug!("Attempting TCP connection to {}:{}...", host, port);
    let tcp_stream = BaseTcpStream::connect((host, port)).await?;
    log::debug!("TCP connected. Performing TLS handshake...");

    let tls_stream = tls_connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| ImapError::Tls(e.to_string()))?;
    log::debug!("TLS handshake successful.");
    Ok(tls_stream)
}

/// Performs IMAP login using the compatible stream.
async fn perform_imap_login(
    compat_stream: CompatStream,
    username: &str,
    password: &str,
) -> Result<UnderlyingImapSession, ImapError> {
    let client = AsyncImapClient::new(compat_stream);
    log::debug!("IMAP client created. Attempting login for user '{}'...", username);

    match client.login(username, password).await {
        Ok(session) => {
            log::info!("IMAP login successful for user: {}", username);
            Ok(session)
        }
        Err((e, _client)) => {
            log::error!("IMAP login failed for user {}: {}", username, e);
            Err(ImapError::Auth(e.to_string()))
        }
    }
}

/// Quotes a string for use in a SEARCH command.
fn quote_search_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// How an unread-with-subject search is carried out. Quoted strings are
/// 7-bit only, so a non-ASCII subject is compared locally against the
/// decoded header of every unread message.
#[derive(Debug, PartialEq, Eq)]
enum UnseenSearch {
    Server(String),
    LocalSubject,
}

fn unseen_search(subject: &str) -> UnseenSearch {
    if subject.is_empty() {
        UnseenSearch::Server("UNSEEN".to_string())
    } else if subject.is_ascii() {
        UnseenSearch::Server(format!("UNSEEN SUBJECT {}", quote_search_string(subject)))
    } else {
        UnseenSearch::LocalSubject
    }
}

/// Case-insensitive substring match on the decoded `Subject:` of a raw
/// header block.
fn header_subject_matches(header: &[u8], subject: &str) -> bool {
    let needle = subject.to_lowercase();
    Message::parse(header)
        .and_then(|message| message.subject().map(|s| s.to_lowercase().contains(&needle)))
        .unwrap_or(false)
}

// --- Connector ---

/// Opens TLS IMAP sessions with the configured mailbox selected.
pub struct ImapConnector {
    endpoint: ImapEndpoint,
    operation_timeout: Duration,
    tls_connector: TlsConnector,
}

impl ImapConnector {
    pub fn new(endpoint: ImapEndpoint, operation_timeout: Duration) -> Result<Self, ImapError> {
        Ok(Self {
            endpoint,
            operation_timeout,
            tls_connector: build_tls_connector()?,
        })
    }

    async fn connect_and_select(&self) -> Result<ImapMailSession, ImapError> {
        let ep = &self.endpoint;
        log::info!("Connecting to {}:{} as '{}'", ep.host, ep.port, ep.username);

        let tls_stream = setup_tls_stream(&ep.host, ep.port, &self.tls_connector).await?;
        let mut session = perform_imap_login(tls_stream.compat(), &ep.username, &ep.password).await?;

        let mailbox = session
            .select(&ep.mailbox)
            .await
            .map_err(|e| ImapError::InvalidMailbox(format!("{}: {}", ep.mailbox, e)))?;
        log::debug!("Selected '{}' ({} messages)", ep.mailbox, mailbox.exists);

        Ok(ImapMailSession {
            session: Some(session),
            operation_timeout: self.operation_timeout,
        })
    }
}

#[async_trait]
impl MailConnector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn MailSession>, ImapError> {
        let session = timeout(self.operation_timeout, self.connect_and_select()).await??;
        Ok(Box::new(session))
    }
}

// --- Session ---

/// Live session. The inner session is taken while IDLE is active, so a
/// session whose IDLE was interrupted mid-flight reports itself closed.
pub struct ImapMailSession {
    session: Option<UnderlyingImapSession>,
    operation_timeout: Duration,
}

impl ImapMailSession {
    fn inner(&mut self) -> Result<&mut UnderlyingImapSession, ImapError> {
        self.session.as_mut().ok_or(ImapError::SessionClosed)
    }
}

#[async_trait]
impl MailSession for ImapMailSession {
    async fn wait_for_change(&mut self, max_wait: Duration) -> Result<WaitOutcome, ImapError> {
        let session = self.session.take().ok_or(ImapError::SessionClosed)?;
        let mut handle = session.idle();
        timeout(self.operation_timeout, handle.init()).await??;

        let response = {
            let (idle_wait, _stop) = handle.wait_with_timeout(max_wait);
            idle_wait.await?
        };

        let session = timeout(self.operation_timeout, handle.done()).await??;
        self.session = Some(session);

        Ok(match response {
            IdleResponse::NewData(_) => WaitOutcome::Changed,
            IdleResponse::Timeout | IdleResponse::ManualInterrupt => WaitOutcome::TimedOut,
        })
    }

    async fn search_unseen(&mut self, subject: &str) -> Result<Vec<u32>, ImapError> {
        let op_timeout = self.operation_timeout;
        let session = self.inner()?;
        let mut uids: Vec<u32> = match unseen_search(subject) {
            UnseenSearch::Server(query) => timeout(op_timeout, session.uid_search(&query))
                .await??
                .into_iter()
                .collect(),
            UnseenSearch::LocalSubject => {
                let unseen = timeout(op_timeout, session.uid_search("UNSEEN")).await??;
                if unseen.is_empty() {
                    return Ok(Vec::new());
                }
                let uid_set = unseen.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
                let headers = timeout(op_timeout, async {
                    session
                        .uid_fetch(uid_set, "BODY.PEEK[HEADER]")
                        .await?
                        .try_collect::<Vec<_>>()
                        .await
                })
                .await?
                .map_err(|e| ImapError::Fetch(e.to_string()))?;
                log::debug!("Matching {} unread headers against '{}' locally", headers.len(), subject);

                headers
                    .iter()
                    .filter(|fetch| fetch.header().is_some_and(|h| header_subject_matches(h, subject)))
                    .filter_map(|fetch| fetch.uid)
                    .collect()
            }
        };
        uids.sort_unstable();
        uids.dedup();
        Ok(uids)
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>, ImapError> {
        let op_timeout = self.operation_timeout;
        let session = self.inner()?;
        let fetches = timeout(op_timeout, async {
            session
                .uid_fetch(uid.to_string(), "BODY.PEEK[]")
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await?
        .map_err(|e| ImapError::Fetch(e.to_string()))?;

        Ok(fetches
            .iter()
            .find(|fetch| fetch.uid == Some(uid) || fetch.uid.is_none())
            .and_then(|fetch| fetch.body())
            .map(|body| body.to_vec()))
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), ImapError> {
        let op_timeout = self.operation_timeout;
        let session = self.inner()?;
        timeout(op_timeout, async {
            session
                .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await??;
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), ImapError> {
        if let Some(mut session) = self.session.take() {
            timeout(self.operation_timeout, session.logout()).await??;
        }
        Ok(())
    }
}
