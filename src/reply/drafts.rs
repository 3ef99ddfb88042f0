//! Draft persistence: saves generated replies into the mailbox's drafts
//! folder without sending them.

use std::io::Write as IoWrite;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lettre::Message;
use lettre::message::header::ContentType;
use secrecy::ExposeSecret;
use uuid::Uuid;

use crate::config::ImapConfig;
use crate::error::DraftError;

/// Persists a reply as an unsent draft.
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Returns the provider's id for the new draft.
    async fn create_draft(
        &self,
        thread_id: &str,
        sender: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, DraftError>;
}

/// Draft store used when no mailbox is configured; always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledDraftStore;

#[async_trait]
impl DraftStore for DisabledDraftStore {
    async fn create_draft(&self, _: &str, _: &str, _: &str, _: &str) -> Result<String, DraftError> {
        Err(DraftError::NotConfigured)
    }
}

/// Default end-to-end budget for one IMAP draft session.
pub const DEFAULT_IMAP_TIMEOUT: Duration = Duration::from_secs(45);

/// Saves drafts with IMAP `APPEND` over TLS.
pub struct ImapDraftStore {
    config: ImapConfig,
    timeout: Duration,
}

impl ImapDraftStore {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            timeout: DEFAULT_IMAP_TIMEOUT,
        }
    }

    /// Budget for the whole session. Keep it below the caller's own timeout:
    /// the blocking IMAP work can't be cancelled from outside.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Time limits for one blocking IMAP session.
///
/// Each socket operation gets a quarter of the total, and the APPEND
/// literal is only sent while less than half of it has elapsed, so once
/// the server has the message the remaining steps still fit.
#[derive(Debug, Clone, Copy)]
struct SessionBudget {
    started: Instant,
    total: Duration,
}

impl SessionBudget {
    fn new(total: Duration) -> Self {
        Self {
            started: Instant::now(),
            total,
        }
    }

    /// Per-operation socket timeout; zero would disable it.
    fn io_timeout(&self) -> Duration {
        (self.total / 4).max(Duration::from_millis(10))
    }

    fn may_commit(&self) -> bool {
        self.started.elapsed() < self.total / 2
    }
}

#[async_trait]
impl DraftStore for ImapDraftStore {
    async fn create_draft(
        &self,
        thread_id: &str,
        sender: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, DraftError> {
        let raw = build_draft_message(&self.config.from_address, thread_id, sender, subject, body)?;
        let cfg = self.config.clone();
        let budget = SessionBudget::new(self.timeout);

        let draft_id = tokio::task::spawn_blocking(move || append_draft_imap(&cfg, &raw, budget))
            .await
            .map_err(|e| DraftError::Imap(format!("draft task panicked: {e}")))??;

        tracing::info!(draft_id = %draft_id, to = %sender, "Draft saved");
        Ok(draft_id)
    }
}

/// Prefix `Re: ` unless the subject already carries it.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Render an RFC 5322 reply addressed to `sender`, threaded on `thread_id`.
pub fn build_draft_message(
    from: &str,
    thread_id: &str,
    sender: &str,
    subject: &str,
    body: &str,
) -> Result<Vec<u8>, DraftError> {
    let mut builder = Message::builder()
        .from(from.parse().map_err(|e| DraftError::Build(format!("Invalid from address: {e}")))?)
        .to(sender.parse().map_err(|e| DraftError::Build(format!("Invalid to address: {e}")))?)
        .subject(reply_subject(subject))
        .header(ContentType::TEXT_PLAIN);

    // Placeholder thread ids aren't real Message-IDs.
    if thread_id.starts_with('<') && thread_id.ends_with('>') {
        builder = builder
            .in_reply_to(thread_id.to_string())
            .references(thread_id.to_string());
    }

    let message = builder
        .body(body.to_string())
        .map_err(|e| DraftError::Build(format!("Failed to build email: {e}")))?;

    Ok(message.formatted())
}

/// Pull the UID out of an `[APPENDUID <validity> <uid>]` response code.
fn parse_append_uid(line: &str) -> Option<String> {
    let start = line.find("[APPENDUID ")? + "[APPENDUID ".len();
    let end = start + line[start..].find(']')?;
    line[start..end].split_whitespace().nth(1).map(String::from)
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn read_line(tls: &mut TlsStream) -> Result<String, DraftError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match std::io::Read::read(tls, &mut byte) {
            Ok(0) => return Err(DraftError::Imap("IMAP connection closed".into())),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    return Ok(String::from_utf8_lossy(&buf).to_string());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read lines until the tagged completion for `tag`.
fn read_until_tagged(tls: &mut TlsStream, tag: &str) -> Result<Vec<String>, DraftError> {
    let mut lines = Vec::new();
    loop {
        let line = read_line(tls)?;
        let done = line.starts_with(tag);
        lines.push(line);
        if done {
            return Ok(lines);
        }
    }
}

fn send_cmd(tls: &mut TlsStream, tag: &str, cmd: &str) -> Result<Vec<String>, DraftError> {
    IoWrite::write_all(tls, format!("{tag} {cmd}\r\n").as_bytes())?;
    IoWrite::flush(tls)?;
    read_until_tagged(tls, tag)
}

fn tagged_ok(lines: &[String], tag: &str) -> bool {
    lines
        .last()
        .is_some_and(|l| l.starts_with(&format!("{tag} OK")))
}

/// Connect to the first reachable address for `host`, bounded by `timeout`.
fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, DraftError> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .map(DraftError::Io)
        .unwrap_or_else(|| DraftError::Imap(format!("no address found for {host}"))))
}

/// Append a draft via raw IMAP over TLS (blocking, run in spawn_blocking).
fn append_draft_imap(
    config: &ImapConfig,
    raw: &[u8],
    budget: SessionBudget,
) -> Result<String, DraftError> {
    let io_timeout = budget.io_timeout();
    let tcp = connect(&config.host, config.port, io_timeout)?;
    tcp.set_read_timeout(Some(io_timeout))?;
    tcp.set_write_timeout(Some(io_timeout))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| DraftError::Imap(format!("TLS setup failed: {e}")))?
        .with_root_certificates(root_store)
        .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())
        .map_err(|e| DraftError::Imap(format!("invalid IMAP host: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| DraftError::Imap(format!("TLS setup failed: {e}")))?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    let _greeting = read_line(&mut tls)?;

    let login = send_cmd(
        &mut tls,
        "A1",
        &format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ),
    )?;
    if !tagged_ok(&login, "A1") {
        return Err(DraftError::Imap("IMAP login failed".into()));
    }

    // APPEND with a synchronizing literal: wait for the `+` continuation.
    let append = format!(
        "A2 APPEND \"{}\" (\\Draft \\Seen) {{{}}}\r\n",
        config.drafts_folder,
        raw.len()
    );
    IoWrite::write_all(&mut tls, append.as_bytes())?;
    IoWrite::flush(&mut tls)?;

    let continuation = read_line(&mut tls)?;
    if !continuation.starts_with('+') {
        return Err(DraftError::Imap(format!(
            "APPEND rejected: {}",
            continuation.trim_end()
        )));
    }

    // Past this point the server may store the draft; don't start if the
    // caller could already have reported failure.
    if !budget.may_commit() {
        return Err(DraftError::Timeout(budget.total));
    }

    IoWrite::write_all(&mut tls, raw)?;
    IoWrite::write_all(&mut tls, b"\r\n")?;
    IoWrite::flush(&mut tls)?;

    let result = read_until_tagged(&mut tls, "A2")?;
    let _ = send_cmd(&mut tls, "A3", "LOGOUT");

    if !tagged_ok(&result, "A2") {
        let reason = result.last().map(|l| l.trim_end().to_string()).unwrap_or_default();
        return Err(DraftError::Imap(format!("APPEND failed: {reason}")));
    }

    Ok(result
        .last()
        .and_then(|l| parse_append_uid(l))
        .unwrap_or_else(|| format!("draft-{}", Uuid::new_v4())))
}
