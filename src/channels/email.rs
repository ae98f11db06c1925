//! Email mailbox: raw IMAP over TLS for inbound, SMTP via lettre for outbound.
//!
//! Messages are fetched with `BODY.PEEK[]` so they stay unread until the
//! worker decides what to do with them. Disposal either deletes the
//! message (`\Deleted` + `EXPUNGE`) or marks it `\Seen`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox as Address;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;
use rustls_pki_types::ServerName;
use secrecy::{ExposeSecret, SecretString};

use crate::channels::Mailbox;
use crate::channels::email_types::InboundEmail;
use crate::channels::threading::{build_threading_headers, reply_subject};
use crate::config::{env_opt, env_parse};
use crate::error::{ChannelError, ConfigError};

const CHANNEL: &str = "email";

// ── Configuration ───────────────────────────────────────────────────

/// Email configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub poll_interval_secs: u64,
    pub allowed_senders: Vec<String>,
    /// Delete handled messages instead of marking them read.
    pub delete_after_process: bool,
}

impl EmailConfig {
    /// Build config from environment variables.
    /// Returns `Ok(None)` if `EMAIL_IMAP_HOST` is not set (mailbox disabled).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(imap_host) = env_opt("EMAIL_IMAP_HOST") else {
            return Ok(None);
        };

        let smtp_host = env_opt("EMAIL_SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));
        let username = env_opt("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(env_opt("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = env_opt("EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone());

        let allowed_senders: Vec<String> = env_opt("EMAIL_ALLOWED_SENDERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Some(Self {
            imap_port: env_parse("EMAIL_IMAP_PORT", 993)?,
            smtp_port: env_parse("EMAIL_SMTP_PORT", 587)?,
            poll_interval_secs: env_parse("EMAIL_POLL_INTERVAL_SECS", 30)?,
            delete_after_process: env_parse("EMAIL_DELETE_AFTER_PROCESS", true)?,
            imap_host,
            smtp_host,
            username,
            password,
            from_address,
            allowed_senders,
        }))
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// IMAP/SMTP mailbox. Blocking network I/O runs on the blocking pool.
pub struct EmailMailbox {
    config: Arc<EmailConfig>,
    signature: Option<String>,
}

impl EmailMailbox {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
            signature: None,
        }
    }

    /// Text appended to every outgoing reply.
    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature;
        self
    }

    pub fn config(&self) -> &EmailConfig {
        &self.config
    }
}

#[async_trait]
impl Mailbox for EmailMailbox {
    fn name(&self) -> &str {
        CHANNEL
    }

    fn own_address(&self) -> &str {
        &self.config.from_address
    }

    fn allows_sender(&self, sender: &str) -> bool {
        is_sender_allowed(&self.config.allowed_senders, sender)
    }

    async fn fetch_unseen(&self) -> Result<Vec<InboundEmail>, ChannelError> {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || fetch_unseen_imap(&config))
            .await
            .map_err(|e| fetch_failed(format!("IMAP task failed: {e}")))?
            .map_err(|e| fetch_failed(e.to_string()))
    }

    async fn send_reply(&self, original: &InboundEmail, body: &str) -> Result<(), ChannelError> {
        let message = build_reply(&self.config, original, &with_signature(body, self.signature.as_deref()))?;
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || send_smtp(&config, &message))
            .await
            .map_err(|e| send_failed(format!("SMTP task failed: {e}")))?
    }

    async fn dispose(&self, email: &InboundEmail) -> Result<(), ChannelError> {
        let config = Arc::clone(&self.config);
        let uid = email.uid.clone();
        let result = {
            let uid = uid.clone();
            tokio::task::spawn_blocking(move || dispose_imap(&config, &uid)).await
        };
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ChannelError::DisposeFailed {
                name: CHANNEL.into(),
                uid,
                reason: e.to_string(),
            }),
            Err(e) => Err(ChannelError::DisposeFailed {
                name: CHANNEL.into(),
                uid,
                reason: format!("IMAP task failed: {e}"),
            }),
        }
    }
}

fn fetch_failed(reason: String) -> ChannelError {
    ChannelError::FetchFailed {
        name: CHANNEL.into(),
        reason,
    }
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: CHANNEL.into(),
        reason,
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Check if a sender email is in the allowlist.
///
/// - Empty list → deny all
/// - `*` in list → allow all
/// - `@domain.com` or `domain.com` → domain match
/// - `user@domain.com` → exact email match
pub fn is_sender_allowed(allowed: &[String], email: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.to_lowercase();
    allowed.iter().any(|a| {
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(email)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}

/// Append the signature, separated by a blank line.
pub fn with_signature(body: &str, signature: Option<&str>) -> String {
    match signature.map(str::trim).filter(|s| !s.is_empty()) {
        Some(sig) => format!("{}\n\n{sig}", body.trim_end()),
        None => body.to_string(),
    }
}

/// Build the reply message: `Re:` subject, threading headers, reply-all recipients.
pub fn build_reply(config: &EmailConfig, original: &InboundEmail, body: &str) -> Result<Message, ChannelError> {
    let parse = |addr: &str| -> Result<Address, ChannelError> {
        addr.parse()
            .map_err(|e| send_failed(format!("Invalid address '{addr}': {e}")))
    };

    let (to, cc) = original.reply_recipients(&config.from_address);
    let mut builder = Message::builder()
        .from(parse(&config.from_address)?)
        .subject(reply_subject(&original.subject));
    for addr in &to {
        builder = builder.to(parse(addr)?);
    }
    for addr in &cc {
        builder = builder.cc(parse(addr)?);
    }

    if let Some(headers) = build_threading_headers(&original.message_id, &original.references) {
        builder = builder
            .in_reply_to(headers.in_reply_to)
            .references(headers.references);
    } else {
        tracing::warn!(uid = %original.uid, "No Message-ID on original, reply will not thread");
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| send_failed(format!("Failed to build email: {e}")))
}

/// Send via SMTP (blocking).
fn send_smtp(config: &EmailConfig, message: &Message) -> Result<(), ChannelError> {
    let creds = Credentials::new(config.username.clone(), config.password.expose_secret().to_string());

    let transport = SmtpTransport::starttls_relay(&config.smtp_host)
        .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
        .port(config.smtp_port)
        .credentials(creds)
        .timeout(Some(Duration::from_secs(30)))
        .build();

    transport
        .send(message)
        .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;
    Ok(())
}

// ── IMAP ────────────────────────────────────────────────────────────

/// Error type for IMAP operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// A logged-in IMAP connection with INBOX selected.
struct ImapSession {
    tls: TlsStream,
    tag: u32,
}

impl ImapSession {
    fn connect(config: &EmailConfig) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()?
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(config.imap_host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            tag: 0,
        };

        let _greeting = session.read_line()?;

        let login = session.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))?;
        if !is_ok(&login) {
            return Err("IMAP login failed".into());
        }

        let select = session.command("SELECT \"INBOX\"")?;
        if !is_ok(&select) {
            return Err("IMAP SELECT INBOX failed".into());
        }

        Ok(session)
    }

    fn read_line(&mut self) -> Result<Vec<u8>, ImapError> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.tls.read(&mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(buf);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send one tagged command and collect the response.
    ///
    /// Literals (`{n}\r\n` followed by n bytes) are read in full and kept
    /// inline, so message bodies arrive intact.
    fn command(&mut self, cmd: &str) -> Result<Vec<Vec<u8>>, ImapError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        self.tls.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.tls.flush()?;

        let mut lines = Vec::new();
        loop {
            let mut line = self.read_line()?;
            if let Some(size) = literal_size(&line) {
                let mut literal = vec![0u8; size];
                self.tls.read_exact(&mut literal)?;
                line.extend_from_slice(&literal);
                let rest = self.read_line()?;
                line.extend_from_slice(&rest);
            }
            let done = line.starts_with(tag.as_bytes()) && line.get(tag.len()) == Some(&b' ');
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

fn is_ok(lines: &[Vec<u8>]) -> bool {
    lines.last().is_some_and(|l| {
        String::from_utf8_lossy(l)
            .split_whitespace()
            .nth(1)
            .is_some_and(|s| s.eq_ignore_ascii_case("OK"))
    })
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Size of a trailing `{n}\r\n` literal marker, if the line ends with one.
fn literal_size(line: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(line).ok()?;
    let text = text.strip_suffix("\r\n")?.strip_suffix('}')?;
    let open = text.rfind('{')?;
    text[open + 1..].trim_end_matches('+').parse().ok()
}

/// UIDs from `* SEARCH` lines, ascending (oldest first).
fn parse_search(lines: &[Vec<u8>]) -> Vec<u32> {
    let mut uids: Vec<u32> = lines
        .iter()
        .map(|l| String::from_utf8_lossy(l).to_string())
        .filter(|l| l.starts_with("* SEARCH"))
        .flat_map(|l| {
            l.split_whitespace()
                .skip(2)
                .filter_map(|s| s.parse().ok())
                .collect::<Vec<u32>>()
        })
        .collect();
    uids.sort_unstable();
    uids.dedup();
    uids
}

/// Raw message bytes from a `UID FETCH ... BODY.PEEK[]` response.
fn extract_literal(lines: &[Vec<u8>]) -> Option<&[u8]> {
    let line = lines.iter().find(|l| l.starts_with(b"* ") && literal_size_prefix(l).is_some())?;
    let (start, size) = literal_size_prefix(line)?;
    line.get(start..start + size)
}

/// Offset and size of the first literal in a response line.
fn literal_size_prefix(line: &[u8]) -> Option<(usize, usize)> {
    let marker = line.windows(3).position(|w| w == b"}\r\n")?;
    let open = line[..marker].iter().rposition(|&b| b == b'{')?;
    let size: usize = std::str::from_utf8(&line[open + 1..marker]).ok()?.parse().ok()?;
    Some((marker + 3, size))
}

/// Fetch unread messages oldest-first without marking them read (blocking).
fn fetch_unseen_imap(config: &EmailConfig) -> Result<Vec<InboundEmail>, ImapError> {
    let mut session = ImapSession::connect(config)?;

    let search = session.command("UID SEARCH UNSEEN")?;
    let uids = parse_search(&search);
    if !uids.is_empty() {
        tracing::debug!(count = uids.len(), "Unseen messages");
    }

    let mut emails = Vec::with_capacity(uids.len());
    for uid in uids {
        let response = session.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        let Some(raw) = extract_literal(&response) else {
            tracing::warn!(uid, "FETCH returned no message body");
            continue;
        };
        match MessageParser::default().parse(raw) {
            Some(parsed) => emails.push(InboundEmail::from_parsed(uid.to_string(), &parsed)),
            None => tracing::warn!(uid, "Could not parse message"),
        }
    }

    session.logout();
    Ok(emails)
}

/// Delete or mark a message read, per configuration (blocking).
fn dispose_imap(config: &EmailConfig, uid: &str) -> Result<(), ImapError> {
    let mut session = ImapSession::connect(config)?;
    let flag = if config.delete_after_process { "\\Deleted" } else { "\\Seen" };
    let store = session.command(&format!("UID STORE {uid} +FLAGS ({flag})"))?;
    if !is_ok(&store) {
        return Err(format!("UID STORE {uid} failed").into());
    }
    if config.delete_after_process {
        let expunge = session.command("EXPUNGE")?;
        if !is_ok(&expunge) {
            return Err("EXPUNGE failed".into());
        }
    }
    session.logout();
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
