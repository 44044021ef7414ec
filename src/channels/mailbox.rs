//! Mailbox adapter: raw IMAP over TLS (rustls).
//!
//! Each call opens its own session on the blocking pool and logs out before
//! returning, also on error paths (`ImapSession` logs out on drop). Listing
//! only fetches headers; bodies and PDF parts are fetched per message and
//! decoded with `mail-parser`.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::channels::{
    Attachment, ChannelKind, DedupScope, InboundMessage, MessageContent, MessageFilter,
    MessageRef, SourceAdapter,
};
use crate::error::ChannelError;

const NAME: &str = "mailbox";

static GM_MSGID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"X-GM-MSGID\s+\(?(\d+)").unwrap_or_else(|e| panic!("invalid pattern: {e}"))
});
static LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(\d+)\}\r?\n?$").unwrap_or_else(|e| panic!("invalid pattern: {e}"))
});

// ── Configuration ───────────────────────────────────────────────────

/// Connection settings for one IMAP mailbox.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub folder: String,
    /// Flag processed messages `\Seen` at the end of a sweep.
    pub mark_seen: bool,
    /// Connect, read and write timeout.
    pub timeout: Duration,
}

impl MailboxConfig {
    pub fn new(host: &str, username: &str, password: SecretString) -> Self {
        Self {
            host: host.to_string(),
            port: 993,
            username: username.to_string(),
            password,
            folder: "INBOX".to_string(),
            mark_seen: false,
            timeout: Duration::from_secs(30),
        }
    }
}

// ── Adapter ─────────────────────────────────────────────────────────

/// IMAP mailbox source.
pub struct MailboxAdapter {
    config: Arc<MailboxConfig>,
}

impl MailboxAdapter {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, ChannelError>
    where
        T: Send + 'static,
        F: FnOnce(&MailboxConfig) -> Result<T, ChannelError> + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || op(&config))
            .await
            .map_err(|e| connection_failed(format!("IMAP task panicked: {e}")))?
    }
}

#[async_trait]
impl SourceAdapter for MailboxAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Mailbox
    }

    async fn list_messages(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<InboundMessage>, ChannelError> {
        let filter = filter.clone();
        self.run_blocking(move |config| list_blocking(config, &filter))
            .await
    }

    async fn fetch_body(&self, reference: &MessageRef) -> Result<MessageContent, ChannelError> {
        let reference = reference.clone();
        self.run_blocking(move |config| fetch_blocking(config, &reference))
            .await
    }

    async fn acknowledge(&self, references: &[MessageRef]) -> Result<(), ChannelError> {
        if !self.config.mark_seen || references.is_empty() {
            return Ok(());
        }
        let references = references.to_vec();
        self.run_blocking(move |config| mark_seen_blocking(config, &references))
            .await
    }
}

fn list_blocking(
    config: &MailboxConfig,
    filter: &MessageFilter,
) -> Result<Vec<InboundMessage>, ChannelError> {
    let mut session = ImapSession::open(config)?;
    let gmail = session
        .capabilities()?
        .iter()
        .any(|c| c.eq_ignore_ascii_case("X-GM-EXT-1"));
    session.select(&config.folder)?;

    let query = build_search_query(filter);
    let mut uids = session.search(&query)?;
    if let Some(limit) = filter.limit
        && uids.len() > limit
    {
        uids.drain(..uids.len() - limit);
    }
    debug!(folder = %config.folder, %query, count = uids.len(), gmail, "IMAP search");

    let items = if gmail {
        "(UID X-GM-MSGID BODY.PEEK[HEADER])"
    } else {
        "(UID BODY.PEEK[HEADER])"
    };

    let account = format!("{}@{}", config.username, config.host);
    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let response = session.command(&format!("UID FETCH {uid} {items}"))?;
        if !response.is_ok() {
            warn!(uid, status = response.status_line(), "IMAP header fetch failed, skipping");
            continue;
        }
        let gm_msgid = response.lines.iter().find_map(|l| parse_gm_msgid(l));
        let headers = response
            .literals
            .first()
            .map(|raw| parse_headers(raw))
            .unwrap_or_default();

        let (dedup_key, dedup_scope) = dedup_key(
            gm_msgid.as_deref(),
            headers.message_id.as_deref(),
            &account,
            &config.folder,
            uid,
        );
        messages.push(InboundMessage {
            channel: ChannelKind::Mailbox,
            dedup_key,
            dedup_scope,
            reference: MessageRef::new(uid_reference(&config.folder, uid)),
            subject: headers.subject.unwrap_or_default(),
            sender: headers.sender,
            received_at: headers.received_at,
            content: None,
        });
    }

    session.logout();
    Ok(messages)
}

fn fetch_blocking(
    config: &MailboxConfig,
    reference: &MessageRef,
) -> Result<MessageContent, ChannelError> {
    let (folder, uid) = parse_uid_reference(reference.as_str()).ok_or_else(|| not_found(reference))?;

    let mut session = ImapSession::open(config)?;
    session.select(&folder)?;
    let response = session.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
    if !response.is_ok() {
        return Err(query_failed(format!("FETCH failed: {}", response.status_line())));
    }
    let raw = response.literals.first().ok_or_else(|| not_found(reference))?;
    let (_, content) = parse_message(raw).ok_or_else(|| query_failed("unparseable message"))?;
    session.logout();

    debug!(
        %reference,
        attachments = content.attachments.len(),
        "Fetched message body"
    );
    Ok(content)
}

fn mark_seen_blocking(config: &MailboxConfig, references: &[MessageRef]) -> Result<(), ChannelError> {
    let mut by_folder: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for reference in references {
        if let Some((folder, uid)) = parse_uid_reference(reference.as_str()) {
            by_folder.entry(folder).or_default().push(uid);
        }
    }

    let mut session = ImapSession::open(config)?;
    for (folder, uids) in by_folder {
        session.select(&folder)?;
        for uid in uids {
            let response = session.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
            if !response.is_ok() {
                warn!(uid, %folder, "Could not mark message as seen");
            }
        }
    }
    session.logout();
    info!(count = references.len(), "Marked processed messages as seen");
    Ok(())
}

// ── IMAP session ────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One tagged command's response: untagged lines, literals in order, and the
/// tagged status line last.
#[derive(Debug, Default)]
struct ImapResponse {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

impl ImapResponse {
    fn status_line(&self) -> &str {
        self.lines.last().map(|l| l.trim_end()).unwrap_or("")
    }

    fn is_ok(&self) -> bool {
        self.status_line().split_whitespace().nth(1) == Some("OK")
    }
}

/// A logged-in IMAP session. Logs out when dropped.
struct ImapSession {
    stream: BufReader<TlsStream>,
    tag: u32,
    closed: bool,
}

impl ImapSession {
    /// Connect over TLS and log in.
    fn open(config: &MailboxConfig) -> Result<Self, ChannelError> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(connection_failed)?
            .next()
            .ok_or_else(|| connection_failed(format!("cannot resolve {}", config.host)))?;
        let tcp = TcpStream::connect_timeout(&addr, config.timeout).map_err(connection_failed)?;
        tcp.set_read_timeout(Some(config.timeout))
            .map_err(connection_failed)?;
        tcp.set_write_timeout(Some(config.timeout))
            .map_err(connection_failed)?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
            .map_err(connection_failed)?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(connection_failed)?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            tag: 0,
            closed: false,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") {
            session.closed = true;
            return Err(connection_failed(format!("unexpected greeting: {}", greeting.trim_end())));
        }

        let login = session.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))?;
        if !login.is_ok() {
            return Err(ChannelError::AuthFailed {
                name: NAME.into(),
                reason: login.status_line().to_string(),
            });
        }
        debug!(host = %config.host, user = %config.username, "IMAP login ok");
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ChannelError> {
        let mut buf = Vec::new();
        let read = self
            .stream
            .read_until(b'\n', &mut buf)
            .map_err(connection_failed)?;
        if read == 0 {
            return Err(connection_failed("IMAP connection closed"));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn command(&mut self, command: &str) -> Result<ImapResponse, ChannelError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{tag} {command}\r\n").as_bytes())
            .and_then(|()| stream.flush())
            .map_err(connection_failed)?;

        let prefix = format!("{tag} ");
        let mut response = ImapResponse::default();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream
                    .read_exact(&mut literal)
                    .map_err(connection_failed)?;
                response.literals.push(literal);
            }
            let done = line.starts_with(&prefix);
            response.lines.push(line);
            if done {
                return Ok(response);
            }
        }
    }

    fn capabilities(&mut self) -> Result<Vec<String>, ChannelError> {
        let response = self.command("CAPABILITY")?;
        Ok(response
            .lines
            .iter()
            .filter_map(|l| l.strip_prefix("* CAPABILITY "))
            .flat_map(|l| l.split_whitespace().map(str::to_string))
            .collect())
    }

    fn select(&mut self, folder: &str) -> Result<(), ChannelError> {
        let response = self.command(&format!("SELECT {}", quote(folder)))?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(query_failed(format!(
                "cannot select folder {folder}: {}",
                response.status_line()
            )))
        }
    }

    fn search(&mut self, query: &str) -> Result<Vec<u32>, ChannelError> {
        let response = self.command(&format!("UID SEARCH {query}"))?;
        if !response.is_ok() {
            return Err(query_failed(format!(
                "search '{query}' rejected: {}",
                response.status_line()
            )));
        }
        Ok(parse_search_uids(&response.lines))
    }

    fn logout(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }
}

impl Drop for ImapSession {
    fn drop(&mut self) {
        self.logout();
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// IMAP search criteria for a filter. A raw query wins over everything else.
pub fn build_search_query(filter: &MessageFilter) -> String {
    if let Some(raw) = filter.raw_query.as_deref().map(str::trim)
        && !raw.is_empty()
    {
        return raw.to_string();
    }
    let mut parts = Vec::new();
    if let Some(sender) = filter.sender.as_deref().filter(|s| !s.trim().is_empty()) {
        parts.push(format!("FROM {}", quote(sender.trim())));
    }
    parts.push(if filter.include_seen { "ALL" } else { "UNSEEN" }.to_string());
    parts.join(" ")
}

/// UIDs from `* SEARCH` lines.
pub fn parse_search_uids(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|l| l.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

pub fn parse_gm_msgid(line: &str) -> Option<String> {
    GM_MSGID.captures(line).map(|c| c[1].to_string())
}

/// Global Gmail id, else the Message-ID header, else `uid:<folder>:<uid>`.
/// `X-GM-MSGID`, else `Message-ID` without brackets, else a UID key scoped
/// to this account and folder.
pub fn dedup_key(
    gm_msgid: Option<&str>,
    message_id: Option<&str>,
    account: &str,
    folder: &str,
    uid: u32,
) -> (String, DedupScope) {
    if let Some(id) = gm_msgid.filter(|s| !s.is_empty()) {
        return (id.to_string(), DedupScope::Global);
    }
    if let Some(id) = message_id.map(|s| s.trim().trim_matches(['<', '>'])).filter(|s| !s.is_empty()) {
        return (id.to_string(), DedupScope::Global);
    }
    (format!("uid:{account}:{folder}:{uid}"), DedupScope::Channel)
}

pub fn uid_reference(folder: &str, uid: u32) -> String {
    format!("uid:{folder}:{uid}")
}

/// Inverse of `uid_reference`. Folder names may contain `:`.
pub fn parse_uid_reference(reference: &str) -> Option<(String, u32)> {
    let rest = reference.strip_prefix("uid:")?;
    let (folder, uid) = rest.rsplit_once(':')?;
    if folder.is_empty() {
        return None;
    }
    Some((folder.to_string(), uid.parse().ok()?))
}

fn literal_len(line: &str) -> Option<usize> {
    LITERAL.captures(line).and_then(|c| c[1].parse().ok())
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Header fields used for listing.
#[derive(Debug, Default, PartialEq)]
pub struct MessageHeaders {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

fn headers_of(parsed: &mail_parser::Message<'_>) -> MessageHeaders {
    MessageHeaders {
        message_id: parsed.message_id().map(str::to_string),
        subject: parsed.subject().map(str::to_string),
        sender: parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(str::to_string),
        received_at: parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0)),
    }
}

pub fn parse_headers(raw: &[u8]) -> MessageHeaders {
    MessageParser::default()
        .parse(raw)
        .map(|parsed| headers_of(&parsed))
        .unwrap_or_default()
}

/// Decode a full RFC 822 message into headers, body and PDF parts.
pub fn parse_message(raw: &[u8]) -> Option<(MessageHeaders, MessageContent)> {
    let parsed = MessageParser::default().parse(raw)?;
    let body = parsed
        .body_text(0)
        .or_else(|| parsed.body_html(0))
        .map(|b| b.into_owned())
        .unwrap_or_default();

    let attachments = parsed
        .attachments()
        .map(|part| Attachment {
            filename: part.attachment_name().unwrap_or("attachment.pdf").to_string(),
            content_type: part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_default(),
            bytes: part.contents().to_vec(),
        })
        .filter(Attachment::is_pdf)
        .collect();

    Some((headers_of(&parsed), MessageContent { body, attachments }))
}

fn connection_failed(reason: impl std::fmt::Display) -> ChannelError {
    ChannelError::ConnectionFailed {
        name: NAME.into(),
        reason: reason.to_string(),
    }
}

fn query_failed(reason: impl std::fmt::Display) -> ChannelError {
    ChannelError::QueryFailed {
        name: NAME.into(),
        reason: reason.to_string(),
    }
}

fn not_found(reference: &MessageRef) -> ChannelError {
    ChannelError::NotFound {
        name: NAME.into(),
        reference: reference.to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_MESSAGE: &str = "From: Reservations <res@vendor.example>\r\n\
        To: ops@acme.gr\r\n\
        Subject: New Reservation [Confirmed]: ABC123\r\n\
        Message-ID: <abc123@vendor.example>\r\n\
        Date: Mon, 18 Aug 2025 10:30:00 +0000\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
        \r\n\
        --XYZ\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        See attached voucher.\r\n\
        --XYZ\r\n\
        Content-Type: image/png\r\n\
        Content-Disposition: attachment; filename=\"logo.png\"\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        iVBORw0K\r\n\
        --XYZ\r\n\
        Content-Type: application/pdf; name=\"voucher.pdf\"\r\n\
        Content-Disposition: attachment; filename=\"voucher.pdf\"\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        JVBERi0xLjQK\r\n\
        --XYZ--\r\n";

    #[test]
    fn search_query_defaults_to_unseen() {
        assert_eq!(build_search_query(&MessageFilter::default()), "UNSEEN");
    }

    #[test]
    fn search_query_with_sender_and_seen() {
        let filter = MessageFilter {
            sender: Some("res@vendor.example".into()),
            include_seen: true,
            ..Default::default()
        };
        assert_eq!(build_search_query(&filter), "FROM \"res@vendor.example\" ALL");
    }

    #[test]
    fn raw_query_is_used_verbatim() {
        let filter = MessageFilter {
            sender: Some("ignored@x".into()),
            raw_query: Some(" X-GM-RAW \"has:attachment\" ".into()),
            ..Default::default()
        };
        assert_eq!(build_search_query(&filter), "X-GM-RAW \"has:attachment\"");
    }

    #[test]
    fn search_uids_are_parsed() {
        let lines = vec![
            "* SEARCH 3 17 42\r\n".to_string(),
            "A4 OK SEARCH completed\r\n".to_string(),
        ];
        assert_eq!(parse_search_uids(&lines), vec![3, 17, 42]);
        assert!(parse_search_uids(&["* SEARCH\r\n".to_string()]).is_empty());
    }

    #[test]
    fn gm_msgid_with_and_without_parens() {
        assert_eq!(
            parse_gm_msgid("* 1 FETCH (UID 5 X-GM-MSGID 1278455344230334865 BODY[HEADER] {10}"),
            Some("1278455344230334865".into())
        );
        assert_eq!(parse_gm_msgid("X-GM-MSGID (42)"), Some("42".into()));
        assert_eq!(parse_gm_msgid("* 1 FETCH (UID 5)"), None);
    }

    #[test]
    fn dedup_key_prefers_global_ids() {
        let account = "res@imap.example.com";
        assert_eq!(
            dedup_key(Some("99"), Some("<m@x>"), account, "INBOX", 5),
            ("99".to_string(), DedupScope::Global)
        );
        assert_eq!(
            dedup_key(None, Some("<m@x>"), account, "INBOX", 5),
            ("m@x".to_string(), DedupScope::Global)
        );
        assert_eq!(
            dedup_key(None, None, account, "INBOX", 5),
            ("uid:res@imap.example.com:INBOX:5".to_string(), DedupScope::Channel)
        );
        assert_ne!(
            dedup_key(None, None, "other@imap.example.com", "INBOX", 5).0,
            dedup_key(None, None, account, "INBOX", 5).0
        );
    }

    #[test]
    fn uid_reference_round_trip_with_colons() {
        assert_eq!(
            parse_uid_reference(&uid_reference("[Gmail]/All:Mail", 7)),
            Some(("[Gmail]/All:Mail".to_string(), 7))
        );
        assert_eq!(parse_uid_reference("gm:123"), None);
        assert_eq!(parse_uid_reference("uid::7"), None);
    }

    #[test]
    fn literal_length_detection() {
        assert_eq!(literal_len("* 1 FETCH (BODY[] {342}\r\n"), Some(342));
        assert_eq!(literal_len("A1 OK done\r\n"), None);
    }

    #[test]
    fn status_line_ok_detection() {
        let ok = ImapResponse {
            lines: vec!["* CAPABILITY IMAP4rev1\r\n".into(), "A1 OK done\r\n".into()],
            literals: Vec::new(),
        };
        assert!(ok.is_ok());
        let no = ImapResponse {
            lines: vec!["A2 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n".into()],
            literals: Vec::new(),
        };
        assert!(!no.is_ok());
        assert!(no.status_line().contains("AUTHENTICATIONFAILED"));
    }

    #[test]
    fn quoting_escapes() {
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn message_decoding_keeps_only_pdf_parts() {
        let (headers, content) = parse_message(RAW_MESSAGE.as_bytes()).unwrap();
        assert_eq!(headers.message_id.as_deref(), Some("abc123@vendor.example"));
        assert_eq!(headers.subject.as_deref(), Some("New Reservation [Confirmed]: ABC123"));
        assert_eq!(headers.sender.as_deref(), Some("res@vendor.example"));
        assert!(headers.received_at.is_some());

        assert!(content.body.contains("See attached voucher."));
        assert_eq!(content.attachments.len(), 1);
        let pdf = &content.attachments[0];
        assert_eq!(pdf.filename, "voucher.pdf");
        assert_eq!(pdf.content_type, "application/pdf");
        assert_eq!(pdf.bytes, b"%PDF-1.4\n");
    }

    #[test]
    fn header_only_parse() {
        let header_end = RAW_MESSAGE.find("\r\n\r\n").unwrap() + 4;
        let headers = parse_headers(&RAW_MESSAGE.as_bytes()[..header_end]);
        assert_eq!(headers.message_id.as_deref(), Some("abc123@vendor.example"));
    }
}
