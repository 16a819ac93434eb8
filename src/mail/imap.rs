//! Minimal blocking IMAP client over rustls, and the inbox source built on it.
//!
//! Only the handful of commands the triage flow needs: LOGIN, SELECT,
//! UID SEARCH, UID FETCH, UID STORE, APPEND, LOGOUT. Callers run it inside
//! `spawn_blocking`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use super::{MailConfig, is_sender_allowed, parse_email};
use crate::error::{MailError, PortError};
use crate::ports::InboxSource;
use crate::workflow::state::EmailRecord;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

fn imap_err(command: &str, reason: impl Into<String>) -> MailError {
    MailError::Imap {
        command: command.to_string(),
        reason: reason.into(),
    }
}

/// Quote a string argument, escaping `\` and `"`.
pub(crate) fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Byte count of a trailing `{N}` literal marker, if the line ends with one.
pub(crate) fn literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end_matches("\r\n");
    let open = line.rfind('{')?;
    line.strip_suffix('}')?[open + 1..].parse().ok()
}

/// Tagged response: untagged lines plus any literals they carried.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
    status: String,
}

impl Response {
    fn is_ok(&self) -> bool {
        self.status.split_whitespace().nth(1) == Some("OK")
    }
}

pub struct ImapSession {
    stream: StreamOwned<ClientConnection, TcpStream>,
    next_tag: u32,
}

impl ImapSession {
    /// Connect over TLS and consume the server greeting.
    pub fn connect(host: &str, port: u16) -> Result<Self, MailError> {
        let tcp = TcpStream::connect((host, port))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );
        let server_name =
            ServerName::try_from(host.to_string()).map_err(|e| MailError::Tls(e.to_string()))?;
        let conn =
            ClientConnection::new(tls_config, server_name).map_err(|e| MailError::Tls(e.to_string()))?;

        let mut session = Self {
            stream: StreamOwned::new(conn, tcp),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(imap_err("greeting", greeting.trim()));
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailError> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte)? {
                0 => return Err(imap_err("read", "connection closed")),
                _ => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
            }
        }
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, MailError> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn tag(&mut self) -> String {
        let tag = format!("T{}", self.next_tag);
        self.next_tag += 1;
        tag
    }

    fn read_response(&mut self, tag: &str) -> Result<Response, MailError> {
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if line.starts_with(tag) && line[tag.len()..].starts_with(' ') {
                response.status = line.trim_end().to_string();
                return Ok(response);
            }
            if let Some(len) = literal_len(&line) {
                response.literals.push(self.read_exact(len)?);
            }
            response.lines.push(line);
        }
    }

    /// Send one command and wait for its tagged completion.
    fn command(&mut self, name: &str, args: &str) -> Result<Response, MailError> {
        let tag = self.tag();
        let line = if args.is_empty() {
            format!("{tag} {name}\r\n")
        } else {
            format!("{tag} {name} {args}\r\n")
        };
        self.stream.write_all(line.as_bytes())?;
        self.stream.flush()?;
        let response = self.read_response(&tag)?;
        if !response.is_ok() {
            return Err(imap_err(name, response.status));
        }
        Ok(response)
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), MailError> {
        self.command("LOGIN", &format!("{} {}", quote(username), quote(password)))
            .map(|_| ())
    }

    pub fn select(&mut self, mailbox: &str) -> Result<(), MailError> {
        self.command("SELECT", &quote(mailbox)).map(|_| ())
    }

    /// UIDs of unseen messages in the selected mailbox, ascending.
    pub fn search_unseen(&mut self) -> Result<Vec<String>, MailError> {
        let response = self.command("UID SEARCH", "UNSEEN")?;
        let mut uids: Vec<u64> = response
            .lines
            .iter()
            .filter(|l| l.starts_with("* SEARCH"))
            .flat_map(|l| l.split_whitespace().skip(2))
            .filter_map(|uid| uid.parse().ok())
            .collect();
        uids.sort_unstable();
        Ok(uids.into_iter().map(|u| u.to_string()).collect())
    }

    /// Full RFC 822 source of one message.
    pub fn fetch_message(&mut self, uid: &str) -> Result<Vec<u8>, MailError> {
        let response = self.command("UID FETCH", &format!("{uid} RFC822"))?;
        response
            .literals
            .into_iter()
            .next()
            .ok_or_else(|| imap_err("UID FETCH", format!("no message body for uid {uid}")))
    }

    pub fn mark_seen(&mut self, uid: &str) -> Result<(), MailError> {
        self.command("UID STORE", &format!("{uid} +FLAGS (\\Seen)"))
            .map(|_| ())
    }

    /// Append a message to `mailbox` with the given flags.
    pub fn append(&mut self, mailbox: &str, flags: &str, message: &[u8]) -> Result<(), MailError> {
        let tag = self.tag();
        let line = format!(
            "{tag} APPEND {} ({flags}) {{{}}}\r\n",
            quote(mailbox),
            message.len()
        );
        self.stream.write_all(line.as_bytes())?;
        self.stream.flush()?;

        let cont = self.read_line()?;
        if !cont.starts_with('+') {
            return Err(imap_err("APPEND", cont.trim()));
        }
        self.stream.write_all(message)?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;

        let response = self.read_response(&tag)?;
        if !response.is_ok() {
            return Err(imap_err("APPEND", response.status));
        }
        Ok(())
    }

    pub fn logout(mut self) {
        let _ = self.command("LOGOUT", "");
    }
}

/// Open an authenticated session.
pub(crate) fn open_session(config: &MailConfig) -> Result<ImapSession, MailError> {
    let mut session = ImapSession::connect(&config.imap_host, config.imap_port)?;
    session.login(&config.username, config.password.expose_secret())?;
    Ok(session)
}

/// Fetch unseen INBOX messages as `(uid, raw)` pairs and mark them seen.
fn fetch_unseen(config: &MailConfig) -> Result<Vec<(String, Vec<u8>)>, MailError> {
    let mut session = open_session(config)?;
    session.select("INBOX")?;
    let uids = session.search_unseen()?;
    debug!(count = uids.len(), "Unseen messages");

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let raw = session.fetch_message(&uid)?;
        if let Err(e) = session.mark_seen(&uid) {
            warn!(uid = %uid, error = %e, "Failed to mark message seen");
        }
        messages.push((uid, raw));
    }
    session.logout();
    Ok(messages)
}

/// Inbox source reading unseen mail from the account's INBOX.
pub struct ImapInbox {
    config: MailConfig,
}

impl ImapInbox {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    /// Parse fetched messages, dropping self-sent and disallowed senders.
    fn to_records(&self, fetched: Vec<(String, Vec<u8>)>) -> Vec<EmailRecord> {
        fetched
            .into_iter()
            .filter_map(|(uid, raw)| {
                let Some(email) = parse_email(&uid, &raw) else {
                    warn!(uid = %uid, "Unparseable message skipped");
                    return None;
                };
                if email.sender.eq_ignore_ascii_case(&self.config.from_address) {
                    debug!(uid = %uid, "Skipping self-sent message");
                    return None;
                }
                if !is_sender_allowed(&self.config.allowed_senders, &email.sender) {
                    warn!(uid = %uid, sender = %email.sender, "Blocked email from sender outside allowlist");
                    return None;
                }
                Some(email)
            })
            .collect()
    }
}

#[async_trait]
impl InboxSource for ImapInbox {
    async fn fetch_unread(&self) -> Result<Vec<EmailRecord>, PortError> {
        let config = self.config.clone();
        let fetched = tokio::task::spawn_blocking(move || fetch_unseen(&config))
            .await
            .map_err(|e| PortError::SourceUnavailable(format!("IMAP task failed: {e}")))?
            .map_err(|e| PortError::SourceUnavailable(e.to_string()))?;

        let records = self.to_records(fetched);
        info!(host = %self.config.imap_host, count = records.len(), "Fetched unread emails");
        Ok(records)
    }
}
