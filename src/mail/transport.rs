//! Mail transport — IMAP fetch over rustls, SMTP delivery via lettre.
//!
//! Everything here is blocking; the pipeline runs it inside
//! `tokio::task::spawn_blocking`.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::MailConfig;
use crate::error::MailError;
use crate::mail::reply::RenderedReply;

/// Raw RFC822 message bytes as fetched from the mailbox.
pub type RawMail = Vec<u8>;

/// Mailbox access seam. The pipeline only ever talks to this trait, so
/// tests swap in an in-memory implementation.
pub trait MailTransport: Send + Sync {
    /// Fetch all unread messages and mark them seen on the server.
    fn fetch_unread(&self) -> Result<Vec<RawMail>, MailError>;

    /// Deliver a composed reply.
    fn send(&self, reply: &RenderedReply) -> Result<(), MailError>;
}

/// Production transport: raw IMAP over TLS for fetch, lettre SMTP for send.
pub struct ImapSmtpTransport {
    config: MailConfig,
    from_address: String,
}

impl ImapSmtpTransport {
    pub fn new(config: MailConfig, from_address: String) -> Self {
        Self { config, from_address }
    }
}

impl MailTransport for ImapSmtpTransport {
    fn fetch_unread(&self) -> Result<Vec<RawMail>, MailError> {
        fetch_unseen_imap(&self.config)
    }

    fn send(&self, reply: &RenderedReply) -> Result<(), MailError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::relay(&self.config.smtp_host)
            .map_err(|e| MailError::SmtpSend(format!("relay setup: {e}")))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .build();

        let from: Mailbox = self
            .from_address
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("{}: {e}", self.from_address)))?;
        let to: Mailbox = reply
            .to
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("{}: {e}", reply.to)))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(&reply.subject)
            .in_reply_to(reply.in_reply_to.clone())
            .references(reply.references.clone())
            .body(reply.body.clone())
            .map_err(|e| MailError::SmtpSend(format!("build: {e}")))?;

        transport
            .send(&email)
            .map_err(|e| MailError::SmtpSend(e.to_string()))?;

        info!(to = %reply.to, subject = %reply.subject, "reply sent");
        Ok(())
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn read_line(tls: &mut TlsStream) -> Result<String, MailError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match std::io::Read::read(tls, &mut byte) {
            Ok(0) => return Err(MailError::ImapProtocol("connection closed".to_string())),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    return Ok(String::from_utf8_lossy(&buf).to_string());
                }
            }
            Err(e) => return Err(MailError::Io(e)),
        }
    }
}

fn send_cmd(tls: &mut TlsStream, tag: &str, cmd: &str) -> Result<Vec<String>, MailError> {
    let full = format!("{tag} {cmd}\r\n");
    IoWrite::write_all(tls, full.as_bytes())?;
    IoWrite::flush(tls)?;
    let mut lines = Vec::new();
    loop {
        let line = read_line(tls)?;
        let done = line.starts_with(tag);
        lines.push(line);
        if done {
            break;
        }
    }
    Ok(lines)
}

/// Announced literal length from an untagged FETCH line, e.g.
/// `* 1 FETCH (RFC822 {2394}`.
fn literal_len(line: &str) -> Option<usize> {
    let start = line.rfind('{')?;
    let end = line[start..].find('}')? + start;
    line[start + 1..end].parse().ok()
}

/// Issue `FETCH <uid> RFC822` and read the message body by its announced
/// literal length, so body content can never be confused with protocol
/// lines. Returns `None` when the server sends no literal.
fn fetch_literal(tls: &mut TlsStream, tag: &str, uid: &str) -> Result<Option<RawMail>, MailError> {
    let full = format!("{tag} FETCH {uid} RFC822\r\n");
    IoWrite::write_all(tls, full.as_bytes())?;
    IoWrite::flush(tls)?;

    let announce = read_line(tls)?;
    if announce.starts_with(tag) {
        // Tagged response straight away: the fetch failed.
        return Ok(None);
    }
    let body = match literal_len(&announce) {
        Some(n) => {
            let mut buf = vec![0u8; n];
            std::io::Read::read_exact(tls, &mut buf)?;
            Some(buf)
        }
        None => None,
    };
    // Drain the closing `)` and the tagged completion line.
    loop {
        let line = read_line(tls)?;
        if line.starts_with(tag) {
            break;
        }
    }
    Ok(body)
}

/// Fetch unseen messages via raw IMAP over TLS (blocking).
///
/// LOGIN → SELECT INBOX → SEARCH UNSEEN → FETCH RFC822 per uid →
/// STORE \Seen → LOGOUT. Messages that fail to fetch are skipped.
fn fetch_unseen_imap(config: &MailConfig) -> Result<Vec<RawMail>, MailError> {
    let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))
        .map_err(|e| MailError::ImapConnect(format!("{}: {e}", config.imap_host)))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls::pki_types::ServerName::try_from(config.imap_host.clone())
        .map_err(|e| MailError::ImapConnect(format!("bad server name: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MailError::ImapConnect(e.to_string()))?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    let _greeting = read_line(&mut tls)?;

    let login_resp = send_cmd(
        &mut tls,
        "A1",
        &format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err(MailError::ImapAuth { username: config.username.clone() });
    }

    let _select = send_cmd(&mut tls, "A2", "SELECT \"INBOX\"")?;

    let search_resp = send_cmd(&mut tls, "A3", "SEARCH UNSEEN")?;
    let mut uids: Vec<String> = Vec::new();
    for line in &search_resp {
        if line.starts_with("* SEARCH") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 2 {
                uids.extend(parts[2..].iter().map(|s| (*s).to_string()));
            }
        }
    }
    debug!(count = uids.len(), "unseen messages found");

    let mut results = Vec::new();
    let mut tag_counter = 4_u32;

    for uid in &uids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        if let Some(raw) = fetch_literal(&mut tls, &fetch_tag, uid)? {
            results.push(raw);
        }

        let store_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let _ = send_cmd(&mut tls, &store_tag, &format!("STORE {uid} +FLAGS (\\Seen)"));
    }

    let logout_tag = format!("A{tag_counter}");
    let _ = send_cmd(&mut tls, &logout_tag, "LOGOUT");

    Ok(results)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// In-memory transport recording sends and serving queued raw mail.
    #[derive(Default)]
    pub struct MockTransport {
        pub inbox: Mutex<Vec<RawMail>>,
        pub sent: Mutex<Vec<RenderedReply>>,
        pub fail_send: bool,
    }

    impl MailTransport for MockTransport {
        fn fetch_unread(&self) -> Result<Vec<RawMail>, MailError> {
            Ok(std::mem::take(&mut *self.inbox.lock().unwrap()))
        }

        fn send(&self, reply: &RenderedReply) -> Result<(), MailError> {
            if self.fail_send {
                return Err(MailError::SmtpSend("mock failure".to_string()));
            }
            self.sent.lock().unwrap().push(reply.clone());
            Ok(())
        }
    }
}
