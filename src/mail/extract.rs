//! Content extraction — raw RFC822 bytes to a `NormalizedMessage`.
//!
//! Messages that cannot be parsed or carry an invalid sender are dropped
//! with a warning rather than failing the pass.

use chrono::{Local, NaiveDateTime};
use mail_parser::{MessageParser, MimeHeaders};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::MailError;
use crate::mail::types::{
    Attachment, MessageAnalysis, NormalizedMessage, MAX_BODY_LEN, MAX_SUBJECT_LEN, is_valid_address,
    sanitize_text,
};

/// Parse raw message bytes into a normalized message.
///
/// Returns an error when the bytes are not a parseable message or the
/// sender address fails validation; callers log and skip.
pub fn extract(raw: &[u8]) -> Result<NormalizedMessage, MailError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::Unparseable("not a valid RFC822 message".to_string()))?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| MailError::Unparseable("missing From address".to_string()))?;
    if !is_valid_address(&sender) {
        return Err(MailError::InvalidAddress(sender));
    }

    let subject = sanitize_text(parsed.subject().unwrap_or("(no subject)"), MAX_SUBJECT_LEN);
    let body = sanitize_text(&extract_body(&parsed), MAX_BODY_LEN);
    let timestamp = extract_timestamp(&parsed);

    let message_id = match parsed.message_id() {
        Some(id) => id.to_string(),
        None => fallback_message_id(&sender, timestamp),
    };

    let thread_id = extract_thread_id(&parsed);
    let attachments = extract_attachments(&parsed);

    Ok(NormalizedMessage {
        message_id,
        sender,
        subject,
        body,
        timestamp,
        thread_id,
        attachments,
        is_replied: false,
        analysis: MessageAnalysis::default(),
    })
}

/// Plain-text body, falling back to tag-stripped HTML.
fn extract_body(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags and collapse whitespace (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Thread root: `In-Reply-To`, else the first `References` entry.
fn extract_thread_id(parsed: &mail_parser::Message) -> Option<String> {
    if let Some(id) = parsed.in_reply_to().as_text() {
        return Some(id.to_string());
    }
    let refs = parsed.header("References")?;
    if let Some(list) = refs.as_text_list() {
        return list.first().map(|s| s.to_string());
    }
    refs.as_text()
        .and_then(|s| s.split_whitespace().next())
        .map(|s| s.to_string())
}

#[allow(clippy::cast_sign_loss)]
fn extract_timestamp(parsed: &mail_parser::Message) -> NaiveDateTime {
    parsed
        .date()
        .and_then(|d| {
            chrono::NaiveDate::from_ymd_opt(i32::from(d.year), u32::from(d.month), u32::from(d.day))
                .and_then(|date| {
                    date.and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))
                })
        })
        .unwrap_or_else(|| Local::now().naive_local())
}

fn extract_attachments(parsed: &mail_parser::Message) -> Vec<Attachment> {
    parsed
        .attachments()
        .map(|part| {
            let content_type = MimeHeaders::content_type(part)
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{sub}", ct.ctype()),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());
            Attachment {
                filename: MimeHeaders::attachment_name(part).unwrap_or("unnamed").to_string(),
                content_type,
                size: part.contents().len(),
                stored_path: None,
            }
        })
        .collect()
}

/// Deterministic id for messages without a Message-ID header, stable
/// across re-fetches of the same message.
fn fallback_message_id(sender: &str, timestamp: NaiveDateTime) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sender.as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.and_utc().timestamp().to_be_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("gen-{hex}")
}

/// Log-and-drop wrapper used by the fetch path.
pub fn extract_or_skip(raw: &[u8]) -> Option<NormalizedMessage> {
    match extract(raw) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(error = %e, "dropping unextractable message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_message(headers_and_body: &str) -> Vec<u8> {
        headers_and_body.replace('\n', "\r\n").into_bytes()
    }

    #[test]
    fn extracts_plain_text_message() {
        let raw = raw_message(
            "From: Alice <alice@example.com>\n\
             To: bot@example.com\n\
             Subject: Quick question\n\
             Message-ID: <q1@example.com>\n\
             Date: Thu, 15 Jan 2026 10:30:00 +0000\n\
             \n\
             Where do I find the invoice?\n",
        );
        let msg = extract(&raw).unwrap();
        assert_eq!(msg.sender, "alice@example.com");
        assert_eq!(msg.subject, "Quick question");
        // mail-parser strips the angle brackets from id headers.
        assert_eq!(msg.message_id, "q1@example.com");
        assert!(msg.body.contains("invoice"));
        assert!(msg.thread_id.is_none());
        assert!(!msg.is_replied);
    }

    #[test]
    fn html_only_body_is_stripped() {
        let raw = raw_message(
            "From: alice@example.com\n\
             Subject: HTML\n\
             Content-Type: text/html; charset=utf-8\n\
             \n\
             <html><body><p>Hello <b>world</b></p></body></html>\n",
        );
        let msg = extract(&raw).unwrap();
        assert!(msg.body.contains("Hello"));
        assert!(msg.body.contains("world"));
        assert!(!msg.body.contains('<'));
    }

    #[test]
    fn thread_id_prefers_in_reply_to() {
        let raw = raw_message(
            "From: alice@example.com\n\
             Subject: Re: thread\n\
             In-Reply-To: <root@example.com>\n\
             References: <older@example.com> <root@example.com>\n\
             \n\
             Following up.\n",
        );
        let msg = extract(&raw).unwrap();
        assert_eq!(msg.thread_id.as_deref(), Some("root@example.com"));
    }

    #[test]
    fn thread_id_falls_back_to_first_reference() {
        let raw = raw_message(
            "From: alice@example.com\n\
             Subject: Re: thread\n\
             References: <first@example.com> <second@example.com>\n\
             \n\
             Following up.\n",
        );
        let msg = extract(&raw).unwrap();
        assert_eq!(msg.thread_id.as_deref(), Some("first@example.com"));
    }

    #[test]
    fn missing_message_id_gets_deterministic_fallback() {
        let raw = raw_message(
            "From: alice@example.com\n\
             Subject: No id\n\
             Date: Thu, 15 Jan 2026 10:30:00 +0000\n\
             \n\
             Body.\n",
        );
        let a = extract(&raw).unwrap();
        let b = extract(&raw).unwrap();
        assert!(a.message_id.starts_with("gen-"));
        assert_eq!(a.message_id, b.message_id);
    }

    #[test]
    fn invalid_sender_is_rejected() {
        let raw = raw_message(
            "From: broken\n\
             Subject: Hi\n\
             \n\
             Body.\n",
        );
        assert!(extract(&raw).is_err());
    }

    #[test]
    fn unparseable_bytes_are_rejected() {
        assert!(extract(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn sender_is_lowercased() {
        let raw = raw_message(
            "From: Alice <ALICE@Example.COM>\n\
             Subject: Case\n\
             \n\
             Body.\n",
        );
        let msg = extract(&raw).unwrap();
        assert_eq!(msg.sender, "alice@example.com");
    }

    #[test]
    fn long_subject_is_capped() {
        let subject = "x".repeat(400);
        let raw = raw_message(&format!(
            "From: alice@example.com\nSubject: {subject}\n\nBody.\n"
        ));
        let msg = extract(&raw).unwrap();
        assert_eq!(msg.subject.len(), MAX_SUBJECT_LEN);
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html("<div><b>Bold</b> and <i>italic</i></div>"), "Bold and italic");
        assert_eq!(strip_html("No HTML here"), "No HTML here");
        assert_eq!(strip_html(""), "");
    }
}
