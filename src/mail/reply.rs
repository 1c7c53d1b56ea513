//! Outbound reply composition — threading headers, subject, signature.

use crate::mail::types::NormalizedMessage;

/// A fully composed reply, ready for the SMTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReply {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Message-ID of the message being answered.
    pub in_reply_to: String,
    /// Space-separated reference chain: thread root then message id.
    pub references: String,
}

/// Compose a threaded reply to `msg` with the generated `text`.
///
/// `In-Reply-To` is always the source message id. `References` carries
/// the thread root first when the message is part of a thread, so
/// clients group the reply correctly.
pub fn compose(msg: &NormalizedMessage, text: &str, signature: &str) -> RenderedReply {
    let references = match &msg.thread_id {
        Some(thread_id) => format!("{thread_id} {}", msg.message_id),
        None => msg.message_id.clone(),
    };
    RenderedReply {
        to: msg.sender.clone(),
        subject: reply_subject(&msg.subject),
        body: with_signature(text, signature),
        in_reply_to: msg.message_id.clone(),
        references,
    }
}

/// `Re: <subject>`, without stacking prefixes on replies to replies.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.to_lowercase().starts_with("re:") {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Append the signature unless the text already contains it.
pub fn with_signature(text: &str, signature: &str) -> String {
    if signature.is_empty() || text.contains(signature.trim()) {
        text.to_string()
    } else {
        format!("{text}{signature}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::types::MessageAnalysis;

    fn message(thread_id: Option<&str>) -> NormalizedMessage {
        NormalizedMessage {
            message_id: "<msg1@example.com>".into(),
            sender: "alice@example.com".into(),
            subject: "Pricing question".into(),
            body: "How much?".into(),
            timestamp: chrono::NaiveDate::from_ymd_opt(2026, 1, 15)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            thread_id: thread_id.map(String::from),
            attachments: vec![],
            is_replied: false,
            analysis: MessageAnalysis::default(),
        }
    }

    #[test]
    fn unthreaded_references_is_message_id() {
        let reply = compose(&message(None), "Answer.", "");
        assert_eq!(reply.in_reply_to, "<msg1@example.com>");
        assert_eq!(reply.references, "<msg1@example.com>");
    }

    #[test]
    fn threaded_references_is_thread_then_message() {
        let reply = compose(&message(Some("<root@example.com>")), "Answer.", "");
        assert_eq!(reply.in_reply_to, "<msg1@example.com>");
        assert_eq!(reply.references, "<root@example.com> <msg1@example.com>");
    }

    #[test]
    fn subject_gets_re_prefix_once() {
        assert_eq!(reply_subject("Hello"), "Re: Hello");
        assert_eq!(reply_subject("Re: Hello"), "Re: Hello");
        assert_eq!(reply_subject("RE: Hello"), "RE: Hello");
        assert_eq!(reply_subject("  re: Hello "), "re: Hello");
    }

    #[test]
    fn signature_appended_once() {
        let sig = "\n\n--\nSent by MailMind";
        let body = with_signature("Thanks!", sig);
        assert!(body.ends_with("Sent by MailMind"));
        let again = with_signature(&body, sig);
        assert_eq!(again, body);
    }

    #[test]
    fn empty_signature_leaves_body_alone() {
        assert_eq!(with_signature("Thanks!", ""), "Thanks!");
    }

    #[test]
    fn reply_goes_to_sender() {
        let reply = compose(&message(None), "Answer.", "");
        assert_eq!(reply.to, "alice@example.com");
        assert_eq!(reply.subject, "Re: Pricing question");
    }
}
