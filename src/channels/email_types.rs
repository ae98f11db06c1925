//! Inbound email representation and the context block handed to the coordinator.

use chrono::{DateTime, Utc};
use mail_parser::{HeaderValue, MimeHeaders};
use serde::{Deserialize, Serialize};

/// One unread message fetched from the mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    /// IMAP UID, used to dispose of the message afterwards.
    pub uid: String,
    /// `Message-ID` header, without angle brackets. Empty when absent.
    pub message_id: String,
    pub sender: String,
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Existing `References` chain, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    pub date: Option<DateTime<Utc>>,
}

impl InboundEmail {
    /// Build from a parsed MIME message.
    pub fn from_parsed(uid: impl Into<String>, parsed: &mail_parser::Message<'_>) -> Self {
        let references = match parsed.references() {
            HeaderValue::Text(id) => vec![id.to_string()],
            HeaderValue::TextList(ids) => ids.iter().map(|id| id.to_string()).collect(),
            _ => Vec::new(),
        };

        Self {
            uid: uid.into(),
            message_id: parsed.message_id().unwrap_or_default().to_string(),
            sender: extract_addresses(parsed.from())
                .into_iter()
                .next()
                .unwrap_or_else(|| "unknown".to_string()),
            to: extract_addresses(parsed.to()),
            cc: extract_addresses(parsed.cc()),
            subject: parsed.subject().unwrap_or_default().to_string(),
            body: extract_text(parsed),
            references,
            date: parsed
                .date()
                .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0)),
        }
    }

    /// Header block plus body, the initial user turn of a session.
    pub fn context(&self) -> String {
        let subject = if self.subject.trim().is_empty() {
            "<no subject>"
        } else {
            self.subject.trim()
        };
        let date = self
            .date
            .map(|d| d.to_rfc2822())
            .unwrap_or_else(|| "Unknown".to_string());
        format!(
            "Subject: {subject}\nFrom: {}\nTo: {}\nDate: {date}\n\nBody:\n{}",
            self.sender,
            self.to.join(", "),
            self.body.trim()
        )
    }

    /// Reply-all recipients without our own address: (to, cc).
    pub fn reply_recipients(&self, own_address: &str) -> (Vec<String>, Vec<String>) {
        let mut to = vec![self.sender.clone()];
        for addr in &self.to {
            if !addr.eq_ignore_ascii_case(own_address) && !to.iter().any(|t| t.eq_ignore_ascii_case(addr)) {
                to.push(addr.clone());
            }
        }
        let cc = self
            .cc
            .iter()
            .filter(|addr| !addr.eq_ignore_ascii_case(own_address))
            .filter(|addr| !to.iter().any(|t| t.eq_ignore_ascii_case(addr)))
            .cloned()
            .collect();
        (to, cc)
    }

    /// Short form for logs.
    pub fn preview(&self) -> String {
        let body = self.body.trim();
        if body.chars().count() > 50 {
            format!("{}...", body.chars().take(50).collect::<String>())
        } else {
            body.to_string()
        }
    }
}

/// Extract email addresses from an optional mail_parser Address field.
pub fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            .collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            })
            .collect(),
    }
}

/// Strip HTML tags, collapsing whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Readable text of a message: plain part, then HTML, then a text attachment.
fn extract_text(parsed: &mail_parser::Message<'_>) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            let name = MimeHeaders::attachment_name(part).unwrap_or("file");
            return format!("[Attachment: {name}]\n{text}");
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use mail_parser::MessageParser;

    use super::*;

    const RAW: &str = "From: Alice <alice@unit.example>\r\n\
        To: agent@unit.example, bob@unit.example\r\n\
        Cc: carol@unit.example, agent@unit.example\r\n\
        Subject: Leave question\r\n\
        Message-ID: <msg-2@unit.example>\r\n\
        References: <msg-0@unit.example> <msg-1@unit.example>\r\n\
        Date: Mon, 6 Jan 2025 10:00:00 +0000\r\n\
        \r\n\
        How many days can I carry over?\r\n";

    fn parsed() -> InboundEmail {
        let message = MessageParser::default().parse(RAW.as_bytes()).unwrap();
        InboundEmail::from_parsed("42", &message)
    }

    #[test]
    fn parses_headers_and_body() {
        let email = parsed();
        assert_eq!(email.uid, "42");
        assert_eq!(email.sender, "alice@unit.example");
        assert_eq!(email.to, vec!["agent@unit.example", "bob@unit.example"]);
        assert_eq!(email.message_id, "msg-2@unit.example");
        assert_eq!(email.references.len(), 2);
        assert!(email.body.contains("carry over"));
        assert!(email.date.is_some());
    }

    #[test]
    fn context_block_layout() {
        let context = parsed().context();
        assert!(context.starts_with(
            "Subject: Leave question\nFrom: alice@unit.example\nTo: agent@unit.example, bob@unit.example\n"
        ));
        assert!(context.ends_with("\n\nBody:\nHow many days can I carry over?"));
    }

    #[test]
    fn reply_recipients_exclude_self() {
        let (to, cc) = parsed().reply_recipients("Agent@unit.example");
        assert_eq!(to, vec!["alice@unit.example", "bob@unit.example"]);
        assert_eq!(cc, vec!["carol@unit.example"]);
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello <b>there</b></p>"), "Hello there");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn preview_truncates() {
        let mut email = parsed();
        email.body = "x".repeat(80);
        assert_eq!(email.preview().len(), 53);
    }
}
