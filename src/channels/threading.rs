//! RFC 5322 threading headers for replies.

/// Header lines may not exceed this many characters.
const MAX_REFERENCES_LEN: usize = 998;

/// `In-Reply-To` and `References` values for a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadingHeaders {
    pub in_reply_to: String,
    pub references: String,
}

/// Strip surrounding whitespace and angle brackets from a message id.
pub fn bare_id(id: &str) -> &str {
    id.trim().trim_start_matches('<').trim_end_matches('>')
}

/// Build reply headers from the original message id and its `References`.
///
/// Returns `None` when the original has no message id. When the combined
/// list is too long the oldest references are dropped; the original id is
/// always kept.
pub fn build_threading_headers(message_id: &str, prior_references: &[String]) -> Option<ThreadingHeaders> {
    let id = bare_id(message_id);
    if id.is_empty() {
        return None;
    }

    let mut refs: Vec<&str> = prior_references
        .iter()
        .map(|r| bare_id(r))
        .filter(|r| !r.is_empty() && *r != id)
        .collect();
    refs.push(id);

    let mut kept: Vec<&str> = Vec::new();
    let mut len = 0;
    for r in refs.iter().rev() {
        // "<id>" plus a separating space
        let added = r.len() + 2 + usize::from(!kept.is_empty());
        if len + added > MAX_REFERENCES_LEN {
            tracing::debug!(dropped = refs.len() - kept.len(), "Trimmed References header");
            break;
        }
        len += added;
        kept.push(r);
    }
    kept.reverse();

    Some(ThreadingHeaders {
        in_reply_to: format!("<{id}>"),
        references: kept
            .iter()
            .map(|r| format!("<{r}>"))
            .collect::<Vec<_>>()
            .join(" "),
    })
}

/// Prefix a subject with `Re:` unless it already has one.
pub fn reply_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        subject.to_string()
    } else if subject.is_empty() {
        "Re: (no subject)".to_string()
    } else {
        format!("Re: {subject}")
    }
}
