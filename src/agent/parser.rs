//! Turns one raw model completion into an `Intent`.
//!
//! The model is asked to answer with exactly one tagged root element:
//!
//! ```text
//! <reply><body>…</body></reply>
//! <no_response/>
//! <research><sub_agent name="leave_policy"><query>…</query></sub_agent></research>
//! <feedback_note rank="mcpl">…</feedback_note>
//! <rank>sgt</rank>
//! ```
//!
//! Decoding is two-pass. The strict pass requires the whole (trimmed)
//! completion to be one well-formed element. When that fails the lenient
//! pass scans for each known root tag, in priority order, and decodes the
//! outermost open/close pair it finds while ignoring surrounding prose.
//! Neither pass ever invents a default intent: if nothing decodes, the
//! caller gets a `ParseError` to feed back to the model.

use regex::Regex;

use crate::agent::intent::{Intent, MAX_RESEARCH_QUERIES, ResearchRequest};
use crate::error::ParseError;

/// Root tags in resolution priority: terminal intents first.
const ROOT_PRIORITY: &[&str] = &["reply", "no_response", "research", "feedback_note", "rank"];

/// Decodes model completions into intents.
pub struct ResponseParser {
    name_attr: Regex,
    rank_attr: Regex,
    query: Regex,
    body: Regex,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            name_attr: Regex::new(r#"(?s)<sub_agent\s+name\s*=\s*["']([^"']*)["']"#)
                .expect("valid sub_agent regex"),
            rank_attr: Regex::new(r#"^<feedback_note\s+rank\s*=\s*["']([^"']*)["']"#)
                .expect("valid rank regex"),
            query: Regex::new(r"(?s)<query>(.*?)</query>").expect("valid query regex"),
            body: Regex::new(r"(?s)<body>(.*)</body>").expect("valid body regex"),
        }
    }

    /// Decode one completion.
    pub fn parse(&self, raw: &str) -> Result<Intent, ParseError> {
        let strict_error = match parse_document(raw) {
            Ok(root) => match decode_element(&root) {
                Ok(intent) => return Ok(intent),
                Err(e) => e,
            },
            Err(e) => e,
        };

        tracing::debug!(error = %strict_error, "Strict parse failed, trying lenient scan");

        match self.parse_lenient(raw) {
            Some(Ok(intent)) => Ok(intent),
            Some(Err(e)) => Err(ParseError::new(e)),
            None => Err(ParseError::new(format!(
                "{strict_error}; expected exactly one of <reply>, <no_response/>, <research>, \
                 <feedback_note> or <rank>"
            ))),
        }
    }

    /// Scan for known roots in priority order.
    ///
    /// Returns `None` when no known root tag appears at all, otherwise the
    /// first root that decodes, or the first root's decode error.
    fn parse_lenient(&self, raw: &str) -> Option<Result<Intent, String>> {
        let mut first_error = None;

        for tag in ROOT_PRIORITY {
            let Some(fragment) = find_outermost(raw, tag) else {
                continue;
            };

            // The fragment may itself be well-formed even if the surrounding text wasn't.
            let decoded = match parse_document(fragment.whole) {
                Ok(root) => decode_element(&root),
                Err(_) => self.decode_fragment(tag, &fragment),
            };

            match decoded {
                Ok(intent) => return Some(Ok(intent)),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map(Err)
    }

    /// Textual decode of a fragment that is not well-formed on its own.
    fn decode_fragment(&self, tag: &str, fragment: &Fragment<'_>) -> Result<Intent, String> {
        match tag {
            "no_response" => Ok(Intent::NoResponse),
            "reply" => {
                let body = self
                    .body
                    .captures(fragment.inner)
                    .and_then(|c| c.get(1))
                    .map_or(fragment.inner, |m| m.as_str());
                reply_from(decode_entities_lossy(body.trim()))
            }
            "research" => {
                let name = self
                    .name_attr
                    .captures(fragment.inner)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default();
                let queries = self
                    .query
                    .captures_iter(fragment.inner)
                    .filter_map(|c| c.get(1))
                    .map(|m| decode_entities_lossy(m.as_str().trim()))
                    .collect();
                research_from(name, queries)
            }
            "feedback_note" => {
                let rank = self
                    .rank_attr
                    .captures(fragment.open)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
                feedback_note_from(rank, decode_entities_lossy(fragment.inner.trim()))
            }
            "rank" => rank_from(decode_entities_lossy(fragment.inner.trim())),
            other => Err(format!("unknown root tag <{other}>")),
        }
    }
}

// ── Intent construction ─────────────────────────────────────────────

fn reply_from(body: String) -> Result<Intent, String> {
    if body.trim().is_empty() {
        return Err("<reply> has an empty body".to_string());
    }
    Ok(Intent::Reply {
        body: body.trim().to_string(),
    })
}

fn research_from(sub_agent: String, queries: Vec<String>) -> Result<Intent, String> {
    if sub_agent.is_empty() {
        return Err("<research> is missing <sub_agent name=\"...\">".to_string());
    }
    let mut queries: Vec<String> = queries.into_iter().filter(|q| !q.is_empty()).collect();
    if queries.is_empty() {
        return Err(format!(
            "<research> for sub-agent '{sub_agent}' contains no <query> elements"
        ));
    }
    if queries.len() > MAX_RESEARCH_QUERIES {
        tracing::warn!(
            sub_agent = %sub_agent,
            requested = queries.len(),
            max = MAX_RESEARCH_QUERIES,
            "Truncating research queries"
        );
        queries.truncate(MAX_RESEARCH_QUERIES);
    }
    Ok(Intent::Research(ResearchRequest { sub_agent, queries }))
}

fn rank_from(rank: String) -> Result<Intent, String> {
    let rank = rank.trim().to_lowercase();
    if rank.is_empty() {
        return Err("<rank> is empty".to_string());
    }
    Ok(Intent::RankRequest { rank })
}

fn feedback_note_from(rank: Option<String>, context: String) -> Result<Intent, String> {
    if context.trim().is_empty() {
        return Err("<feedback_note> has no content describing the note to write".to_string());
    }
    let rank = rank
        .map(|r| r.trim().to_lowercase())
        .filter(|r| !r.is_empty());
    Ok(Intent::FeedbackNote {
        rank,
        context: context.trim().to_string(),
    })
}

fn decode_element(root: &Element) -> Result<Intent, String> {
    match root.name.as_str() {
        "no_response" => Ok(Intent::NoResponse),
        "reply" => {
            let body = root
                .child("body")
                .map_or_else(|| root.text(), Element::text);
            reply_from(body)
        }
        "research" => {
            let sub_agent = root
                .child("sub_agent")
                .ok_or_else(|| "<research> is missing <sub_agent name=\"...\">".to_string())?;
            let name = sub_agent.attr("name").unwrap_or_default().trim().to_string();
            let queries = sub_agent
                .children_named("query")
                .map(|q| q.text().trim().to_string())
                .collect();
            research_from(name, queries)
        }
        "feedback_note" => feedback_note_from(root.attr("rank").map(str::to_string), root.text()),
        "rank" => rank_from(root.text()),
        other => Err(format!("unknown root tag <{other}>")),
    }
}

// ── Lenient scanning ────────────────────────────────────────────────

/// One root tag located inside free text.
struct Fragment<'a> {
    /// From `<tag` to the matching close (inclusive).
    whole: &'a str,
    /// The opening tag itself, `<tag ...>`.
    open: &'a str,
    /// Payload between the opening and closing tag.
    inner: &'a str,
}

/// Find the first `<tag ...>` and the last `</tag>` after it.
fn find_outermost<'a>(raw: &'a str, tag: &str) -> Option<Fragment<'a>> {
    let open_prefix = format!("<{tag}");
    let close = format!("</{tag}>");

    let mut search_from = 0;
    let start = loop {
        let idx = search_from + raw[search_from..].find(&open_prefix)?;
        let after = &raw[idx + open_prefix.len()..];
        // `<rank` must not match `<ranking>`.
        match after.chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => break idx,
            _ => search_from = idx + open_prefix.len(),
        }
    };

    let open_end = start + raw[start..].find('>')?;
    let open = &raw[start..=open_end];

    if open.ends_with("/>") {
        return Some(Fragment {
            whole: open,
            open,
            inner: "",
        });
    }

    let Some(close_start) = raw.rfind(&close).filter(|&c| c > open_end) else {
        // A bare `<no_response>` carries no payload; treat it as complete.
        return (tag == "no_response").then_some(Fragment {
            whole: open,
            open,
            inner: "",
        });
    };
    Some(Fragment {
        whole: &raw[start..close_start + close.len()],
        open,
        inner: &raw[open_end + 1..close_start],
    })
}

// ── Strict element tree ─────────────────────────────────────────────

#[derive(Debug)]
enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child<'a>(&'a self, name: &'a str) -> Option<&'a Element> {
        self.children_named(name).next()
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter_map(move |n| match n {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    /// All descendant text, concatenated.
    fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out.trim().to_string()
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }
}

/// Parse `raw` as exactly one well-formed element.
fn parse_document(raw: &str) -> Result<Element, String> {
    let mut reader = Reader {
        src: raw.trim(),
        pos: 0,
        depth: 0,
    };

    if reader.src.is_empty() {
        return Err("response is empty".to_string());
    }
    if reader.rest().starts_with("<?xml") {
        reader.skip_past("?>")?;
        reader.skip_whitespace();
    }
    if !reader.rest().starts_with('<') {
        return Err("text found before the root element".to_string());
    }

    let root = reader.element()?;
    reader.skip_whitespace();
    if !reader.rest().is_empty() {
        return Err(format!(
            "unexpected content after </{}> (only one root element is allowed)",
            root.name
        ));
    }
    Ok(root)
}

/// Deepest element nesting the strict reader accepts.
const MAX_NESTING: usize = 64;

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn skip_past(&mut self, marker: &str) -> Result<(), String> {
        match self.rest().find(marker) {
            Some(i) => {
                self.pos += i + marker.len();
                Ok(())
            }
            None => Err(format!("unterminated construct, expected '{marker}'")),
        }
    }

    fn name(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')))
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn element(&mut self) -> Result<Element, String> {
        if self.depth >= MAX_NESTING {
            return Err("element nesting too deep".to_string());
        }
        self.depth += 1;
        let element = self.element_body();
        self.depth -= 1;
        element
    }

    fn element_body(&mut self) -> Result<Element, String> {
        // Caller guarantees we are at '<'.
        self.pos += 1;
        let name = self.name();
        if name.is_empty() {
            return Err("unescaped '<' in text".to_string());
        }
        let mut element = Element {
            name: name.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
        };

        // Attributes
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok(element);
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break;
            }
            let key = self.name();
            if key.is_empty() {
                return Err(format!("malformed attribute in <{}>", element.name));
            }
            self.skip_whitespace();
            if !self.rest().starts_with('=') {
                return Err(format!("attribute '{key}' in <{}> has no value", element.name));
            }
            self.pos += 1;
            self.skip_whitespace();
            let quote = match self.rest().chars().next() {
                Some(q @ ('"' | '\'')) => q,
                _ => return Err(format!("attribute '{key}' in <{}> is not quoted", element.name)),
            };
            self.pos += 1;
            let end = self
                .rest()
                .find(quote)
                .ok_or_else(|| format!("unterminated attribute '{key}' in <{}>", element.name))?;
            let value = decode_entities(&self.rest()[..end])?;
            self.pos += end + 1;
            element.attrs.push((key.to_string(), value));
        }

        // Content
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Err(format!("<{}> is never closed", element.name));
            }
            if rest.starts_with("</") {
                self.pos += 2;
                let close = self.name();
                self.skip_whitespace();
                if !self.rest().starts_with('>') {
                    return Err(format!("malformed closing tag </{close}"));
                }
                self.pos += 1;
                if close != element.name {
                    return Err(format!(
                        "mismatched closing tag: <{}> closed by </{close}>",
                        element.name
                    ));
                }
                return Ok(element);
            }
            if rest.starts_with("<!--") {
                self.skip_past("-->")?;
                continue;
            }
            if let Some(cdata) = rest.strip_prefix("<![CDATA[") {
                let end = cdata
                    .find("]]>")
                    .ok_or_else(|| "unterminated CDATA section".to_string())?;
                element.children.push(Node::Text(cdata[..end].to_string()));
                self.pos += "<![CDATA[".len() + end + 3;
                continue;
            }
            if rest.starts_with('<') {
                let child = self.element()?;
                element.children.push(Node::Element(child));
                continue;
            }
            let end = rest.find('<').unwrap_or(rest.len());
            element.children.push(Node::Text(decode_entities(&rest[..end])?));
            self.pos += end;
        }
    }
}

// ── Entities ────────────────────────────────────────────────────────

fn entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

/// Decode entities, rejecting bare `&`.
fn decode_entities(text: &str) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|&semi| semi <= 8)
            .and_then(|semi| entity(&after[..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => return Err("unescaped '&' in text".to_string()),
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Decode entities, keeping anything unrecognised verbatim.
fn decode_entities_lossy(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|&semi| semi <= 8)
            .and_then(|semi| entity(&after[..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Intent, ParseError> {
        ResponseParser::new().parse(raw)
    }

    // ── Strict pass ─────────────────────────────────────────────────

    #[test]
    fn strict_reply_with_body() {
        let intent = parse("<reply>\n  <body>\n  Your leave is approved.\n  </body>\n</reply>").unwrap();
        assert_eq!(
            intent,
            Intent::Reply {
                body: "Your leave is approved.".into()
            }
        );
    }

    #[test]
    fn strict_reply_without_body_uses_text() {
        let intent = parse("<reply>Leave approved</reply>").unwrap();
        assert_eq!(
            intent,
            Intent::Reply {
                body: "Leave approved".into()
            }
        );
    }

    #[test]
    fn strict_no_response_forms() {
        assert_eq!(parse("<no_response/>").unwrap(), Intent::NoResponse);
        assert_eq!(parse("<no_response />").unwrap(), Intent::NoResponse);
        assert_eq!(parse("<no_response></no_response>").unwrap(), Intent::NoResponse);
    }

    #[test]
    fn strict_research_request() {
        let raw = r#"<research>
            <sub_agent name="leave_policy">
                <query>How many days of annual leave?</query>
                <query>Can leave be carried over?</query>
            </sub_agent>
        </research>"#;
        match parse(raw).unwrap() {
            Intent::Research(req) => {
                assert_eq!(req.sub_agent, "leave_policy");
                assert_eq!(
                    req.queries,
                    vec![
                        "How many days of annual leave?".to_string(),
                        "Can leave be carried over?".to_string()
                    ]
                );
            }
            other => panic!("Expected Research, got {:?}", other),
        }
    }

    #[test]
    fn research_with_single_quoted_name() {
        let raw = "<research><sub_agent name='doad_policy'><query>q1</query></sub_agent></research>";
        assert!(matches!(parse(raw).unwrap(), Intent::Research(r) if r.sub_agent == "doad_policy"));
    }

    #[test]
    fn research_queries_are_capped() {
        let queries: String = (1..=7).map(|i| format!("<query>q{i}</query>")).collect();
        let raw = format!("<research><sub_agent name=\"a\">{queries}</sub_agent></research>");
        match parse(&raw).unwrap() {
            Intent::Research(req) => {
                assert_eq!(req.queries.len(), MAX_RESEARCH_QUERIES);
                assert_eq!(req.queries[0], "q1");
                assert_eq!(req.queries[4], "q5");
            }
            other => panic!("Expected Research, got {:?}", other),
        }
    }

    #[test]
    fn research_without_queries_is_error() {
        let err = parse("<research><sub_agent name=\"a\"></sub_agent></research>").unwrap_err();
        assert!(err.description.contains("no <query>"));
    }

    #[test]
    fn research_without_sub_agent_is_error() {
        let err = parse("<research><query>q</query></research>").unwrap_err();
        assert!(err.description.contains("sub_agent"));
    }

    #[test]
    fn rank_is_lowercased() {
        assert_eq!(
            parse("<rank> MCpl </rank>").unwrap(),
            Intent::RankRequest {
                rank: "mcpl".into()
            }
        );
    }

    #[test]
    fn feedback_note_with_rank_attribute() {
        let raw = "<feedback_note rank='MCPL'>MCpl Smith organized a successful event</feedback_note>";
        assert_eq!(
            parse(raw).unwrap(),
            Intent::FeedbackNote {
                rank: Some("mcpl".into()),
                context: "MCpl Smith organized a successful event".into()
            }
        );
    }

    #[test]
    fn feedback_note_without_rank() {
        let raw = "<feedback_note>Pte Jones helped with the move</feedback_note>";
        assert!(matches!(
            parse(raw).unwrap(),
            Intent::FeedbackNote { rank: None, .. }
        ));
    }

    #[test]
    fn empty_feedback_note_is_error() {
        assert!(parse("<feedback_note></feedback_note>").is_err());
    }

    #[test]
    fn entities_are_decoded() {
        let intent = parse("<reply><body>Q&amp;A: 3 &lt; 5</body></reply>").unwrap();
        assert_eq!(
            intent,
            Intent::Reply {
                body: "Q&A: 3 < 5".into()
            }
        );
    }

    #[test]
    fn cdata_is_kept_verbatim() {
        let intent = parse("<reply><body><![CDATA[a < b & c]]></body></reply>").unwrap();
        assert_eq!(
            intent,
            Intent::Reply {
                body: "a < b & c".into()
            }
        );
    }

    // ── Lenient pass ────────────────────────────────────────────────

    #[test]
    fn lenient_ignores_surrounding_prose() {
        let raw = "Sure! Here is my answer:\n<reply><body>Approved.</body></reply>\nLet me know.";
        assert_eq!(
            parse(raw).unwrap(),
            Intent::Reply {
                body: "Approved.".into()
            }
        );
    }

    #[test]
    fn lenient_handles_markdown_fence() {
        let raw = "```xml\n<no_response/>\n```";
        assert_eq!(parse(raw).unwrap(), Intent::NoResponse);
    }

    #[test]
    fn lenient_handles_unescaped_ampersand() {
        let raw = "<reply><body>Pay & allowances are covered in chapter 4.</body></reply>";
        assert_eq!(
            parse(raw).unwrap(),
            Intent::Reply {
                body: "Pay & allowances are covered in chapter 4.".into()
            }
        );
    }

    #[test]
    fn lenient_research_with_unescaped_text() {
        let raw = "Let me check.\n<research><sub_agent name=\"leave_policy\"><query>Leave < 5 days & travel?</query></sub_agent></research>";
        match parse(raw).unwrap() {
            Intent::Research(req) => {
                assert_eq!(req.sub_agent, "leave_policy");
                assert_eq!(req.queries, vec!["Leave < 5 days & travel?".to_string()]);
            }
            other => panic!("Expected Research, got {:?}", other),
        }
    }

    #[test]
    fn lenient_uses_outermost_pair() {
        let raw = "<reply><body>Use <reply> tags like </reply> this</body></reply> trailing";
        match parse(raw).unwrap() {
            Intent::Reply { body } => assert!(body.ends_with("this")),
            other => panic!("Expected Reply, got {:?}", other),
        }
    }

    #[test]
    fn multiple_roots_prefer_terminal_intent() {
        let raw = "<research><sub_agent name=\"a\"><query>q</query></sub_agent></research>\n<reply><body>done</body></reply>";
        assert_eq!(
            parse(raw).unwrap(),
            Intent::Reply {
                body: "done".into()
            }
        );
    }

    #[test]
    fn lenient_accepts_unclosed_no_response() {
        let raw = "Automated notice, no reply needed.\n<no_response>";
        assert_eq!(parse(raw).unwrap(), Intent::NoResponse);
    }

    #[test]
    fn unclosed_reply_is_still_error() {
        assert!(parse("Here you go:\n<reply><body>Approved.").is_err());
    }

    #[test]
    fn deep_nesting_is_error_not_overflow() {
        let raw = format!("<reply>{}", "<a>".repeat(5000));
        let err = parse(&raw).unwrap_err();
        assert!(!err.description.is_empty());
    }

    #[test]
    fn deep_nesting_within_reply_is_recovered_leniently() {
        let raw = format!(
            "<reply><body>x{}{}</body></reply>",
            "<a>".repeat(MAX_NESTING + 10),
            "</a>".repeat(MAX_NESTING + 10)
        );
        match parse(&raw).unwrap() {
            Intent::Reply { body } => assert!(body.starts_with('x')),
            other => panic!("Expected Reply, got {:?}", other),
        }
    }

    #[test]
    fn nesting_limit_reported_by_strict_reader() {
        let raw = format!("{}{}", "<a>".repeat(MAX_NESTING + 1), "</a>".repeat(MAX_NESTING + 1));
        assert_eq!(parse_document(&raw).unwrap_err(), "element nesting too deep");
    }

    #[test]
    fn no_response_outranks_rank() {
        let raw = "<rank>sgt</rank><no_response/>";
        assert_eq!(parse(raw).unwrap(), Intent::NoResponse);
    }

    #[test]
    fn falls_through_to_next_root_when_first_is_invalid() {
        let raw = "<reply></reply> <rank>wo</rank>";
        assert_eq!(
            parse(raw).unwrap(),
            Intent::RankRequest { rank: "wo".into() }
        );
    }

    #[test]
    fn rank_prefix_does_not_match_longer_tags() {
        assert!(parse("<ranking>sgt</ranking>").is_err());
    }

    #[test]
    fn feedback_note_rank_attr_recovered_leniently() {
        let raw = "Note: <feedback_note rank=\"sgt\">Sgt Lee ran the range & safety brief</feedback_note>";
        assert_eq!(
            parse(raw).unwrap(),
            Intent::FeedbackNote {
                rank: Some("sgt".into()),
                context: "Sgt Lee ran the range & safety brief".into()
            }
        );
    }

    // ── Failures ────────────────────────────────────────────────────

    #[test]
    fn plain_prose_is_error() {
        let err = parse("I think you should take leave.").unwrap_err();
        assert!(err.description.contains("expected exactly one of"));
    }

    #[test]
    fn empty_response_is_error() {
        assert!(parse("   ").is_err());
    }

    #[test]
    fn unknown_root_is_error() {
        assert!(parse("<answer>yes</answer>").is_err());
    }

    #[test]
    fn empty_reply_is_error() {
        let err = parse("<reply><body>   </body></reply>").unwrap_err();
        assert!(err.description.contains("empty body"));
    }

    #[test]
    fn unclosed_reply_is_error() {
        assert!(parse("<reply><body>never closed").is_err());
    }

    // ── Helpers ─────────────────────────────────────────────────────

    #[test]
    fn decode_entities_rejects_bare_ampersand() {
        assert!(decode_entities("a & b").is_err());
        assert_eq!(decode_entities("a &amp; b &#65;").unwrap(), "a & b A");
    }

    #[test]
    fn lossy_decode_keeps_unknown() {
        assert_eq!(decode_entities_lossy("a & b &lt; &bogus;"), "a & b < &bogus;");
    }
}
