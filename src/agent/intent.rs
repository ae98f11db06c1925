//! The decoded meaning of one model response.

/// Maximum queries a single research request may carry.
pub const MAX_RESEARCH_QUERIES: usize = 5;

/// A delegation to a named sub-agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchRequest {
    pub sub_agent: String,
    /// 1..=`MAX_RESEARCH_QUERIES` queries, answered in order.
    pub queries: Vec<String>,
}

/// What the model asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Stay silent: no reply is sent.
    NoResponse,
    /// Final answer to send back.
    Reply { body: String },
    /// Ask a sub-agent one or more questions before continuing.
    Research(ResearchRequest),
    /// Choose the rank whose reference material drives note generation.
    RankRequest { rank: String },
    /// Generate a feedback note, optionally for a known rank.
    FeedbackNote { rank: Option<String>, context: String },
}

impl Intent {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Intent::NoResponse => "no_response",
            Intent::Reply { .. } => "reply",
            Intent::Research(_) => "research",
            Intent::RankRequest { .. } => "rank",
            Intent::FeedbackNote { .. } => "feedback_note",
        }
    }

    /// Reply and NoResponse end the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Intent::NoResponse | Intent::Reply { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_intents() {
        assert!(Intent::NoResponse.is_terminal());
        assert!(Intent::Reply { body: "x".into() }.is_terminal());
        assert!(!Intent::RankRequest { rank: "cpl".into() }.is_terminal());
        assert!(
            !Intent::Research(ResearchRequest {
                sub_agent: "leave_policy".into(),
                queries: vec!["q".into()],
            })
            .is_terminal()
        );
    }

    #[test]
    fn labels_match_wire_tags() {
        assert_eq!(Intent::NoResponse.label(), "no_response");
        assert_eq!(
            Intent::FeedbackNote {
                rank: None,
                context: String::new()
            }
            .label(),
            "feedback_note"
        );
    }
}
