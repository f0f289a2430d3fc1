//! Leading `@name` addressing.
//!
//! Only one mention is recognised: an `@` at the very start of the (trimmed)
//! text, the name, and then at least one whitespace character. `@Bob` with no
//! trailing whitespace, or a mention anywhere else in the text, is plain text.
//! The same rule applies to human input and to agent output.
//!
//! ```
//! use groupllm::mention::parse;
//!
//! let parsed = parse("@Bob hello", &["Bob", "Ann"]);
//! assert_eq!(parsed.content, "hello");
//! assert_eq!(parsed.target.as_deref(), Some("Bob"));
//!
//! let parsed = parse("@Unknown hi", &["Bob"]);
//! assert_eq!(parsed.content, "@Unknown hi");
//! assert!(parsed.target.is_none());
//! ```

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LEADING_MENTION: Regex =
        Regex::new(r"^@(\S+)\s").expect("leading mention pattern is valid");
}

/// Result of [`parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMention {
    /// Text with the mention token removed and surrounding whitespace trimmed.
    pub content: String,
    /// Addressed agent, present only when the name is in the active set.
    pub target: Option<String>,
}

/// Split a leading mention of an active agent off `raw`.
///
/// When the token names nobody in `active_agent_names`, the whole trimmed
/// text is returned untouched and no target is set.
pub fn parse<S: AsRef<str>>(raw: &str, active_agent_names: &[S]) -> ParsedMention {
    let trimmed = raw.trim();

    if let Some(caps) = LEADING_MENTION.captures(trimmed) {
        let name = &caps[1];
        if active_agent_names.iter().any(|n| n.as_ref() == name) {
            let rest = &trimmed[caps[0].len()..];
            return ParsedMention {
                content: rest.trim().to_string(),
                target: Some(name.to_string()),
            };
        }
    }

    ParsedMention {
        content: trimmed.to_string(),
        target: None,
    }
}
