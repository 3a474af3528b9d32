//! Turning a free-text human reply into a `(token, command)` pair.

use crate::session::is_lookup_token;

/// A reply that names a relay token and carries a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub token: String,
    pub command: String,
}

/// Parse a reply in any of the accepted shapes:
///
/// ```text
/// #ABCD1234 npm test
/// ABCD1234: npm test
/// ABCD1234 npm test
/// /cmd ABCD1234 npm test
/// ```
///
/// The token is uppercased. Returns `None` when no token-shaped word leads
/// the reply or when nothing is left to run.
pub fn parse_reply(text: &str) -> Option<ParsedReply> {
    let mut rest = text.trim();
    if let Some(after) = rest.strip_prefix("/cmd") {
        if after.starts_with(char::is_whitespace) {
            rest = after.trim_start();
        }
    }
    let rest = rest.strip_prefix('#').unwrap_or(rest);

    let split = rest
        .find(|c: char| c.is_whitespace() || c == ':')
        .unwrap_or(rest.len());
    let (head, tail) = rest.split_at(split);
    let token = head.to_ascii_uppercase();
    if !is_lookup_token(&token) {
        return None;
    }

    let command = tail.strip_prefix(':').unwrap_or(tail).trim();
    if command.is_empty() {
        return None;
    }

    Some(ParsedReply {
        token,
        command: command.to_string(),
    })
}
