//! Prompt-based response framing.
//!
//! Interactive engines give no message framing: a response is over when the
//! engine prints its prompt again (`\n<context>> `). This module decides, from
//! the output accumulated since a command was written, whether the response
//! is complete and extracts its body.
//!
//! The framing is a heuristic over plain text. Output that happens to end
//! with something shaped like a prompt is taken as complete (false positive),
//! and a context name containing spaces or punctuation is never recognised
//! (false negative).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Trailing prompt: newline, one or more ASCII word characters, `"> "`, end of input.
static PROMPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n[A-Za-z0-9_]+> \z").expect("static regex is valid"));

/// A completed response from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Response text with the trailing prompt and the echoed command removed.
    pub body: String,
    /// The body mentions "error" (case-insensitive). Still a normal response.
    pub is_error: bool,
}

/// Result of inspecting the accumulated output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// No trailing prompt yet; keep reading.
    Incomplete,
    /// The engine is back at its prompt.
    Complete(CommandOutput),
}

impl Extraction {
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Inspect `buffer` (everything received since `command` was written).
///
/// Pure: safe to call after every chunk, and the same buffer always yields
/// the same result.
pub fn try_extract(buffer: &str, command: &str) -> Extraction {
    let Some(prompt) = PROMPT_RE.find(buffer) else {
        return Extraction::Incomplete;
    };

    let without_prompt = &buffer[..prompt.start()];
    let body = if command.is_empty() {
        without_prompt.trim().to_string()
    } else {
        without_prompt.replacen(command, "", 1).trim().to_string()
    };
    let is_error = is_error_text(&body);

    Extraction::Complete(CommandOutput { body, is_error })
}

/// The context name shown in a trailing prompt, if `buffer` ends with one.
pub fn prompt_context(buffer: &str) -> Option<&str> {
    let prompt = PROMPT_RE.find(buffer)?;
    Some(
        prompt
            .as_str()
            .trim_start_matches(['\r', '\n'])
            .trim_end_matches("> "),
    )
}

fn is_error_text(body: &str) -> bool {
    body.to_lowercase().contains("error")
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn complete(buffer: &str, command: &str) -> CommandOutput {
        match try_extract(buffer, command) {
            Extraction::Complete(out) => out,
            Extraction::Incomplete => panic!("expected complete response for {buffer:?}"),
        }
    }

    #[test]
    fn select_echo_and_prompt_are_stripped() {
        let buffer = "Query Results\n...\nmydb> SELECT * FROM t\nmydb> ";
        let out = complete(buffer, "SELECT * FROM t");
        assert_eq!(out.body, "Query Results\n...\nmydb>");
        assert!(!out.is_error);
    }

    #[test]
    fn incomplete_until_prompt_arrives() {
        let mut buffer = String::from("Query Results\n1, alice\n");
        assert_eq!(try_extract(&buffer, "SELECT * FROM t"), Extraction::Incomplete);
        buffer.push_str("mydb>");
        assert_eq!(try_extract(&buffer, "SELECT * FROM t"), Extraction::Incomplete);
        buffer.push(' ');
        assert!(try_extract(&buffer, "SELECT * FROM t").is_complete());
    }

    #[test]
    fn extraction_is_idempotent() {
        let buffer = "Record inserted successfully\ndbms> ";
        let first = try_extract(buffer, "INSERT INTO t VALUES (1)");
        let second = try_extract(buffer, "INSERT INTO t VALUES (1)");
        assert_eq!(first, second);
        assert!(first.is_complete());
    }

    #[test]
    fn error_heuristic_is_case_insensitive() {
        let out = complete("Error: No database selected\ndbms> ", "SELECT * FROM t");
        assert!(out.is_error);
        let out = complete("ERROR creating table\ndbms> ", "CREATE TABLE t");
        assert!(out.is_error);
        let out = complete("Table created: t\ndbms> ", "CREATE TABLE t");
        assert!(!out.is_error);
    }

    #[test]
    fn error_anywhere_in_body_flags_response() {
        let out = complete("row 1\nrow 2: terror\nrow 3\ndbms> ", "SELECT * FROM t");
        assert!(out.is_error);
    }

    #[test]
    fn crlf_prompt_is_recognised() {
        let out = complete("Using database: shop\r\nshop> ", "USE DATABASE shop");
        assert_eq!(out.body, "Using database: shop");
    }

    #[test]
    fn prompt_must_be_at_end_of_buffer() {
        assert!(!try_extract("a\ndbms> trailing", "x").is_complete());
        assert!(!try_extract("a\ndbms>  ", "x").is_complete());
    }

    #[test]
    fn prompt_requires_leading_newline() {
        // A bare prompt, e.g. the very first one on startup, does not frame anything.
        assert!(!try_extract("dbms> ", "").is_complete());
        assert!(try_extract("Simple DBMS v1.0\ndbms> ", "").is_complete());
    }

    #[test]
    fn command_is_removed_literally_and_once() {
        let out = complete("SELECT * FROM t\nSELECT * FROM t\ndbms> ", "SELECT * FROM t");
        assert_eq!(out.body, "SELECT * FROM t");
        // Regex metacharacters in the command have no special meaning.
        let out = complete("a.b\naxb\ndbms> ", "a.b");
        assert_eq!(out.body, "axb");
    }

    #[test]
    fn empty_command_keeps_body() {
        let out = complete("  Simple DBMS v1.0\nType 'HELP' for commands\ndbms> ", "");
        assert_eq!(out.body, "Simple DBMS v1.0\nType 'HELP' for commands");
    }

    #[test]
    fn multi_word_context_is_not_a_prompt() {
        assert!(!try_extract("ok\nmy db> ", "x").is_complete());
    }

    #[test]
    fn special_character_context_is_not_a_prompt() {
        assert!(!try_extract("ok\nmy-db> ", "x").is_complete());
        assert!(!try_extract("ok\ndb.v2> ", "x").is_complete());
        assert!(!try_extract("ok\nbäse> ", "x").is_complete());
    }

    #[test]
    fn prompt_like_value_is_a_false_positive() {
        // A result row ending in "\nname> " is indistinguishable from a prompt.
        let out = complete("1, alice\nbob> ", "SELECT * FROM t");
        assert_eq!(out.body, "1, alice");
    }

    #[test]
    fn prompt_context_reports_name() {
        assert_eq!(prompt_context("Using database: shop\nshop> "), Some("shop"));
        assert_eq!(prompt_context("x\r\ndbms> "), Some("dbms"));
        assert_eq!(prompt_context("no prompt"), None);
    }
}
