//! Markdown/LaTeX output cleanup.

use once_cell::sync::Lazy;
use regex::Regex;

static EXCESS_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Normalize block-math delimiters for markdown rendering.
///
/// Text is split on `$$`; content between delimiters is math and is kept
/// byte-for-byte (aligned/matrix environments must survive), only re-wrapped
/// so each `$$` sits on its own line. Runs of 3+ newlines collapse to 2.
pub fn format_latex_for_markdown(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let parts: Vec<&str> = text.split("$$").collect();
    let mut result = String::with_capacity(text.len() + 16);
    for (i, part) in parts.iter().enumerate() {
        if i % 2 == 0 {
            result.push_str(part);
        } else {
            result.push_str("\n$$\n");
            result.push_str(part.trim());
            result.push_str("\n$$\n");
        }
    }

    EXCESS_NEWLINES.replace_all(&result, "\n\n").trim().to_string()
}
