//! Removal of reasoning blocks (`<think>...</think>`) from assistant text.

use regex::Regex;
use std::sync::OnceLock;

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid reasoning pattern"))
}

/// Remove every complete reasoning block and trim the outer whitespace.
/// Inner whitespace left around a removed block is kept as-is.
pub fn strip_reasoning(raw: &str) -> String {
    block_pattern().replace_all(raw, "").trim().to_string()
}
