//! Keyword fallback used when no model answer is available.
//!
//! First match in store order wins: a note matches when any
//! whitespace-separated word of its key, lower-cased, occurs as a substring
//! of the lower-cased question.

use super::store::Notes;

pub const NOT_FOUND_MESSAGE: &str =
    "I didn't find an answer in your notes. I can save this as a new note if you like.";

/// The first note whose key matches `question`, if any.
pub fn find_match<'a>(question: &str, notes: &'a Notes) -> Option<(&'a str, &'a str)> {
    let q = question.to_lowercase();
    notes
        .iter()
        .find(|(key, _)| key.to_lowercase().split_whitespace().any(|w| q.contains(w)))
        .map(|(k, v)| (k.as_str(), v.as_str()))
}

pub fn resolve(question: &str, notes: &Notes) -> String {
    match find_match(question, notes) {
        Some((key, text)) => format!("Per note '{key}': {text}"),
        None => NOT_FOUND_MESSAGE.to_string(),
    }
}
