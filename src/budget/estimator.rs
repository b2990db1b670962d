//! Character-based token estimation.
//!
//! Estimates divide character counts by the model's average
//! characters-per-token, then adjust upward for punctuation, newline and
//! whitespace density: code and symbol-heavy text tokenizes worse than
//! prose. Estimates are intentionally slightly conservative.

use crate::budget::types::{Message, ModelProfile};

/// Structural overhead charged per message (role framing, separators).
pub const TOKENS_PER_MESSAGE_OVERHEAD: u64 = 4;
/// Structural overhead charged once per request.
pub const TOKENS_PER_REQUEST_OVERHEAD: u64 = 3;

/// Weight of punctuation density in the adjustment factor.
const PUNCTUATION_WEIGHT: f64 = 0.3;
/// Weight of newline density in the adjustment factor.
const NEWLINE_WEIGHT: f64 = 0.5;
/// Space density below which text counts as "dense" (code, URLs).
const SPARSE_SPACE_DENSITY: f64 = 0.1;
const DENSE_TEXT_PENALTY: f64 = 0.1;

/// Estimate tokens for a single text against a model profile.
pub fn estimate_tokens(text: &str, profile: &ModelProfile) -> u64 {
    if text.is_empty() {
        return 0;
    }

    let chars = text.chars().count();
    let mut punctuation = 0usize;
    let mut newlines = 0usize;
    let mut spaces = 0usize;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
        } else if c == ' ' {
            spaces += 1;
        } else if c.is_ascii_punctuation() {
            punctuation += 1;
        }
    }

    let chars_f = chars as f64;
    let mut adjustment = 1.0
        + (punctuation as f64 / chars_f) * PUNCTUATION_WEIGHT
        + (newlines as f64 / chars_f) * NEWLINE_WEIGHT;
    if (spaces as f64 / chars_f) < SPARSE_SPACE_DENSITY {
        adjustment += DENSE_TEXT_PENALTY;
    }

    let base = chars_f / profile.chars_per_token.max(0.1);
    (base * adjustment).ceil() as u64
}

/// Estimate tokens for a whole request: per-message estimates plus small
/// per-message and per-request overhead constants.
pub fn estimate_request_tokens(
    messages: &[Message],
    system_prompt: &str,
    profile: &ModelProfile,
) -> u64 {
    let message_tokens: u64 = messages
        .iter()
        .map(|message| estimate_tokens(&message.content, profile) + TOKENS_PER_MESSAGE_OVERHEAD)
        .sum();
    let system_tokens = if system_prompt.is_empty() {
        0
    } else {
        estimate_tokens(system_prompt, profile) + TOKENS_PER_MESSAGE_OVERHEAD
    };
    message_tokens + system_tokens + TOKENS_PER_REQUEST_OVERHEAD
}
