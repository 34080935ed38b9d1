//! Conversation title generation.
//!
//! One auxiliary low-temperature model call seeded with the thread's first
//! user message, followed by aggressive cleanup: local models like to wrap
//! the title in reasoning blocks, markup, or quotes. Failure falls back to a
//! truncation of the message itself, so this call can never break a caller.

use tracing::warn;

use crate::llm::{LLMProvider, LLMRequest, Message};

const CLOSE_MARKER: &str = "</think>";
const OPEN_MARKER_PREFIX: &str = "<think";

const MAX_TITLE_CHARS: usize = 80;
const SEED_CHARS: usize = 300;
const FALLBACK_WORDS: usize = 6;

pub async fn generate_title(provider: &dyn LLMProvider, model: &str, first_message: &str) -> String {
    let seed = truncate_chars(first_message, SEED_CHARS);
    let request = LLMRequest {
        messages: vec![
            Message::system(
                "You are a title generator. Reply with ONLY the title text, maximum 6 words. \
                 No quotes, no explanation, no tags, no punctuation at the end.",
            ),
            Message::user(format!(
                "Generate a short title for this message. The title MUST be in the SAME \
                 language as the message.\n\nMessage: {seed}"
            )),
        ],
        model: model.to_owned(),
        temperature: Some(0.1),
        ..Default::default()
    };

    let cleaned = match provider.generate(request).await {
        Ok(response) => clean_title(&response.content.unwrap_or_default()),
        Err(err) => {
            warn!(
                target = "turngate::title",
                error = %err,
                "title generation failed, falling back to message prefix"
            );
            String::new()
        }
    };

    if cleaned.is_empty() {
        fallback_title(first_message)
    } else {
        cleaned
    }
}

fn clean_title(raw: &str) -> String {
    // Everything through the last closing marker is reasoning; without a
    // close, everything from an unterminated opening marker on is.
    let text = if let Some(close) = raw.rfind(CLOSE_MARKER) {
        &raw[close + CLOSE_MARKER.len()..]
    } else if let Some(open) = raw.find(OPEN_MARKER_PREFIX) {
        &raw[..open]
    } else {
        raw
    };

    let text = strip_markup_tags(text);
    let text = text.trim().trim_matches(['"', '\'']).trim();

    for line in text.lines() {
        let line = line.trim();
        if !line.is_empty() {
            return truncate_chars(line, MAX_TITLE_CHARS).to_owned();
        }
    }
    String::new()
}

/// Remove residual `<…>` tag spans; an unclosed `<` is kept as-is.
fn strip_markup_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn fallback_title(message: &str) -> String {
    let mut title = message
        .split_whitespace()
        .take(FALLBACK_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    if title.chars().count() > 60 {
        if let Some((byte_idx, _)) = title.char_indices().nth(57) {
            title.truncate(byte_idx);
        }
        title.push_str("...");
    }
    title
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
