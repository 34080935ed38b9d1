//! Turn classification.
//!
//! A pure keyword scan over the lowercased message text. Keyword sets cover
//! English and Brazilian Portuguese; summary detection outranks instruction
//! detection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Simple,
    SummaryRequest,
    SystemInstruction,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Simple => "simple",
            MessageKind::SummaryRequest => "summary_request",
            MessageKind::SystemInstruction => "system_instruction",
        }
    }
}

const SUMMARY_KEYWORDS: &[&str] = &["resumo", "resume", "summarize", "summary", "tldr", "tl;dr"];

const INSTRUCTION_KEYWORDS: &[&str] = &[
    "responda sempre",
    "always respond",
    "from now on",
    "a partir de agora",
    "ignore",
    "act as",
    "aja como",
    "you are",
    "voce e",
];

pub fn classify_message(text: &str) -> MessageKind {
    let lowered = text.to_lowercase();

    if SUMMARY_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        MessageKind::SummaryRequest
    } else if INSTRUCTION_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        MessageKind::SystemInstruction
    } else {
        MessageKind::Simple
    }
}
