//! Deterministic mapping of a portfolio manager decision to BUY/SELL/HOLD.
//!
//! An anchor is a line that opens with a verdict label such as
//! `Final Recommendation`, ignoring leading whitespace and markdown markers,
//! with a separator or the end of the line right after the label. A label
//! mentioned mid-sentence is prose, not an anchor. The last anchor wins. Its verdict is whatever follows the label on that
//! line, or the next non-empty line when nothing does. A verdict naming
//! exactly one distinct keyword yields that signal; anything else is HOLD.

use agora_models::Signal;
use serde::Serialize;

const ANCHOR_LABELS: [&str; 4] = [
    "final recommendation",
    "final decision",
    "final verdict",
    "final transaction proposal",
];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// One unambiguous keyword on the anchor.
    Anchored,
    /// No anchor line in the text. Fell back to HOLD.
    NoAnchor,
    /// Anchor present with zero or several distinct keywords. Fell back to HOLD.
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub signal: Signal,
    pub status: ExtractionStatus,
    /// The anchored verdict text, if an anchor was found.
    pub verdict: Option<String>,
}

impl Extraction {
    pub fn is_fallback(&self) -> bool {
        self.status != ExtractionStatus::Anchored
    }
}

pub fn extract(decision_text: &str) -> Signal {
    extract_detailed(decision_text).signal
}

pub fn extract_detailed(decision_text: &str) -> Extraction {
    let Some(verdict) = verdict_line(decision_text) else {
        return Extraction {
            signal: Signal::Hold,
            status: ExtractionStatus::NoAnchor,
            verdict: None,
        };
    };

    let mut found: Vec<Signal> = Vec::new();
    for word in verdict.split(|c: char| !c.is_ascii_alphanumeric()) {
        if let Some(signal) = Signal::from_keyword(word) {
            if !found.contains(&signal) {
                found.push(signal);
            }
        }
    }

    match found.as_slice() {
        [signal] => Extraction {
            signal: *signal,
            status: ExtractionStatus::Anchored,
            verdict: Some(verdict),
        },
        _ => Extraction {
            signal: Signal::Hold,
            status: ExtractionStatus::Ambiguous,
            verdict: Some(verdict),
        },
    }
}

/// Verdict text of the last anchor, trimmed of markdown emphasis and separators.
pub fn verdict_line(decision_text: &str) -> Option<String> {
    let lines: Vec<&str> = decision_text.lines().collect();

    let (index, rest) = lines
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, line)| anchor_rest(line).map(|rest| (i, rest)))?;

    let rest = clean(rest);
    if !rest.is_empty() {
        return Some(rest);
    }
    lines[index + 1..]
        .iter()
        .map(|line| clean(line))
        .find(|line| !line.is_empty())
        .or(Some(String::new()))
}

/// Text after the label when `line` is an anchor.
fn anchor_rest(line: &str) -> Option<&str> {
    let body = line.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '#' | '-' | '>'));
    let lower = body.to_ascii_lowercase();
    ANCHOR_LABELS.iter().find_map(|label| {
        if !lower.starts_with(label) {
            return None;
        }
        // Labels are ASCII, so the byte offset is a char boundary in `body`.
        let rest = &body[label.len()..];
        let after = rest.trim_start();
        let separated = after.is_empty()
            || after.starts_with(':')
            || after.starts_with('-')
            || after.starts_with("**");
        separated.then_some(rest)
    })
}

fn clean(text: &str) -> String {
    text.trim_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '*' | '-' | '_' | '#' | '='))
        .to_string()
}
