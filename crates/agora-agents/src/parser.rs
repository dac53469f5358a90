use agora_models::TradeProposal;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ParseError;

/// Extract the first JSON object from a string that may contain surrounding text.
///
/// Handles common Claude response formats:
/// - Clean JSON: `{"key": "value"}`
/// - Markdown-wrapped: ```json\n{"key": "value"}\n```
/// - Prefix text: `Here is the proposal:\n{"key": "value"}`
pub fn extract_json(text: &str) -> Result<String, ParseError> {
    let trimmed = text.trim();
    let is_json = |candidate: &str| serde_json::from_str::<serde_json::Value>(candidate).is_ok();

    if trimmed.starts_with('{') && is_json(trimmed) {
        return Ok(trimmed.to_string());
    }

    if let Some(block) = markdown_block(trimmed).filter(|b| is_json(*b)) {
        return Ok(block.to_string());
    }

    balanced_objects(trimmed)
        .into_iter()
        .find(|candidate| is_json(*candidate))
        .map(str::to_string)
        .ok_or_else(|| {
            ParseError(format!(
                "No valid JSON object found in response (length={})",
                text.len()
            ))
        })
}

fn markdown_block(text: &str) -> Option<&str> {
    ["```json\n", "```json\r\n", "```\n", "```\r\n"]
        .iter()
        .find_map(|marker| {
            let body = &text[text.find(marker)? + marker.len()..];
            body.find("```").map(|end| body[..end].trim())
        })
}

/// Every top-level balanced `{ ... }` in `text`, in order. Braces inside
/// string literals are ignored.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' if depth > 0 => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    objects.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    objects
}

/// Parse the trader's proposal. Conviction must lie in [0, 1] and a
/// position size, when given, in [0, 100].
pub fn parse_trade_proposal(raw: &str) -> Result<TradeProposal, ParseError> {
    let json_str = extract_json(raw)?;
    let proposal: TradeProposal = serde_json::from_str(&json_str)
        .map_err(|e| ParseError(format!("Failed to parse TradeProposal: {e}\nJSON: {json_str}")))?;

    if proposal.conviction < Decimal::ZERO || proposal.conviction > Decimal::ONE {
        return Err(ParseError(format!(
            "conviction {} outside [0, 1]",
            proposal.conviction
        )));
    }
    if let Some(size) = proposal.position_size_pct {
        if size < Decimal::ZERO || size > Decimal::ONE_HUNDRED {
            return Err(ParseError(format!("position_size_pct {size} outside [0, 100]")));
        }
    }
    Ok(proposal)
}

/// The convergence judge's verdict on a debate.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConvergenceVerdict {
    pub converged: bool,
    #[serde(default)]
    pub reason: String,
}

pub fn parse_convergence_verdict(raw: &str) -> Result<ConvergenceVerdict, ParseError> {
    let json_str = extract_json(raw)?;
    serde_json::from_str(&json_str)
        .map_err(|e| ParseError(format!("Failed to parse convergence verdict: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_models::Signal;
    use rust_decimal_macros::dec;

    #[test]
    fn extract_clean_json() {
        let input = r#"{"converged": true, "reason": "same points"}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn extract_from_markdown() {
        let input = "Here is my verdict:\n```json\n{\"converged\": false}\n```\nDone.";
        assert_eq!(extract_json(input).unwrap(), r#"{"converged": false}"#);
    }

    #[test]
    fn extract_with_prefix_text() {
        let input = "After weighing it:\n{\"action\": \"SELL\", \"note\": \"from {a} to {b}\"}";
        let parsed: serde_json::Value =
            serde_json::from_str(&extract_json(input).unwrap()).unwrap();
        assert_eq!(parsed["action"], "SELL");
    }

    #[test]
    fn stray_closing_brace_before_object() {
        let input = "} oops {\"converged\": true}";
        assert!(extract_json(input).unwrap().contains("converged"));
    }

    #[test]
    fn skips_prose_braces_before_the_object() {
        let input = "Both sides agree on {margins, growth}.\n{\"converged\": true, \"reason\": \"aligned\"}";
        let verdict = parse_convergence_verdict(input).unwrap();
        assert!(verdict.converged);
        assert_eq!(verdict.reason, "aligned");
    }

    #[test]
    fn extract_no_json() {
        assert!(extract_json("Plain prose, no object at all.").is_err());
    }

    #[test]
    fn trade_proposal_from_markdown() {
        let raw = "```json\n{\"action\": \"sell\", \"conviction\": \"0.65\", \
                   \"position_size_pct\": \"3\", \"rationale\": \"Margin compression\"}\n```";
        let proposal = parse_trade_proposal(raw).unwrap();
        assert_eq!(proposal.action, Signal::Sell);
        assert_eq!(proposal.conviction, dec!(0.65));
        assert_eq!(proposal.position_size_pct, Some(dec!(3)));
    }

    #[test]
    fn trade_proposal_rejects_out_of_range_conviction() {
        let raw = r#"{"action": "BUY", "conviction": "1.4", "rationale": "all in"}"#;
        assert!(parse_trade_proposal(raw).is_err());
    }

    #[test]
    fn trade_proposal_rejects_unknown_action() {
        let raw = r#"{"action": "SHORT", "conviction": "0.5", "rationale": "?"}"#;
        assert!(parse_trade_proposal(raw).is_err());
    }

    #[test]
    fn convergence_verdict_reason_optional() {
        let verdict = parse_convergence_verdict("{\"converged\": true}").unwrap();
        assert!(verdict.converged);
        assert!(verdict.reason.is_empty());
        assert!(parse_convergence_verdict("yes, converged").is_err());
    }
}
