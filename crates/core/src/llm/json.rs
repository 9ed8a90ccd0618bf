use crate::domain::attack::DuplicateVerdict;
use crate::domain::contract::LlmDuplicateVerdict;
use anyhow::Context;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

pub fn parse_verdict(text: &str) -> anyhow::Result<DuplicateVerdict> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let parsed = serde_json::from_str::<LlmDuplicateVerdict>(&json_str)
        .with_context(|| format!("LLM output is not valid JSON for verdict schema: {json_str}"))?;
    parsed.validate_into_verdict()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"is_duplicate\":false}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let s = "Sure, here is the verdict: {\"is_duplicate\":true} hope that helps";
        assert_eq!(extract_json(s), Some("{\"is_duplicate\":true}".to_string()));
    }

    #[test]
    fn parse_verdict_accepts_valid_json() {
        let verdict = parse_verdict(
            r#"{"is_duplicate": true, "rationale": "same incident, amount rounded",
                "matched_protocol": "Harvest Finance", "matched_attack_date": "2020-10-26"}"#,
        )
        .unwrap();
        assert!(verdict.is_duplicate);
        assert_eq!(
            verdict.matched.as_ref().map(|(p, _)| p.as_str()),
            Some("Harvest Finance")
        );
    }

    #[test]
    fn parse_verdict_rejects_prose() {
        assert!(parse_verdict("the candidate looks new to me").is_err());
    }

    #[test]
    fn parse_verdict_rejects_missing_rationale() {
        assert!(parse_verdict(r#"{"is_duplicate": false}"#).is_err());
    }
}
