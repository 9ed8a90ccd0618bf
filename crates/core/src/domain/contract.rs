use crate::domain::attack::DuplicateVerdict;
use anyhow::ensure;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Wire shape of the LLM's duplicate verdict. Kept separate from the domain
/// type so malformed output is rejected before it reaches the resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDuplicateVerdict {
    pub is_duplicate: bool,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub matched_protocol: Option<String>,
    #[serde(default)]
    pub matched_attack_date: Option<NaiveDate>,
}

impl LlmDuplicateVerdict {
    pub fn validate_into_verdict(self) -> anyhow::Result<DuplicateVerdict> {
        let rationale = self.rationale.trim().to_string();
        ensure!(!rationale.is_empty(), "verdict rationale must be non-empty");

        let matched_protocol = self
            .matched_protocol
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        // A matched reference only makes sense on a positive verdict, and only
        // when both halves of the composite key are present.
        let matched = match (self.is_duplicate, matched_protocol, self.matched_attack_date) {
            (true, Some(protocol), Some(date)) => Some((protocol, date)),
            _ => None,
        };

        Ok(DuplicateVerdict {
            is_duplicate: self.is_duplicate,
            rationale,
            matched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_verdict_keeps_matched_reference() {
        let v = LlmDuplicateVerdict {
            is_duplicate: true,
            rationale: " same incident reported with rounded amount ".to_string(),
            matched_protocol: Some("Harvest Finance".to_string()),
            matched_attack_date: NaiveDate::from_ymd_opt(2020, 10, 26),
        };
        let verdict = v.validate_into_verdict().unwrap();
        assert!(verdict.is_duplicate);
        assert_eq!(
            verdict.matched,
            Some((
                "Harvest Finance".to_string(),
                NaiveDate::from_ymd_opt(2020, 10, 26).unwrap()
            ))
        );
        assert_eq!(verdict.rationale, "same incident reported with rounded amount");
    }

    #[test]
    fn negative_verdict_drops_matched_reference() {
        let v = LlmDuplicateVerdict {
            is_duplicate: false,
            rationale: "different protocol".to_string(),
            matched_protocol: Some("Harvest Finance".to_string()),
            matched_attack_date: NaiveDate::from_ymd_opt(2020, 10, 26),
        };
        let verdict = v.validate_into_verdict().unwrap();
        assert!(!verdict.is_duplicate);
        assert!(verdict.matched.is_none());
    }

    #[test]
    fn rejects_empty_rationale() {
        let v = LlmDuplicateVerdict {
            is_duplicate: false,
            rationale: "   ".to_string(),
            matched_protocol: None,
            matched_attack_date: None,
        };
        assert!(v.validate_into_verdict().is_err());
    }

    #[test]
    fn partial_matched_reference_is_discarded() {
        let v = LlmDuplicateVerdict {
            is_duplicate: true,
            rationale: "same incident".to_string(),
            matched_protocol: Some("Harvest Finance".to_string()),
            matched_attack_date: None,
        };
        let verdict = v.validate_into_verdict().unwrap();
        assert!(verdict.is_duplicate);
        assert!(verdict.matched.is_none());
    }
}
