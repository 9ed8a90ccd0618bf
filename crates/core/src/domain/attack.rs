use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Tag stamped on every record produced by this pipeline.
pub const DATA_SOURCE: &str = "rekt";

/// A provisional record parsed from one leaderboard entry. Amounts and dates
/// are kept as raw text until normalization.
#[derive(Debug, Clone)]
pub struct RawCandidate {
    pub protocol_name: String,
    pub attack_date: String,
    pub loss_amount: String,
    pub link: Option<String>,
    pub description: Option<String>,
}

/// Optional detail mined from an incident's article page. Any field may be
/// absent without blocking the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ArticleEnrichment {
    pub description: Option<String>,
    pub full_text: Option<String>,
    pub attack_type: Option<String>,
    pub blockchain: Option<String>,
}

/// The canonical persisted unit. (protocol_name lowercased/trimmed,
/// attack_date) is the record's natural identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackRecord {
    pub protocol_name: String,
    pub attack_date: NaiveDate,
    pub attack_type: String,
    pub loss_amount_usd: f64,
    pub description: String,
    pub source_url: Option<String>,
    pub blockchain: Option<String>,
    pub data_source: String,
}

/// Per-candidate duplicate decision.
#[derive(Debug, Clone)]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    pub rationale: String,
    pub matched: Option<(String, NaiveDate)>,
}

impl DuplicateVerdict {
    pub fn not_duplicate(rationale: impl Into<String>) -> Self {
        Self {
            is_duplicate: false,
            rationale: rationale.into(),
            matched: None,
        }
    }

    pub fn duplicate_of(
        rationale: impl Into<String>,
        protocol_name: &str,
        attack_date: NaiveDate,
    ) -> Self {
        Self {
            is_duplicate: true,
            rationale: rationale.into(),
            matched: Some((protocol_name.to_string(), attack_date)),
        }
    }
}
