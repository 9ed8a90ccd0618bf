use crate::domain::attack::{AttackRecord, DuplicateVerdict};
use serde_json::json;

pub mod error;
pub mod json;
pub mod openai;

const DESCRIPTION_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy)]
pub enum Provider {
    OpenAi,
}

/// Structured context handed to the model: the candidate plus the narrowed
/// set of existing records it may duplicate.
#[derive(Debug, Clone)]
pub struct JudgeInput {
    pub candidate: AttackRecord,
    pub existing: Vec<AttackRecord>,
}

impl JudgeInput {
    pub fn context_json(&self) -> serde_json::Value {
        json!({
            "candidate": record_context(&self.candidate),
            "existing_records": self
                .existing
                .iter()
                .map(record_context)
                .collect::<Vec<_>>(),
        })
    }
}

fn record_context(record: &AttackRecord) -> serde_json::Value {
    json!({
        "protocol_name": record.protocol_name,
        "attack_date": record.attack_date,
        "attack_type": record.attack_type,
        "loss_amount_usd": record.loss_amount_usd,
        "description": excerpt(&record.description),
        "source_url": record.source_url,
        "blockchain": record.blockchain,
    })
}

fn excerpt(s: &str) -> String {
    let mut out: String = s.chars().take(DESCRIPTION_EXCERPT_CHARS).collect();
    if out.len() < s.len() {
        out.push_str("...");
    }
    out
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Judge whether the candidate duplicates one of the existing records.
    /// Callers must treat any error as "assisted check unavailable" and fall
    /// back to exact matching; this call is never allowed to fail a run.
    async fn judge_duplicate(&self, input: &JudgeInput) -> anyhow::Result<DuplicateVerdict>;
}
