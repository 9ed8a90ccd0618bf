use crate::dedup::composite_key;
use crate::domain::attack::{AttackRecord, DuplicateVerdict};
use crate::llm::{JudgeInput, LlmClient};
use tracing::warn;

/// How many existing records may be shown to the model per candidate.
const MAX_COMPARISONS: usize = 20;
/// Shortlist prefix length over the normalized protocol name.
const PREFIX_CHARS: usize = 5;

/// Screens candidates against existing records with model assistance.
///
/// This path is strictly additive over the exact-key fast path: it may flag
/// fuzzy duplicates (renamed protocols, off-by-a-day dates) the composite key
/// misses, but any model failure degrades to the exact-match answer. `check`
/// therefore never returns an error and never blocks a refresh run.
pub struct AssistedDuplicateChecker<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> AssistedDuplicateChecker<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self { llm }
    }

    pub async fn check(
        &self,
        candidate: &AttackRecord,
        existing: &[AttackRecord],
    ) -> DuplicateVerdict {
        if existing.is_empty() {
            return DuplicateVerdict::not_duplicate("no existing records to compare against");
        }

        // Exact composite-key hit needs no model call.
        let key = composite_key(&candidate.protocol_name, candidate.attack_date);
        if let Some(hit) = existing
            .iter()
            .find(|record| composite_key(&record.protocol_name, record.attack_date) == key)
        {
            return DuplicateVerdict::duplicate_of(
                "exact protocol and date match",
                &hit.protocol_name,
                hit.attack_date,
            );
        }

        let shortlist = shortlist(candidate, existing);
        if shortlist.is_empty() {
            return DuplicateVerdict::not_duplicate("no similarly named existing records");
        }

        let input = JudgeInput {
            candidate: candidate.clone(),
            existing: shortlist,
        };
        match self.llm.judge_duplicate(&input).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(
                    protocol = %candidate.protocol_name,
                    error = %format!("{err:#}"),
                    "assisted duplicate check unavailable, falling back to exact matching"
                );
                DuplicateVerdict::not_duplicate(
                    "assisted check unavailable; no exact protocol and date match",
                )
            }
        }
    }
}

/// Existing records whose normalized name shares a 5-character prefix with the
/// candidate, in either direction so that "Sushi" still matches "SushiSwap".
fn shortlist(candidate: &AttackRecord, existing: &[AttackRecord]) -> Vec<AttackRecord> {
    let needle = normalized_prefix(&candidate.protocol_name);
    existing
        .iter()
        .filter(|record| {
            let name = record.protocol_name.trim().to_lowercase();
            name.starts_with(&needle) || needle.starts_with(&name)
        })
        .take(MAX_COMPARISONS)
        .cloned()
        .collect()
}

fn normalized_prefix(protocol_name: &str) -> String {
    protocol_name
        .trim()
        .to_lowercase()
        .chars()
        .take(PREFIX_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(protocol: &str, date: &str) -> AttackRecord {
        AttackRecord {
            protocol_name: protocol.to_string(),
            attack_date: date.parse().unwrap(),
            attack_type: "exploit".to_string(),
            loss_amount_usd: 1_000_000.0,
            description: format!("Attack on {protocol}"),
            source_url: None,
            blockchain: None,
            data_source: "rekt".to_string(),
        }
    }

    enum StubBehavior {
        Verdict(DuplicateVerdict),
        Fail,
    }

    struct StubLlm {
        behavior: StubBehavior,
        calls: AtomicUsize,
        last_shortlist_len: AtomicUsize,
    }

    impl StubLlm {
        fn new(behavior: StubBehavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
                last_shortlist_len: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for StubLlm {
        fn provider(&self) -> Provider {
            Provider::OpenAi
        }

        async fn judge_duplicate(&self, input: &JudgeInput) -> anyhow::Result<DuplicateVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_shortlist_len
                .store(input.existing.len(), Ordering::SeqCst);
            match &self.behavior {
                StubBehavior::Verdict(v) => Ok(v.clone()),
                StubBehavior::Fail => bail!("connection refused"),
            }
        }
    }

    #[tokio::test]
    async fn empty_store_skips_the_model() {
        let llm = StubLlm::new(StubBehavior::Fail);
        let checker = AssistedDuplicateChecker::new(&llm);
        let verdict = checker.check(&record("Foo", "2023-01-01"), &[]).await;
        assert!(!verdict.is_duplicate);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exact_key_short_circuits_before_the_model() {
        let llm = StubLlm::new(StubBehavior::Fail);
        let checker = AssistedDuplicateChecker::new(&llm);
        let existing = vec![record("harvest finance", "2020-10-26")];
        let verdict = checker
            .check(&record("Harvest Finance", "2020-10-26"), &existing)
            .await;
        assert!(verdict.is_duplicate);
        assert_eq!(
            verdict.matched.as_ref().map(|(p, _)| p.as_str()),
            Some("harvest finance")
        );
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn model_verdict_is_passed_through() {
        let llm = StubLlm::new(StubBehavior::Verdict(DuplicateVerdict::duplicate_of(
            "same incident, date off by one day",
            "SushiSwap",
            "2023-04-09".parse().unwrap(),
        )));
        let checker = AssistedDuplicateChecker::new(&llm);
        let existing = vec![record("SushiSwap", "2023-04-09")];
        let verdict = checker
            .check(&record("Sushi", "2023-04-10"), &existing)
            .await;
        assert!(verdict.is_duplicate);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn model_failure_degrades_to_exact_matching() {
        let llm = StubLlm::new(StubBehavior::Fail);
        let checker = AssistedDuplicateChecker::new(&llm);
        let existing = vec![record("SushiSwap", "2023-04-09")];
        let verdict = checker
            .check(&record("Sushi", "2023-04-10"), &existing)
            .await;
        // Same answer the fast path gives: no exact key hit, so not a dup.
        assert!(!verdict.is_duplicate);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unrelated_names_never_reach_the_model() {
        let llm = StubLlm::new(StubBehavior::Fail);
        let checker = AssistedDuplicateChecker::new(&llm);
        let existing = vec![record("Wormhole", "2022-02-02")];
        let verdict = checker
            .check(&record("Euler Finance", "2023-03-13"), &existing)
            .await;
        assert!(!verdict.is_duplicate);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shortlist_is_capped() {
        let llm = StubLlm::new(StubBehavior::Verdict(DuplicateVerdict::not_duplicate(
            "none of these match",
        )));
        let checker = AssistedDuplicateChecker::new(&llm);
        let existing: Vec<_> = (1..=30)
            .map(|day| record("Harvest Finance", &format!("2020-09-{day:02}")))
            .collect();
        checker
            .check(&record("Harvest Finance", "2020-10-26"), &existing)
            .await;
        assert_eq!(llm.last_shortlist_len.load(Ordering::SeqCst), 20);
    }
}
