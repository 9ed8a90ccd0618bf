use crate::domain::attack::AttackRecord;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

pub mod assisted;

/// Natural identity of a record: protocol name lowercased and trimmed, plus
/// the ISO attack date.
pub fn composite_key(protocol_name: &str, attack_date: NaiveDate) -> String {
    format!("{}_{}", protocol_name.trim().to_lowercase(), attack_date)
}

pub fn existing_key_set(pairs: &[(String, NaiveDate)]) -> HashSet<String> {
    pairs
        .iter()
        .map(|(protocol, date)| composite_key(protocol, *date))
        .collect()
}

/// Fast path: split a batch into records not yet in the store and exact
/// duplicates of persisted rows. Deterministic and authoritative on the
/// default ingestion route.
pub fn partition_new(
    batch: Vec<AttackRecord>,
    existing_keys: &HashSet<String>,
) -> (Vec<AttackRecord>, Vec<AttackRecord>) {
    batch.into_iter().partition(|record| {
        !existing_keys.contains(&composite_key(&record.protocol_name, record.attack_date))
    })
}

/// Collapse records sharing a composite key within one incoming batch,
/// keeping the richest per key: a non-empty description wins first, then a
/// present source link. Losing records are silently merged away. First-seen
/// order of surviving keys is preserved.
pub fn merge_within_batch(records: Vec<AttackRecord>) -> Vec<AttackRecord> {
    let mut order = Vec::new();
    let mut by_key: HashMap<String, AttackRecord> = HashMap::new();

    for record in records {
        let key = composite_key(&record.protocol_name, record.attack_date);
        match by_key.get(&key) {
            Some(kept) if richness(kept) >= richness(&record) => {}
            Some(_) => {
                by_key.insert(key, record);
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, record);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect()
}

fn richness(record: &AttackRecord) -> (bool, bool) {
    (
        !record.description.trim().is_empty(),
        record.source_url.is_some(),
    )
}
