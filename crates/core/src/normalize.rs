use crate::domain::attack::{ArticleEnrichment, AttackRecord, RawCandidate, DATA_SOURCE};
use chrono::NaiveDate;

/// Validate and canonicalize a parsed candidate (plus any enrichment) into a
/// persistable record. Returns None when the candidate cannot be salvaged:
/// empty protocol name, unparseable date, or non-positive amount.
pub fn finalize(
    candidate: &RawCandidate,
    enrichment: Option<&ArticleEnrichment>,
) -> Option<AttackRecord> {
    let protocol_name = candidate.protocol_name.trim();
    if protocol_name.is_empty() {
        return None;
    }

    let attack_date = coerce_date(&candidate.attack_date)?;

    let loss_amount_usd = coerce_amount(&candidate.loss_amount)?;
    if loss_amount_usd <= 0.0 {
        return None;
    }

    let attack_type = enrichment
        .and_then(|e| e.attack_type.as_deref())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("unknown"))
        .unwrap_or("exploit")
        .to_lowercase();

    let description = enrichment
        .and_then(|e| e.description.clone())
        .or_else(|| candidate.description.clone())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("Attack on {protocol_name}"));

    Some(AttackRecord {
        protocol_name: protocol_name.to_string(),
        attack_date,
        attack_type,
        loss_amount_usd,
        description,
        source_url: candidate.link.clone(),
        blockchain: enrichment.and_then(|e| e.blockchain.clone()),
        data_source: DATA_SOURCE.to_string(),
    })
}

/// Coerce a date string into a calendar date. Formats are tried in a fixed
/// order and the first match wins: ISO `YYYY-MM-DD`, `MM/DD/YYYY`, then
/// `MM/DD/YY` with a two-digit-year pivot (yy < 50 -> 20yy, else 19yy).
pub fn coerce_date(s: &str) -> Option<NaiveDate> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }

    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%m/%d/%Y") {
        return Some(d);
    }

    // chrono's own %y pivot differs from the source behavior, so split the
    // two-digit year out by hand.
    let mut parts = t.splitn(3, '/');
    let month = parts.next()?.trim().parse::<u32>().ok()?;
    let day = parts.next()?.trim().parse::<u32>().ok()?;
    let yy_part = parts.next()?.trim();
    if yy_part.len() != 2 {
        return None;
    }
    let yy = yy_part.parse::<i32>().ok()?;
    let year = if yy < 50 { 2000 + yy } else { 1900 + yy };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a currency-formatted amount. `$` and thousands separators are
/// stripped before the numeric parse.
pub fn coerce_amount(s: &str) -> Option<f64> {
    // Markup often splits the currency sign into its own node, so the joined
    // text can carry a space between `$` and the digits.
    let t = s.trim().trim_start_matches('$').replace(',', "");
    let t = t.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(protocol: &str, date: &str, amount: &str) -> RawCandidate {
        RawCandidate {
            protocol_name: protocol.to_string(),
            attack_date: date.to_string(),
            loss_amount: amount.to_string(),
            link: None,
            description: None,
        }
    }

    #[test]
    fn iso_dates_pass_through_unchanged() {
        assert_eq!(
            coerce_date("2023-03-04"),
            NaiveDate::from_ymd_opt(2023, 3, 4)
        );
    }

    #[test]
    fn slash_dates_convert_to_iso() {
        assert_eq!(
            coerce_date("03/04/2023"),
            NaiveDate::from_ymd_opt(2023, 3, 4)
        );
    }

    #[test]
    fn two_digit_years_pivot_at_fifty() {
        assert_eq!(coerce_date("03/04/23"), NaiveDate::from_ymd_opt(2023, 3, 4));
        assert_eq!(coerce_date("03/04/85"), NaiveDate::from_ymd_opt(1985, 3, 4));
    }

    #[test]
    fn date_coercion_is_idempotent_on_its_own_output() {
        let d = coerce_date("03/04/23").unwrap();
        assert_eq!(coerce_date(&d.to_string()), Some(d));
    }

    #[test]
    fn garbage_dates_are_rejected() {
        assert_eq!(coerce_date("not a date"), None);
        assert_eq!(coerce_date("13/45/2023"), None);
        assert_eq!(coerce_date(""), None);
    }

    #[test]
    fn currency_amounts_lose_separators() {
        assert_eq!(coerce_amount("$1,234,567.89"), Some(1_234_567.89));
        assert_eq!(coerce_amount("33800000"), Some(33_800_000.0));
        assert_eq!(coerce_amount("abc"), None);
    }

    #[test]
    fn currency_amounts_tolerate_space_after_dollar_sign() {
        assert_eq!(coerce_amount("$ 624,000,000"), Some(624_000_000.0));
        assert_eq!(coerce_amount("$ "), None);
    }

    #[test]
    fn rejects_empty_protocol_name() {
        assert!(finalize(&candidate("   ", "2023-03-04", "$100"), None).is_none());
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(finalize(&candidate("Foo", "2023-03-04", "$0"), None).is_none());
        assert!(finalize(&candidate("Foo", "2023-03-04", "-5"), None).is_none());
        assert!(finalize(&candidate("Foo", "2023-03-04", "abc"), None).is_none());
    }

    #[test]
    fn fills_defaults_without_enrichment() {
        let rec = finalize(&candidate("Harvest Finance", "10/26/2020", "$33,800,000"), None)
            .unwrap();
        assert_eq!(rec.protocol_name, "Harvest Finance");
        assert_eq!(rec.attack_date, NaiveDate::from_ymd_opt(2020, 10, 26).unwrap());
        assert_eq!(rec.attack_type, "exploit");
        assert_eq!(rec.loss_amount_usd, 33_800_000.0);
        assert_eq!(rec.description, "Attack on Harvest Finance");
        assert_eq!(rec.data_source, "rekt");
    }

    #[test]
    fn unknown_attack_type_is_coerced_to_exploit() {
        let enrichment = ArticleEnrichment {
            attack_type: Some("UNKNOWN".to_string()),
            ..Default::default()
        };
        let rec = finalize(
            &candidate("Foo", "2023-03-04", "$100"),
            Some(&enrichment),
        )
        .unwrap();
        assert_eq!(rec.attack_type, "exploit");
    }

    #[test]
    fn enrichment_overrides_type_description_and_chain() {
        let enrichment = ArticleEnrichment {
            description: Some("Attackers drained the vaults.".to_string()),
            full_text: None,
            attack_type: Some("Flash Loan Attack".to_string()),
            blockchain: Some("Ethereum".to_string()),
        };
        let rec = finalize(
            &candidate("Foo", "2023-03-04", "$100"),
            Some(&enrichment),
        )
        .unwrap();
        assert_eq!(rec.attack_type, "flash loan attack");
        assert_eq!(rec.description, "Attackers drained the vaults.");
        assert_eq!(rec.blockchain.as_deref(), Some("Ethereum"));
    }
}
