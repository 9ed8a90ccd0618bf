use crate::domain::attack::ArticleEnrichment;
use scraper::{Html, Selector};

const DESCRIPTION_PARAGRAPHS: usize = 5;
const FULL_TEXT_PARAGRAPHS: usize = 20;

/// Attack-type phrases, most specific first. Order is load-bearing: the first
/// phrase found in the article text wins, so "flash loan attack" must beat
/// the generic "exploit". Do not reorder without checking classification
/// output.
const ATTACK_TYPE_KEYWORDS: &[&str] = &[
    "flash loan attack",
    "flash loan",
    "reentrancy",
    "oracle manipulation",
    "price manipulation",
    "rug pull",
    "exit scam",
    "private key",
    "phishing",
    "bridge exploit",
    "access control",
    "infinite mint",
    "governance attack",
    "exploit",
    "hack",
];

/// Chain names searched case-insensitively over the whole page text. Longer
/// aliases precede the names they contain.
const BLOCKCHAIN_NAMES: &[&str] = &[
    "Binance Smart Chain",
    "BNB Chain",
    "Ethereum",
    "Solana",
    "Polygon",
    "Avalanche",
    "Arbitrum",
    "Optimism",
    "Fantom",
    "Tron",
    "Bitcoin",
];

/// Mine an incident's detail page for a richer description, an attack-type
/// hint, and a chain hint. Every field is optional; an empty page yields an
/// empty enrichment and the pipeline proceeds on the raw candidate alone.
pub fn extract_enrichment(html: &str) -> ArticleEnrichment {
    let doc = Html::parse_document(html);

    let paragraphs = content_paragraphs(&doc);

    let description = join_paragraphs(&paragraphs, DESCRIPTION_PARAGRAPHS);
    let full_text = join_paragraphs(&paragraphs, FULL_TEXT_PARAGRAPHS);

    let attack_type = full_text
        .as_deref()
        .and_then(|text| match_attack_type(text));

    let page_text: String = doc.root_element().text().collect::<Vec<_>>().join(" ");
    let blockchain = match_blockchain(&page_text);

    ArticleEnrichment {
        description,
        full_text,
        attack_type,
        blockchain,
    }
}

/// Paragraphs from the main content region, falling back to the whole page
/// when the article has no <main>/<article> wrapper.
fn content_paragraphs(doc: &Html) -> Vec<String> {
    for scoped in ["main p", "article p", "p"] {
        let selector = Selector::parse(scoped).unwrap();
        let paragraphs: Vec<String> = doc
            .select(&selector)
            .map(|p| {
                p.text()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|text| !text.is_empty())
            .collect();
        if !paragraphs.is_empty() {
            return paragraphs;
        }
    }
    Vec::new()
}

fn join_paragraphs(paragraphs: &[String], limit: usize) -> Option<String> {
    if paragraphs.is_empty() {
        return None;
    }
    Some(
        paragraphs
            .iter()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

fn match_attack_type(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    ATTACK_TYPE_KEYWORDS
        .iter()
        .find(|keyword| lower.contains(*keyword))
        .map(|keyword| keyword.to_string())
}

fn match_blockchain(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    BLOCKCHAIN_NAMES
        .iter()
        .find(|name| lower.contains(&name.to_lowercase()))
        .map(|name| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_description_and_hints() {
        let html = r#"
            <html><body><main>
              <p>Harvest Finance lost $33.8M in minutes.</p>
              <p>The attacker used a flash loan attack against the curve pools.</p>
              <p>Funds moved through Ethereum mixers shortly after.</p>
            </main></body></html>
        "#;
        let enrichment = extract_enrichment(html);
        assert!(enrichment
            .description
            .as_deref()
            .unwrap()
            .contains("Harvest Finance"));
        assert_eq!(enrichment.attack_type.as_deref(), Some("flash loan attack"));
        assert_eq!(enrichment.blockchain.as_deref(), Some("Ethereum"));
    }

    #[test]
    fn specific_keyword_beats_generic_exploit() {
        let html = "<html><body><p>This exploit was in fact a reentrancy bug.</p></body></html>";
        let enrichment = extract_enrichment(html);
        // "reentrancy" precedes "exploit" in the fixed list.
        assert_eq!(enrichment.attack_type.as_deref(), Some("reentrancy"));
    }

    #[test]
    fn description_caps_at_five_paragraphs() {
        let body: String = (1..=8)
            .map(|i| format!("<p>Paragraph number {i} with an exploit inside.</p>"))
            .collect();
        let html = format!("<html><body><article>{body}</article></body></html>");
        let enrichment = extract_enrichment(&html);
        let description = enrichment.description.unwrap();
        assert!(description.contains("Paragraph number 5"));
        assert!(!description.contains("Paragraph number 6"));
        let full = enrichment.full_text.unwrap();
        assert!(full.contains("Paragraph number 8"));
    }

    #[test]
    fn blockchain_match_is_case_insensitive_over_whole_page() {
        let html = r#"
            <html><body>
              <h1>Incident on SOLANA</h1>
              <p>A hack drained the treasury.</p>
            </body></html>
        "#;
        let enrichment = extract_enrichment(html);
        assert_eq!(enrichment.blockchain.as_deref(), Some("Solana"));
    }

    #[test]
    fn empty_page_yields_empty_enrichment() {
        let enrichment = extract_enrichment("<html><body></body></html>");
        assert!(enrichment.description.is_none());
        assert!(enrichment.full_text.is_none());
        assert!(enrichment.attack_type.is_none());
        assert!(enrichment.blockchain.is_none());
    }
}
