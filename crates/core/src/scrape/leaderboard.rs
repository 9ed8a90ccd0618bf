use crate::domain::attack::RawCandidate;
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\s*\d[\d,]*(?:\.\d+)?").unwrap());
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{2}/\d{2}/\d{4}\b").unwrap());
static ORDINAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\d+\.\s*").unwrap());
static DIGIT_DOT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+\.").unwrap());

/// One opaque leaderboard entry: the fragment's visible text plus the first
/// internal article href found inside it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFragment {
    pub text: String,
    pub href: Option<String>,
}

/// Extract candidate incident entries from the leaderboard page markup.
///
/// A small ordered set of independent detector strategies runs over the parsed
/// document (table rows, list items, anchor blocks); results are merged with
/// element-identity dedup so a row emitted by one strategy is not re-emitted
/// by a later one, nor by a nested element. When no strategy matches anything,
/// a text-only line scan is used as a last resort. An empty return is valid
/// here; the orchestrator decides whether that is fatal.
pub fn scan_entries(html: &str) -> Vec<EntryFragment> {
    let doc = Html::parse_document(html);

    let strategies = [detect_table_rows, detect_list_items, detect_anchor_blocks];

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for strategy in strategies {
        for element in strategy(&doc) {
            if seen.contains(&element.id())
                || element.ancestors().any(|n| seen.contains(&n.id()))
            {
                continue;
            }
            let text = element_text(&element);
            if !looks_like_incident_row(&text) {
                continue;
            }
            seen.insert(element.id());
            out.push(EntryFragment {
                text,
                href: first_article_href(&element),
            });
        }
    }

    if out.is_empty() {
        out = scan_text_lines(&doc);
    }
    out
}

fn detect_table_rows<'a>(doc: &'a Html) -> Vec<ElementRef<'a>> {
    let selector = Selector::parse("table tr").unwrap();
    doc.select(&selector).collect()
}

fn detect_list_items<'a>(doc: &'a Html) -> Vec<ElementRef<'a>> {
    let selector = Selector::parse("li").unwrap();
    doc.select(&selector).collect()
}

fn detect_anchor_blocks<'a>(doc: &'a Html) -> Vec<ElementRef<'a>> {
    let selector = Selector::parse("a[href]").unwrap();
    doc.select(&selector).collect()
}

/// Incident-row heuristic: the fragment must carry a currency amount and at
/// least one digit followed by a period (rank ordinal or decimal).
fn looks_like_incident_row(text: &str) -> bool {
    AMOUNT_RE.is_match(text) && DIGIT_DOT_RE.is_match(text)
}

fn element_text(element: &ElementRef) -> String {
    let text: String = element.text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_article_href(element: &ElementRef) -> Option<String> {
    if element.value().name() == "a" {
        if let Some(href) = element.value().attr("href") {
            if is_internal_article_path(href) {
                return Some(href.to_string());
            }
        }
    }

    let selector = Selector::parse("a[href]").unwrap();
    element
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| is_internal_article_path(href))
        .map(|href| href.to_string())
}

/// Internal relative article paths only: "/foo-rekt/" yes, absolute URLs and
/// protocol-relative "//host" no.
fn is_internal_article_path(href: &str) -> bool {
    let href = href.trim();
    href.starts_with('/') && !href.starts_with("//") && href.len() > 1
}

fn scan_text_lines(doc: &Html) -> Vec<EntryFragment> {
    let text: String = doc.root_element().text().collect::<Vec<_>>().join("\n");
    text.lines()
        .map(collapse_whitespace)
        .filter(|line| looks_like_incident_row(line))
        .map(|line| EntryFragment {
            text: line,
            href: None,
        })
        .collect()
}

/// Turn one entry fragment into a provisional record, or reject it
/// (non-fatal; the caller skips rejected entries).
///
/// Dateless entries default to `today`, which can fabricate a
/// plausible-looking but wrong date (see DESIGN.md).
pub fn parse_entry(
    fragment: &EntryFragment,
    base_url: &str,
    today: NaiveDate,
) -> Option<RawCandidate> {
    let text = fragment.text.as_str();

    let dollar = text.find('$')?;
    let mut name = ORDINAL_RE.replace(&text[..dollar], "").into_owned();
    if let Some(pos) = name.find(" - ") {
        name.truncate(pos);
    }
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let amount = AMOUNT_RE.find(text)?.as_str().to_string();
    // Reject entries whose amount cannot survive normalization.
    crate::normalize::coerce_amount(&amount)?;

    let attack_date = match DATE_RE.find(text) {
        Some(m) => NaiveDate::parse_from_str(m.as_str(), "%m/%d/%Y")
            .ok()?
            .to_string(),
        None => today.to_string(),
    };

    let link = fragment
        .href
        .as_deref()
        .and_then(|href| absolutize(href, base_url));

    Some(RawCandidate {
        protocol_name: name.to_string(),
        attack_date,
        loss_amount: amount,
        link,
        description: None,
    })
}

fn absolutize(href: &str, base_url: &str) -> Option<String> {
    if !is_internal_article_path(href) {
        return None;
    }
    let base = Url::parse(base_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}
