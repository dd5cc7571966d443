use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use common::normalize::{normalize_text, resolve_url};
use common::{PipelineError, PipelineResult};

/// Structural selectors tried in order; the first one yielding at least
/// one parsed card wins. The trailing entries are the loose fallbacks.
const CARD_SELECTORS: &[&str] = &[
    ".latest-airdrops .card",
    ".latest-airdrops [class*=\"card\"]",
    ".latest-airdrops article",
    ".card",
    "article",
];

const TITLE_SELECTOR: &str = "h1, h2, h3, h4, .card-title, .entry-title, .title";
const DESCRIPTION_SELECTOR: &str = "p, .description, .excerpt, .summary, .card-text";
const STATUS_BADGE_SELECTOR: &str = ".label, .badge, .status, .tag, .ribbon, .chip";
const AIRDROP_ANCHOR_SELECTOR: &str = "a[href*=\"/airdrop/\"]";

const STATUS_VALUES: &[&str] = &["confirmed", "hot", "updated"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapedCard {
    pub title: String,
    pub description: String,
    pub source_url: String,
    pub logo: String,
    pub status: String,
    pub selector_used: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectorAttempt {
    pub selector: String,
    pub found: usize,
}

#[derive(Debug, Serialize)]
pub struct ParsedPage {
    pub cards: Vec<ScrapedCard>,
    pub selector_used: String,
    pub attempts: Vec<SelectorAttempt>,
}

fn selector(input: &str) -> PipelineResult<Selector> {
    Selector::parse(input)
        .map_err(|e| PipelineError::HtmlParse(format!("invalid selector {input:?}: {e}")))
}

fn first_text(root: ElementRef<'_>, sel: &Selector) -> String {
    root.select(sel)
        .next()
        .map(|node| normalize_text(&node.text().collect::<String>()))
        .unwrap_or_default()
}

fn parse_srcset(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|chunk| chunk.split_whitespace().next())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_inline_placeholder(value: &str) -> bool {
    value.trim().to_lowercase().starts_with("data:image")
}

/// Lazy-loading themes move the real image URL around; try the common
/// attributes and srcset variants before the plain src.
fn extract_logo_url(root: ElementRef<'_>, img_selector: &Selector, base_url: &str) -> String {
    let Some(image) = root.select(img_selector).next() else {
        return String::new();
    };
    let attr = |name: &str| image.value().attr(name).unwrap_or("");

    let mut candidates: Vec<String> = Vec::new();
    for srcset_attr in ["data-srcset", "data-lazy-srcset", "srcset"] {
        candidates.extend(parse_srcset(attr(srcset_attr)));
    }
    for direct_attr in ["data-src", "data-lazy-src", "data-original", "src"] {
        let value = attr(direct_attr).trim();
        if !value.is_empty() {
            candidates.push(value.to_string());
        }
    }

    for candidate in candidates {
        if is_inline_placeholder(&candidate) {
            continue;
        }
        let resolved = resolve_url(base_url, &candidate);
        if !resolved.is_empty() {
            return resolved;
        }
    }

    String::new()
}

fn pick_status(signals: &[String]) -> String {
    for signal in signals {
        let normalized = normalize_text(signal).to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        if STATUS_VALUES.contains(&normalized.as_str()) {
            return normalized;
        }
        for status in STATUS_VALUES {
            if normalized.contains(status) {
                return status.to_string();
            }
        }
    }
    String::new()
}

fn collect_status_signals(root: ElementRef<'_>, badge_selector: &Selector) -> Vec<String> {
    let mut signals = Vec::new();

    for badge in root.select(badge_selector) {
        signals.push(badge.text().collect::<String>());
        if let Some(class) = badge.value().attr("class") {
            signals.push(class.to_string());
        }
        if let Some(status) = badge.value().attr("data-status") {
            signals.push(status.to_string());
        }
        if let Some(title) = badge.value().attr("title") {
            signals.push(title.to_string());
        }
    }

    // Card-level hints when no explicit badge is present.
    if let Some(class) = root.value().attr("class") {
        signals.push(class.to_string());
    }
    if let Some(status) = root.value().attr("data-status") {
        signals.push(status.to_string());
    }
    signals.push(root.text().collect::<String>());

    signals.retain(|s| !s.trim().is_empty());
    signals
}

struct CardSelectors {
    title: Selector,
    title_attr: Selector,
    description: Selector,
    badge: Selector,
    airdrop_anchor: Selector,
    any_anchor: Selector,
    img: Selector,
}

impl CardSelectors {
    fn build() -> PipelineResult<Self> {
        Ok(Self {
            title: selector(TITLE_SELECTOR)?,
            title_attr: selector("[title]")?,
            description: selector(DESCRIPTION_SELECTOR)?,
            badge: selector(STATUS_BADGE_SELECTOR)?,
            airdrop_anchor: selector(AIRDROP_ANCHOR_SELECTOR)?,
            any_anchor: selector("a")?,
            img: selector("img")?,
        })
    }
}

fn extract_card(
    root: ElementRef<'_>,
    selectors: &CardSelectors,
    selector_used: &str,
    base_url: &str,
) -> Option<ScrapedCard> {
    let mut title = first_text(root, &selectors.title);
    if title.is_empty() {
        title = root
            .select(&selectors.title_attr)
            .next()
            .and_then(|n| n.value().attr("title"))
            .map(normalize_text)
            .unwrap_or_default();
    }

    let description = first_text(root, &selectors.description);

    let href = root
        .select(&selectors.airdrop_anchor)
        .next()
        .and_then(|n| n.value().attr("href"))
        .or_else(|| {
            root.select(&selectors.any_anchor)
                .next()
                .and_then(|n| n.value().attr("href"))
        })
        .unwrap_or("");
    let source_url = resolve_url(base_url, href);

    if title.is_empty() || source_url.is_empty() {
        return None;
    }

    let logo = extract_logo_url(root, &selectors.img, base_url);
    let status = pick_status(&collect_status_signals(root, &selectors.badge));

    Some(ScrapedCard {
        title,
        description,
        source_url,
        logo,
        status,
        selector_used: selector_used.to_string(),
    })
}

/// Walk the selector chain; if nothing structural parses, scan airdrop
/// anchors directly. Duplicate target URLs are dropped on first sight.
pub fn parse_airdrops_page(html: &str, base_url: &str) -> PipelineResult<ParsedPage> {
    let document = Html::parse_document(html);
    let selectors = CardSelectors::build()?;

    let mut attempts = Vec::new();
    let mut cards: Vec<ScrapedCard> = Vec::new();
    let mut seen_urls = std::collections::HashSet::new();
    let mut selector_used = String::new();

    for card_selector in CARD_SELECTORS {
        let sel = selector(card_selector)?;
        let nodes: Vec<ElementRef<'_>> = document.select(&sel).collect();
        attempts.push(SelectorAttempt {
            selector: card_selector.to_string(),
            found: nodes.len(),
        });

        if nodes.is_empty() {
            continue;
        }

        let mut batch = Vec::new();
        for node in nodes {
            let Some(card) = extract_card(node, &selectors, card_selector, base_url) else {
                continue;
            };
            if seen_urls.insert(card.source_url.clone()) {
                batch.push(card);
            }
        }

        if !batch.is_empty() {
            selector_used = card_selector.to_string();
            cards.extend(batch);
            break;
        }
    }

    if cards.is_empty() {
        for anchor in document.select(&selectors.airdrop_anchor) {
            let source_url = resolve_url(base_url, anchor.value().attr("href").unwrap_or(""));
            if source_url.is_empty() || seen_urls.contains(&source_url) {
                continue;
            }

            let mut title = normalize_text(&anchor.text().collect::<String>());
            if title.is_empty() {
                title = anchor
                    .value()
                    .attr("title")
                    .map(normalize_text)
                    .unwrap_or_default();
            }
            if title.is_empty() {
                continue;
            }

            seen_urls.insert(source_url.clone());
            cards.push(ScrapedCard {
                title,
                description: String::new(),
                source_url,
                logo: String::new(),
                status: String::new(),
                selector_used: format!("{AIRDROP_ANCHOR_SELECTOR} fallback"),
            });
        }
    }

    let selector_used = if selector_used.is_empty() {
        "fallback".to_string()
    } else {
        selector_used
    };

    Ok(ParsedPage {
        cards,
        selector_used,
        attempts,
    })
}
