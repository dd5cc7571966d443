use scraper::Html;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use url::Url;

/// Query parameters stripped during link canonicalization.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "ref",
    "source",
];

/// Strip markup, decode entities and collapse whitespace. Feed summaries
/// and scraped snippets arrive as HTML fragments.
pub fn normalize_text(value: &str) -> String {
    let text = Html::parse_fragment(value)
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join("");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical form of a link: tracking params removed, fragment cleared,
/// trailing slash stripped. Idempotent; unparseable input only loses the
/// trailing slash.
pub fn canonicalize_link(value: &str) -> String {
    let raw = value.trim();
    if raw.is_empty() {
        return String::new();
    }

    match Url::parse(raw) {
        Ok(mut parsed) => {
            let kept: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();

            if kept.is_empty() {
                parsed.set_query(None);
            } else {
                let query = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .finish();
                parsed.set_query(Some(&query));
            }

            parsed.set_fragment(None);
            parsed.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => raw.trim_end_matches('/').to_string(),
    }
}

/// Resolve a possibly relative href against the source's base URL.
/// Returns an empty string when nothing resolvable comes out.
pub fn resolve_url(base: &str, href: &str) -> String {
    let raw = href.trim();
    if raw.is_empty() {
        return String::new();
    }

    match Url::parse(raw) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => Url::parse(base)
            .ok()
            .and_then(|b| b.join(raw).ok())
            .map(|u| u.to_string())
            .unwrap_or_default(),
    }
}

pub fn to_rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let input = "  <p>Hello &amp; <b>world</b>!</p>\n\t<br/> again ";
        assert_eq!(normalize_text(input), "Hello & world! again");
    }

    #[test]
    fn canonicalize_strips_tracking_params_fragment_and_slash() {
        let link = "https://example.com/post/?utm_source=rss&utm_medium=feed&id=7#section";
        assert_eq!(canonicalize_link(link), "https://example.com/post/?id=7");

        let bare = "https://example.com/post/?utm_source=rss#top";
        assert_eq!(canonicalize_link(bare), "https://example.com/post");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let inputs = [
            "https://example.com/a/?utm_campaign=x&q=1#frag",
            "https://example.com/b/",
            "not a url/",
            "https://example.com/c?ref=producthunt",
        ];
        for input in inputs {
            let once = canonicalize_link(input);
            assert_eq!(canonicalize_link(&once), once, "input: {input}");
        }
    }

    #[test]
    fn resolve_url_handles_relative_and_absolute() {
        assert_eq!(
            resolve_url("https://example.com/", "/airdrop/foo"),
            "https://example.com/airdrop/foo"
        );
        assert_eq!(
            resolve_url("https://example.com/", "https://other.io/x"),
            "https://other.io/x"
        );
        assert_eq!(resolve_url("https://example.com/", "   "), "");
    }
}
