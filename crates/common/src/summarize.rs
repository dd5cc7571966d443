use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const SUMMARY_MODEL: &str = "gpt-4o-mini";
const MAX_SUMMARY_CHARS: usize = 320;

/// Best-effort summarization collaborator. Without an API key every call
/// returns an empty string; so does any request or decode failure. Nothing
/// downstream may depend on a summary being present.
#[derive(Clone)]
pub struct Summarizer {
    client: Client,
    api_key: Option<String>,
}

impl Summarizer {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn summarize(&self, title: &str, snippet: &str, source: &str) -> String {
        let Some(api_key) = &self.api_key else {
            return String::new();
        };

        let prompt = [
            "You summarize AI/tech news for a product discovery feed.",
            "Return one concise summary in plain English, 1-2 sentences, no markdown, no bullets, max 45 words.",
            "Focus on product/technology implications and avoid hype.",
            &format!("Source: {}", if source.is_empty() { "unknown" } else { source }),
            &format!("Title: {title}"),
            &format!("Snippet: {snippet}"),
        ]
        .join("\n");

        let body = json!({
            "model": SUMMARY_MODEL,
            "temperature": 0.2,
            "max_tokens": 120,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = match self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("summary request failed: {}", e);
                return String::new();
            }
        };

        if !response.status().is_success() {
            debug!("summary request returned {}", response.status());
            return String::new();
        }

        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                debug!("summary decode failed: {}", e);
                return String::new();
            }
        };

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        clean_summary(text)
    }
}

fn clean_summary(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_SUMMARY_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_summarizer_returns_empty() {
        let summarizer = Summarizer::disabled();
        let summary = summarizer.summarize("Title", "Snippet", "src").await;
        assert_eq!(summary, "");
    }

    #[test]
    fn clean_summary_collapses_and_caps() {
        let long = "word ".repeat(200);
        let cleaned = clean_summary(&long);
        assert!(cleaned.chars().count() <= MAX_SUMMARY_CHARS);
        assert!(!cleaned.contains("  "));
    }
}
