/// Inclusion keywords for the AI news filter.
pub const AI_KEYWORDS: &[&str] = &[
    "ai",
    "artificial intelligence",
    "machine learning",
    "deep learning",
    "gpt",
    "chatgpt",
    "llm",
    "generative ai",
    "gen ai",
    "openai",
    "anthropic",
    "claude",
    "gemini",
    "deepmind",
    "computer vision",
    "nlp",
    "natural language processing",
    "robotics",
];

/// Exclusions beat inclusions: overlapping terms ("AI" inside military
/// coverage) would otherwise produce false positives.
pub const EXCLUDED_KEYWORDS: &[&str] = &[
    "war",
    "battlefield",
    "missile",
    "airstrike",
    "military",
    "conflict",
    "ceasefire",
    "invasion",
    "terror",
    "election",
    "geopolitics",
];

/// Case-insensitive substring classifier over free text.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl KeywordFilter {
    pub fn new(include: &[&str], exclude: &[&str]) -> Self {
        Self {
            include: include.iter().map(|s| s.to_lowercase()).collect(),
            exclude: exclude.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    pub fn ai_news() -> Self {
        Self::new(AI_KEYWORDS, EXCLUDED_KEYWORDS)
    }

    /// Exclusion list is evaluated first; any hit disqualifies the text
    /// regardless of inclusion matches.
    pub fn matches(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();

        if self.exclude.iter().any(|k| haystack.contains(k)) {
            return false;
        }

        self.include.iter().any(|k| haystack.contains(k))
    }

    /// Classify an item from its visible parts, the way feed entries carry
    /// them: title, snippet, category labels.
    pub fn matches_parts(&self, title: &str, summary: &str, categories: &[String]) -> bool {
        let text = format!("{} {} {}", title, summary, categories.join(" "));
        self.matches(&text)
    }
}
