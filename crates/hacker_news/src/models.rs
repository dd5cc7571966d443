use serde::Deserialize;

/// Item payload from the Hacker News Firebase API. Dead/deleted items come
/// back with most fields missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HnStory {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}
