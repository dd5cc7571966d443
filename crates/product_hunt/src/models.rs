use serde::Deserialize;
use serde_json::{json, Value};
use time::{Date, Duration, OffsetDateTime, Time};

use common::normalize::to_rfc3339;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, bound = "T: Default + Deserialize<'de>")]
pub struct Edge<T> {
    pub node: Option<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", bound = "T: Default + Deserialize<'de>")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: Option<PageInfo>,
}

impl<T> Connection<T> {
    pub fn nodes(self) -> Vec<T> {
        self.edges.into_iter().filter_map(|edge| edge.node).collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Maker {
    pub name: String,
    pub username: String,
    pub twitter_username: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopicRef {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PostNode {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub tagline: String,
    pub description: String,
    pub website: String,
    pub url: String,
    pub votes_count: i64,
    pub comments_count: i64,
    pub daily_rank: Option<i64>,
    pub weekly_rank: Option<i64>,
    pub featured_at: Option<String>,
    pub created_at: Option<String>,
    pub thumbnail: Option<Thumbnail>,
    pub topics: Option<Connection<TopicRef>>,
    pub makers: Option<Vec<Maker>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopicNode {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub followers_count: i64,
    pub posts_count: i64,
}

/// UTC day window [00:00 of `day`, 00:00 of the next day).
pub fn utc_day_window(day: Date) -> (OffsetDateTime, OffsetDateTime) {
    let start = day.with_time(Time::MIDNIGHT).assume_utc();
    (start, start + Duration::days(1))
}

/// Day label used to group snapshots, e.g. `2026-08-07`.
pub fn day_key(day: Date) -> String {
    day.to_string()
}

/// Minute-resolution snapshot key, e.g. `2026-08-07T09:25:00Z`.
pub fn snapshot_key(now: OffsetDateTime) -> String {
    format!(
        "{}T{:02}:{:02}:00Z",
        day_key(now.date()),
        now.hour(),
        now.minute()
    )
}

/// Snapshots expire seven days after their window day.
pub fn snapshot_expiry(day: Date) -> OffsetDateTime {
    day.with_time(Time::MIDNIGHT).assume_utc() + Duration::days(7)
}

fn topics_json(post: &PostNode) -> Value {
    let topics: Vec<Value> = post
        .topics
        .clone()
        .map(Connection::nodes)
        .unwrap_or_default()
        .into_iter()
        .filter(|t| !t.name.is_empty() && !t.slug.is_empty())
        .map(|t| json!({"name": t.name.trim(), "slug": t.slug.trim()}))
        .collect();
    Value::from(topics)
}

fn makers_json(post: &PostNode) -> Value {
    let makers: Vec<Value> = post
        .makers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|m| {
            json!({
                "name": m.name.trim(),
                "username": m.username.trim(),
                "twitter_username": m.twitter_username.trim(),
            })
        })
        .collect();
    Value::from(makers)
}

/// Newest-posts feed row; dual natural key (ph_id, url).
pub fn post_to_source_doc(post: &PostNode) -> Option<Value> {
    let id = post.id.trim();
    let name = post.name.trim();
    let url = post.url.trim();
    if id.is_empty() || name.is_empty() || url.is_empty() {
        return None;
    }

    Some(json!({
        "ph_id": id,
        "name": name,
        "tagline": post.tagline.trim(),
        "description": post.description.trim(),
        "slug": post.slug.trim(),
        "website": post.website.trim(),
        "url": url,
        "votes_count": post.votes_count,
        "comments_count": post.comments_count,
        "daily_rank": post.daily_rank.unwrap_or(0),
        "weekly_rank": post.weekly_rank.unwrap_or(0),
        "featured_at": post.featured_at.as_deref().unwrap_or("").trim(),
        "created_at": post.created_at.as_deref().unwrap_or("").trim(),
    }))
}

pub fn topic_to_doc(topic: &TopicNode) -> Option<Value> {
    let id = topic.id.trim();
    let name = topic.name.trim();
    let slug = topic.slug.trim();
    if id.is_empty() || name.is_empty() || slug.is_empty() {
        return None;
    }

    Some(json!({
        "ph_id": id,
        "name": name,
        "slug": slug,
        "followers_count": topic.followers_count,
        "posts_count": topic.posts_count,
    }))
}

/// Topic-catalog product row, refreshed in place run over run.
pub fn post_to_product_doc(post: &PostNode, topic_slug: &str) -> Option<Value> {
    let id = post.id.trim();
    let name = post.name.trim();
    let slug = post.slug.trim();
    let url = post.url.trim();
    if id.is_empty() || name.is_empty() || slug.is_empty() || url.is_empty() {
        return None;
    }

    Some(json!({
        "ph_id": id,
        "name": name,
        "slug": slug,
        "tagline": post.tagline.trim(),
        "description": post.description.trim(),
        "website_url": post.website.trim(),
        "url": url,
        "votes_count": post.votes_count,
        "comments_count": post.comments_count,
        "daily_rank": post.daily_rank.unwrap_or(0),
        "featured_at": post.featured_at.as_deref().unwrap_or("").trim(),
        "created_at": post.created_at.as_deref().unwrap_or("").trim(),
        "thumbnail": post.thumbnail.as_ref().map(|t| t.url.trim()).unwrap_or(""),
        "topics": topics_json(post),
        "makers": makers_json(post),
        "topic_slug": topic_slug,
        "is_trending": false,
    }))
}

/// Ranked snapshot row; composite natural key (ph_id, snapshot_key).
pub fn post_to_snapshot_doc(
    post: &PostNode,
    rank: usize,
    snapshot_key: &str,
    posted_after: OffsetDateTime,
    posted_before: OffsetDateTime,
    expires_at: OffsetDateTime,
) -> Option<Value> {
    let id = post.id.trim();
    let name = post.name.trim();
    if id.is_empty() || name.is_empty() {
        return None;
    }

    Some(json!({
        "ph_id": id,
        "snapshot_key": snapshot_key,
        "rank": rank,
        "name": name,
        "slug": post.slug.trim(),
        "tagline": post.tagline.trim(),
        "website": post.website.trim(),
        "url": post.url.trim(),
        "votes_count": post.votes_count,
        "comments_count": post.comments_count,
        "daily_rank": post.daily_rank.unwrap_or(0),
        "featured_at": post.featured_at.as_deref().unwrap_or("").trim(),
        "created_at": post.created_at.as_deref().unwrap_or("").trim(),
        "thumbnail": post.thumbnail.as_ref().map(|t| t.url.trim()).unwrap_or(""),
        "posted_after": to_rfc3339(posted_after),
        "posted_before": to_rfc3339(posted_before),
        "expires_at": to_rfc3339(expires_at),
    }))
}

/// Daily trending board row; the whole board is replaced per run.
pub fn post_to_trending_doc(post: &PostNode, source_date: &str) -> Option<Value> {
    let name = post.name.trim();
    if name.is_empty() {
        return None;
    }

    Some(json!({
        "name": name,
        "tagline": post.tagline.trim(),
        "votes_count": post.votes_count,
        "website": post.website.trim(),
        "source": "producthunt",
        "source_date": source_date,
    }))
}
