pub mod feed;
pub mod news;
pub mod sources;

pub use feed::{parse_feed, FeedEntry, FeedSource, FetchFeed, HttpFeedFetcher};
pub use news::{FeedOutcome, NewsIngest, NewsRunReport};
pub use sources::{SourceFeedSweep, SweepReport};
