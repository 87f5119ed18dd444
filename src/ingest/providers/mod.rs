// src/ingest/providers/mod.rs
pub mod bulletin;
pub mod feed;

use crate::config::SourceKind;
use crate::ingest::types::DocumentParser;

pub use bulletin::BulletinParser;
pub use feed::FeedParser;

/// Parser capability for a source type.
pub fn parser_for(kind: SourceKind) -> &'static dyn DocumentParser {
    static FEED: FeedParser = FeedParser;
    static BULLETIN: BulletinParser = BulletinParser;
    match kind {
        SourceKind::Feed => &FEED,
        SourceKind::Bulletin => &BULLETIN,
    }
}
