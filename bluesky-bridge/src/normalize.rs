use serde::{Deserialize, Serialize};

use crate::facets::{self, ExtractedFacets};
use crate::post::FeedItem;

/// The fixed-shape record published for every post. Field names and types
/// mirror the `BlueSkyMessage` Avro record; counts are Avro `int`s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub author: String,
    pub text: String,
    pub posted_at: String,
    pub images: i32,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub link_count: i32,
    pub repost_by: Option<String>,
    pub reply_to: Option<String>,
    pub like_count: i32,
    pub repost_count: i32,
    pub reply_count: i32,
    pub quote_count: i32,
    pub lang: Option<String>,
}

/// Map a timeline entry and its extracted facets to a `NormalizedMessage`.
/// Total: every absent optional input falls back to 0 or `None`.
pub fn normalize(item: &FeedItem, facets: ExtractedFacets) -> NormalizedMessage {
    let post = &item.post;
    let record = &post.record;

    NormalizedMessage {
        author: post.author.handle.clone(),
        text: record.text.clone(),
        posted_at: post.indexed_at.clone(),
        images: post
            .embed
            .as_ref()
            .and_then(|e| e.images.as_ref())
            .map_or(0, |images| clamp_count(images.len() as u64)),
        hashtags: facets.hashtags,
        mentions: facets.mentions,
        link_count: clamp_count(u64::from(facets.link_count)),
        repost_by: item
            .reason
            .as_ref()
            .and_then(|r| r.by.as_ref())
            .and_then(|by| non_empty(&by.handle)),
        reply_to: record
            .reply
            .as_ref()
            .and_then(|r| r.parent.as_ref())
            .and_then(|parent| non_empty(&parent.uri)),
        like_count: clamp_count(post.like_count.unwrap_or(0)),
        repost_count: clamp_count(post.repost_count.unwrap_or(0)),
        reply_count: clamp_count(post.reply_count.unwrap_or(0)),
        quote_count: clamp_count(post.quote_count.unwrap_or(0)),
        lang: record
            .langs
            .as_ref()
            .and_then(|l| l.first())
            .and_then(|lang| non_empty(lang)),
    }
}

/// Extract facets and normalize in one step.
pub fn normalize_item(item: &FeedItem) -> NormalizedMessage {
    let extracted = facets::extract(item.post.record.facets.as_deref());
    normalize(item, extracted)
}

// An empty handle, uri or language tag is published as null
fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}

// Avro ints are signed 32 bit, saturate rather than wrap
fn clamp_count(count: u64) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}
