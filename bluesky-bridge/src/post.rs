//! Wire types for `app.bsky.feed.getTimeline` responses.
//!
//! Only the fields the bridge reads are modelled. Everything optional on the
//! wire defaults, so a post with no facets, embed, reply or counters still
//! deserializes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Timeline {
    #[serde(default)]
    pub cursor: Option<String>,
    // One malformed entry must not cost the rest of the snapshot
    #[serde(deserialize_with = "skip_invalid")]
    pub feed: Vec<FeedItem>,
}

/// One entry of the home timeline: the post itself, plus the reason it
/// appeared (a repost) when it isn't an original post by a followed account.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedItem {
    pub post: PostView,
    #[serde(default)]
    pub reason: Option<Reason>,
}

impl FeedItem {
    pub fn uri(&self) -> &str {
        &self.post.uri
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub author: Author,
    pub record: PostRecord,
    pub indexed_at: String,
    #[serde(default)]
    pub embed: Option<Embed>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub repost_count: Option<u64>,
    #[serde(default)]
    pub reply_count: Option<u64>,
    #[serde(default)]
    pub quote_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Author {
    pub handle: String,
    #[serde(default)]
    pub did: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub facets: Option<Vec<Facet>>,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    #[serde(default)]
    pub langs: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReplyRef {
    #[serde(default)]
    pub parent: Option<StrongRef>,
    #[serde(default)]
    pub root: Option<StrongRef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrongRef {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
}

/// Embedded media view. Only image embeds carry an `images` list, every other
/// embed kind leaves it empty.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Embed {
    #[serde(rename = "$type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Reason {
    #[serde(rename = "$type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub by: Option<Author>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Facet {
    #[serde(default, deserialize_with = "unknown_if_invalid")]
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
pub enum Feature {
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link {
        #[serde(default)]
        uri: Option<String>,
    },
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
    // Feature kinds added to the lexicon after this was written
    #[serde(other)]
    Unknown,
}

fn skip_invalid<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let entries = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("skipping malformed timeline entry: {}", e);
                None
            }
        })
        .collect())
}

// A feature without `$type`, or missing the field its kind requires, is
// treated like a kind we don't know.
fn unknown_if_invalid<'de, D>(deserializer: D) -> Result<Vec<Feature>, D::Error>
where
    D: Deserializer<'de>,
{
    let features = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(features
        .into_iter()
        .map(|feature| serde_json::from_value(feature).unwrap_or(Feature::Unknown))
        .collect())
}
