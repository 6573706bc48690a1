use crate::post::{Facet, Feature};

/// Structured view of a post's rich-text annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFacets {
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub link_count: u32,
}

/// Walk every feature of every facet in source order. Duplicates are kept,
/// unknown feature kinds are skipped.
pub fn extract(facets: Option<&[Facet]>) -> ExtractedFacets {
    let mut extracted = ExtractedFacets::default();

    for feature in facets.unwrap_or_default().iter().flat_map(|f| &f.features) {
        match feature {
            Feature::Tag { tag } => extracted.hashtags.push(tag.clone()),
            Feature::Mention { did } => extracted.mentions.push(did.clone()),
            Feature::Link { .. } => extracted.link_count = extracted.link_count.saturating_add(1),
            Feature::Unknown => {}
        }
    }

    extracted
}
