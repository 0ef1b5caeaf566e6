/// One feed entry's metadata, delivered to the consumer in feed order.
///
/// `id` is the feed's identifier for the entry and doubles as the pagination
/// cursor meaning "everything after this entry".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataItem {
    pub id: String,
    pub url: String,
    pub title: String,
    pub author: String,
    pub permalink: String,
}

/// A single image to fetch and prepare for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub id: String,
    pub url: String,
    pub target_width: u32,
    pub target_height: u32,
}
