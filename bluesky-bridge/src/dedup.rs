use std::time::Duration;

use moka::sync::Cache;

/// Post URIs already handed to the pipeline. Bounded by capacity and TTL so a
/// long-running process doesn't grow without limit; the TTL should exceed the
/// window in which a post can reappear on the timeline.
#[derive(Clone)]
pub struct Deduplicator {
    seen: Cache<String, ()>, // URI -> presence marker
}

impl Deduplicator {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let seen = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { seen }
    }

    pub fn seen(&self, uri: &str) -> bool {
        self.seen.contains_key(uri)
    }

    pub fn mark_seen(&self, uri: &str) {
        self.seen.insert(uri.to_owned(), ());
    }

    /// Check and mark in one step. Returns `true` when the URI is new, in
    /// which case it is already marked when this returns.
    pub fn check_and_mark(&self, uri: &str) -> bool {
        self.seen.entry_by_ref(uri).or_insert(()).is_fresh()
    }

    pub fn len(&self) -> u64 {
        self.seen.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("seen", &"<moka cache>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    const URI: &str = "at://did:plc:abc/app.bsky.feed.post/1";

    #[test]
    fn test_seen_after_mark() {
        let dedup = Deduplicator::new(100, Duration::from_secs(60));

        assert!(!dedup.seen(URI));
        dedup.mark_seen(URI);
        assert!(dedup.seen(URI));
        assert!(!dedup.seen("at://did:plc:abc/app.bsky.feed.post/2"));
    }

    #[test]
    fn test_check_and_mark_only_once() {
        let dedup = Deduplicator::new(100, Duration::from_secs(60));

        assert!(dedup.check_and_mark(URI));
        assert!(!dedup.check_and_mark(URI));
        assert!(dedup.seen(URI));
    }

    #[test]
    fn test_check_and_mark_respects_mark_seen() {
        let dedup = Deduplicator::new(100, Duration::from_secs(60));

        dedup.mark_seen(URI);
        assert!(!dedup.check_and_mark(URI));
    }

    #[test]
    fn test_entries_expire() {
        let dedup = Deduplicator::new(100, Duration::from_millis(50));

        dedup.mark_seen(URI);
        assert!(dedup.seen(URI));

        thread::sleep(Duration::from_millis(120));
        assert!(!dedup.seen(URI));
        assert!(dedup.check_and_mark(URI));
    }
}
