use crate::bookmark::BookmarkRecord;

/// Case-insensitive substring filter over title and url.
///
/// The filter holds only its predicate. Projections are computed from the
/// records handed in on every read, so a projection can never be staler
/// than the cache it reads from, and it never reorders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewFilter {
    text: String,
    needle: String,
}

impl ViewFilter {
    pub fn new(text: impl Into<String>) -> Self {
        let mut filter = Self::default();
        filter.set(text);
        filter
    }

    pub fn set(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.needle = self.text.to_lowercase();
    }

    /// The filter text as entered.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }

    pub fn matches(&self, record: &BookmarkRecord) -> bool {
        self.needle.is_empty()
            || record.title.to_lowercase().contains(&self.needle)
            || record.url.to_lowercase().contains(&self.needle)
    }

    /// Lazy view over `records`. Clone the iterator to restart it.
    pub fn project<'a>(&'a self, records: &'a [BookmarkRecord]) -> Projection<'a> {
        Projection {
            filter: self,
            inner: records.iter(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projection<'a> {
    filter: &'a ViewFilter,
    inner: std::slice::Iter<'a, BookmarkRecord>,
}

impl<'a> Iterator for Projection<'a> {
    type Item = &'a BookmarkRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let filter = self.filter;
        self.inner.by_ref().find(|r| filter.matches(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, title: &str, url: &str, created_secs: i64) -> BookmarkRecord {
        BookmarkRecord {
            id: id.into(),
            owner_id: "u1".into(),
            title: title.into(),
            url: url.into(),
            favicon: None,
            last_visited: None,
            created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
        }
    }

    fn sample() -> Vec<BookmarkRecord> {
        vec![
            record("b3", "Rust Book", "https://doc.rust-lang.org/book/", 30),
            record("b2", "Tokio", "https://tokio.rs/", 20),
            record("b1", "Crates", "https://crates.io/", 10),
        ]
    }

    #[test]
    fn empty_filter_matches_everything() {
        let records = sample();
        let filter = ViewFilter::default();
        assert!(filter.is_empty());
        assert_eq!(filter.project(&records).count(), 3);
    }

    #[test]
    fn matches_title_case_insensitively() {
        let records = sample();
        let filter = ViewFilter::new("rUsT");
        let ids: Vec<&str> = filter.project(&records).map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b3"]);
        assert_eq!(filter.text(), "rUsT");
    }

    #[test]
    fn matches_url_and_keeps_order() {
        let records = sample();
        let filter = ViewFilter::new("https://");
        let ids: Vec<&str> = filter.project(&records).map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b3", "b2", "b1"]);

        let filter = ViewFilter::new("TOKIO.RS");
        assert_eq!(filter.project(&records).count(), 1);
    }

    #[test]
    fn projection_is_restartable() {
        let records = sample();
        let filter = ViewFilter::new("o");
        let projection = filter.project(&records);
        let first: Vec<_> = projection.clone().collect();
        let second: Vec<_> = projection.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn no_match_yields_nothing() {
        let records = sample();
        let filter = ViewFilter::new("python");
        assert_eq!(filter.project(&records).next(), None);
    }
}
