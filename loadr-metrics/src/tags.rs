use smallvec::SmallVec;
use std::sync::Arc;

/// A normalized (sorted, deduplicated-by-key) tag set identifying one series.
///
/// Series tag sets are small in practice (usually just `scenario`), so the
/// backing storage is inline up to two pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    tags: SmallVec<[(Arc<str>, Arc<str>); 2]>,
}

impl TagSet {
    pub const EMPTY: TagSet = TagSet {
        tags: SmallVec::new_const(),
    };

    /// Build a tag set from arbitrary pairs. Keys are sorted; the first value
    /// wins on duplicate keys.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut tags: SmallVec<[(Arc<str>, Arc<str>); 2]> = pairs
            .into_iter()
            .map(|(k, v)| (Arc::<str>::from(k), Arc::<str>::from(v)))
            .collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        tags.dedup_by(|a, b| a.0 == b.0);
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tags.iter().map(|(k, v)| (k.as_ref(), v.as_ref()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let idx = self.tags.partition_point(|(k, _)| k.as_ref() < key);
        self.tags
            .get(idx)
            .and_then(|(k, v)| (k.as_ref() == key).then_some(v.as_ref()))
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pairs_normalizes_order() {
        let a = TagSet::from_pairs([("b", "2"), ("a", "1")]);
        let b = TagSet::from_pairs([("a", "1"), ("b", "2")]);
        assert_eq!(a, b);
        assert_eq!(a.get("a"), Some("1"));
        assert_eq!(a.get("b"), Some("2"));
        assert_eq!(a.get("c"), None);
    }

    #[test]
    fn duplicate_keys_keep_first_value() {
        let t = TagSet::from_pairs([("k", "1"), ("k", "2")]);
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("k"), Some("1"));
    }

    #[test]
    fn empty_tag_set() {
        assert!(TagSet::EMPTY.is_empty());
        assert_eq!(TagSet::from_pairs([]), TagSet::EMPTY);
    }
}
