//! In-memory list state and the `is_listed` decision.

use crate::normalizer::{normalize, NormalizedUrl};
use crate::record::EntryList;
use std::sync::Arc;
use tracing::trace;

/// Owned matcher state for one scanning context.
///
/// Entries are normalized once when the list is installed. The list is only
/// ever swapped wholesale through [`Matcher::replace`].
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    entries: Arc<Vec<NormalizedUrl>>,
}

impl Matcher {
    /// Builds a matcher over `entries`.
    pub fn new(entries: &EntryList) -> Self {
        let mut matcher = Self::default();
        matcher.replace(entries);
        matcher
    }

    /// Installs a new list, discarding the previous one.
    ///
    /// Entries whose canonical form is empty are dropped; an empty needle
    /// would otherwise be contained in every URL.
    pub fn replace(&mut self, entries: &EntryList) {
        let normalized = entries
            .iter()
            .map(normalize)
            .filter(|entry| !entry.is_empty())
            .collect();
        self.entries = Arc::new(normalized);
    }

    /// Number of usable entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are installed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the canonical form of `url` contains any listed entry.
    pub fn is_listed(&self, url: &str) -> bool {
        self.matching_entry(url).is_some()
    }

    /// First entry contained in the canonical form of `url`.
    pub fn matching_entry(&self, url: &str) -> Option<&NormalizedUrl> {
        if url.is_empty() || self.entries.is_empty() {
            return None;
        }
        let clean = normalize(url);
        self.entries.iter().find(|entry| {
            let matched = clean.contains(entry);
            trace!(url = %clean, entry = %entry, matched, "compared profile url");
            matched
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(entries: &[&str]) -> Matcher {
        Matcher::new(&entries.iter().copied().collect())
    }

    #[test]
    fn empty_list_never_matches() {
        let matcher = Matcher::default();
        assert!(!matcher.is_listed("https://site.com/in/alice"));
        assert!(!matcher.is_listed(""));
    }

    #[test]
    fn empty_input_never_matches() {
        let matcher = matcher(&["/in/alice", "https://site.com/in/bob"]);
        assert!(!matcher.is_listed(""));
    }

    #[test]
    fn overlay_paths_match_bare_entries() {
        let matcher = matcher(&["/in/alice"]);
        assert!(matcher.is_listed("https://site.com/in/alice/overlay/about/"));
        assert!(matcher.is_listed("https://www.site.com/in/Alice?trk=feed#x"));
        assert!(!matcher.is_listed("https://site.com/in/bob"));
    }

    #[test]
    fn full_entries_match_locale_prefixed_urls() {
        let matcher = matcher(&["https://www.linkedin.com/in/jdoe/"]);
        assert!(matcher.is_listed("https://www.linkedin.com/in/jdoe"));
        assert!(matcher.is_listed("https://www.linkedin.com/in/jdoe/recent-activity/"));
        assert!(!matcher.is_listed("https://de.linkedin.com/in/jdoe"));
    }

    #[test]
    fn substring_containment_is_preserved() {
        // Prefix collisions still match; see DESIGN.md open questions.
        let matcher = matcher(&["/in/ann"]);
        assert!(matcher.is_listed("https://site.com/in/anna"));
    }

    #[test]
    fn entries_normalizing_to_nothing_are_ignored() {
        let matcher = matcher(&["?ref=x", "/", "/in/dana"]);
        assert_eq!(matcher.len(), 1);
        assert!(!matcher.is_listed("https://site.com/in/eve"));
        assert_eq!(
            matcher
                .matching_entry("https://site.com/in/dana/")
                .map(NormalizedUrl::as_str),
            Some("/in/dana")
        );
    }

    #[test]
    fn replace_swaps_the_whole_list() {
        let mut matcher = matcher(&["/in/old"]);
        let snapshot = matcher.clone();
        matcher.replace(&["/in/new"].into_iter().collect());

        assert!(!matcher.is_listed("https://site.com/in/old"));
        assert!(matcher.is_listed("https://site.com/in/new"));
        assert!(snapshot.is_listed("https://site.com/in/old"));
    }
}
