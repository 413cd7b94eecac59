//! Profile URL canonicalization used for list matching.

use serde::Serialize;
use std::fmt;

const OVERLAY_SEGMENT: &str = "/overlay/";

/// Canonical comparison form of a profile URL.
///
/// Lowercased, cut at the first `?` and `#`, stripped of every
/// `/overlay/<segment>` and of trailing slashes. Only ever used for
/// comparisons; never written back to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    /// Canonical string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when normalization left nothing behind.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Substring containment between canonical forms.
    pub fn contains(&self, other: &NormalizedUrl) -> bool {
        self.0.contains(other.as_str())
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalizes a profile URL for comparison. Total over all strings.
pub fn normalize(url: &str) -> NormalizedUrl {
    if url.is_empty() {
        return NormalizedUrl(String::new());
    }

    let lowered = url.to_lowercase();
    let without_query = lowered.split('?').next().unwrap_or_default();
    let without_fragment = without_query.split('#').next().unwrap_or_default();

    let mut clean = without_fragment.to_string();
    while let Some(stripped) = strip_overlay(&clean) {
        clean = stripped;
    }

    let trimmed_len = clean.trim_end_matches('/').len();
    clean.truncate(trimmed_len);
    NormalizedUrl(clean)
}

/// Replaces the first `/overlay/<segment>` (plus an optional slash) with `/`.
fn strip_overlay(input: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(offset) = input[search_from..].find(OVERLAY_SEGMENT) {
        let start = search_from + offset;
        let segment_start = start + OVERLAY_SEGMENT.len();
        let rest = &input[segment_start..];
        let segment_len = rest.find('/').unwrap_or(rest.len());
        if segment_len == 0 {
            // `/overlay//`: empty segment, keep scanning after it.
            search_from = start + 1;
            continue;
        }
        let mut end = segment_start + segment_len;
        if input[end..].starts_with('/') {
            end += 1;
        }
        let mut out = String::with_capacity(input.len());
        out.push_str(&input[..start]);
        out.push('/');
        out.push_str(&input[end..]);
        return Some(out);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lowercases_and_drops_query_and_fragment() {
        assert_eq!(
            normalize("https://x.com/in/Bob?trk=1#abc"),
            normalize("https://x.com/in/bob")
        );
        assert_eq!(normalize("https://x.com/in/bob#top?x").as_str(), "https://x.com/in/bob");
    }

    #[test]
    fn strips_overlay_segments_and_trailing_slash() {
        assert_eq!(
            normalize("https://site.com/in/alice/overlay/about/").as_str(),
            "https://site.com/in/alice"
        );
        assert_eq!(
            normalize("https://site.com/in/alice/overlay/about-this-profile/details/").as_str(),
            "https://site.com/in/alice/details"
        );
        assert_eq!(
            normalize("/in/a/overlay/x/overlay/y/").as_str(),
            "/in/a"
        );
        assert_eq!(normalize("/in/a/overlay//b").as_str(), "/in/a/overlay//b");
    }

    #[test]
    fn trailing_slashes_collapse_completely() {
        assert_eq!(normalize("/in/carol///").as_str(), "/in/carol");
        assert!(normalize("///").is_empty());
        assert!(normalize("").is_empty());
        assert!(normalize("?only=query").is_empty());
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "",
            "/",
            "HTTPS://WWW.LinkedIn.com/in/Jane-Doe/?miniProfileUrn=abc",
            "https://site.com/in/alice/overlay/about/",
            "/in/a/overlay/x/overlay/y/",
            "/overlay/overlay/overlay/",
            "/in/a/overlay//b//",
            "https://x.com/in/ÄBC#frag",
            "  /in/space/  ",
        ];
        for sample in samples {
            let once = normalize(sample);
            let twice = normalize(once.as_str());
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn containment_compares_canonical_forms() {
        let observed = normalize("https://www.linkedin.com/in/jdoe/");
        assert!(observed.contains(&normalize("/in/JDOE")));
        assert!(!observed.contains(&normalize("/in/jdoe-2")));
    }
}
