//! Browser-style URL match patterns (`<scheme>://<host>/<path>`).

use std::error::Error;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Pages the content agent attaches to by default.
pub const DEFAULT_PAGE_PATTERN: &str = "*://*.linkedin.com/*";

/// A parsed match pattern such as `*://*.linkedin.com/*`.
///
/// `*` as the scheme accepts `http` and `https`. A host of `*` accepts any
/// host; `*.example.com` accepts `example.com` and all of its subdomains.
/// The path is a glob where `*` spans any run of characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPattern {
    source: String,
    scheme: Scheme,
    host: Host,
    path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scheme {
    Web,
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Host {
    Any,
    Subdomains(String),
    Exact(String),
}

impl MatchPattern {
    /// Parses a pattern.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let invalid = |reason: &'static str| PatternError {
            pattern: pattern.to_string(),
            reason,
        };

        let (scheme, rest) = pattern
            .split_once("://")
            .ok_or_else(|| invalid("missing `://` separator"))?;
        let scheme = match scheme {
            "*" => Scheme::Web,
            "" => return Err(invalid("empty scheme")),
            other if other.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) => {
                Scheme::Exact(other.to_ascii_lowercase())
            }
            _ => return Err(invalid("scheme contains invalid characters")),
        };

        let (host, path) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => return Err(invalid("missing path")),
        };
        let host = match host {
            "*" => Host::Any,
            "" => return Err(invalid("empty host")),
            wildcard if wildcard.starts_with("*.") => {
                let suffix = &wildcard[2..];
                if suffix.is_empty() || suffix.contains('*') {
                    return Err(invalid("host wildcard must prefix a domain"));
                }
                Host::Subdomains(suffix.to_ascii_lowercase())
            }
            exact if exact.contains('*') => {
                return Err(invalid("`*` in host is only allowed as a leading `*.`"))
            }
            exact => Host::Exact(exact.to_ascii_lowercase()),
        };

        Ok(Self {
            source: pattern.to_string(),
            scheme,
            host,
            path: path.to_string(),
        })
    }

    /// Pattern text as given.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when `url` falls under the pattern. Unparseable URLs never match.
    pub fn matches(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|url| self.matches_url(&url))
    }

    /// [`MatchPattern::matches`] for an already parsed URL.
    pub fn matches_url(&self, url: &Url) -> bool {
        let scheme_ok = match &self.scheme {
            Scheme::Web => matches!(url.scheme(), "http" | "https"),
            Scheme::Exact(scheme) => url.scheme() == scheme,
        };
        if !scheme_ok {
            return false;
        }

        let host = url.host_str().unwrap_or_default();
        let host_ok = match &self.host {
            Host::Any => true,
            Host::Exact(expected) => host == expected,
            Host::Subdomains(suffix) => {
                host == suffix
                    || host
                        .strip_suffix(suffix.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            }
        };
        if !host_ok {
            return false;
        }

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        glob_match(&self.path, &path)
    }
}

impl FromStr for MatchPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MatchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Default for MatchPattern {
    fn default() -> Self {
        Self {
            source: DEFAULT_PAGE_PATTERN.to_string(),
            scheme: Scheme::Web,
            host: Host::Subdomains("linkedin.com".to_string()),
            path: "/*".to_string(),
        }
    }
}

/// Glob where `*` matches any (possibly empty) run of characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(head) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(head) else {
        return false;
    };
    let pieces: Vec<&str> = parts.collect();
    let Some((last, middle)) = pieces.split_last() else {
        return rest.is_empty();
    };
    for piece in middle {
        match rest.find(piece) {
            Some(index) => rest = &rest[index + piece.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// Rejected match pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternError {
    pattern: String,
    reason: &'static str,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid match pattern `{}`: {}", self.pattern, self.reason)
    }
}

impl Error for PatternError {}
