//! Selector parsing with an owned error type.

use scraper::Selector;
use std::error::Error;
use std::fmt;

/// Parses a CSS selector list such as `".feed a[href*='/in/'], h1 + div"`.
pub fn parse_selector(input: &str) -> Result<Selector, SelectorError> {
    Selector::parse(input).map_err(|err| SelectorError {
        selector: input.trim().to_string(),
        reason: err.to_string(),
    })
}

/// Error raised for selectors `scraper` cannot parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorError {
    selector: String,
    reason: String,
}

impl SelectorError {
    /// Selector text as given.
    pub fn selector(&self) -> &str {
        &self.selector
    }
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid selector `{}`: {}", self.selector, self.reason)
    }
}

impl Error for SelectorError {}
