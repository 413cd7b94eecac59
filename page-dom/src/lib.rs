//! Mutable HTML document model for annotating live pages.
//!
//! Documents are parsed by `scraper` and edited in place through the
//! `ego_tree` arena it exposes. Queries use [`scraper::Selector`] and
//! serialization goes through html5ever, so callers get the full selector
//! grammar and browser-compatible output. Structural changes are recorded as
//! [`MutationRecord`]s that observers drain with [`Document::take_mutations`].

mod document;
mod selector;

pub use document::{element, text, Document, MutationRecord};
pub use ego_tree::NodeId;
pub use scraper::{node::Element, CaseSensitivity, Node, Selector};
pub use selector::{parse_selector, SelectorError};

/// Parses `html` and returns the outer HTML of every element matching `selector`.
///
/// # Example
///
/// ```
/// use page_dom::select_outer_html;
///
/// let html = r#"<div class="card"><p class="name">Ada</p></div>"#;
/// let matches = select_outer_html(html, ".card .name").unwrap();
/// assert_eq!(matches, vec![r#"<p class="name">Ada</p>"#.to_string()]);
/// ```
pub fn select_outer_html(html: &str, selector: &str) -> Result<Vec<String>, SelectorError> {
    let selector = parse_selector(selector)?;
    let document = Document::parse(html);
    Ok(document
        .select(&selector)
        .into_iter()
        .map(|id| document.outer_html(id))
        .collect())
}
