//! Idempotent badge insertion over a [`Document`].
//!
//! A scan walks three candidate sets: the page's own headline when the page
//! location is listed, feed and search items keyed by their first profile
//! link, and any remaining profile links. Every labeled element receives the
//! [`PROCESSED_ATTR`] marker, and the guard refuses targets that are marked,
//! sit under a marked ancestor, or already hold a badge. Repeated scans
//! therefore converge to the same tree.

use crate::matcher::Matcher;
use page_dom::{CaseSensitivity, Document, Node, NodeId, Selector};
use tracing::trace;
use url::Url;

/// Class carried by every badge.
pub const BADGE_CLASS: &str = "pod-user-label";
/// Extra class for compact badges placed after names and links.
pub const BADGE_FEED_MODIFIER: &str = "pod-user-label--feed";
/// Visible badge text.
pub const BADGE_TEXT: &str = "Pod User";
/// Attribute set on labeled elements and their containers.
pub const PROCESSED_ATTR: &str = "data-pod-user-processed";

const VISUAL_TAGS: &[&str] = &["img", "svg", "picture"];
const VISUAL_CLASS_HINTS: &[&str] = &["avatar", "__image", "photo"];

/// Where a badge lands relative to the target's primary text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgePlacement {
    /// Full badge before the text (profile and item headlines).
    Profile,
    /// Compact badge after the text (names and links).
    Feed,
}

/// Selector sets driving a scan.
#[derive(Debug, Clone)]
pub struct LabelRules {
    /// Page headline candidates, tried in order.
    pub profile_headlines: Vec<Selector>,
    /// Feed posts and search results.
    pub items: Selector,
    /// Link inside an item whose target decides the match.
    pub item_link: Selector,
    /// Headline inside a matching item.
    pub item_headline: Selector,
    /// Author name inside a matching item.
    pub item_name: Selector,
    /// Profile links labeled on their own.
    pub identity_links: Selector,
}

impl Default for LabelRules {
    fn default() -> Self {
        Self {
            profile_headlines: [
                ".text-body-medium.break-words",
                ".pv-text-details__left-panel .text-body-medium",
                "div[data-generated-suggestion-target] .text-body-medium",
                "h1.break-words + div.text-body-medium",
                r#"div[data-generated-suggestion-target="urn:li:fsu_profileActionDelegate"]"#,
            ]
            .into_iter()
            .map(static_selector)
            .collect(),
            items: static_selector(
                ".feed-shared-update-v2, .update-components-actor, \
                 .search-results__list-item, .ember-view[data-test-search-result]",
            ),
            item_link: static_selector(r#"a[href*="/in/"]"#),
            item_headline: static_selector(
                ".update-components-actor__description, .text-body-small.break-words, \
                 .ember-view .text-body-medium",
            ),
            item_name: static_selector(
                ".feed-shared-actor__name, .update-components-actor__name, \
                 .update-components-actor__title .t-bold, .ember-view .t-bold",
            ),
            identity_links: static_selector(r#"a[href*="/in/"]"#),
        }
    }
}

fn static_selector(source: &str) -> Selector {
    page_dom::parse_selector(source).expect("static label selector")
}

/// Counts from one [`Labeler::scan`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Badges added to the page headline (0 or 1).
    pub profile_badges: usize,
    /// Items whose profile link was listed.
    pub items_matched: usize,
    /// Badges added inside items.
    pub item_badges: usize,
    /// Badges added next to standalone profile links.
    pub link_badges: usize,
    /// Listed targets skipped because they hold no text, only imagery.
    pub skipped_visual: usize,
}

impl ScanReport {
    /// Total badges inserted by the scan.
    pub fn inserted(&self) -> usize {
        self.profile_badges + self.item_badges + self.link_badges
    }
}

/// Applies [`LabelRules`] to documents.
#[derive(Debug, Clone, Default)]
pub struct Labeler {
    rules: LabelRules,
}

impl Labeler {
    /// Labels every listed, not yet processed candidate in `doc`.
    pub fn scan(&self, doc: &mut Document, matcher: &Matcher) -> ScanReport {
        let mut report = ScanReport::default();
        if matcher.is_empty() {
            return report;
        }
        self.scan_profile(doc, matcher, &mut report);
        self.scan_items(doc, matcher, &mut report);
        self.scan_links(doc, matcher, &mut report);
        report
    }

    fn scan_profile(&self, doc: &mut Document, matcher: &Matcher, report: &mut ScanReport) {
        let listed = doc.location().is_some_and(|location| matcher.is_listed(location));
        if !listed {
            return;
        }
        let headline = self
            .rules
            .profile_headlines
            .iter()
            .find_map(|selector| doc.select_first(selector));
        if let Some(target) = headline {
            match label(doc, target, BadgePlacement::Profile) {
                Outcome::Labeled => report.profile_badges += 1,
                Outcome::Visual => report.skipped_visual += 1,
                Outcome::Guarded => {}
            }
        }
    }

    fn scan_items(&self, doc: &mut Document, matcher: &Matcher, report: &mut ScanReport) {
        for item in doc.select(&self.rules.items) {
            let done = is_processed(doc, item)
                || doc.ancestors(item).any(|id| is_processed(doc, id));
            if done {
                continue;
            }
            let Some(link) = doc.select_first_within(item, &self.rules.item_link) else {
                continue;
            };
            let listed = resolve_href(doc, link).is_some_and(|href| matcher.is_listed(&href));
            if !listed {
                continue;
            }
            report.items_matched += 1;

            let targets = [
                (&self.rules.item_headline, BadgePlacement::Profile),
                (&self.rules.item_name, BadgePlacement::Feed),
            ];
            for (selector, placement) in targets {
                let Some(target) = doc.select_first_within(item, selector) else {
                    continue;
                };
                match label(doc, target, placement) {
                    Outcome::Labeled => report.item_badges += 1,
                    Outcome::Visual => report.skipped_visual += 1,
                    Outcome::Guarded => {}
                }
            }

            if holds_badge(doc, item) {
                doc.set_attr(item, PROCESSED_ATTR, "true");
            }
        }
    }

    fn scan_links(&self, doc: &mut Document, matcher: &Matcher, report: &mut ScanReport) {
        for link in doc.select(&self.rules.identity_links) {
            if !can_label(doc, link) {
                continue;
            }
            let listed = resolve_href(doc, link).is_some_and(|href| matcher.is_listed(&href));
            if !listed {
                continue;
            }
            match label(doc, link, BadgePlacement::Feed) {
                Outcome::Labeled => report.link_badges += 1,
                Outcome::Visual => report.skipped_visual += 1,
                Outcome::Guarded => {}
            }
        }
    }
}

enum Outcome {
    Labeled,
    Guarded,
    Visual,
}

fn label(doc: &mut Document, target: NodeId, placement: BadgePlacement) -> Outcome {
    if !can_label(doc, target) {
        return Outcome::Guarded;
    }
    if is_visual_only(doc, target) {
        return Outcome::Visual;
    }

    let inserted = match placement {
        BadgePlacement::Profile => match doc.first_text_node(target) {
            Some(text) => doc.insert_before(text, badge(placement)),
            None => doc.prepend(target, badge(placement)),
        },
        BadgePlacement::Feed => match doc.last_text_node(target) {
            Some(text) => doc.insert_after(text, badge(placement)),
            None => doc.append(target, badge(placement)),
        },
    };
    let Some(badge_id) = inserted else {
        return Outcome::Guarded;
    };
    doc.append(badge_id, page_dom::text(BADGE_TEXT));
    doc.set_attr(target, PROCESSED_ATTR, "true");
    trace!(?placement, "inserted badge");
    Outcome::Labeled
}

fn badge(placement: BadgePlacement) -> Node {
    let class = match placement {
        BadgePlacement::Profile => BADGE_CLASS.to_string(),
        BadgePlacement::Feed => format!("{BADGE_CLASS} {BADGE_FEED_MODIFIER}"),
    };
    page_dom::element("span", &[("class", class.as_str())])
}

/// Guard: the target, its ancestors, and its subtree must be free of
/// markers and badges.
fn can_label(doc: &Document, target: NodeId) -> bool {
    if is_processed(doc, target) || is_badge(doc, target) {
        return false;
    }
    let tainted_ancestor = doc
        .ancestors(target)
        .any(|id| is_processed(doc, id) || is_badge(doc, id));
    !tainted_ancestor && !holds_badge(doc, target)
}

fn holds_badge(doc: &Document, id: NodeId) -> bool {
    doc.descendants(id).any(|child| is_badge(doc, child))
}

fn is_processed(doc: &Document, id: NodeId) -> bool {
    doc.element(id)
        .is_some_and(|element| element.attr(PROCESSED_ATTR) == Some("true"))
}

fn is_badge(doc: &Document, id: NodeId) -> bool {
    doc.element(id)
        .is_some_and(|element| element.has_class(BADGE_CLASS, CaseSensitivity::CaseSensitive))
}

fn is_visual_only(doc: &Document, id: NodeId) -> bool {
    let Some(element) = doc.element(id) else {
        return false;
    };
    let hinted = element
        .classes()
        .any(|class| VISUAL_CLASS_HINTS.iter().any(|hint| class.contains(hint)));
    if hinted {
        return true;
    }
    let has_text = !doc.text_content(id).trim().is_empty();
    let has_imagery = doc.descendants(id).any(|child| {
        doc.element(child)
            .is_some_and(|element| VISUAL_TAGS.contains(&element.name()))
    });
    !has_text && has_imagery
}

/// Resolves an anchor's `href` against the document location.
fn resolve_href(doc: &Document, link: NodeId) -> Option<String> {
    let href = doc.element(link)?.attr("href")?.trim();
    if href.is_empty() {
        return None;
    }
    let base = doc.location().and_then(|location| Url::parse(location).ok());
    let resolved = match base {
        Some(base) => base.join(href).ok(),
        None => Url::parse(href).ok(),
    };
    Some(resolved.map_or_else(|| href.to_string(), String::from))
}

/// Number of badges present in `doc`.
pub fn badge_count(doc: &Document) -> usize {
    doc.descendants(doc.root())
        .filter(|&id| is_badge(doc, id))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn matcher(entries: &[&str]) -> Matcher {
        Matcher::new(&entries.iter().copied().collect())
    }

    fn first(doc: &Document, selector: &str) -> NodeId {
        doc.select_first(&page_dom::parse_selector(selector).expect("selector"))
            .expect("element present")
    }

    fn processed(doc: &Document, selector: &str) -> bool {
        is_processed(doc, first(doc, selector))
    }

    const FEED: &str = concat!(
        r#"<html><body><main>"#,
        r#"<div class="feed-shared-update-v2"><div class="update-components-actor">"#,
        r#"<a href="/in/jdoe/"><span class="update-components-actor__name">John Doe</span></a>"#,
        r#"<span class="update-components-actor__description">Growth advisor</span>"#,
        r#"</div></div>"#,
        r#"<div class="feed-shared-update-v2 other"><div class="update-components-actor">"#,
        r#"<a href="/in/someone-else/"><span class="update-components-actor__name">Sam</span></a>"#,
        r#"<span class="update-components-actor__description">Designer</span>"#,
        r#"</div></div>"#,
        r#"</main></body></html>"#
    );

    #[test]
    fn standalone_link_gets_one_badge_and_a_marker() {
        let mut doc = Document::parse(
            r#"<html><body><p><a href="https://site.com/in/jdoe">John Doe</a></p></body></html>"#,
        );
        let labeler = Labeler::default();
        let matcher = matcher(&["/in/jdoe"]);

        let report = labeler.scan(&mut doc, &matcher);
        assert_eq!(report.link_badges, 1);
        assert_eq!(badge_count(&doc), 1);
        assert!(processed(&doc, "a"));
        assert_eq!(
            doc.inner_html(first(&doc, "a")),
            r#"John Doe<span class="pod-user-label pod-user-label--feed">Pod User</span>"#
        );

        assert_eq!(labeler.scan(&mut doc, &matcher).inserted(), 0);
        assert_eq!(badge_count(&doc), 1);
    }

    #[test]
    fn compact_badges_follow_the_whole_name() {
        let mut doc = Document::parse(concat!(
            r#"<html><body><a href="/in/jdoe"><span>John <b>Doe</b></span>"#,
            r#"<img src="jdoe.png"></a></body></html>"#
        ))
        .with_location("https://www.linkedin.com/feed/");

        let report = Labeler::default().scan(&mut doc, &matcher(&["/in/jdoe"]));
        assert_eq!(report.link_badges, 1);
        assert_eq!(doc.text_content(first(&doc, "a")), "John DoePod User");
        assert_eq!(
            doc.inner_html(first(&doc, "b")),
            r#"Doe<span class="pod-user-label pod-user-label--feed">Pod User</span>"#
        );
    }

    #[test]
    fn listed_profile_page_labels_the_headline_before_its_text() {
        let mut doc = Document::parse(concat!(
            r#"<html><body><h1 class="break-words">Jane Roe</h1>"#,
            r#"<div class="text-body-medium break-words">Head of Growth</div></body></html>"#
        ))
        .with_location("https://www.linkedin.com/in/jane-roe/overlay/about-this-profile/");
        let matcher = matcher(&["https://www.linkedin.com/in/jane-roe"]);

        let report = Labeler::default().scan(&mut doc, &matcher);
        assert_eq!(report.profile_badges, 1);
        let headline = first(&doc, ".text-body-medium");
        assert_eq!(
            doc.inner_html(headline),
            r#"<span class="pod-user-label">Pod User</span>Head of Growth"#
        );
        assert!(is_processed(&doc, headline));
    }

    #[test]
    fn unlisted_profile_page_is_left_alone() {
        let mut doc = Document::parse(concat!(
            r#"<html><body>"#,
            r#"<div class="text-body-medium break-words">Head of Growth</div>"#,
            r#"</body></html>"#
        ))
        .with_location("https://www.linkedin.com/in/someone/");
        let report = Labeler::default().scan(&mut doc, &matcher(&["/in/jane-roe"]));
        assert_eq!(report, ScanReport::default());
        assert!(!processed(&doc, ".text-body-medium"));
    }

    #[test]
    fn listed_feed_item_labels_headline_and_name_once() {
        let mut doc = Document::parse(FEED).with_location("https://www.linkedin.com/feed/");
        let matcher = matcher(&["https://www.linkedin.com/in/jdoe"]);
        let labeler = Labeler::default();

        let report = labeler.scan(&mut doc, &matcher);
        assert_eq!(report.item_badges, 2);
        assert_eq!(report.link_badges, 0);
        assert_eq!(badge_count(&doc), 2);
        assert_eq!(
            doc.inner_html(first(&doc, ".update-components-actor__name")),
            r#"John Doe<span class="pod-user-label pod-user-label--feed">Pod User</span>"#
        );
        assert_eq!(
            doc.inner_html(first(&doc, ".update-components-actor__description")),
            r#"<span class="pod-user-label">Pod User</span>Growth advisor"#
        );
        assert!(processed(&doc, ".feed-shared-update-v2"));
        assert!(!processed(&doc, ".other"));

        let again = labeler.scan(&mut doc, &matcher);
        assert_eq!(again.inserted(), 0);
        assert_eq!(badge_count(&doc), 2);
    }

    #[test]
    fn unlisted_items_are_labeled_after_the_list_changes() {
        let mut doc = Document::parse(FEED).with_location("https://www.linkedin.com/feed/");
        let labeler = Labeler::default();
        labeler.scan(&mut doc, &matcher(&["/in/jdoe"]));
        assert_eq!(badge_count(&doc), 2);

        let report = labeler.scan(&mut doc, &matcher(&["/in/jdoe", "/in/someone-else"]));
        assert_eq!(report.items_matched, 1);
        assert_eq!(badge_count(&doc), 4);
        assert!(processed(&doc, ".other"));
    }

    #[test]
    fn avatar_links_are_skipped() {
        let mut doc = Document::parse(concat!(
            r#"<html><body>"#,
            r#"<a class="photo-link" href="/in/jdoe"><img src="jdoe.png"></a>"#,
            r#"<a class="ivm-avatar" href="/in/jdoe">John</a>"#,
            r#"<a class="name" href="/in/jdoe">John Doe</a>"#,
            r#"</body></html>"#
        ))
        .with_location("https://www.linkedin.com/feed/");

        let report = Labeler::default().scan(&mut doc, &matcher(&["/in/jdoe"]));
        assert_eq!(report.link_badges, 1);
        assert_eq!(report.skipped_visual, 2);
        assert!(processed(&doc, ".name"));
        assert!(!processed(&doc, ".photo-link"));
    }

    #[test]
    fn existing_badges_block_new_ones() {
        let mut doc = Document::parse(concat!(
            r#"<html><body><a href="/in/jdoe">John "#,
            r#"<span class="pod-user-label">Pod User</span></a></body></html>"#
        ))
        .with_location("https://www.linkedin.com/feed/");

        let report = Labeler::default().scan(&mut doc, &matcher(&["/in/jdoe"]));
        assert_eq!(report.inserted(), 0);
        assert_eq!(badge_count(&doc), 1);
    }

    #[test]
    fn empty_matcher_scans_nothing() {
        let mut doc = Document::parse(FEED).with_location("https://www.linkedin.com/in/jdoe/");
        let report = Labeler::default().scan(&mut doc, &Matcher::default());
        assert_eq!(report, ScanReport::default());
        assert_eq!(doc.pending_mutations(), 0);
    }

    #[test]
    fn relative_links_resolve_against_the_location() {
        let doc = Document::parse(r#"<html><body><a href="../in/jdoe?trk=x">J</a></body></html>"#)
            .with_location("https://www.linkedin.com/search/results/");
        assert_eq!(
            resolve_href(&doc, first(&doc, "a")).as_deref(),
            Some("https://www.linkedin.com/search/in/jdoe?trk=x")
        );

        let bare = Document::parse(r#"<html><body><a href="/in/jdoe">J</a></body></html>"#);
        assert_eq!(resolve_href(&bare, first(&bare, "a")).as_deref(), Some("/in/jdoe"));
    }
}
