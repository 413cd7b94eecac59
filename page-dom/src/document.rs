//! Editable `scraper` document with childList mutation tracking.

use ego_tree::{NodeId, NodeMut, NodeRef};
use html5ever::{Attribute, LocalName, Namespace, QualName};
use scraper::node::{Element, Text};
use scraper::{ElementRef, Html, Node, Selector, StrTendril};

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Builds an HTML element node. Names are stored lowercase.
pub fn element(name: &str, attrs: &[(&str, &str)]) -> Node {
    let attrs = attrs
        .iter()
        .map(|(name, value)| attribute(name, value))
        .collect();
    Node::Element(Element::new(
        qual_name(HTML_NAMESPACE, &name.to_ascii_lowercase()),
        attrs,
    ))
}

/// Builds a text node.
pub fn text(text: &str) -> Node {
    Node::Text(Text {
        text: StrTendril::from(text),
    })
}

fn qual_name(namespace: &str, local: &str) -> QualName {
    QualName::new(None, Namespace::from(namespace), LocalName::from(local))
}

fn attribute(name: &str, value: &str) -> Attribute {
    Attribute {
        name: qual_name("", &name.to_ascii_lowercase()),
        value: StrTendril::from(value),
    }
}

/// One childList change: nodes added to or removed from `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    /// Parent whose child list changed.
    pub target: NodeId,
    /// Nodes inserted under `target`.
    pub added: Vec<NodeId>,
    /// Nodes detached from `target`.
    pub removed: Vec<NodeId>,
}

impl MutationRecord {
    /// True when the record inserted at least one node.
    pub fn has_additions(&self) -> bool {
        !self.added.is_empty()
    }
}

/// Parsed HTML document that can be edited in place.
#[derive(Debug, Clone)]
pub struct Document {
    html: Html,
    location: Option<String>,
    mutations: Vec<MutationRecord>,
}

impl Document {
    /// Parses a full HTML document. Parsing never fails; malformed markup is
    /// recovered the way browsers do.
    pub fn parse(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
            location: None,
            mutations: Vec::new(),
        }
    }

    /// Attaches the URL the document was loaded from.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// URL the document was loaded from, if known.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Identifier of the document root.
    pub fn root(&self) -> NodeId {
        self.html.tree.root().id()
    }

    /// Node payload for `id`.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.html.tree.get(id).map(|node| node.value())
    }

    /// Element payload for `id`, if it is an element.
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.node(id).and_then(Node::as_element)
    }

    /// Parent of `id`. Detached nodes and the root have none.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.html.tree.get(id)?.parent().map(|parent| parent.id())
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.html
            .tree
            .get(id)
            .into_iter()
            .flat_map(|node| node.ancestors())
            .map(|node| node.id())
    }

    /// Descendants of `id` in document order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.html
            .tree
            .get(id)
            .into_iter()
            .flat_map(|node| node.descendants().skip(1))
            .map(|node| node.id())
    }

    /// Every element matching `selector`, in document order.
    pub fn select(&self, selector: &Selector) -> Vec<NodeId> {
        self.select_within(self.root(), selector)
    }

    /// First element matching `selector`.
    pub fn select_first(&self, selector: &Selector) -> Option<NodeId> {
        self.select_first_within(self.root(), selector)
    }

    /// Descendants of `scope` matching `selector`. Combinators may still look
    /// outside `scope`, as `Element.querySelectorAll` does.
    pub fn select_within(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.matching(scope, selector).collect()
    }

    /// First descendant of `scope` matching `selector`.
    pub fn select_first_within(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.matching(scope, selector).next()
    }

    fn matching<'a>(
        &'a self,
        scope: NodeId,
        selector: &'a Selector,
    ) -> impl Iterator<Item = NodeId> + 'a {
        let scope_node = self.html.tree.get(scope);
        let scope_element = scope_node.and_then(ElementRef::wrap);
        scope_node
            .into_iter()
            .flat_map(|node| node.descendants().skip(1))
            .filter_map(ElementRef::wrap)
            .filter(move |element| selector.matches_with_scope(element, scope_element))
            .map(|element| element.id())
    }

    /// Concatenated text of every text node under `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        self.html
            .tree
            .get(id)
            .into_iter()
            .flat_map(|node| node.descendants())
            .filter_map(|node| node.value().as_text())
            .map(|text| &**text)
            .collect()
    }

    /// First text node under `id` holding non-whitespace characters.
    pub fn first_text_node(&self, id: NodeId) -> Option<NodeId> {
        self.html
            .tree
            .get(id)?
            .descendants()
            .find(is_visible_text)
            .map(|node| node.id())
    }

    /// Last text node under `id` holding non-whitespace characters.
    pub fn last_text_node(&self, id: NodeId) -> Option<NodeId> {
        self.html
            .tree
            .get(id)?
            .descendants()
            .filter(is_visible_text)
            .last()
            .map(|node| node.id())
    }

    /// Sets an attribute on an element. Returns false when `id` is not an element.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> bool {
        let Some(mut node) = self.html.tree.get_mut(id) else {
            return false;
        };
        let Node::Element(element) = node.value() else {
            return false;
        };
        let mut attrs: Vec<Attribute> = element
            .attrs
            .iter()
            .map(|(name, value)| Attribute {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        match attrs.iter_mut().find(|attr| &*attr.name.local == name) {
            Some(attr) => attr.value = StrTendril::from(value),
            None => attrs.push(attribute(name, value)),
        }
        // Rebuilt so the cached id and class lists follow the new attributes.
        *element = Element::new(element.name.clone(), attrs);
        true
    }

    /// Appends `node` as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, node: Node) -> Option<NodeId> {
        if !self.accepts_children(parent) {
            return None;
        }
        let id = self.html.tree.get_mut(parent)?.append(node).id();
        self.record(parent, vec![id], Vec::new());
        Some(id)
    }

    /// Inserts `node` as the first child of `parent`.
    pub fn prepend(&mut self, parent: NodeId, node: Node) -> Option<NodeId> {
        if !self.accepts_children(parent) {
            return None;
        }
        let id = self.html.tree.get_mut(parent)?.prepend(node).id();
        self.record(parent, vec![id], Vec::new());
        Some(id)
    }

    /// Inserts `node` immediately before `sibling`.
    pub fn insert_before(&mut self, sibling: NodeId, node: Node) -> Option<NodeId> {
        let parent = self.parent(sibling)?;
        let id = self.html.tree.get_mut(sibling)?.insert_before(node).id();
        self.record(parent, vec![id], Vec::new());
        Some(id)
    }

    /// Inserts `node` immediately after `sibling`.
    pub fn insert_after(&mut self, sibling: NodeId, node: Node) -> Option<NodeId> {
        let parent = self.parent(sibling)?;
        let id = self.html.tree.get_mut(sibling)?.insert_after(node).id();
        self.record(parent, vec![id], Vec::new());
        Some(id)
    }

    /// Parses `html` as a fragment and appends the resulting nodes to `parent`.
    /// Returns the top-level nodes that were inserted.
    pub fn append_html(&mut self, parent: NodeId, html: &str) -> Vec<NodeId> {
        if !self.accepts_children(parent) {
            return Vec::new();
        }
        let fragment = Html::parse_fragment(html);
        let mut added = Vec::new();
        if let Some(mut dest) = self.html.tree.get_mut(parent) {
            for child in fragment.root_element().children() {
                let mut copied = dest.append(child.value().clone());
                added.push(copied.id());
                copy_children(&mut copied, child);
            }
        }
        self.record(parent, added.clone(), Vec::new());
        added
    }

    /// Detaches `id` (and its subtree) from the document.
    pub fn remove(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.parent(id) else {
            return false;
        };
        let Some(mut node) = self.html.tree.get_mut(id) else {
            return false;
        };
        node.detach();
        self.record(parent, Vec::new(), vec![id]);
        true
    }

    /// Drains the mutation records accumulated since the previous call.
    pub fn take_mutations(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.mutations)
    }

    /// Number of records waiting to be drained.
    pub fn pending_mutations(&self) -> usize {
        self.mutations.len()
    }

    /// Serializes the whole document.
    pub fn html(&self) -> String {
        self.html.html()
    }

    /// Serializes the element `id` including its own tag.
    pub fn outer_html(&self, id: NodeId) -> String {
        self.element_ref(id)
            .map(|element| element.html())
            .unwrap_or_default()
    }

    /// Serializes the children of the element `id`.
    pub fn inner_html(&self, id: NodeId) -> String {
        self.element_ref(id)
            .map(|element| element.inner_html())
            .unwrap_or_default()
    }

    fn element_ref(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    fn accepts_children(&self, id: NodeId) -> bool {
        self.node(id)
            .is_some_and(|node| matches!(node, Node::Document | Node::Fragment | Node::Element(_)))
    }

    fn record(&mut self, target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) {
        if added.is_empty() && removed.is_empty() {
            return;
        }
        self.mutations.push(MutationRecord {
            target,
            added,
            removed,
        });
    }
}

fn is_visible_text(node: &NodeRef<'_, Node>) -> bool {
    node.value()
        .as_text()
        .is_some_and(|text| !text.trim().is_empty())
}

fn copy_children(dest: &mut NodeMut<'_, Node>, source: NodeRef<'_, Node>) {
    for child in source.children() {
        let mut copied = dest.append(child.value().clone());
        copy_children(&mut copied, child);
    }
}
