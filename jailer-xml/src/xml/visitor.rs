//! Depth-first traversal of documents.
//!
//! Serializers of extraction results implement [`NodeVisitor`] and drive it
//! with [`visit_document`]. Association markers (`j:assoc` in the engine
//! namespace) are reported as a single callback carrying their trimmed text;
//! their subtree is never entered.

use crate::node::{Document, Node, XmlElement};

/// Callbacks invoked during a document traversal.
pub trait NodeVisitor {
    /// Called for a text node that is non-empty after trimming, with the
    /// trimmed text.
    fn visit_text(&mut self, content: &str);

    /// Called for a comment with its raw text.
    fn visit_comment(&mut self, content: &str);

    /// Called before the children of an element.
    ///
    /// `attr_names` and `attr_values` are parallel and of equal length.
    fn visit_element_start(
        &mut self,
        tag: &str,
        is_root: bool,
        attr_names: &[String],
        attr_values: &[String],
    );

    /// Called after the children of an element.
    fn visit_element_end(&mut self, tag: &str, is_root: bool);

    /// Called instead of the start/end callbacks for an association marker.
    fn visit_association_element(&mut self, content: &str);
}

/// Visits the root element of `document` and everything below it.
pub fn visit_document<V: NodeVisitor + ?Sized>(document: &Document, visitor: &mut V) {
    visit_element(document.root(), true, visitor);
}

/// Visits a single node and its descendants.
pub fn visit_node<V: NodeVisitor + ?Sized>(node: &Node, visitor: &mut V) {
    match node {
        Node::Text(text) => {
            // Trees built in memory may still carry whitespace-only text
            let trimmed = text.text().trim();
            if !trimmed.is_empty() {
                visitor.visit_text(trimmed);
            }
        }
        Node::Comment(comment) => visitor.visit_comment(comment.text()),
        Node::Element(element) => visit_element(element, false, visitor),
    }
}

fn visit_element<V: NodeVisitor + ?Sized>(element: &XmlElement, is_root: bool, visitor: &mut V) {
    if element.is_association() {
        visitor.visit_association_element(element.text_content().trim());
        return;
    }

    let (attr_names, attr_values): (Vec<String>, Vec<String>) =
        element.attributes().iter().cloned().unzip();
    visitor.visit_element_start(element.qname(), is_root, &attr_names, &attr_values);
    for child in element.children() {
        visit_node(child, visitor);
    }
    visitor.visit_element_end(element.qname(), is_root);
}
