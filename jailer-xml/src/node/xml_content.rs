//! XML content types for tree nodes.
//!
//! This module provides `XmlElement`, `XmlText` and `XmlComment`, the payloads
//! carried by the variants of [`Node`](super::Node).

use std::fmt;

use super::namespace::{split_qname, ExpandedName};
use super::Node;
use crate::constants::{ASSOCIATION_TAG, NS_PREFIX, NS_URI};

/// An XML element with a qualified name, attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// The qualified name as written (e.g. "row", "j:assoc").
    name: String,
    /// Namespace URI + local name, absent for elements in no namespace.
    expanded_name: Option<ExpandedName>,
    /// Attributes in document order, namespace declarations included.
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl XmlElement {
    /// Creates an element in no namespace.
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            expanded_name: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Creates an element in namespace `uri`.
    ///
    /// The local name is the part of `qname` after the prefix. No `xmlns`
    /// attribute is added; the formatter declares missing bindings on output.
    pub fn with_namespace(uri: impl Into<String>, qname: impl Into<String>) -> Self {
        let name = qname.into();
        let local = split_qname(&name).1.to_string();
        XmlElement {
            expanded_name: Some(ExpandedName::new(uri, local)),
            name,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Creates an association marker (`j:assoc`) holding `expression`.
    pub fn association(expression: impl Into<String>) -> Self {
        let mut element =
            Self::with_namespace(NS_URI, format!("{}:{}", NS_PREFIX, ASSOCIATION_TAG));
        element.push_text(expression);
        element
    }

    /// Returns the qualified name of the element.
    pub fn qname(&self) -> &str {
        &self.name
    }

    /// Returns the local part of the name.
    pub fn local_name(&self) -> &str {
        match &self.expanded_name {
            Some(expanded) => &expanded.local_name,
            None => split_qname(&self.name).1,
        }
    }

    /// Returns the namespace URI, if the element is in a namespace.
    pub fn namespace_uri(&self) -> Option<&str> {
        self.expanded_name
            .as_ref()
            .map(|expanded| expanded.namespace_uri.as_str())
    }

    /// Returns the expanded name, if available.
    pub fn expanded_name(&self) -> Option<&ExpandedName> {
        self.expanded_name.as_ref()
    }

    pub(crate) fn set_expanded_name(&mut self, expanded_name: Option<ExpandedName>) {
        self.expanded_name = expanded_name;
    }

    /// Returns true if this element is an association marker.
    pub fn is_association(&self) -> bool {
        self.expanded_name
            .as_ref()
            .is_some_and(|expanded| expanded.is(NS_URI, ASSOCIATION_TAG))
    }

    /// Returns the attributes in document order.
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Returns the value of the attribute named `name`.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Sets an attribute, replacing the value of an existing one in place.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some(existing) => existing.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Builder form of [`set_attribute`](Self::set_attribute).
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Returns the child nodes.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Returns the child nodes for modification.
    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    /// Appends a child node.
    pub fn push_child(&mut self, child: impl Into<Node>) {
        self.children.push(child.into());
    }

    /// Builder form of [`push_child`](Self::push_child).
    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.push_child(child);
        self
    }

    /// Appends a text node.
    pub fn push_text(&mut self, text: impl Into<String>) {
        self.push_child(XmlText::new(text));
    }

    /// Appends a comment node.
    pub fn push_comment(&mut self, text: impl Into<String>) {
        self.push_child(XmlComment::new(text));
    }

    /// Concatenates the text of all descendant text nodes in document order.
    pub fn text_content(&self) -> String {
        let mut content = String::new();
        self.collect_text(&mut content);
        content
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(text) => out.push_str(text.text()),
                Node::Element(element) => element.collect_text(out),
                Node::Comment(_) => {}
            }
        }
    }

    /// Removes whitespace-only text nodes from this subtree.
    ///
    /// Builds new child vectors; relative order of the remaining children is
    /// preserved.
    pub fn normalize_whitespace(&mut self) {
        let children = std::mem::take(&mut self.children);
        self.children = children
            .into_iter()
            .filter_map(|child| match child {
                Node::Element(mut element) => {
                    element.normalize_whitespace();
                    Some(Node::Element(element))
                }
                Node::Text(text) if text.is_whitespace() => {
                    tracing::trace!(parent = %self.name, "dropping whitespace-only text");
                    None
                }
                other => Some(other),
            })
            .collect();
    }
}

impl fmt::Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.name)?;
        for (i, (name, value)) in self.attributes.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}={}", name, value)?;
        }
        write!(f, " }}")
    }
}

/// XML text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlText {
    text: String,
}

impl XmlText {
    /// Creates a new text node.
    pub fn new(text: impl Into<String>) -> Self {
        XmlText { text: text.into() }
    }

    /// Returns the raw, untrimmed text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns true if the text is empty after trimming.
    pub fn is_whitespace(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// An XML comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlComment {
    text: String,
}

impl XmlComment {
    /// Creates a new comment node.
    pub fn new(text: impl Into<String>) -> Self {
        XmlComment { text: text.into() }
    }

    /// Returns the comment text between `<!--` and `-->`.
    pub fn text(&self) -> &str {
        &self.text
    }
}
