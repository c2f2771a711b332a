//! Document model for XML trees.
//!
//! A [`Document`] owns exactly one root [`XmlElement`]. Every node below it is
//! a [`Node`], a closed sum over elements, text and comments. Trees are plain
//! owned values: the parser builds them, external producers assemble them with
//! the builder methods on `XmlElement`, and the formatter and visitor only ever
//! borrow them.

pub mod namespace;
mod xml_content;

pub use namespace::{is_xmlns_attr, split_qname, xmlns_prefix, ExpandedName, NamespaceContext};
pub use xml_content::{XmlComment, XmlElement, XmlText};

/// A node of the document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// An element with attributes and children.
    Element(XmlElement),
    /// Character data.
    Text(XmlText),
    /// A comment.
    Comment(XmlComment),
}

impl Node {
    /// Returns true if this is an element node.
    pub fn is_element(&self) -> bool {
        matches!(self, Node::Element(_))
    }

    /// Returns true if this is a text node.
    pub fn is_text(&self) -> bool {
        matches!(self, Node::Text(_))
    }

    /// Returns true if this is a comment node.
    pub fn is_comment(&self) -> bool {
        matches!(self, Node::Comment(_))
    }

    /// Returns a reference to the element, if this is an element node.
    pub fn as_element(&self) -> Option<&XmlElement> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Returns a mutable reference to the element, if this is an element node.
    pub fn as_element_mut(&mut self) -> Option<&mut XmlElement> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Returns a reference to the text, if this is a text node.
    pub fn as_text(&self) -> Option<&XmlText> {
        match self {
            Node::Text(t) => Some(t),
            _ => None,
        }
    }
}

impl From<XmlElement> for Node {
    fn from(element: XmlElement) -> Self {
        Node::Element(element)
    }
}

impl From<XmlText> for Node {
    fn from(text: XmlText) -> Self {
        Node::Text(text)
    }
}

impl From<XmlComment> for Node {
    fn from(comment: XmlComment) -> Self {
        Node::Comment(comment)
    }
}

/// An XML document with a single root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: XmlElement,
}

impl Document {
    /// Creates a document around `root`.
    pub fn new(root: XmlElement) -> Self {
        Document { root }
    }

    /// Returns the root element.
    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    /// Returns the root element for modification.
    pub fn root_mut(&mut self) -> &mut XmlElement {
        &mut self.root
    }

    /// Consumes the document, returning its root element.
    pub fn into_root(self) -> XmlElement {
        self.root
    }

    /// Removes every whitespace-only text node from the tree.
    ///
    /// Idempotent: a second pass finds nothing to remove.
    pub fn normalize_whitespace(&mut self) {
        self.root.normalize_whitespace();
    }
}

impl From<XmlElement> for Document {
    fn from(root: XmlElement) -> Self {
        Document::new(root)
    }
}
