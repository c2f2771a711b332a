//! XML document engine for hierarchical extraction results.
//!
//! Extracted rows and their associated rows are exchanged as XML. This crate
//! provides the pieces needed to read and write such documents:
//!
//! - a normalizing, namespace-aware parser that drops whitespace-only text
//! - a tree visitor that reports association markers (`j:assoc` elements in
//!   the `http://jailer.sf.net/` namespace) as single callbacks
//! - a whole-document formatter with cached, thread-safe formatting engines
//! - a streaming writer that starts with a reformatted header comment
//! - a sanitizer turning arbitrary names into valid element names
//!
//! # Example
//!
//! ```
//! use jailer_xml::{parse, render_without_declaration};
//!
//! let document = parse("<row id=\"1\">\n  <name>ACME</name>\n</row>").unwrap();
//! let xml = render_without_declaration(&document).unwrap();
//! assert!(xml.starts_with("<row id=\"1\">"));
//! ```

pub mod constants;
pub mod error;
pub mod node;
pub mod xml;

// Re-export commonly used types
pub use constants::*;
pub use error::{Error, Result};
pub use node::{Document, ExpandedName, NamespaceContext, Node, XmlComment, XmlElement, XmlText};
pub use xml::{
    as_element_name, header_comment, open_streaming_writer, parse, parse_bytes, render,
    render_without_declaration, visit_document, visit_node, Charset, DocumentFormatter,
    FormatOptions, FormatterCache, NodeVisitor, StreamOptions, StreamingHandle,
};

// Charsets for the streaming writer are `encoding_rs` encodings
pub use encoding_rs;
