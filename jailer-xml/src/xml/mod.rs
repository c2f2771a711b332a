//! The XML engine: parsing, visiting, formatting and streaming.
//!
//! Text enters through the [`parser`], which yields a normalized
//! [`Document`](crate::Document). Consumers walk documents with a
//! [`NodeVisitor`]. Output leaves either through the [`formatter`], which
//! renders a whole document, or through the [`stream`] writer, which emits
//! events without building a tree.

pub mod formatter;
mod name;
pub mod parser;
pub mod stream;
pub mod visitor;

pub use formatter::{
    render, render_without_declaration, DocumentFormatter, FormatOptions, FormatterCache,
};
pub use name::{as_element_name, is_valid_name, is_valid_qname};
pub use parser::{parse, parse_bytes};
pub use stream::{
    header_comment, open_streaming_writer, Charset, StreamOptions, StreamingHandle,
};
pub use visitor::{visit_document, visit_node, NodeVisitor};
