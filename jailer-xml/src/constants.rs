//! Constants forming the wire contract of the engine.
//!
//! Producers and consumers of extraction XML agree on these values; changing
//! any of them breaks documents written by earlier versions.

/// Namespace URI of engine-specific markup.
pub const NS_URI: &str = "http://jailer.sf.net/";

/// Conventional prefix bound to [`NS_URI`].
pub const NS_PREFIX: &str = "j";

/// Local name of the element embedding associated rows.
pub const ASSOCIATION_TAG: &str = "assoc";

/// Prefix marking association content as an SQL expression instead of a path.
///
/// The engine delivers association text verbatim; interpreting this prefix is
/// up to the consumer.
pub const SQL_PREFIX: &str = "SQL:";

/// Indentation width used by the whole-document formatter.
pub const FORMAT_INDENT_SIZE: usize = 4;

/// Indentation width used by the streaming writer.
pub const STREAM_INDENT_SIZE: usize = 2;

/// Prefix applied by [`as_element_name`](crate::as_element_name) when the
/// filtered name does not start with a letter.
pub const ELEMENT_NAME_PREFIX: char = 'e';
