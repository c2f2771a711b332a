//! Normalizing XML parser.
//!
//! Builds a [`Document`] from text using quick-xml's streaming reader and then
//! runs the whitespace normalization pass over it. Text is kept verbatim while
//! reading; only text nodes that are entirely whitespace are removed afterwards.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::BufRead;

use encoding_rs::{Encoding, UTF_8};
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::Reader;

use super::name::{invalid_char, is_valid_comment, is_valid_qname};
use crate::error::{Error, Result};
use crate::node::{
    split_qname, xmlns_prefix, Document, NamespaceContext, XmlComment, XmlElement, XmlText,
};

/// How far into the input the XML declaration is searched for.
const DECLARATION_SCAN_LIMIT: usize = 1024;

/// How deeply entity replacement texts may refer to other entities.
const ENTITY_DEPTH_LIMIT: usize = 16;

/// Parses an XML document from a string.
///
/// The input must be a well-formed, namespace-well-formed document. Line
/// endings are normalized to `\n` and attribute values are normalized as an
/// XML processor does. General entities declared in the internal DTD subset
/// are expanded; external entities are not loaded.
///
/// The result has no whitespace-only text nodes. Namespace prefixes are
/// resolved so that every element carries its namespace URI.
pub fn parse(xml: &str) -> Result<Document> {
    let mut reader = Reader::from_str(xml);
    // Don't trim text - normalization is a separate pass over the tree
    reader.config_mut().trim_text_start = false;
    reader.config_mut().trim_text_end = false;
    reader.config_mut().check_end_names = true;

    let mut document = TreeBuilder::default().build(&mut reader)?;
    document.normalize_whitespace();
    tracing::debug!(root = document.root().qname(), "parsed XML document");
    Ok(document)
}

/// Parses an XML document from raw bytes.
///
/// The character encoding is taken from a byte order mark, then from the
/// `encoding` pseudo-attribute of the XML declaration, and defaults to UTF-8.
pub fn parse_bytes(bytes: &[u8]) -> Result<Document> {
    let (encoding, bom_length) = detect_encoding(bytes)?;
    let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_length..]);
    if had_errors {
        return Err(Error::malformed(
            0,
            format!("input is not valid {}", encoding.name()),
        ));
    }
    parse(&text)
}

fn detect_encoding(bytes: &[u8]) -> Result<(&'static Encoding, usize)> {
    if let Some(found) = Encoding::for_bom(bytes) {
        return Ok(found);
    }
    match declared_encoding(bytes) {
        Some(label) => Encoding::for_label(label.as_bytes())
            .map(|encoding| (encoding, 0))
            .ok_or_else(|| Error::ParserUnavailable(format!("no decoder for encoding '{}'", label))),
        None => Ok((UTF_8, 0)),
    }
}

/// Extracts the encoding label from a leading `<?xml ...?>` declaration.
fn declared_encoding(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(DECLARATION_SCAN_LIMIT)];
    if !head.starts_with(b"<?xml") {
        return None;
    }
    let end = head.windows(2).position(|w| w == b"?>")?;
    let declaration = String::from_utf8_lossy(&head[..end]);
    let after = &declaration[declaration.find("encoding")? + "encoding".len()..];
    let after = after.trim_start().strip_prefix('=')?.trim_start();
    let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &after[1..];
    value.find(quote).map(|close| value[..close].to_string())
}

/// Accumulates reader events into a tree.
#[derive(Default)]
struct TreeBuilder {
    /// Elements opened but not yet closed, innermost last.
    stack: Vec<XmlElement>,
    /// Character data not yet attached to its parent.
    pending_text: String,
    root: Option<XmlElement>,
    namespaces: NamespaceContext,
    /// Replacement texts of general entities declared in the DTD.
    entities: HashMap<String, String>,
}

impl TreeBuilder {
    fn build<R: BufRead>(mut self, reader: &mut Reader<R>) -> Result<Document> {
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let event = match reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(e) => return Err(Error::malformed(reader.error_position(), e.to_string())),
            };
            let position = reader.buffer_position();

            match event {
                Event::Start(ref e) => {
                    self.flush_text();
                    let element = self.open_element(e, reader, position)?;
                    self.stack.push(element);
                }
                Event::End(_) => {
                    self.flush_text();
                    self.namespaces.pop_scope();
                    let element = self
                        .stack
                        .pop()
                        .ok_or_else(|| Error::malformed(position, "unexpected end tag"))?;
                    self.attach(element, position)?;
                }
                Event::Empty(ref e) => {
                    self.flush_text();
                    let element = self.open_element(e, reader, position)?;
                    self.namespaces.pop_scope();
                    self.attach(element, position)?;
                }
                Event::Text(ref e) => {
                    let raw = decode(reader, e.as_ref(), position)?;
                    if raw.contains("]]>") {
                        return Err(Error::malformed(position, "']]>' is not allowed in text"));
                    }
                    let raw = normalize_line_endings(&raw);
                    let text = unescape(&raw).map_err(|e| Error::malformed(position, e.to_string()))?;
                    self.push_text(&text, position)?;
                }
                Event::CData(ref e) => {
                    let text = decode(reader, e.as_ref(), position)?;
                    self.push_text(&normalize_line_endings(&text), position)?;
                }
                Event::GeneralRef(ref e) => {
                    let resolved = self.resolve_reference(e, reader, position)?;
                    self.push_text(&resolved, position)?;
                }
                Event::Comment(ref e) => {
                    self.flush_text();
                    let text = decode(reader, e.as_ref(), position)?;
                    if !is_valid_comment(&text) {
                        return Err(Error::malformed(position, "comment is not well-formed"));
                    }
                    // Comments outside the root element are dropped
                    if let Some(parent) = self.stack.last_mut() {
                        parent.push_child(XmlComment::new(normalize_line_endings(&text)));
                    }
                }
                Event::DocType(ref e) => {
                    let doctype = decode(reader, e.as_ref(), position)?;
                    for (name, value) in entity_declarations(&doctype) {
                        // The first declaration of an entity is binding
                        self.entities.entry(name).or_insert(value);
                    }
                    tracing::trace!(entities = self.entities.len(), "read document type declaration");
                }
                Event::Decl(_) | Event::PI(_) => {}
                Event::Eof => break,
            }
        }

        let position = reader.buffer_position();
        if let Some(open) = self.stack.last() {
            return Err(Error::malformed(
                position,
                format!("element <{}> is not closed", open.qname()),
            ));
        }
        self.root
            .map(Document::new)
            .ok_or_else(|| Error::malformed(position, "document has no root element"))
    }

    /// Creates an element from a start tag and enters its namespace scope.
    fn open_element<R: BufRead>(
        &mut self,
        start: &BytesStart,
        reader: &Reader<R>,
        position: u64,
    ) -> Result<XmlElement> {
        if self.stack.is_empty() && self.root.is_some() {
            return Err(Error::malformed(position, "document has more than one root element"));
        }

        let name = decode(reader, start.name().as_ref(), position)?.into_owned();
        if !is_valid_qname(&name) {
            return Err(Error::malformed(position, format!("invalid element name '{}'", name)));
        }
        let mut element = XmlElement::new(name);

        for attr_result in start.attributes() {
            let attr = attr_result
                .map_err(|e| Error::malformed(position, format!("attribute error: {}", e)))?;
            let key = decode(reader, attr.key.as_ref(), position)?.into_owned();
            if !is_valid_qname(&key) {
                return Err(Error::malformed(
                    position,
                    format!("invalid attribute name '{}' on <{}>", key, element.qname()),
                ));
            }
            let raw = decode(reader, &attr.value, position)?;
            if raw.contains('<') {
                return Err(Error::malformed(
                    position,
                    format!("'<' in value of attribute '{}'", key),
                ));
            }
            let value = self.expand_references(&normalize_attribute_whitespace(&raw), 0, position)?;
            if let Some(c) = invalid_char(&value) {
                return Err(invalid_char_error(c, position));
            }
            if xmlns_prefix(&key).is_some_and(|prefix| !prefix.is_empty()) && value.is_empty() {
                return Err(Error::malformed(
                    position,
                    format!("prefix cannot be undeclared with '{}=\"\"'", key),
                ));
            }
            if element.attribute(&key).is_some() {
                return Err(Error::malformed(
                    position,
                    format!("duplicate attribute '{}' on <{}>", key, element.qname()),
                ));
            }
            element.set_attribute(key, value);
        }

        self.namespaces.push_scope();
        self.namespaces.bind_declarations(
            element
                .attributes()
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );

        let expanded = self.namespaces.resolve_element(element.qname()).map_err(|prefix| {
            Error::malformed(position, format!("namespace prefix '{}' is not declared", prefix))
        })?;
        element.set_expanded_name(expanded);

        for (name, _) in element.attributes() {
            if xmlns_prefix(name).is_some() {
                continue;
            }
            if let (Some(prefix), _) = split_qname(name) {
                if self.namespaces.resolve(prefix).is_none() {
                    return Err(Error::malformed(
                        position,
                        format!("namespace prefix '{}' is not declared", prefix),
                    ));
                }
            }
        }

        Ok(element)
    }

    /// Hands a closed element to its parent, or makes it the root.
    fn attach(&mut self, element: XmlElement, position: u64) -> Result<()> {
        match self.stack.last_mut() {
            Some(parent) => parent.push_child(element),
            None if self.root.is_none() => self.root = Some(element),
            None => {
                return Err(Error::malformed(
                    position,
                    "document has more than one root element",
                ))
            }
        }
        Ok(())
    }

    fn push_text(&mut self, text: &str, position: u64) -> Result<()> {
        if let Some(c) = invalid_char(text) {
            return Err(invalid_char_error(c, position));
        }
        if self.stack.is_empty() {
            if text.trim().is_empty() {
                return Ok(());
            }
            return Err(Error::malformed(position, "text outside the root element"));
        }
        self.pending_text.push_str(text);
        Ok(())
    }

    fn flush_text(&mut self) {
        if self.pending_text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pending_text);
        if let Some(parent) = self.stack.last_mut() {
            parent.push_child(XmlText::new(text));
        }
    }

    /// Resolves a character or entity reference found in content.
    fn resolve_reference<R: BufRead>(
        &self,
        reference: &BytesRef,
        reader: &Reader<R>,
        position: u64,
    ) -> Result<String> {
        match reference.resolve_char_ref() {
            Ok(Some(c)) => return Ok(c.to_string()),
            Ok(None) => {}
            Err(e) => return Err(Error::malformed(position, e.to_string())),
        }
        let name = decode(reader, &reference[..], position)?;
        self.expand_entity(&name, 0, position)
    }

    /// Returns the replacement text of a predefined or declared entity, with
    /// the references inside it expanded.
    fn expand_entity(&self, name: &str, depth: usize, position: u64) -> Result<String> {
        if let Some(value) = resolve_predefined_entity(name) {
            return Ok(value.to_string());
        }
        let replacement = self
            .entities
            .get(name)
            .ok_or_else(|| Error::malformed(position, format!("unknown entity '&{};'", name)))?;
        if depth >= ENTITY_DEPTH_LIMIT {
            return Err(Error::malformed(
                position,
                format!("entity '&{};' is recursive", name),
            ));
        }
        if replacement.contains('<') {
            return Err(Error::malformed(
                position,
                format!("entity '&{};' contains markup, which is not supported", name),
            ));
        }
        self.expand_references(replacement, depth + 1, position)
    }

    /// Replaces every `&...;` reference in `raw`.
    fn expand_references(&self, raw: &str, depth: usize, position: u64) -> Result<String> {
        let mut expanded = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(start) = rest.find('&') {
            expanded.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after
                .find(';')
                .ok_or_else(|| Error::malformed(position, "unterminated reference"))?;
            let reference = &after[..end];
            match reference.strip_prefix('#') {
                Some(code) => {
                    let c = char_reference(code).ok_or_else(|| {
                        Error::malformed(position, format!("invalid reference '&{};'", reference))
                    })?;
                    expanded.push(c);
                }
                None => expanded.push_str(&self.expand_entity(reference, depth, position)?),
            }
            rest = &after[end + 1..];
        }
        expanded.push_str(rest);
        Ok(expanded)
    }
}

fn decode<'b, R: BufRead>(
    reader: &Reader<R>,
    bytes: &'b [u8],
    position: u64,
) -> Result<Cow<'b, str>> {
    reader
        .decoder()
        .decode(bytes)
        .map_err(|e| Error::malformed(position, e.to_string()))
}

fn invalid_char_error(c: char, position: u64) -> Error {
    Error::malformed(
        position,
        format!("character U+{:04X} is not allowed in XML", u32::from(c)),
    )
}

/// Translates `\r\n` and lone `\r` to `\n`.
fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Replaces each literal line break or tab in a raw attribute value with a
/// space. Character references are expanded afterwards and keep their value.
fn normalize_attribute_whitespace(raw: &str) -> String {
    normalize_line_endings(raw).replace(|c: char| c == '\t' || c == '\n', " ")
}

/// Decodes the digits of a `&#...;` or `&#x...;` reference.
fn char_reference(code: &str) -> Option<char> {
    let value = match code.strip_prefix('x') {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => code.parse().ok()?,
    };
    char::from_u32(value)
}

/// Extracts internal general entity declarations from a DOCTYPE.
///
/// Parameter entities and external entities are skipped.
fn entity_declarations(doctype: &str) -> Vec<(String, String)> {
    let mut declarations = Vec::new();
    let mut rest = doctype;
    while let Some(start) = rest.find("<!ENTITY") {
        rest = rest[start + "<!ENTITY".len()..].trim_start();
        if rest.starts_with('%') {
            continue;
        }
        let name_end = rest
            .find(|c: char| c.is_whitespace())
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        rest = rest[name_end..].trim_start();
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        let literal = &rest[1..];
        let Some(close) = literal.find(quote) else {
            break;
        };
        declarations.push((name.to_string(), literal[..close].to_string()));
        rest = &literal[close + 1..];
    }
    declarations
}
