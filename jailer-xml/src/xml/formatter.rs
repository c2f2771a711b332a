//! Whole-document formatter.
//!
//! A [`DocumentFormatter`] is a configured formatting engine: it owns its
//! options and a reusable output buffer, so one instance must not be used from
//! two threads at once. [`FormatterCache`] holds one engine per output mode
//! (with and without XML declaration), builds each on first use and serializes
//! every later use behind a mutex. The free functions [`render`] and
//! [`render_without_declaration`] go through the process-wide cache; callers
//! that want isolation (tests, embedders) create their own `FormatterCache`.

use std::io::Write;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::name::{escape_attribute_value, invalid_char, is_valid_comment, is_valid_qname};
use crate::constants::FORMAT_INDENT_SIZE;
use crate::error::{Error, Result};
use crate::node::{split_qname, Document, NamespaceContext, Node, XmlElement};

/// Options for a formatting engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// Character repeated for each indentation level; space or tab.
    pub indent_char: u8,
    /// Number of `indent_char`s per level.
    pub indent_size: usize,
    /// Whether to start the output with an XML declaration.
    pub declaration: bool,
}

impl FormatOptions {
    /// Four-space indentation with XML declaration.
    pub const DEFAULT: FormatOptions = FormatOptions {
        indent_char: b' ',
        indent_size: FORMAT_INDENT_SIZE,
        declaration: true,
    };

    /// Returns a copy of these options with the declaration switched on or off.
    pub const fn with_declaration(mut self, declaration: bool) -> Self {
        self.declaration = declaration;
        self
    }
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A configured formatting engine.
#[derive(Debug)]
pub struct DocumentFormatter {
    options: FormatOptions,
    buffer: Vec<u8>,
}

impl DocumentFormatter {
    /// Builds a formatting engine, validating `options`.
    pub fn new(options: FormatOptions) -> Result<Self> {
        if !matches!(options.indent_char, b' ' | b'\t') {
            return Err(Error::FormatterSetup(format!(
                "unsupported indent character {:?}",
                char::from(options.indent_char)
            )));
        }
        Ok(DocumentFormatter {
            options,
            buffer: Vec::new(),
        })
    }

    /// Returns the options this engine was built with.
    pub fn options(&self) -> &FormatOptions {
        &self.options
    }

    /// Serializes `document` to an indented XML string.
    pub fn render(&mut self, document: &Document) -> Result<String> {
        self.buffer.clear();
        {
            let mut writer = Writer::new_with_indent(
                &mut self.buffer,
                self.options.indent_char,
                self.options.indent_size,
            );
            if self.options.declaration {
                write_event(
                    &mut writer,
                    Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))),
                )?;
                write_event(&mut writer, Event::Text(BytesText::new("\n")))?;
            }
            let mut namespaces = NamespaceContext::new();
            write_element(&mut writer, document.root(), &mut namespaces)?;
        }
        self.buffer.push(b'\n');

        std::str::from_utf8(&self.buffer)
            .map(str::to_owned)
            .map_err(|e| Error::RenderFailure(e.to_string()))
    }
}

/// One engine slot; a failed construction is kept so it is not retried.
type EngineSlot = OnceLock<std::result::Result<Mutex<DocumentFormatter>, String>>;

/// Lazily built formatting engines, one per output mode.
#[derive(Debug)]
pub struct FormatterCache {
    options: FormatOptions,
    with_declaration: EngineSlot,
    without_declaration: EngineSlot,
    #[cfg(test)]
    constructions: AtomicUsize,
}

static GLOBAL_CACHE: FormatterCache = FormatterCache::new();

impl Default for FormatterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatterCache {
    /// Creates an empty cache using the default options.
    pub const fn new() -> Self {
        Self::with_options(FormatOptions::DEFAULT)
    }

    /// Creates an empty cache whose engines use `options`.
    ///
    /// The `declaration` flag of `options` is ignored; each mode sets its own.
    pub const fn with_options(options: FormatOptions) -> Self {
        FormatterCache {
            options,
            with_declaration: OnceLock::new(),
            without_declaration: OnceLock::new(),
            #[cfg(test)]
            constructions: AtomicUsize::new(0),
        }
    }

    /// Returns the process-wide cache.
    pub fn global() -> &'static FormatterCache {
        &GLOBAL_CACHE
    }

    /// Renders `document` with an XML declaration.
    pub fn render(&self, document: &Document) -> Result<String> {
        self.render_in(&self.with_declaration, true, document)
    }

    /// Renders `document` without an XML declaration.
    pub fn render_without_declaration(&self, document: &Document) -> Result<String> {
        self.render_in(&self.without_declaration, false, document)
    }

    /// Returns true once the engine for the given mode has been built.
    pub fn is_initialized(&self, declaration: bool) -> bool {
        self.slot(declaration).get().is_some()
    }

    fn slot(&self, declaration: bool) -> &EngineSlot {
        if declaration {
            &self.with_declaration
        } else {
            &self.without_declaration
        }
    }

    fn render_in(&self, slot: &EngineSlot, declaration: bool, document: &Document) -> Result<String> {
        let engine = slot
            .get_or_init(|| {
                #[cfg(test)]
                self.constructions.fetch_add(1, Ordering::SeqCst);
                let options = self.options.clone().with_declaration(declaration);
                tracing::debug!(declaration, indent = options.indent_size, "building formatting engine");
                DocumentFormatter::new(options)
                    .map(Mutex::new)
                    .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|message| Error::FormatterSetup(message.clone()))?;

        // Rendering starts by clearing the buffer, so a poisoned engine is still usable
        let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
        engine.render(document)
    }
}

/// Renders `document` with an XML declaration using the process-wide cache.
pub fn render(document: &Document) -> Result<String> {
    FormatterCache::global().render(document)
}

/// Renders `document` without an XML declaration using the process-wide cache.
pub fn render_without_declaration(document: &Document) -> Result<String> {
    FormatterCache::global().render_without_declaration(document)
}

fn write_event<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| Error::RenderFailure(e.to_string()))
}

fn write_element<W: Write>(
    writer: &mut Writer<W>,
    element: &XmlElement,
    namespaces: &mut NamespaceContext,
) -> Result<()> {
    let qname = element.qname();
    if !is_valid_qname(qname) {
        return Err(Error::RenderFailure(format!("invalid element name '{}'", qname)));
    }

    namespaces.push_scope();
    namespaces.bind_declarations(
        element
            .attributes()
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str())),
    );

    let mut start = BytesStart::new(qname);
    for (name, value) in element.attributes() {
        if !is_valid_qname(name) {
            return Err(Error::RenderFailure(format!(
                "invalid attribute name '{}' on <{}>",
                name, qname
            )));
        }
        check_char_data(value)?;
        push_attribute(&mut start, name, value);
    }
    if let Some((attr_name, uri)) = missing_declaration(element, namespaces) {
        push_attribute(&mut start, &attr_name, &uri);
        namespaces.bind(split_qname(qname).0.unwrap_or(""), &uri);
    }

    if element.children().is_empty() {
        write_event(writer, Event::Empty(start))?;
    } else {
        write_event(writer, Event::Start(start))?;
        for child in element.children() {
            match child {
                Node::Element(child) => write_element(writer, child, namespaces)?,
                Node::Text(text) => {
                    check_char_data(text.text())?;
                    write_event(writer, Event::Text(BytesText::new(text.text())))?;
                }
                Node::Comment(comment) => {
                    if !is_valid_comment(comment.text()) {
                        return Err(Error::RenderFailure(format!(
                            "comment cannot be serialized: {:?}",
                            comment.text()
                        )));
                    }
                    write_event(writer, Event::Comment(BytesText::from_escaped(comment.text())))?;
                }
            }
        }
        write_event(writer, Event::End(BytesEnd::new(qname)))?;
    }

    namespaces.pop_scope();
    Ok(())
}

fn push_attribute(start: &mut BytesStart<'_>, name: &str, value: &str) {
    let value = escape_attribute_value(value);
    start.push_attribute(Attribute::from((name.as_bytes(), value.as_bytes())));
}

/// Returns the `xmlns` attribute an element needs to carry its namespace.
///
/// Trees from the parser always declare their prefixes; trees assembled in
/// memory may not.
fn missing_declaration(
    element: &XmlElement,
    namespaces: &NamespaceContext,
) -> Option<(String, String)> {
    let prefix = split_qname(element.qname()).0.unwrap_or("");
    let attr_name = if prefix.is_empty() {
        "xmlns".to_string()
    } else {
        format!("xmlns:{}", prefix)
    };
    match element.namespace_uri() {
        Some(uri) if namespaces.resolve(prefix) != Some(uri) => {
            Some((attr_name, uri.to_string()))
        }
        None if prefix.is_empty() && namespaces.default_namespace().is_some() => {
            Some((attr_name, String::new()))
        }
        _ => None,
    }
}

fn check_char_data(text: &str) -> Result<()> {
    match invalid_char(text) {
        Some(c) => Err(Error::RenderFailure(format!(
            "character U+{:04X} is not allowed in XML",
            u32::from(c)
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use crate::constants::NS_URI;
    use crate::xml::parse;
    use crate::xml::visitor::tests::record;

    fn one_element() -> Document {
        Document::new(XmlElement::new("root"))
    }

    #[test]
    fn test_declaration_modes() {
        let cache = FormatterCache::new();
        let with = cache.render(&one_element()).unwrap();
        let without = cache.render_without_declaration(&one_element()).unwrap();

        assert!(with.starts_with("<?xml"));
        assert!(with.contains("encoding=\"UTF-8\""));
        assert!(!without.contains("<?xml"));
        assert!(without.starts_with("<root"));
    }

    #[test]
    fn test_engines_built_lazily_per_mode() {
        let cache = FormatterCache::new();
        assert!(!cache.is_initialized(true));
        assert!(!cache.is_initialized(false));

        cache.render_without_declaration(&one_element()).unwrap();
        assert!(cache.is_initialized(false));
        assert!(!cache.is_initialized(true));
    }

    #[test]
    fn test_indentation() {
        let document = parse("<root><a>x</a><b/></root>").unwrap();
        let output = FormatterCache::new()
            .render_without_declaration(&document)
            .unwrap();

        assert!(output.starts_with("<root>"));
        assert!(output.contains("\n    <a>x</a>"));
        assert!(output.contains("\n    <b/>"));
        assert!(output.ends_with("</root>\n"));
    }

    #[test]
    fn test_custom_indentation() {
        let options = FormatOptions {
            indent_char: b'\t',
            indent_size: 1,
            declaration: true,
        };
        let document = parse("<root><a/></root>").unwrap();
        let output = FormatterCache::with_options(options)
            .render_without_declaration(&document)
            .unwrap();
        assert!(output.contains("\n\t<a/>"));
    }

    #[test]
    fn test_unsupported_indent_char() {
        let options = FormatOptions {
            indent_char: b'x',
            ..FormatOptions::default()
        };
        assert!(matches!(
            DocumentFormatter::new(options.clone()),
            Err(Error::FormatterSetup(_))
        ));

        let cache = FormatterCache::with_options(options);
        for _ in 0..2 {
            assert!(matches!(
                cache.render(&one_element()),
                Err(Error::FormatterSetup(_))
            ));
        }
    }

    #[test]
    fn test_escaping_round_trips() {
        let xml = r#"<root attr="&lt;&amp;&quot;">a &lt; b &amp; c</root>"#;
        let document = parse(xml).unwrap();
        let output = render(&document).unwrap();
        assert_eq!(parse(&output).unwrap(), document);
    }

    #[test]
    fn test_render_parse_fixed_point() {
        let xml = r#"<customer id="7" xmlns:j="http://jailer.sf.net/">
            <!-- exported -->
            <name>ACME &amp; Co</name>
            <orders><j:assoc> SQL:SELECT * FROM ORDERS </j:assoc></orders>
            <note>  spaced  </note>
        </customer>"#;
        let document = parse(xml).unwrap();
        let reparsed = parse(&render(&document).unwrap()).unwrap();
        assert_eq!(record(&reparsed), record(&document));
    }

    #[test]
    fn test_missing_namespace_declared() {
        let root = XmlElement::new("row").with_child(XmlElement::association("SQL:SELECT 1"));
        let output = FormatterCache::new()
            .render_without_declaration(&Document::new(root))
            .unwrap();

        assert!(output.contains(&format!("<j:assoc xmlns:j=\"{}\">", NS_URI)));
        let reparsed = parse(&output).unwrap();
        assert!(reparsed.root().children()[0]
            .as_element()
            .unwrap()
            .is_association());
    }

    #[test]
    fn test_declared_namespace_not_repeated() {
        let root = XmlElement::with_namespace(NS_URI, "j:rows")
            .with_child(XmlElement::with_namespace(NS_URI, "j:row"));
        let output = FormatterCache::new()
            .render_without_declaration(&Document::new(root))
            .unwrap();
        assert_eq!(output.matches("xmlns:j").count(), 1);
    }

    #[test]
    fn test_default_namespace_undeclared_for_plain_child() {
        let root = XmlElement::with_namespace("urn:a", "root").with_child(XmlElement::new("plain"));
        let output = FormatterCache::new()
            .render_without_declaration(&Document::new(root))
            .unwrap();
        assert!(output.contains("<root xmlns=\"urn:a\">"));
        assert!(output.contains("<plain xmlns=\"\"/>"));
    }

    #[test]
    fn test_render_failures() {
        let mut bad_comment = XmlElement::new("r");
        bad_comment.push_comment("a--b");
        let mut bad_text = XmlElement::new("r");
        bad_text.push_text("nul\u{0}");

        for root in [
            XmlElement::new(""),
            XmlElement::new("1abc"),
            XmlElement::new("r").with_attribute("bad name", "v"),
            bad_comment,
            bad_text,
        ] {
            assert!(matches!(
                FormatterCache::new().render(&Document::new(root)),
                Err(Error::RenderFailure(_))
            ));
        }
    }

    #[test]
    fn test_attribute_whitespace_survives_round_trip() {
        let document = Document::new(XmlElement::new("r").with_attribute("a", "x\ny\tz\r"));
        let output = FormatterCache::new()
            .render_without_declaration(&document)
            .unwrap();
        assert_eq!(output, "<r a=\"x&#10;y&#9;z&#13;\"/>\n");
        assert_eq!(parse(&output).unwrap(), document);

        let parsed = parse("<r a=\"x&#10;y\"/>").unwrap();
        assert_eq!(parsed.root().attribute("a"), Some("x\ny"));
        assert_eq!(parse(&render(&parsed).unwrap()).unwrap(), parsed);
    }

    #[test]
    fn test_parsed_control_range_renders() {
        let document = parse("<r a=\"\u{85}\">a\u{7F}\u{85}b</r>").unwrap();
        let output = render(&document).unwrap();
        assert_eq!(parse(&output).unwrap(), document);
    }

    #[test]
    fn test_noncharacters_rejected() {
        for text in ["a\u{FFFF}b", "a\u{FFFE}b"] {
            let mut root = XmlElement::new("r");
            root.push_text(text);
            assert!(matches!(
                FormatterCache::new().render(&Document::new(root)),
                Err(Error::RenderFailure(_))
            ));
        }
    }

    #[test]
    fn test_concurrent_first_use_builds_one_engine() {
        const THREADS: usize = 8;
        let cache = Arc::new(FormatterCache::new());
        let document = Arc::new(parse("<root><a>x</a><b y='1'/></root>").unwrap());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let document = Arc::clone(&document);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (0..25)
                        .map(|_| cache.render(&document).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let outputs: Vec<String> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        assert_eq!(cache.constructions.load(Ordering::SeqCst), 1);
        assert!(!cache.is_initialized(false));
        let expected = FormatterCache::new().render(&document).unwrap();
        assert_eq!(outputs.len(), THREADS * 25);
        assert!(outputs.iter().all(|output| *output == expected));
    }
}
