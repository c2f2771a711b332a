//! Streaming document writer.
//!
//! Large extraction results are written event by event instead of being
//! built as a [`Document`](crate::Document) first. A stream starts with a
//! header comment and, optionally, an opened root element; the caller then
//! issues element, text and comment events and finally calls
//! [`StreamingHandle::finish`].

use std::io::{self, Write};

use encoding_rs::{CoderResult, Encoder, Encoding};
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::name::{escape_attribute_value, invalid_char, is_valid_comment, is_valid_qname};
use crate::constants::STREAM_INDENT_SIZE;
use crate::error::{Error, Result};

/// Character encoding of a stream's output bytes.
pub type Charset = &'static Encoding;

/// Options for a streaming writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// Character repeated for each indentation level; space or tab.
    pub indent_char: u8,
    /// Number of `indent_char`s per level.
    pub indent_size: usize,
    /// Whether to write an XML declaration naming the charset before the
    /// header comment.
    pub declaration: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            indent_char: b' ',
            indent_size: STREAM_INDENT_SIZE,
            declaration: false,
        }
    }
}

/// Reformats a free-text header for use as comment text.
///
/// The header is placed on its own line, and a `--` at the start of any line
/// becomes a single space, since `--` may not appear inside a comment.
pub fn header_comment(header: &str) -> String {
    format!("\n{}", header)
        .replace("\r\n--", "\n ")
        .replace("\n--", "\n ")
}

/// Opens a streaming writer with default options.
///
/// Writes a newline, the header comment, another newline and, if `root_tag`
/// is not empty, the start tag of the root element.
pub fn open_streaming_writer<W: Write>(
    comment_header: &str,
    root_tag: &str,
    destination: W,
    charset: Charset,
) -> Result<StreamingHandle<W>> {
    StreamingHandle::open_with_options(
        comment_header,
        root_tag,
        destination,
        charset,
        StreamOptions::default(),
    )
}

/// An open streaming writer.
///
/// Tracks the open elements so that every event sequence it accepts is
/// well-formed. After any failed call the handle refuses further events.
pub struct StreamingHandle<W: Write> {
    writer: Writer<EncodingSink<W>>,
    /// Names of the elements opened but not yet closed, innermost last.
    open: Vec<String>,
    /// Whether a top-level element has been completed.
    root_closed: bool,
    failed: bool,
}

impl<W: Write> StreamingHandle<W> {
    /// Opens a streaming writer; see [`open_streaming_writer`].
    pub fn open_with_options(
        comment_header: &str,
        root_tag: &str,
        destination: W,
        charset: Charset,
        options: StreamOptions,
    ) -> Result<Self> {
        if !matches!(options.indent_char, b' ' | b'\t') {
            return Err(Error::WriterSetupFailure(format!(
                "unsupported indent character {:?}",
                char::from(options.indent_char)
            )));
        }
        if !root_tag.is_empty() && !is_valid_qname(root_tag) {
            return Err(Error::WriterSetupFailure(format!(
                "invalid root tag '{}'",
                root_tag
            )));
        }
        let comment = header_comment(comment_header);
        if !is_valid_comment(&comment) {
            return Err(Error::WriterSetupFailure(
                "header cannot be written as an XML comment".to_string(),
            ));
        }

        let sink = EncodingSink::new(destination, charset);
        let encoding_name = sink.encoding().name();
        let mut handle = StreamingHandle {
            writer: Writer::new_with_indent(sink, options.indent_char, options.indent_size),
            open: Vec::new(),
            root_closed: false,
            failed: false,
        };

        if options.declaration {
            handle
                .writer
                .write_event(Event::Decl(BytesDecl::new("1.0", Some(encoding_name), None)))
                .map_err(setup_failure)?;
        }
        handle
            .writer
            .write_event(Event::Text(BytesText::new("\n")))
            .map_err(setup_failure)?;
        handle
            .writer
            .write_event(Event::Comment(BytesText::from_escaped(comment.as_str())))
            .map_err(setup_failure)?;
        handle
            .writer
            .write_event(Event::Text(BytesText::new("\n")))
            .map_err(setup_failure)?;
        if !root_tag.is_empty() {
            handle
                .writer
                .write_event(Event::Start(BytesStart::new(root_tag)))
                .map_err(setup_failure)?;
            handle.open.push(root_tag.to_string());
        }

        tracing::debug!(root = root_tag, charset = encoding_name, "opened streaming writer");
        Ok(handle)
    }

    /// Returns the encoding the output bytes are written in.
    ///
    /// This differs from the requested charset for encodings that cannot be
    /// used for output, such as UTF-16, for which UTF-8 is written instead.
    pub fn charset(&self) -> Charset {
        self.writer.get_ref().encoding()
    }

    /// Returns the number of open elements.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Writes the start tag of an element.
    pub fn start_element(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        self.guarded(|handle| {
            let start = handle.element_start(name, attributes)?;
            handle.emit(Event::Start(start))?;
            handle.open.push(name.to_string());
            Ok(())
        })
    }

    /// Writes an element without content.
    pub fn empty_element(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        self.guarded(|handle| {
            let start = handle.element_start(name, attributes)?;
            handle.emit(Event::Empty(start))?;
            if handle.open.is_empty() {
                handle.root_closed = true;
            }
            Ok(())
        })
    }

    /// Writes the end tag of the innermost open element, which must be `name`.
    pub fn end_element(&mut self, name: &str) -> Result<()> {
        self.guarded(|handle| {
            match handle.open.last() {
                Some(open) if open == name => {}
                Some(open) => {
                    return Err(Error::StreamingWriteFailure(format!(
                        "end tag </{}> does not match open element <{}>",
                        name, open
                    )))
                }
                None => {
                    return Err(Error::StreamingWriteFailure(format!(
                        "end tag </{}> without open element",
                        name
                    )))
                }
            }
            handle.emit(Event::End(BytesEnd::new(name)))?;
            handle.open.pop();
            if handle.open.is_empty() {
                handle.root_closed = true;
            }
            Ok(())
        })
    }

    /// Writes character data inside the innermost open element.
    pub fn text(&mut self, content: &str) -> Result<()> {
        self.guarded(|handle| {
            if handle.open.is_empty() {
                return Err(Error::StreamingWriteFailure(
                    "text outside of any element".to_string(),
                ));
            }
            if let Some(c) = invalid_char(content) {
                return Err(Error::StreamingWriteFailure(format!(
                    "character U+{:04X} is not allowed in XML",
                    u32::from(c)
                )));
            }
            handle.emit(Event::Text(BytesText::new(content)))
        })
    }

    /// Writes a comment.
    pub fn comment(&mut self, content: &str) -> Result<()> {
        self.guarded(|handle| {
            if !is_valid_comment(content) {
                return Err(Error::StreamingWriteFailure(format!(
                    "comment cannot be serialized: {:?}",
                    content
                )));
            }
            handle.emit(Event::Comment(BytesText::from_escaped(content)))
        })
    }

    /// Closes every element still open, flushes, and returns the destination.
    pub fn finish(mut self) -> Result<W> {
        if self.failed {
            return Err(Self::failed_state());
        }
        while let Some(name) = self.open.pop() {
            self.emit(Event::End(BytesEnd::new(name.as_str())))?;
        }
        self.emit(Event::Text(BytesText::new("\n")))?;

        let mut sink = self.writer.into_inner();
        sink.finish()
            .map_err(|e| Error::StreamingWriteFailure(e.to_string()))?;
        tracing::debug!("finished streaming writer");
        Ok(sink.into_inner())
    }

    fn element_start<'a>(
        &self,
        name: &'a str,
        attributes: &[(&'a str, &'a str)],
    ) -> Result<BytesStart<'a>> {
        if self.open.is_empty() && self.root_closed {
            return Err(Error::StreamingWriteFailure(format!(
                "element <{}> after the document element was closed",
                name
            )));
        }
        if !is_valid_qname(name) {
            return Err(Error::StreamingWriteFailure(format!(
                "invalid element name '{}'",
                name
            )));
        }
        let mut start = BytesStart::new(name);
        for &(key, value) in attributes {
            if !is_valid_qname(key) {
                return Err(Error::StreamingWriteFailure(format!(
                    "invalid attribute name '{}' on <{}>",
                    key, name
                )));
            }
            if invalid_char(value).is_some() {
                return Err(Error::StreamingWriteFailure(format!(
                    "attribute '{}' on <{}> contains a character not allowed in XML",
                    key, name
                )));
            }
            let value = escape_attribute_value(value);
            start.push_attribute(Attribute::from((key.as_bytes(), value.as_bytes())));
        }
        Ok(start)
    }

    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| Error::StreamingWriteFailure(e.to_string()))
    }

    fn guarded(&mut self, op: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        if self.failed {
            return Err(Self::failed_state());
        }
        let result = op(self);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn failed_state() -> Error {
        Error::StreamingWriteFailure("writer is unusable after an earlier failure".to_string())
    }
}

fn setup_failure(e: impl std::fmt::Display) -> Error {
    Error::WriterSetupFailure(e.to_string())
}

/// Transcodes the UTF-8 produced by the XML writer into the output charset.
///
/// Characters the charset cannot represent are written as numeric character
/// references.
struct EncodingSink<W: Write> {
    inner: W,
    encoding: Charset,
    /// `None` when the output encoding is UTF-8 and bytes pass through.
    encoder: Option<Encoder>,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
}

impl<W: Write> EncodingSink<W> {
    fn new(inner: W, charset: Charset) -> Self {
        let encoding = charset.output_encoding();
        let encoder = (encoding != encoding_rs::UTF_8).then(|| encoding.new_encoder());
        EncodingSink {
            inner,
            encoding,
            encoder,
            pending: Vec::new(),
        }
    }

    fn encoding(&self) -> Charset {
        self.encoding
    }

    fn encode(&mut self, text: &str, last: bool) -> io::Result<()> {
        let Some(encoder) = self.encoder.as_mut() else {
            return self.inner.write_all(text.as_bytes());
        };
        let mut output = Vec::with_capacity(text.len() + 16);
        let mut remaining = text;
        loop {
            let (result, read, _) = encoder.encode_from_utf8_to_vec(remaining, &mut output, last);
            remaining = &remaining[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => output.reserve(remaining.len() + 16),
            }
        }
        self.inner.write_all(&output)
    }

    fn finish(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "output ends inside a UTF-8 sequence",
            ));
        }
        self.encode("", true)?;
        self.inner.flush()
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for EncodingSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.encoder.is_none() {
            return self.inner.write(buf);
        }
        self.pending.extend_from_slice(buf);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(text) => text.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        };
        let pending = std::mem::take(&mut self.pending);
        let (complete, rest) = pending.split_at(valid);
        let text = std::str::from_utf8(complete)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.encode(text, false)?;
        self.pending = rest.to_vec();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse;
    use encoding_rs::{UTF_16LE, UTF_8, WINDOWS_1252};

    fn output(handle: StreamingHandle<Vec<u8>>) -> String {
        String::from_utf8(handle.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_header_comment() {
        assert_eq!(header_comment("line1\n--line2"), "\nline1\n line2");
        assert_eq!(header_comment("--first\r\n-- second"), "\n first\n  second");
        assert_eq!(header_comment("a - b"), "\na - b");
    }

    #[test]
    fn test_open_writes_header_and_root() {
        let handle = open_streaming_writer("line1\n--line2", "data", Vec::new(), UTF_8).unwrap();
        assert_eq!(handle.depth(), 1);
        let xml = output(handle);

        assert!(xml.starts_with("\n<!--\nline1\n line2-->\n<data>"));
        assert!(!xml.contains("<?xml"));
        assert!(xml.trim_end().ends_with("</data>"));
    }

    #[test]
    fn test_open_without_root() {
        let mut handle = open_streaming_writer("header", "", Vec::new(), UTF_8).unwrap();
        assert_eq!(handle.depth(), 0);
        handle.start_element("fragment", &[("id", "1")]).unwrap();
        handle.end_element("fragment").unwrap();
        let xml = output(handle);

        assert!(xml.starts_with("\n<!--\nheader-->\n<fragment id=\"1\">"));
        assert_eq!(parse(&xml).unwrap().root().qname(), "fragment");
    }

    #[test]
    fn test_events_produce_parsable_document() {
        let mut handle = open_streaming_writer("-- export", "rows", Vec::new(), UTF_8).unwrap();
        handle.start_element("row", &[("id", "1")]).unwrap();
        handle.text("a < b").unwrap();
        handle.end_element("row").unwrap();
        handle.comment(" between ").unwrap();
        handle.empty_element("row", &[("id", "2")]).unwrap();
        handle.start_element("open", &[]).unwrap();
        let xml = output(handle);

        let document = parse(&xml).unwrap();
        let rows = document.root();
        assert_eq!(rows.qname(), "rows");
        assert_eq!(rows.children().len(), 4);
        assert_eq!(rows.children()[0].as_element().unwrap().text_content(), "a < b");
        assert!(rows.children()[1].is_comment());
        assert_eq!(rows.children()[3].as_element().unwrap().qname(), "open");
    }

    #[test]
    fn test_attribute_line_breaks_escaped() {
        let mut handle = open_streaming_writer("h", "data", Vec::new(), UTF_8).unwrap();
        handle
            .empty_element("row", &[("note", "a\r\nb\tc"), ("q", "\"<")])
            .unwrap();
        let xml = output(handle);

        assert!(xml.contains(r#"<row note="a&#13;&#10;b&#9;c" q="&quot;&lt;"/>"#));
        let document = parse(&xml).unwrap();
        let row = document.root().children()[0].as_element().unwrap();
        assert_eq!(row.attribute("note"), Some("a\r\nb\tc"));
        assert_eq!(row.attribute("q"), Some("\"<"));
    }

    #[test]
    fn test_noncharacter_text_rejected() {
        let mut handle = open_streaming_writer("h", "data", Vec::new(), UTF_8).unwrap();
        handle.text("next line \u{85}").unwrap();
        assert!(matches!(
            handle.text("\u{FFFF}"),
            Err(Error::StreamingWriteFailure(_))
        ));
    }

    #[test]
    fn test_indentation() {
        let mut handle = open_streaming_writer("h", "data", Vec::new(), UTF_8).unwrap();
        handle.empty_element("row", &[]).unwrap();
        let xml = output(handle);
        assert!(xml.contains("<data>\n  <row/>\n</data>"));
    }

    #[test]
    fn test_declaration_names_charset() {
        let options = StreamOptions {
            declaration: true,
            ..StreamOptions::default()
        };
        let handle =
            StreamingHandle::open_with_options("h", "data", Vec::new(), WINDOWS_1252, options)
                .unwrap();
        let bytes = handle.finish().unwrap();
        assert!(bytes.starts_with(b"<?xml version=\"1.0\" encoding=\"windows-1252\"?>"));
    }

    #[test]
    fn test_output_transcoded() {
        let mut handle = open_streaming_writer("h", "data", Vec::new(), WINDOWS_1252).unwrap();
        handle.text("caf\u{e9} \u{263A}").unwrap();
        let bytes = handle.finish().unwrap();

        assert!(bytes.windows(5).any(|w| w == b"caf\xE9 "));
        assert!(bytes.windows(7).any(|w| w == b"&#9786;"));
    }

    #[test]
    fn test_unusable_output_charset_falls_back() {
        let handle = open_streaming_writer("h", "data", Vec::new(), UTF_16LE).unwrap();
        assert_eq!(handle.charset(), UTF_8);
    }

    #[test]
    fn test_setup_failures() {
        let options = StreamOptions {
            indent_char: b'#',
            ..StreamOptions::default()
        };
        for result in [
            StreamingHandle::open_with_options("h", "data", Vec::new(), UTF_8, options),
            open_streaming_writer("h", "bad tag", Vec::new(), UTF_8),
            open_streaming_writer("a--b", "data", Vec::new(), UTF_8),
        ] {
            assert!(matches!(result, Err(Error::WriterSetupFailure(_))));
        }
    }

    #[test]
    fn test_setup_io_failure() {
        assert!(matches!(
            open_streaming_writer("h", "data", FailingSink, UTF_8),
            Err(Error::WriterSetupFailure(_))
        ));
    }

    #[test]
    fn test_text_before_any_element_fails() {
        let mut handle = open_streaming_writer("h", "", Vec::new(), UTF_8).unwrap();
        assert!(matches!(
            handle.text("orphan"),
            Err(Error::StreamingWriteFailure(_))
        ));
        // Failures are sticky
        assert!(handle.start_element("late", &[]).is_err());
        assert!(handle.finish().is_err());
    }

    #[test]
    fn test_event_sequence_failures() {
        let mut mismatched = open_streaming_writer("h", "data", Vec::new(), UTF_8).unwrap();
        mismatched.start_element("a", &[]).unwrap();
        assert!(mismatched.end_element("b").is_err());

        let mut second_root = open_streaming_writer("h", "", Vec::new(), UTF_8).unwrap();
        second_root.empty_element("first", &[]).unwrap();
        assert!(second_root.start_element("second", &[]).is_err());

        let mut unopened = open_streaming_writer("h", "", Vec::new(), UTF_8).unwrap();
        assert!(unopened.end_element("data").is_err());

        let mut bad_name = open_streaming_writer("h", "data", Vec::new(), UTF_8).unwrap();
        assert!(bad_name.start_element("1st", &[]).is_err());

        let mut bad_comment = open_streaming_writer("h", "data", Vec::new(), UTF_8).unwrap();
        assert!(bad_comment.comment("x--y").is_err());
    }

    /// Accepts the header, then fails every write.
    struct HeaderOnlySink {
        written: usize,
    }

    impl Write for HeaderOnlySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written > 64 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.written += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_io_failure_after_open() {
        let mut handle =
            open_streaming_writer("h", "data", HeaderOnlySink { written: 0 }, UTF_8).unwrap();
        let long = "x".repeat(128);
        handle.start_element("row", &[]).unwrap();
        handle.text(&long).unwrap();
        assert!(matches!(
            handle.end_element("row"),
            Err(Error::StreamingWriteFailure(_))
        ));
    }
}
