//! Example: stream rows with nested associations to stdout
//!
//! Writes a small extraction result with the streaming writer, parses it
//! back and prints the association expressions found by a visitor.
//!
//! Usage: cargo run --example stream_rows

use std::io::{self, Write};

use jailer_xml::encoding_rs::UTF_8;
use jailer_xml::{as_element_name, open_streaming_writer, parse, visit_document, NodeVisitor};

/// Collects association expressions.
#[derive(Default)]
struct Associations(Vec<String>);

impl NodeVisitor for Associations {
    fn visit_text(&mut self, _content: &str) {}

    fn visit_comment(&mut self, _content: &str) {}

    fn visit_element_start(&mut self, _: &str, _: bool, _: &[String], _: &[String]) {}

    fn visit_element_end(&mut self, _: &str, _: bool) {}

    fn visit_association_element(&mut self, content: &str) {
        self.0.push(content.to_string());
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let header = "Extraction model: demo\n--customers with their orders";
    let mut handle = open_streaming_writer(header, "export", Vec::new(), UTF_8)?;

    let row = as_element_name("CUSTOMER");
    for id in ["1", "2"] {
        handle.start_element(&row, &[("id", id)])?;
        handle.start_element("j:assoc", &[("xmlns:j", jailer_xml::NS_URI)])?;
        handle.text(&format!("SQL:SELECT * FROM ORDERS WHERE CUSTOMER_ID = {}", id))?;
        handle.end_element("j:assoc")?;
        handle.end_element(&row)?;
    }
    let bytes = handle.finish()?;
    io::stdout().write_all(&bytes)?;

    let document = parse(std::str::from_utf8(&bytes)?)?;
    let mut associations = Associations::default();
    visit_document(&document, &mut associations);
    for expression in associations.0 {
        eprintln!("association: {}", expression);
    }
    Ok(())
}
