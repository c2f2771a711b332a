//! Element name sanitizing and the XML character and name rules shared by
//! the parser and both writers.

use std::borrow::Cow;

use quick_xml::escape::escape;

use crate::constants::ELEMENT_NAME_PREFIX;

/// Turns arbitrary text (typically a table or column name) into a valid
/// element name.
///
/// Keeps ASCII letters, digits, `-` and `_` in their original order and drops
/// everything else. If what remains is empty or starts with something other
/// than a letter, the result is prefixed with `e`.
pub fn as_element_name(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();

    match filtered.chars().next() {
        Some(first) if first.is_ascii_alphabetic() => filtered,
        _ => format!("{}{}", ELEMENT_NAME_PREFIX, filtered),
    }
}

/// Returns true if `name` matches the XML 1.0 `Name` production.
///
/// Colons are accepted anywhere; see [`is_valid_qname`] for names that must
/// also be namespace-well-formed.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_name_start_char) && chars.all(is_name_char)
}

/// Returns true if `name` is a valid qualified name: an optional prefix and
/// a local part, each a name without colons.
pub fn is_valid_qname(name: &str) -> bool {
    let is_ncname = |part: &str| !part.contains(':') && is_valid_name(part);
    match name.split_once(':') {
        Some((prefix, local)) => is_ncname(prefix) && is_ncname(local),
        None => is_ncname(name),
    }
}

fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}'
        | '\u{D8}'..='\u{F6}'
        | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}'
        | '\u{37F}'..='\u{1FFF}'
        | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}'
        | '\u{2C00}'..='\u{2FEF}'
        | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}'
        | '\u{FDF0}'..='\u{FFFD}'
        | '\u{10000}'..='\u{EFFFF}')
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}'
            | '\u{300}'..='\u{36F}'
            | '\u{203F}'..='\u{2040}')
}

/// Returns true if `c` matches the XML 1.0 `Char` production.
pub(crate) fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Returns the first character that may not appear in an XML document.
pub(crate) fn invalid_char(text: &str) -> Option<char> {
    text.chars().find(|&c| !is_xml_char(c))
}

/// Returns true if `text` can be placed between `<!--` and `-->`.
pub(crate) fn is_valid_comment(text: &str) -> bool {
    !text.contains("--") && !text.ends_with('-') && invalid_char(text).is_none()
}

/// Escapes an attribute value for output between double quotes.
///
/// Tabs and line breaks become character references, since a parser would
/// otherwise normalize them to spaces.
pub(crate) fn escape_attribute_value(value: &str) -> Cow<'_, str> {
    let escaped = escape(value);
    if !escaped.contains(|c| matches!(c, '\t' | '\n' | '\r')) {
        return escaped;
    }
    Cow::Owned(
        escaped
            .replace('\t', "&#9;")
            .replace('\n', "&#10;")
            .replace('\r', "&#13;"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_digit_is_prefixed() {
        // The digit survives filtering, so the filtered name starts with '1'
        assert_eq!(as_element_name("1 customer-name!"), "e1customer-name");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(as_element_name(""), "e");
        assert_eq!(as_element_name("!?. "), "e");
    }

    #[test]
    fn test_valid_names_unchanged() {
        assert_eq!(as_element_name("CUSTOMER"), "CUSTOMER");
        assert_eq!(as_element_name("order_item-2"), "order_item-2");
    }

    #[test]
    fn test_leading_punctuation_stripped_before_check() {
        assert_eq!(as_element_name("$ name"), "name");
        assert_eq!(as_element_name("_name"), "e_name");
        assert_eq!(as_element_name("-x"), "e-x");
    }

    #[test]
    fn test_non_ascii_letters_dropped() {
        assert_eq!(as_element_name("größe"), "gre");
        assert_eq!(as_element_name("ümlaut"), "mlaut");
        assert_eq!(as_element_name("日本"), "e");
    }

    #[test]
    fn test_result_is_always_a_name() {
        for raw in ["", " ", "9", "a b", "<tag>", "--", "x:y", "\u{0}", "Ω1"] {
            let name = as_element_name(raw);
            let mut chars = name.chars();
            assert!(chars.next().is_some_and(|c| c.is_ascii_alphabetic()), "{:?}", name);
            assert!(
                chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "{:?}",
                name
            );
        }
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("row"));
        assert!(is_valid_name("j:assoc"));
        assert!(is_valid_name("_x.y-z1"));
        assert!(is_valid_name("Größe"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("1row"));
        assert!(!is_valid_name("a b"));
        assert!(!is_valid_name("a<b"));
    }

    #[test]
    fn test_name_production_ranges() {
        assert!(is_valid_name(":lead"));
        assert!(is_valid_name("\u{3001}x"));
        assert!(is_valid_name("a\u{B7}b\u{300}"));
        assert!(is_valid_name("\u{10000}"));
        assert!(!is_valid_name("\u{B7}a"));
        assert!(!is_valid_name("-a"));
        assert!(!is_valid_name(".a"));
        assert!(!is_valid_name("a\u{D7}"));
    }

    #[test]
    fn test_is_valid_qname() {
        assert!(is_valid_qname("row"));
        assert!(is_valid_qname("j:assoc"));
        assert!(!is_valid_qname(":lead"));
        assert!(!is_valid_qname("trail:"));
        assert!(!is_valid_qname("a:b:c"));
        assert!(!is_valid_qname("1a"));
    }

    #[test]
    fn test_char_production() {
        assert_eq!(invalid_char("tab\tok\n\r"), None);
        assert_eq!(invalid_char("a\u{7F}\u{85}\u{9F}b"), None);
        assert_eq!(invalid_char("\u{D7FF}\u{E000}\u{FFFD}\u{10FFFF}"), None);
        assert_eq!(invalid_char("a\u{1}"), Some('\u{1}'));
        assert_eq!(invalid_char("a\u{FFFE}"), Some('\u{FFFE}'));
        assert_eq!(invalid_char("a\u{FFFF}"), Some('\u{FFFF}'));
    }

    #[test]
    fn test_attribute_value_escaping() {
        assert_eq!(escape_attribute_value("plain"), "plain");
        assert_eq!(escape_attribute_value("a<\"&"), "a&lt;&quot;&amp;");
        assert_eq!(escape_attribute_value("x\ty\nz\r"), "x&#9;y&#10;z&#13;");
    }

    #[test]
    fn test_sanitized_names_are_valid() {
        for raw in ["", "1 customer-name!", "ORDER ITEM", "--"] {
            assert!(is_valid_name(&as_element_name(raw)));
        }
    }

    #[test]
    fn test_comment_checks() {
        assert!(is_valid_comment(" fine - really "));
        assert!(!is_valid_comment("a--b"));
        assert!(!is_valid_comment("trailing-"));
        assert!(!is_valid_comment("bell\u{7}"));
        assert_eq!(invalid_char("tab\tok\n"), None);
    }
}
