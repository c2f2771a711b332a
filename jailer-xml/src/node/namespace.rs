//! Namespace handling for XML elements.

use std::collections::HashMap;

/// URI permanently bound to the `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// An expanded XML name (namespace URI + local name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedName {
    /// The namespace URI.
    pub namespace_uri: String,
    /// The local part of the name (without prefix).
    pub local_name: String,
}

impl ExpandedName {
    /// Creates a new expanded name.
    pub fn new(uri: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace_uri: uri.into(),
            local_name: local.into(),
        }
    }

    /// Returns true if this name is `local` in namespace `uri`.
    pub fn is(&self, uri: &str, local: &str) -> bool {
        self.namespace_uri == uri && self.local_name == local
    }
}

/// Scoped prefix bindings, one scope per open element.
///
/// The empty prefix holds the default namespace. Binding a prefix to the
/// empty URI undeclares it for the current scope.
#[derive(Debug, Clone)]
pub struct NamespaceContext {
    scopes: Vec<HashMap<String, String>>,
}

impl Default for NamespaceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceContext {
    /// Creates a new namespace context with the `xml` prefix pre-bound.
    pub fn new() -> Self {
        let mut ctx = NamespaceContext {
            scopes: vec![HashMap::new()],
        };
        ctx.bind("xml", XML_NAMESPACE);
        ctx
    }

    /// Pushes a new scope for entering an element.
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Pops the current scope when leaving an element.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Binds a prefix to a URI in the current scope.
    pub fn bind(&mut self, prefix: &str, uri: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(prefix.to_string(), uri.to_string());
        }
    }

    /// Binds every namespace declaration found in `attributes`.
    pub fn bind_declarations<'a, I>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in attributes {
            if let Some(prefix) = xmlns_prefix(name) {
                self.bind(prefix, value);
            }
        }
    }

    /// Resolves a prefix to its URI, searching from the innermost scope.
    ///
    /// An undeclared (empty) binding resolves to `None`.
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(prefix))
            .map(String::as_str)
            .filter(|uri| !uri.is_empty())
    }

    /// Returns the default namespace (empty prefix binding).
    pub fn default_namespace(&self) -> Option<&str> {
        self.resolve("")
    }

    /// Resolves the namespace of an element's qualified name.
    ///
    /// Returns `Ok(None)` for an unprefixed name with no default namespace,
    /// and `Err(prefix)` when the prefix is not bound.
    pub fn resolve_element<'q>(&self, qname: &'q str) -> Result<Option<ExpandedName>, &'q str> {
        match split_qname(qname) {
            (Some(prefix), local) => self
                .resolve(prefix)
                .map(|uri| Some(ExpandedName::new(uri, local)))
                .ok_or(prefix),
            (None, local) => Ok(self
                .default_namespace()
                .map(|uri| ExpandedName::new(uri, local))),
        }
    }
}

/// Splits a qualified name into prefix and local name.
///
/// Returns (Some(prefix), local) for "prefix:local"
/// Returns (None, name) for "name" without prefix
pub fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

/// Checks if an attribute name is a namespace declaration.
pub fn is_xmlns_attr(name: &str) -> bool {
    xmlns_prefix(name).is_some()
}

/// Returns the prefix declared by a namespace declaration attribute.
///
/// `xmlns` declares the empty (default) prefix.
pub fn xmlns_prefix(name: &str) -> Option<&str> {
    if name == "xmlns" {
        Some("")
    } else {
        name.strip_prefix("xmlns:")
    }
}
