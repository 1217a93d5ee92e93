use std::rc::Rc;

use tracing::debug;

pub const GX_NAMESPACE: &str = "http://www.google.com/kml/ext/2.2";
pub const ATOM_NAMESPACE: &str = "http://www.w3.org/2005/Atom";
pub const XAL_NAMESPACE: &str = "urn:oasis:names:tc:ciq:xsdschema:xAL:2.0";
pub const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XmlError {
    #[error("document is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("malformed XML: {0}")]
    Syntax(String),
    #[error("elements nested deeper than {limit}")]
    TooDeep { limit: usize },
}

/// Element nesting beyond this is rejected rather than converted.
pub const MAX_DEPTH: usize = 256;

/// Owned XML element: canonical tag, attributes, concatenated text content and
/// element children in source order.
///
/// Tags in the Google extension, Atom and xAL namespaces carry the `gx:`,
/// `atom:` and `xal:` prefixes whatever prefix the source used; everything else
/// is keyed by its local name.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlNode {
    tag: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Rc<XmlNode>>,
}

impl XmlNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_child(mut self, child: XmlNode) -> Self {
        self.children.push(Rc::new(child));
        self
    }

    /// Parses a whole document and returns its root element.
    pub fn parse(text: &str) -> Result<Rc<XmlNode>, XmlError> {
        let mut source = std::borrow::Cow::Borrowed(text);
        // Undeclared gx:/atom:/xal: prefixes are common in hand-written KML.
        for _ in 0..4 {
            match parse_document(&source) {
                Ok(converted) => return converted,
                Err(roxmltree::Error::UnknownNamespace(prefix, _)) => {
                    match declare_prefix(&source, &prefix) {
                        Some(patched) => {
                            debug!(prefix = %prefix, "declaring missing namespace prefix");
                            source = std::borrow::Cow::Owned(patched);
                        }
                        None => {
                            return Err(XmlError::Syntax(format!(
                                "unknown namespace prefix '{prefix}'"
                            )));
                        }
                    }
                }
                Err(e) => return Err(XmlError::Syntax(e.to_string())),
            }
        }
        Err(XmlError::Syntax("too many undeclared namespace prefixes".to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Rc<XmlNode>, XmlError> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let text = std::str::from_utf8(bytes).map_err(|e| XmlError::Encoding(e.to_string()))?;
        Self::parse(text)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn local_name(&self) -> &str {
        match self.tag.split_once(':') {
            Some((_, local)) => local,
            None => &self.tag,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Raw text content (text and CDATA children concatenated, untrimmed).
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn children(&self) -> &[Rc<XmlNode>] {
        &self.children
    }

    pub fn child(&self, tag: &str) -> Option<&Rc<XmlNode>> {
        self.children.iter().find(|c| c.tag == tag)
    }

    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Rc<XmlNode>> + 'a {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    pub fn child_text(&self, tag: &str) -> Option<&str> {
        self.child(tag).map(|c| c.text.trim())
    }
}

/// The outer error is roxmltree's, so the caller can react to undeclared
/// prefixes; the inner one comes from converting a well-formed tree.
fn parse_document(text: &str) -> Result<Result<Rc<XmlNode>, XmlError>, roxmltree::Error> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let doc = roxmltree::Document::parse_with_options(text, options)?;
    Ok(convert(doc.root_element(), 1))
}

fn convert(node: roxmltree::Node<'_, '_>, depth: usize) -> Result<Rc<XmlNode>, XmlError> {
    if depth > MAX_DEPTH {
        return Err(XmlError::TooDeep { limit: MAX_DEPTH });
    }
    let attributes = node
        .attributes()
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect();

    let mut text = String::new();
    let mut children = Vec::new();
    for child in node.children() {
        if child.is_element() {
            children.push(convert(child, depth + 1)?);
        } else if child.is_text()
            && let Some(t) = child.text()
        {
            text.push_str(t);
        }
    }

    Ok(Rc::new(XmlNode {
        tag: canonical_tag(node.tag_name()),
        attributes,
        text,
        children,
    }))
}

fn canonical_tag(name: roxmltree::ExpandedName<'_, '_>) -> String {
    let local = name.name();
    match name.namespace() {
        Some(GX_NAMESPACE) => format!("gx:{local}"),
        Some(ATOM_NAMESPACE) => format!("atom:{local}"),
        Some(XAL_NAMESPACE) => format!("xal:{local}"),
        _ => local.to_string(),
    }
}

fn namespace_for_prefix(prefix: &str) -> Option<&'static str> {
    match prefix {
        "gx" => Some(GX_NAMESPACE),
        "atom" => Some(ATOM_NAMESPACE),
        "xal" => Some(XAL_NAMESPACE),
        "kml" => Some(KML_NAMESPACE),
        _ => None,
    }
}

/// Adds an `xmlns:prefix` declaration to the root start tag.
fn declare_prefix(text: &str, prefix: &str) -> Option<String> {
    let uri = namespace_for_prefix(prefix)?;
    let start = root_tag_start(text)?;
    let name_len = text[start + 1..].find(|c: char| c.is_whitespace() || c == '>' || c == '/')?;
    let name_end = start + 1 + name_len;

    let mut patched = String::with_capacity(text.len() + uri.len() + prefix.len() + 10);
    patched.push_str(&text[..name_end]);
    patched.push_str(&format!(" xmlns:{prefix}=\"{uri}\""));
    patched.push_str(&text[name_end..]);
    Some(patched)
}

fn root_tag_start(text: &str) -> Option<usize> {
    let mut from = 0;
    loop {
        let i = from + text[from..].find('<')?;
        match text[i + 1..].chars().next()? {
            '?' | '!' => from = i + 1,
            _ => return Some(i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_DEPTH, XmlError, XmlNode};

    #[test]
    fn canonicalizes_extension_namespaces() {
        let root = XmlNode::parse(
            r#"<kml xmlns="http://www.opengis.net/kml/2.2" xmlns:ext="http://www.google.com/kml/ext/2.2">
                 <Placemark id="p"><ext:Track/></Placemark>
               </kml>"#,
        )
        .unwrap();
        assert_eq!(root.tag(), "kml");
        let placemark = root.child("Placemark").unwrap();
        assert_eq!(placemark.attribute("id"), Some("p"));
        assert_eq!(placemark.children()[0].tag(), "gx:Track");
        assert_eq!(placemark.children()[0].local_name(), "Track");
    }

    #[test]
    fn text_includes_cdata() {
        let root = XmlNode::parse("<description>a <![CDATA[<b>bold</b>]]></description>").unwrap();
        assert_eq!(root.text(), "a <b>bold</b>");
    }

    #[test]
    fn skips_comments_and_keeps_order() {
        let root = XmlNode::parse("<Folder><!-- x --><name>n</name><Placemark/><Folder/></Folder>")
            .unwrap();
        let tags: Vec<_> = root.children().iter().map(|c| c.tag()).collect();
        assert_eq!(tags, vec!["name", "Placemark", "Folder"]);
        assert_eq!(root.child_text("name"), Some("n"));
    }

    #[test]
    fn declares_missing_gx_prefix() {
        let root = XmlNode::parse(
            r#"<?xml version="1.0"?><kml xmlns="http://www.opengis.net/kml/2.2"><gx:Tour/></kml>"#,
        )
        .unwrap();
        assert_eq!(root.children()[0].tag(), "gx:Tour");
    }

    #[test]
    fn strips_byte_order_mark() {
        let root = XmlNode::from_bytes(b"\xEF\xBB\xBF<kml/>").unwrap();
        assert_eq!(root.tag(), "kml");
    }

    #[test]
    fn reports_syntax_errors() {
        assert!(matches!(XmlNode::parse("<kml><Placemark></kml>"), Err(XmlError::Syntax(_))));
        assert!(matches!(XmlNode::parse("<kml><foo:Bar/></kml>"), Err(XmlError::Syntax(_))));
    }

    #[test]
    fn rejects_runaway_nesting() {
        let nested = |levels: usize| format!("{}{}", "<Folder>".repeat(levels), "</Folder>".repeat(levels));
        assert!(XmlNode::parse(&nested(MAX_DEPTH)).is_ok());
        assert_eq!(
            XmlNode::parse(&nested(MAX_DEPTH + 1)),
            Err(XmlError::TooDeep { limit: MAX_DEPTH })
        );
        assert_eq!(
            XmlNode::parse(&nested(200_000)),
            Err(XmlError::TooDeep { limit: MAX_DEPTH })
        );
    }
}
