use std::cell::{OnceCell, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use foundation::time::TimeSpan;
use runtime::diagnostics::{Diagnostic, Diagnostics};
use tracing::debug;

use crate::kml::document::KmlDocument;
use crate::kml::fields::{self, Transform};
use crate::kml::registry::{Capabilities, ElementConstructor, ElementKind, ElementRegistry};
use crate::kml::resolve::StyleSlot;
use crate::kml::xml::XmlNode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElementError {
    #[error("cannot construct a {kind:?} element without a source node")]
    InvalidNode { kind: ElementKind },
}

/// State shared by every element of one document: the registry used to
/// construct children, the owning document, and the diagnostics sink.
pub struct ParseContext {
    registry: Rc<ElementRegistry>,
    document: OnceCell<Weak<KmlDocument>>,
    diagnostics: RefCell<Diagnostics>,
    /// Problems already reported per element. Fields are re-read every frame,
    /// so the same problem is noticed again and again.
    reported: RefCell<HashSet<(*const Element, &'static str, String)>>,
}

impl ParseContext {
    pub fn new(registry: Rc<ElementRegistry>) -> Rc<Self> {
        Rc::new(Self {
            registry,
            document: OnceCell::new(),
            diagnostics: RefCell::new(Diagnostics::new()),
            reported: RefCell::new(HashSet::new()),
        })
    }

    /// Ties the context to the document that owns its elements. Only the first
    /// call has an effect.
    pub(crate) fn attach(&self, document: Weak<KmlDocument>) {
        let _ = self.document.set(document);
    }

    pub fn registry(&self) -> &ElementRegistry {
        &self.registry
    }

    pub fn document(&self) -> Option<Rc<KmlDocument>> {
        self.document.get()?.upgrade()
    }

    pub fn warn(&self, kind: &'static str, message: impl Into<String>) {
        self.diagnostics.borrow_mut().warn(kind, message);
    }

    /// Records a problem with `origin` unless the same one was recorded before.
    pub(crate) fn warn_once(&self, origin: &Element, kind: &'static str, message: String) {
        let key = (origin as *const Element, kind, message);
        if self.reported.borrow().contains(&key) {
            return;
        }
        self.diagnostics.borrow_mut().warn(kind, key.2.clone());
        self.reported.borrow_mut().insert(key);
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().entries().to_vec()
    }

    pub fn diagnostic_count(&self, kind: &str) -> usize {
        self.diagnostics.borrow().count(kind)
    }

    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow_mut().drain()
    }
}

impl std::fmt::Debug for ParseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseContext")
            .field("diagnostics", &self.diagnostics.borrow().entries().len())
            .finish()
    }
}

pub struct ElementInit {
    pub node: Option<Rc<XmlNode>>,
    pub parent: Weak<Element>,
    pub context: Rc<ParseContext>,
}

impl ElementInit {
    pub fn root(node: Rc<XmlNode>, context: Rc<ParseContext>) -> Self {
        Self {
            node: Some(node),
            parent: Weak::new(),
            context,
        }
    }
}

/// Picks children for [`Element::create_child_element`] and friends.
#[derive(Debug, Clone, Copy)]
pub enum Selector<'a> {
    Tag(&'a str),
    AnyTag(&'a [&'a str]),
    Kind(ElementKind),
}

impl Selector<'_> {
    pub fn matches(&self, element: &Element) -> bool {
        match self {
            Selector::Tag(tag) => element.tag() == *tag,
            Selector::AnyTag(tags) => tags.contains(&element.tag()),
            Selector::Kind(kind) => element.kind() == *kind,
        }
    }
}

/// One parsed KML element.
///
/// The node is immutable once built; only the child list and the style slot
/// are filled in lazily. Parents are weak so dropping the document releases
/// the whole tree.
pub struct Element {
    tag: String,
    constructor: ElementConstructor,
    node: Rc<XmlNode>,
    parent: Weak<Element>,
    context: Rc<ParseContext>,
    children: OnceCell<Vec<Rc<Element>>>,
    pub(crate) style: RefCell<StyleSlot>,
}

impl Element {
    pub fn new(constructor: ElementConstructor, init: ElementInit) -> Result<Rc<Self>, ElementError> {
        let node = init.node.ok_or(ElementError::InvalidNode {
            kind: constructor.kind,
        })?;
        Ok(Rc::new(Self {
            tag: node.tag().to_string(),
            constructor,
            node,
            parent: init.parent,
            context: init.context,
            children: OnceCell::new(),
            style: RefCell::new(StyleSlot::default()),
        }))
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> ElementKind {
        self.constructor.kind
    }

    pub fn capabilities(&self) -> Capabilities {
        self.constructor.capabilities
    }

    pub fn is_feature(&self) -> bool {
        self.kind().is_feature()
    }

    pub fn node(&self) -> &Rc<XmlNode> {
        &self.node
    }

    pub fn context(&self) -> &Rc<ParseContext> {
        &self.context
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.node.attribute(name)
    }

    pub fn text(&self) -> &str {
        self.node.text().trim()
    }

    pub fn parent(&self) -> Option<Rc<Element>> {
        self.parent.upgrade()
    }

    pub fn document(&self) -> Option<Rc<KmlDocument>> {
        self.context.document()
    }

    /// Registered element children in source order. Built on first access and
    /// memoized, so repeated calls return the same elements.
    ///
    /// Unregistered children are skipped. UpperCamelCase tags are reported as
    /// `unknown-element`; lowerCamelCase tags are simple fields read through
    /// [`Element::retrieve`].
    pub fn children(self: &Rc<Self>) -> &[Rc<Element>] {
        self.children.get_or_init(|| self.parse_children())
    }

    fn parse_children(self: &Rc<Self>) -> Vec<Rc<Element>> {
        if !self.capabilities().children {
            return Vec::new();
        }

        let mut out = Vec::new();
        for child in self.node.children() {
            let constructor = match self.context.registry().lookup(child.tag()) {
                Ok(constructor) => *constructor,
                Err(unknown) => {
                    if child.local_name().starts_with(|c: char| c.is_ascii_uppercase()) {
                        debug!(tag = %unknown.tag, parent = %self.tag, "skipping unknown element");
                        self.context
                            .warn("unknown-element", format!("{unknown} inside <{}>", self.tag));
                    }
                    continue;
                }
            };
            let init = ElementInit {
                node: Some(Rc::clone(child)),
                parent: Rc::downgrade(self),
                context: Rc::clone(&self.context),
            };
            match constructor.construct(init) {
                Ok(element) => out.push(element),
                Err(e) => self.context.warn("invalid-node", e.to_string()),
            }
        }
        out
    }

    /// First child matching `selector`.
    pub fn create_child_element(self: &Rc<Self>, selector: Selector<'_>) -> Option<Rc<Element>> {
        self.children()
            .iter()
            .find(|c| selector.matches(c))
            .cloned()
    }

    pub fn children_matching<'a>(
        self: &'a Rc<Self>,
        selector: Selector<'a>,
    ) -> impl Iterator<Item = &'a Rc<Element>> + 'a {
        self.children().iter().filter(move |c| selector.matches(c))
    }

    /// This element and everything below it, depth first in source order.
    pub fn descendants(self: &Rc<Self>) -> Vec<Rc<Element>> {
        let mut out = Vec::new();
        let mut stack = vec![Rc::clone(self)];
        while let Some(element) = stack.pop() {
            stack.extend(element.children().iter().rev().cloned());
            out.push(element);
        }
        out
    }

    /// Reads the simple field `field` through `transform`.
    ///
    /// A missing or empty field is `None`. A value the transform rejects is
    /// also `None` and leaves a `malformed-field` diagnostic.
    pub fn retrieve<T>(&self, field: &str, transform: Transform<T>) -> Option<T> {
        let text = self.node.child_text(field)?;
        self.apply(field, text, transform)
    }

    /// Every occurrence of a repeated simple field, skipping rejected values.
    pub fn retrieve_all<T>(&self, field: &str, transform: Transform<T>) -> Vec<T> {
        self.node
            .children_named(field)
            .filter_map(|n| self.apply(field, n.text().trim(), transform))
            .collect()
    }

    fn apply<T>(&self, field: &str, text: &str, transform: Transform<T>) -> Option<T> {
        if text.is_empty() {
            return None;
        }
        match transform(text) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(element = %self.tag, field, error = %e, "ignoring malformed field");
                self.warn("malformed-field", format!("<{}>/<{field}>: {e}", self.tag));
                None
            }
        }
    }

    pub(crate) fn malformed(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(element = %self.tag, %message, "malformed element");
        self.warn("malformed-field", format!("<{}>: {message}", self.tag));
    }

    /// Reports a problem with this element once per document.
    pub(crate) fn warn(&self, kind: &'static str, message: String) {
        self.context.warn_once(self, kind, message);
    }

    // Feature fields.

    pub fn name(&self) -> Option<String> {
        self.retrieve("name", fields::string)
    }

    pub fn description(&self) -> Option<String> {
        self.retrieve("description", fields::string)
    }

    pub fn snippet(&self) -> Option<String> {
        self.retrieve("Snippet", fields::string)
            .or_else(|| self.retrieve("snippet", fields::string))
    }

    pub fn visibility(&self) -> bool {
        self.retrieve("visibility", fields::boolean).unwrap_or(true)
    }

    pub fn open(&self) -> bool {
        self.retrieve("open", fields::boolean).unwrap_or(false)
    }

    pub fn style_url(&self) -> Option<String> {
        self.retrieve("styleUrl", fields::string)
    }

    pub fn time_primitive(self: &Rc<Self>) -> Option<TimeSpan> {
        if let Some(stamp) = self.create_child_element(Selector::Tag("TimeStamp")) {
            return stamp.retrieve("when", fields::date).map(TimeSpan::instant);
        }
        let span = self.create_child_element(Selector::Tag("TimeSpan"))?;
        Some(TimeSpan::between(
            span.retrieve("begin", fields::date),
            span.retrieve("end", fields::date),
        ))
    }

    /// `Data` and `SchemaData/SimpleData` values as `(name, value)` pairs in
    /// source order.
    pub fn extended_data(self: &Rc<Self>) -> Vec<(String, String)> {
        let Some(extended) = self.create_child_element(Selector::Tag("ExtendedData")) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for child in extended.children() {
            match child.tag() {
                "Data" => {
                    if let Some(name) = child.attribute("name") {
                        let value = child.retrieve("value", fields::string).unwrap_or_default();
                        out.push((name.to_string(), value));
                    }
                }
                "SchemaData" => {
                    for simple in child.node().children_named("SimpleData") {
                        if let Some(name) = simple.attribute("name") {
                            out.push((name.to_string(), simple.text().trim().to_string()));
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("tag", &self.tag)
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}
