use std::cell::OnceCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;
use runtime::diagnostics::Diagnostic;
use streaming::archive::{ArchiveError, KmzArchive, is_zip};
use streaming::fetch::FetchError;
use streaming::key::{has_scheme, join_href};
use tracing::debug;

use crate::kml::container::Schema;
use crate::kml::element::{Element, ElementError, ElementInit, ParseContext};
use crate::kml::registry::{ElementKind, ElementRegistry};
use crate::kml::render::{RenderContext, ShapeCollector};
use crate::kml::resolve::StyleError;
use crate::kml::xml::{XmlError, XmlNode};

/// Why a document could not be produced. Cloneable so every awaiter of a
/// shared load gets the same error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{location}: {source}")]
    Archive {
        location: String,
        source: ArchiveError,
    },
    #[error("{location}: {source}")]
    Xml { location: String, source: XmlError },
    #[error("{location}: root element <{tag}> is not a KML element")]
    UnknownRoot { location: String, tag: String },
    #[error("{location}: {source}")]
    Element {
        location: String,
        source: ElementError,
    },
    #[error("no root document has been loaded")]
    NoRoot,
}

#[derive(Debug, Clone)]
struct ArchiveSource {
    archive: Rc<KmzArchive>,
    entry: String,
}

/// One parsed KML source: the element tree plus the document-wide id index.
///
/// Ids are indexed lazily on the first lookup. A duplicated id is only an
/// error for whoever looks it up.
pub struct KmlDocument {
    location: String,
    root: Rc<Element>,
    context: Rc<ParseContext>,
    archive: Option<ArchiveSource>,
    content_hash: String,
    ids: OnceCell<HashMap<String, Vec<Rc<Element>>>>,
}

pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

impl KmlDocument {
    pub fn parse(
        location: impl Into<String>,
        text: &str,
        registry: Rc<ElementRegistry>,
    ) -> Result<Rc<Self>, LoadError> {
        let location = location.into();
        let node = XmlNode::parse(text).map_err(|source| LoadError::Xml {
            location: location.clone(),
            source,
        })?;
        Self::build(location, node, registry, None, content_hash(text.as_bytes()))
    }

    /// Parses fetched bytes, opening them as a KMZ archive when they are a zip.
    pub fn from_bytes(
        location: impl Into<String>,
        bytes: Bytes,
        registry: Rc<ElementRegistry>,
    ) -> Result<Rc<Self>, LoadError> {
        let location = location.into();
        let hash = content_hash(&bytes);
        if is_zip(&bytes) {
            let archive = KmzArchive::from_bytes(location.clone(), bytes).map_err(|source| {
                LoadError::Archive {
                    location: location.clone(),
                    source,
                }
            })?;
            let archive = Rc::new(archive);
            let entry = archive.root_entry().to_string();
            let root_bytes = archive
                .read_entry(&entry)
                .map_err(|source| LoadError::Archive {
                    location: location.clone(),
                    source,
                })?;
            let node = XmlNode::from_bytes(&root_bytes).map_err(|source| LoadError::Xml {
                location: location.clone(),
                source,
            })?;
            debug!(location = %location, entry = %entry, "opened KMZ archive");
            return Self::build(
                location,
                node,
                registry,
                Some(ArchiveSource { archive, entry }),
                hash,
            );
        }

        let node = XmlNode::from_bytes(&bytes).map_err(|source| LoadError::Xml {
            location: location.clone(),
            source,
        })?;
        Self::build(location, node, registry, None, hash)
    }

    /// A KML entry of an already opened archive.
    pub fn from_archive_entry(
        archive: Rc<KmzArchive>,
        entry: &str,
        bytes: &[u8],
        registry: Rc<ElementRegistry>,
    ) -> Result<Rc<Self>, LoadError> {
        let location = archive.entry_location(entry);
        let node = XmlNode::from_bytes(bytes).map_err(|source| LoadError::Xml {
            location: location.clone(),
            source,
        })?;
        let entry = archive.entry_for(entry).unwrap_or_else(|| entry.to_string());
        Self::build(
            location,
            node,
            registry,
            Some(ArchiveSource { archive, entry }),
            content_hash(bytes),
        )
    }

    fn build(
        location: String,
        node: Rc<XmlNode>,
        registry: Rc<ElementRegistry>,
        archive: Option<ArchiveSource>,
        content_hash: String,
    ) -> Result<Rc<Self>, LoadError> {
        let constructor = *registry
            .lookup(node.tag())
            .map_err(|unknown| LoadError::UnknownRoot {
                location: location.clone(),
                tag: unknown.tag,
            })?;
        let context = ParseContext::new(registry);
        let root = constructor
            .construct(ElementInit::root(node, Rc::clone(&context)))
            .map_err(|source| LoadError::Element {
                location: location.clone(),
                source,
            })?;

        let document = Rc::new(Self {
            location,
            root,
            context,
            archive,
            content_hash,
            ids: OnceCell::new(),
        });
        document.context.attach(Rc::downgrade(&document));
        Ok(document)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn root(&self) -> &Rc<Element> {
        &self.root
    }

    pub fn context(&self) -> &Rc<ParseContext> {
        &self.context
    }

    /// blake3 of the bytes the document was parsed from.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn archive(&self) -> Option<&Rc<KmzArchive>> {
        self.archive.as_ref().map(|a| &a.archive)
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.context.diagnostics()
    }

    /// Top-level features: the root itself when it is a feature, otherwise
    /// the features directly under `<kml>`.
    pub fn shapes(&self) -> Vec<Rc<Element>> {
        if self.root.is_feature() {
            vec![Rc::clone(&self.root)]
        } else {
            self.root.shapes()
        }
    }

    /// Every `Schema` declared anywhere in the document.
    pub fn schemas(&self) -> Vec<Schema> {
        self.root
            .descendants()
            .iter()
            .filter(|e| e.tag() == "Schema")
            .map(|e| Schema::from_element(e))
            .collect()
    }

    pub fn render(&self, collector: &mut dyn ShapeCollector, ctx: &RenderContext<'_>) {
        for shape in self.shapes() {
            shape.render(collector, ctx);
        }
    }

    /// Document-wide id lookup.
    pub fn element_by_id(&self, id: &str) -> Result<Rc<Element>, StyleError> {
        let index = self.ids.get_or_init(|| {
            let mut index: HashMap<String, Vec<Rc<Element>>> = HashMap::new();
            for element in self.root.descendants() {
                if let Some(id) = element.id() {
                    index.entry(id.to_string()).or_default().push(Rc::clone(&element));
                }
            }
            index
        });
        match index.get(id).map(Vec::as_slice) {
            Some([only]) => Ok(Rc::clone(only)),
            Some(all) if !all.is_empty() => Err(StyleError::DuplicateId {
                id: id.to_string(),
                location: self.location.clone(),
                count: all.len(),
            }),
            _ => Err(StyleError::MissingId {
                id: id.to_string(),
                location: self.location.clone(),
            }),
        }
    }

    /// Resolves an href found in this document. Entries of the document's own
    /// archive win over anything outside it.
    pub fn resolve_href(&self, href: &str) -> String {
        let href = href.trim();
        if has_scheme(href) {
            return href.to_string();
        }
        if let Some(source) = &self.archive {
            let candidate = join_href(&source.entry, href);
            if source.archive.contains(&candidate) {
                return source.archive.entry_location(&candidate);
            }
            return join_href(source.archive.location(), href);
        }
        join_href(&self.location, href)
    }

    /// True when `path` (as written in this document) names this document.
    pub fn is_same_location(&self, path: &str) -> bool {
        let path = path.trim();
        path == self.location || self.resolve_href(path) == self.location
    }

    pub fn find_all(&self, kind: ElementKind) -> Vec<Rc<Element>> {
        self.root
            .descendants()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect()
    }
}

impl std::fmt::Debug for KmlDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmlDocument")
            .field("location", &self.location)
            .field("root", &self.root.tag())
            .field("content_hash", &self.content_hash)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};
    use std::rc::Rc;

    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use zip::write::SimpleFileOptions;

    use super::{KmlDocument, LoadError};
    use crate::kml::registry::ElementRegistry;
    use crate::kml::resolve::StyleError;

    const DOC: &str = r#"<kml xmlns="http://www.opengis.net/kml/2.2">
      <Document>
        <Schema name="Course" id="course">
          <SimpleField type="int" name="holes"><displayName>Holes</displayName></SimpleField>
        </Schema>
        <Placemark id="a"><styleUrl>#s</styleUrl></Placemark>
        <Folder><Placemark id="dup"/><Placemark id="dup"/></Folder>
        <Style id="s"/>
      </Document>
    </kml>"#;

    fn registry() -> Rc<ElementRegistry> {
        Rc::new(ElementRegistry::kml())
    }

    #[test]
    fn parse_is_idempotent() {
        let doc = KmlDocument::parse("doc.kml", DOC, registry()).unwrap();
        let document = &doc.shapes()[0];
        let first: Vec<_> = document.children().iter().map(|c| c.tag().to_string()).collect();
        let second: Vec<_> = document.children().iter().map(|c| c.tag().to_string()).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["Schema", "Placemark", "Folder", "Style"]);

        let again = KmlDocument::parse("doc.kml", DOC, registry()).unwrap();
        let reparsed: Vec<_> = again.shapes()[0]
            .children()
            .iter()
            .map(|c| c.tag().to_string())
            .collect();
        assert_eq!(first, reparsed);
        assert_eq!(doc.content_hash(), again.content_hash());
    }

    #[test]
    fn ids_are_document_wide_and_duplicates_surface_on_lookup() {
        let doc = KmlDocument::parse("doc.kml", DOC, registry()).unwrap();
        assert_eq!(doc.element_by_id("s").unwrap().tag(), "Style");
        assert_eq!(
            doc.element_by_id("dup").unwrap_err(),
            StyleError::DuplicateId {
                id: "dup".to_string(),
                location: "doc.kml".to_string(),
                count: 2
            }
        );
        assert!(matches!(
            doc.element_by_id("nope"),
            Err(StyleError::MissingId { .. })
        ));
    }

    #[test]
    fn elements_know_their_document() {
        let doc = KmlDocument::parse("doc.kml", DOC, registry()).unwrap();
        let placemark = doc.element_by_id("a").unwrap();
        assert!(Rc::ptr_eq(&placemark.document().unwrap(), &doc));
    }

    #[test]
    fn schemas_are_collected() {
        let doc = KmlDocument::parse("doc.kml", DOC, registry()).unwrap();
        let schemas = doc.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name.as_deref(), Some("Course"));
        assert_eq!(schemas[0].fields[0].display_name.as_deref(), Some("Holes"));
    }

    #[test]
    fn rejects_unknown_roots_and_bad_xml() {
        assert!(matches!(
            KmlDocument::parse("x.kml", "<html/>", registry()),
            Err(LoadError::UnknownRoot { .. })
        ));
        assert!(matches!(
            KmlDocument::parse("x.kml", "<kml>", registry()),
            Err(LoadError::Xml { .. })
        ));
    }

    #[test]
    fn bare_feature_root_is_its_own_shape() {
        let doc = KmlDocument::parse("p.kml", "<Placemark><name>x</name></Placemark>", registry())
            .unwrap();
        assert_eq!(doc.shapes().len(), 1);
        assert_eq!(doc.shapes()[0].tag(), "Placemark");
    }

    #[test]
    fn hrefs_resolve_against_location() {
        let doc = KmlDocument::parse("data/doc.kml", "<kml/>", registry()).unwrap();
        assert_eq!(doc.resolve_href("styles.kml"), "data/styles.kml");
        assert_eq!(
            doc.resolve_href("https://example.com/a.kml"),
            "https://example.com/a.kml"
        );
        assert!(doc.is_same_location("doc.kml"));
        assert!(!doc.is_same_location("other.kml"));
    }

    #[test]
    fn root_relative_hrefs_stay_on_the_document_origin() {
        let doc = KmlDocument::parse("https://example.com/kml/doc.kml", "<kml/>", registry()).unwrap();
        assert_eq!(
            doc.resolve_href("/styles/s.kml"),
            "https://example.com/styles/s.kml"
        );
        assert_eq!(doc.resolve_href("/live.kml"), "https://example.com/live.kml");

        let local = KmlDocument::parse("data/doc.kml", "<kml/>", registry()).unwrap();
        assert_eq!(local.resolve_href("/srv/x.kml"), "/srv/x.kml");
    }

    #[test]
    fn kmz_hrefs_prefer_archive_entries() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in [
            ("doc.kml", "<kml><Document/></kml>"),
            ("files/styles.kml", "<kml/>"),
        ] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        let bytes = Bytes::from(writer.finish().unwrap().into_inner());

        let doc = KmlDocument::from_bytes("data/a.kmz", bytes, registry()).unwrap();
        assert_eq!(doc.location(), "data/a.kmz");
        assert!(doc.archive().is_some());
        assert_eq!(
            doc.resolve_href("files/styles.kml"),
            "data/a.kmz!/files/styles.kml"
        );
        assert_eq!(doc.resolve_href("other.kml"), "data/other.kml");
    }
}
