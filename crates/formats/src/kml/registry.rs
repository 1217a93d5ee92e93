use std::collections::HashMap;
use std::rc::Rc;

use crate::kml::element::{Element, ElementError, ElementInit};

/// Broad role of an element in the KML object model.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Feature,
    Container,
    Geometry,
    StyleSelector,
    SubStyle,
    Object,
}

impl ElementKind {
    /// Containers are features too.
    pub fn is_feature(self) -> bool {
        matches!(self, ElementKind::Feature | ElementKind::Container)
    }
}

/// What an element can carry, independent of its kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub children: bool,
    pub style: bool,
    pub geometry: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        children: false,
        style: false,
        geometry: false,
    };
    pub const CHILDREN: Capabilities = Capabilities {
        children: true,
        style: false,
        geometry: false,
    };
    pub const STYLED: Capabilities = Capabilities {
        children: true,
        style: true,
        geometry: false,
    };
    pub const PLACEMARK: Capabilities = Capabilities {
        children: true,
        style: true,
        geometry: true,
    };
    pub const GEOMETRY: Capabilities = Capabilities {
        children: true,
        style: false,
        geometry: true,
    };
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ElementConstructor {
    pub kind: ElementKind,
    pub capabilities: Capabilities,
}

impl ElementConstructor {
    pub const fn new(kind: ElementKind, capabilities: Capabilities) -> Self {
        Self { kind, capabilities }
    }

    pub fn construct(&self, init: ElementInit) -> Result<Rc<Element>, ElementError> {
        Element::new(*self, init)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown element <{tag}>")]
pub struct UnknownElement {
    pub tag: String,
}

/// Tag name to constructor table.
///
/// Elements refer to each other only by tag, so registration order does not
/// matter as long as every registration happens before the first lookup.
#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    constructors: HashMap<String, ElementConstructor>,
}

const FEATURES: &[(&str, ElementKind, Capabilities)] = &[
    ("Document", ElementKind::Container, Capabilities::STYLED),
    ("Folder", ElementKind::Container, Capabilities::STYLED),
    ("Placemark", ElementKind::Feature, Capabilities::PLACEMARK),
    ("NetworkLink", ElementKind::Feature, Capabilities::STYLED),
    ("GroundOverlay", ElementKind::Feature, Capabilities::STYLED),
    ("ScreenOverlay", ElementKind::Feature, Capabilities::STYLED),
    ("PhotoOverlay", ElementKind::Feature, Capabilities::STYLED),
    ("gx:Tour", ElementKind::Feature, Capabilities::STYLED),
];

const GEOMETRIES: &[&str] = &[
    "Point",
    "LineString",
    "LinearRing",
    "Polygon",
    "MultiGeometry",
    "Model",
    "gx:Track",
    "gx:MultiTrack",
];

const STYLE_SELECTORS: &[&str] = &["Style", "StyleMap"];

const SUB_STYLES: &[&str] = &[
    "LineStyle",
    "PolyStyle",
    "IconStyle",
    "LabelStyle",
    "BalloonStyle",
    "ListStyle",
];

const OBJECTS: &[&str] = &[
    "kml",
    "NetworkLinkControl",
    "Pair",
    "Icon",
    "Link",
    "Url",
    "ItemIcon",
    "Schema",
    "ExtendedData",
    "SchemaData",
    "TimeStamp",
    "TimeSpan",
    "Region",
    "LatLonAltBox",
    "LatLonBox",
    "gx:LatLonQuad",
    "Lod",
    "LookAt",
    "Camera",
    "outerBoundaryIs",
    "innerBoundaryIs",
    "Location",
    "Orientation",
    "Scale",
    "Update",
    "gx:Playlist",
    "gx:FlyTo",
    "gx:Wait",
    "gx:TourControl",
    "gx:AnimatedUpdate",
    "gx:SoundCue",
];

/// Leaf objects: they only carry simple fields.
const LEAF_OBJECTS: &[&str] = &[
    "SimpleField",
    "Data",
    "SimpleData",
    "Snippet",
    "Metadata",
    "Alias",
    "ResourceMap",
    "ImagePyramid",
    "ViewVolume",
    "Change",
    "Create",
    "Delete",
    "gx:TimeStamp",
    "gx:TimeSpan",
    "gx:ViewerOptions",
    "gx:SimpleArrayData",
    "gx:SimpleArrayField",
    "xal:AddressDetails",
];

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the OGC KML 2.2 vocabulary and the `gx:` extensions.
    pub fn kml() -> Self {
        let mut registry = Self::new();
        for (tag, kind, caps) in FEATURES {
            registry.register(*tag, ElementConstructor::new(*kind, *caps));
        }
        for tag in GEOMETRIES {
            registry.register(
                *tag,
                ElementConstructor::new(ElementKind::Geometry, Capabilities::GEOMETRY),
            );
        }
        for tag in STYLE_SELECTORS {
            registry.register(
                *tag,
                ElementConstructor::new(ElementKind::StyleSelector, Capabilities::CHILDREN),
            );
        }
        for tag in SUB_STYLES {
            registry.register(
                *tag,
                ElementConstructor::new(ElementKind::SubStyle, Capabilities::CHILDREN),
            );
        }
        for tag in OBJECTS {
            registry.register(
                *tag,
                ElementConstructor::new(ElementKind::Object, Capabilities::CHILDREN),
            );
        }
        for tag in LEAF_OBJECTS {
            registry.register(
                *tag,
                ElementConstructor::new(ElementKind::Object, Capabilities::NONE),
            );
        }
        registry
    }

    /// Registers `tag`, returning the constructor it replaced.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        constructor: ElementConstructor,
    ) -> Option<ElementConstructor> {
        self.constructors.insert(tag.into(), constructor)
    }

    pub fn lookup(&self, tag: &str) -> Result<&ElementConstructor, UnknownElement> {
        self.constructors.get(tag).ok_or_else(|| UnknownElement {
            tag: tag.to_string(),
        })
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Capabilities, ElementConstructor, ElementKind, ElementRegistry, UnknownElement};

    #[test]
    fn kml_vocabulary_is_registered() {
        let r = ElementRegistry::kml();
        assert_eq!(r.lookup("Folder").unwrap().kind, ElementKind::Container);
        assert_eq!(r.lookup("gx:Track").unwrap().kind, ElementKind::Geometry);
        assert_eq!(r.lookup("StyleMap").unwrap().kind, ElementKind::StyleSelector);
        assert_eq!(r.lookup("ListStyle").unwrap().kind, ElementKind::SubStyle);
        assert!(r.lookup("Placemark").unwrap().capabilities.geometry);
        assert!(!r.lookup("Folder").unwrap().capabilities.geometry);
        assert!(r.contains("NetworkLinkControl"));
    }

    #[test]
    fn unknown_tags_are_a_recoverable_result() {
        let r = ElementRegistry::kml();
        assert_eq!(
            r.lookup("Sandwich"),
            Err(UnknownElement {
                tag: "Sandwich".to_string()
            })
        );
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut r = ElementRegistry::new();
        assert!(r.is_empty());
        let object = ElementConstructor::new(ElementKind::Object, Capabilities::NONE);
        let feature = ElementConstructor::new(ElementKind::Feature, Capabilities::STYLED);
        assert_eq!(r.register("x:Custom", object), None);
        assert_eq!(r.register("x:Custom", feature), Some(object));
        assert_eq!(r.lookup("x:Custom").unwrap().kind, ElementKind::Feature);
        assert_eq!(r.len(), 1);
    }
}
