use std::rc::Rc;

use foundation::bounds::GeoBounds;
use foundation::position::Position;

use crate::kml::document::KmlDocument;
use crate::kml::element::Element;
use crate::kml::geometry::Geometry;
use crate::kml::network_link::NetworkLink;
use crate::kml::style::AttributeBundle;

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeGeometry {
    Geometry(Geometry),
    /// Ground, screen and photo overlays: an image plus where to drape it.
    Overlay {
        icon_href: Option<String>,
        bounds: Option<GeoBounds>,
        quad: Vec<Position>,
    },
}

/// What a renderer receives for one visible feature.
#[derive(Debug, Clone)]
pub struct RenderableShape {
    pub name: Option<String>,
    pub geometry: ShapeGeometry,
    pub attributes: Rc<AttributeBundle>,
    pub properties: Vec<(String, String)>,
    pub source: Option<Rc<Element>>,
}

pub trait ShapeCollector {
    fn add_shape(&mut self, shape: RenderableShape);
}

impl ShapeCollector for Vec<RenderableShape> {
    fn add_shape(&mut self, shape: RenderableShape) {
        self.push(shape);
    }
}

/// Services rendering needs but documents do not own.
pub trait RenderHost {
    /// Attributes to draw `shape` with this frame, or `None` while nothing is
    /// known yet.
    fn current_attributes(&self, shape: &Rc<Element>) -> Option<Rc<AttributeBundle>>;

    /// The document behind a network link if it is loaded. May start the load.
    fn linked_document(&self, link: &NetworkLink, location: &str) -> Option<Rc<KmlDocument>>;

    fn max_link_depth(&self) -> u32;
}

/// Host for rendering without a session: default attributes, links not followed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedHost;

impl RenderHost for DetachedHost {
    fn current_attributes(&self, _shape: &Rc<Element>) -> Option<Rc<AttributeBundle>> {
        None
    }

    fn linked_document(&self, _link: &NetworkLink, _location: &str) -> Option<Rc<KmlDocument>> {
        None
    }

    fn max_link_depth(&self) -> u32 {
        0
    }
}

/// One level of a render walk. Network links push a nested context so link
/// cycles and depth can be checked.
pub struct RenderContext<'a> {
    pub host: &'a dyn RenderHost,
    /// Used for shapes whose own styles are not available yet.
    pub style: Rc<AttributeBundle>,
    pub depth: u32,
    location: Option<&'a str>,
    parent: Option<&'a RenderContext<'a>>,
}

impl<'a> RenderContext<'a> {
    pub fn new(host: &'a dyn RenderHost, style: Rc<AttributeBundle>) -> Self {
        Self {
            host,
            style,
            depth: 0,
            location: None,
            parent: None,
        }
    }

    pub fn for_document(host: &'a dyn RenderHost, style: Rc<AttributeBundle>, location: &'a str) -> Self {
        Self {
            location: Some(location),
            ..Self::new(host, style)
        }
    }

    /// Context for rendering the document at `location` behind a link.
    pub fn nested(&'a self, location: &'a str) -> RenderContext<'a> {
        RenderContext {
            host: self.host,
            style: Rc::clone(&self.style),
            depth: self.depth + 1,
            location: Some(location),
            parent: Some(self),
        }
    }

    /// True when `location` is already being rendered further up.
    pub fn is_rendering(&self, location: &str) -> bool {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            if c.location == Some(location) {
                return true;
            }
            ctx = c.parent;
        }
        false
    }

    pub fn attributes_for(&self, shape: &Rc<Element>) -> Rc<AttributeBundle> {
        self.host
            .current_attributes(shape)
            .unwrap_or_else(|| Rc::clone(&self.style))
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::{DetachedHost, RenderContext, RenderableShape, ShapeGeometry};
    use crate::kml::document::KmlDocument;
    use crate::kml::registry::ElementRegistry;
    use crate::kml::style::AttributeBundle;

    fn render(text: &str) -> Vec<RenderableShape> {
        let doc = KmlDocument::parse("doc.kml", text, Rc::new(ElementRegistry::kml())).unwrap();
        let ctx = RenderContext::for_document(&DetachedHost, Rc::new(AttributeBundle::default()), doc.location());
        let mut shapes: Vec<RenderableShape> = Vec::new();
        doc.render(&mut shapes, &ctx);
        shapes
    }

    #[test]
    fn renders_in_document_order_and_skips_hidden() {
        let shapes = render(
            "<kml><Document>\
               <Placemark><name>a</name><Point><coordinates>1,2</coordinates></Point></Placemark>\
               <Folder><visibility>0</visibility>\
                 <Placemark><name>hidden</name><Point><coordinates>1,2</coordinates></Point></Placemark>\
               </Folder>\
               <Folder><Placemark><name>b</name><Point><coordinates>3,4</coordinates></Point></Placemark></Folder>\
               <Placemark><name>no geometry</name></Placemark>\
             </Document></kml>",
        );
        let names: Vec<_> = shapes.iter().filter_map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert!(shapes[0].source.is_some());
    }

    #[test]
    fn ground_overlay_carries_bounds_and_icon() {
        let shapes = render(
            "<GroundOverlay><Icon><href>map.png</href></Icon>\
             <LatLonBox><north>10</north><south>-10</south><east>20</east><west>-20</west></LatLonBox>\
             </GroundOverlay>",
        );
        let ShapeGeometry::Overlay {
            icon_href, bounds, ..
        } = &shapes[0].geometry
        else {
            panic!("expected an overlay");
        };
        assert_eq!(icon_href.as_deref(), Some("map.png"));
        assert_eq!(bounds.unwrap().north, 10.0);
    }

    #[test]
    fn nested_contexts_track_locations() {
        let style = Rc::new(AttributeBundle::default());
        let root = RenderContext::for_document(&DetachedHost, style, "a.kml");
        let child = root.nested("b.kml");
        assert_eq!(child.depth, 1);
        assert!(child.is_rendering("a.kml"));
        assert!(child.is_rendering("b.kml"));
        assert!(!root.is_rendering("b.kml"));
    }
}
