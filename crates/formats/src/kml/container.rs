use std::rc::Rc;

use foundation::bounds::GeoBounds;
use tracing::trace;

use crate::kml::element::{Element, Selector};
use crate::kml::fields;
use crate::kml::geometry::parse_coordinates;
use crate::kml::network_link;
use crate::kml::render::{RenderContext, RenderableShape, ShapeCollector, ShapeGeometry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleField {
    pub name: String,
    pub field_type: String,
    pub display_name: Option<String>,
}

/// A `Schema` declaration for typed `ExtendedData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub id: Option<String>,
    pub name: Option<String>,
    pub fields: Vec<SimpleField>,
}

impl Schema {
    pub fn from_element(element: &Rc<Element>) -> Self {
        let fields = element
            .node()
            .children_named("SimpleField")
            .filter_map(|node| {
                Some(SimpleField {
                    name: node.attribute("name")?.to_string(),
                    field_type: node.attribute("type").unwrap_or("string").to_string(),
                    display_name: node.child_text("displayName").map(str::to_string),
                })
            })
            .collect();
        Self {
            id: element.id().map(str::to_string),
            name: element.attribute("name").map(str::to_string),
            fields,
        }
    }
}

impl Element {
    /// Feature children in document order.
    pub fn shapes(self: &Rc<Self>) -> Vec<Rc<Element>> {
        self.children()
            .iter()
            .filter(|c| c.is_feature())
            .cloned()
            .collect()
    }

    /// `Schema` children of a container.
    pub fn schemas(self: &Rc<Self>) -> Vec<Schema> {
        self.children_matching(Selector::Tag("Schema"))
            .map(Schema::from_element)
            .collect()
    }

    /// Renders this feature and, for containers, everything below it in
    /// document order. Hidden features (`visibility` 0) render nothing.
    pub fn render(self: &Rc<Self>, collector: &mut dyn ShapeCollector, ctx: &RenderContext<'_>) {
        if !self.visibility() {
            trace!(tag = %self.tag(), id = self.id().unwrap_or(""), "skipping hidden feature");
            return;
        }
        match self.tag() {
            "kml" | "Document" | "Folder" => {
                for shape in self.shapes() {
                    shape.render(collector, ctx);
                }
            }
            "Placemark" => {
                let Some(geometry) = self.geometry() else {
                    return;
                };
                collector.add_shape(self.renderable(ShapeGeometry::Geometry(geometry), ctx));
            }
            "GroundOverlay" | "ScreenOverlay" | "PhotoOverlay" => {
                let overlay = self.overlay();
                collector.add_shape(self.renderable(overlay, ctx));
            }
            "NetworkLink" => network_link::render_link(self, collector, ctx),
            _ => {}
        }
    }

    fn renderable(self: &Rc<Self>, geometry: ShapeGeometry, ctx: &RenderContext<'_>) -> RenderableShape {
        RenderableShape {
            name: self.name(),
            geometry,
            attributes: ctx.attributes_for(self),
            properties: self.extended_data(),
            source: Some(Rc::clone(self)),
        }
    }

    fn overlay(self: &Rc<Self>) -> ShapeGeometry {
        let icon_href = self
            .create_child_element(Selector::Tag("Icon"))
            .and_then(|icon| icon.retrieve("href", fields::string));
        let bounds = self
            .create_child_element(Selector::Tag("LatLonBox"))
            .and_then(|b| {
                Some(GeoBounds::new(
                    b.retrieve("north", fields::number)?,
                    b.retrieve("south", fields::number)?,
                    b.retrieve("east", fields::number)?,
                    b.retrieve("west", fields::number)?,
                ))
            });
        let quad = self
            .create_child_element(Selector::Tag("gx:LatLonQuad"))
            .and_then(|q| q.node().child_text("coordinates").map(parse_coordinates))
            .map(|c| c.positions)
            .unwrap_or_default();
        ShapeGeometry::Overlay {
            icon_href,
            bounds,
            quad,
        }
    }
}
