//! GeoJSON export of rendered shapes.

use foundation::position::Position;
use serde_json::{Map, Value};

use crate::kml::geometry::Geometry;
use crate::kml::render::{RenderableShape, ShapeCollector, ShapeGeometry};
use crate::kml::style::Attributes;

/// Collects shapes and writes them out as a GeoJSON `FeatureCollection`.
///
/// Overlays without bounds and tracks without positions have no GeoJSON
/// geometry and are written with `"geometry": null`.
#[derive(Debug, Default)]
pub struct GeoJsonCollector {
    features: Vec<Value>,
}

impl GeoJsonCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        root.insert(
            "type".to_string(),
            Value::String("FeatureCollection".to_string()),
        );
        root.insert("features".to_string(), Value::Array(self.features.clone()));
        Value::Object(root)
    }

    pub fn to_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_value())
    }

    pub fn to_string_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_value())
    }
}

impl ShapeCollector for GeoJsonCollector {
    fn add_shape(&mut self, shape: RenderableShape) {
        let mut feature = Map::new();
        feature.insert("type".to_string(), Value::String("Feature".to_string()));
        if let Some(id) = shape.source.as_ref().and_then(|e| e.id()) {
            feature.insert("id".to_string(), Value::String(id.to_string()));
        }

        let mut properties = Map::new();
        if let Some(name) = &shape.name {
            properties.insert("name".to_string(), Value::String(name.clone()));
        }
        for (key, value) in &shape.properties {
            properties.insert(key.clone(), Value::String(value.clone()));
        }
        style_properties(&mut properties, &shape.attributes.normal);

        let geometry = match &shape.geometry {
            ShapeGeometry::Geometry(geometry) => geometry_value(geometry),
            ShapeGeometry::Overlay {
                icon_href, bounds, ..
            } => {
                if let Some(href) = icon_href {
                    properties.insert("icon".to_string(), Value::String(href.clone()));
                }
                bounds.map(|b| {
                    let ring = [
                        (b.west, b.south),
                        (b.east, b.south),
                        (b.east, b.north),
                        (b.west, b.north),
                        (b.west, b.south),
                    ]
                    .iter()
                    .map(|&(lon, lat)| Value::Array(vec![Value::from(lon), Value::from(lat)]))
                    .collect();
                    typed("Polygon", Value::Array(vec![Value::Array(ring)]))
                })
            }
        };

        feature.insert("properties".to_string(), Value::Object(properties));
        feature.insert("geometry".to_string(), geometry.unwrap_or(Value::Null));
        self.features.push(Value::Object(feature));
    }
}

/// simplestyle-spec names, colors converted from KML `aabbggrr`.
fn style_properties(properties: &mut Map<String, Value>, attributes: &Attributes) {
    let shape = &attributes.shape;
    if let Some((color, opacity)) = css_color(&shape.outline_color) {
        properties.insert("stroke".to_string(), Value::String(color));
        properties.insert("stroke-opacity".to_string(), Value::from(opacity));
    }
    properties.insert("stroke-width".to_string(), Value::from(shape.outline_width));
    if let Some((color, opacity)) = css_color(&shape.interior_color) {
        properties.insert("fill".to_string(), Value::String(color));
        properties.insert(
            "fill-opacity".to_string(),
            Value::from(if shape.draw_interior { opacity } else { 0.0 }),
        );
    }
    if let Some(href) = &attributes.icon.href {
        properties.insert("marker-symbol".to_string(), Value::String(href.clone()));
    }
}

/// `aabbggrr` to `(#rrggbb, alpha)`.
fn css_color(kml: &str) -> Option<(String, f64)> {
    let hex = kml.strip_prefix('#').unwrap_or(kml);
    if hex.len() != 8 || !hex.is_ascii() {
        return None;
    }
    let alpha = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let (b, g, r) = (&hex[2..4], &hex[4..6], &hex[6..8]);
    Some((
        format!("#{r}{g}{b}").to_ascii_lowercase(),
        f64::from(alpha) / 255.0,
    ))
}

fn coords(p: &Position) -> Value {
    if p.altitude != 0.0 {
        Value::Array(vec![
            Value::from(p.longitude),
            Value::from(p.latitude),
            Value::from(p.altitude),
        ])
    } else {
        Value::Array(vec![Value::from(p.longitude), Value::from(p.latitude)])
    }
}

fn line(positions: &[Position]) -> Value {
    Value::Array(positions.iter().map(coords).collect())
}

fn typed(kind: &str, coordinates: Value) -> Value {
    let mut obj = Map::new();
    obj.insert("type".to_string(), Value::String(kind.to_string()));
    obj.insert("coordinates".to_string(), coordinates);
    Value::Object(obj)
}

fn geometry_value(geometry: &Geometry) -> Option<Value> {
    Some(match geometry {
        Geometry::Point { position, .. } => typed("Point", coords(position)),
        Geometry::LineString { positions, .. } | Geometry::Track { positions, .. } => {
            if positions.is_empty() {
                return None;
            }
            typed("LineString", line(positions))
        }
        Geometry::LinearRing { positions, .. } => typed("Polygon", Value::Array(vec![line(positions)])),
        Geometry::Polygon { outer, inner, .. } => {
            let rings = std::iter::once(outer)
                .chain(inner.iter())
                .map(|ring| line(ring))
                .collect();
            typed("Polygon", Value::Array(rings))
        }
        Geometry::Model { location, .. } => typed("Point", coords(location.as_ref()?)),
        Geometry::MultiGeometry(members) | Geometry::MultiTrack(members) => {
            let mut obj = Map::new();
            obj.insert(
                "type".to_string(),
                Value::String("GeometryCollection".to_string()),
            );
            obj.insert(
                "geometries".to_string(),
                Value::Array(members.iter().filter_map(geometry_value).collect()),
            );
            Value::Object(obj)
        }
    })
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{GeoJsonCollector, css_color};
    use crate::kml::document::KmlDocument;
    use crate::kml::registry::ElementRegistry;
    use crate::kml::render::{DetachedHost, RenderContext};
    use crate::kml::style::AttributeBundle;
    use crate::wkt::parse;

    #[test]
    fn converts_kml_colors() {
        assert_eq!(css_color("7f0000ff"), Some(("#ff0000".to_string(), 127.0 / 255.0)));
        assert_eq!(css_color("bogus"), None);
    }

    #[test]
    fn exports_placemarks_with_properties() {
        let doc = KmlDocument::parse(
            "doc.kml",
            "<Placemark id=\"p1\"><name>pin</name>\
               <ExtendedData><Data name=\"kind\"><value>cafe</value></Data></ExtendedData>\
               <Point><coordinates>10,20</coordinates></Point></Placemark>",
            Rc::new(ElementRegistry::kml()),
        )
        .unwrap();
        let mut geojson = GeoJsonCollector::new();
        let ctx = RenderContext::for_document(&DetachedHost, Rc::new(AttributeBundle::default()), doc.location());
        doc.render(&mut geojson, &ctx);

        let value = geojson.to_value();
        let feature = &value["features"][0];
        assert_eq!(feature["id"], json!("p1"));
        assert_eq!(feature["geometry"], json!({"type": "Point", "coordinates": [10.0, 20.0]}));
        assert_eq!(feature["properties"]["name"], json!("pin"));
        assert_eq!(feature["properties"]["kind"], json!("cafe"));
        assert_eq!(feature["properties"]["stroke"], json!("#ffffff"));
    }

    #[test]
    fn exports_wkt_shapes() {
        let mut geojson = GeoJsonCollector::new();
        parse("POLYGON ((0 0, 1 0, 1 1, 0 0))").unwrap().render(&mut geojson);
        assert_eq!(geojson.len(), 1);
        let value = geojson.to_value();
        assert_eq!(value["type"], json!("FeatureCollection"));
        assert_eq!(
            value["features"][0]["geometry"]["coordinates"][0][1],
            json!([1.0, 0.0])
        );
    }
}
