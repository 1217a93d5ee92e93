use std::rc::Rc;

use foundation::position::Position;

use crate::kml::geometry::{Geometry, GeometryOptions};
use crate::kml::render::{RenderableShape, ShapeCollector, ShapeGeometry};
use crate::kml::style::AttributeBundle;
use crate::wkt::WktError;
use crate::wkt::parser;

/// Ordinates per coordinate, from the `Z`/`M`/`ZM` tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Dimension {
    #[default]
    Xy,
    Xyz,
    Xym,
    Xyzm,
}

impl Dimension {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_uppercase().as_str() {
            "Z" => Some(Dimension::Xyz),
            "M" => Some(Dimension::Xym),
            "ZM" => Some(Dimension::Xyzm),
            _ => None,
        }
    }

    pub fn has_z(self) -> bool {
        matches!(self, Dimension::Xyz | Dimension::Xyzm)
    }
}

/// A parsed WKT geometry. Positions are latitude first; see [`Position`].
#[derive(Debug, Clone, PartialEq)]
pub enum WktGeometry {
    Point(Option<Position>),
    LineString(Vec<Position>),
    /// Rings, outer boundary first.
    Polygon(Vec<Vec<Position>>),
    Triangle(Vec<Position>),
    MultiPoint(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
    GeometryCollection(Vec<WktGeometry>),
}

impl WktGeometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            WktGeometry::Point(_) => "POINT",
            WktGeometry::LineString(_) => "LINESTRING",
            WktGeometry::Polygon(_) => "POLYGON",
            WktGeometry::Triangle(_) => "TRIANGLE",
            WktGeometry::MultiPoint(_) => "MULTIPOINT",
            WktGeometry::MultiLineString(_) => "MULTILINESTRING",
            WktGeometry::MultiPolygon(_) => "MULTIPOLYGON",
            WktGeometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            WktGeometry::Point(p) => p.is_none(),
            WktGeometry::LineString(v) | WktGeometry::Triangle(v) | WktGeometry::MultiPoint(v) => v.is_empty(),
            WktGeometry::Polygon(v) | WktGeometry::MultiLineString(v) => v.is_empty(),
            WktGeometry::MultiPolygon(v) => v.is_empty(),
            WktGeometry::GeometryCollection(v) => v.iter().all(WktGeometry::is_empty),
        }
    }

    /// One independent shape per simple geometry. Multi geometries and
    /// collections are split so every member carries its own positions.
    pub fn shapes(&self) -> Vec<Geometry> {
        let mut out = Vec::new();
        self.collect_shapes(&mut out);
        out
    }

    fn collect_shapes(&self, out: &mut Vec<Geometry>) {
        let options = GeometryOptions::default();
        match self {
            WktGeometry::Point(Some(position)) => out.push(Geometry::Point {
                position: *position,
                options,
            }),
            WktGeometry::Point(None) => {}
            WktGeometry::LineString(positions) if !positions.is_empty() => {
                out.push(Geometry::LineString {
                    positions: positions.clone(),
                    options,
                })
            }
            WktGeometry::LineString(_) => {}
            WktGeometry::Polygon(rings) => out.extend(polygon(rings)),
            WktGeometry::Triangle(ring) if !ring.is_empty() => out.push(Geometry::Polygon {
                outer: ring.clone(),
                inner: Vec::new(),
                options,
            }),
            WktGeometry::Triangle(_) => {}
            WktGeometry::MultiPoint(points) => {
                out.extend(points.iter().map(|p| Geometry::Point {
                    position: *p,
                    options,
                }))
            }
            WktGeometry::MultiLineString(lines) => {
                for line in lines {
                    WktGeometry::LineString(line.clone()).collect_shapes(out);
                }
            }
            WktGeometry::MultiPolygon(polygons) => {
                out.extend(polygons.iter().filter_map(|rings| polygon(rings)))
            }
            WktGeometry::GeometryCollection(members) => {
                for member in members {
                    member.collect_shapes(out);
                }
            }
        }
    }
}

fn polygon(rings: &[Vec<Position>]) -> Option<Geometry> {
    let (outer, inner) = rings.split_first()?;
    Some(Geometry::Polygon {
        outer: outer.clone(),
        inner: inner.to_vec(),
        options: GeometryOptions::default(),
    })
}

/// A WKT source: optional `SRID=n;` prefix plus one geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Wkt {
    pub srid: Option<u32>,
    pub dimension: Dimension,
    pub geometry: WktGeometry,
}

impl Wkt {
    pub fn parse(text: &str) -> Result<Self, WktError> {
        parser::parse(text)
    }

    pub fn shapes(&self) -> Vec<Geometry> {
        self.geometry.shapes()
    }

    /// Emits every shape with default attributes; WKT carries no styling.
    pub fn render(&self, collector: &mut dyn ShapeCollector) {
        let attributes = Rc::new(AttributeBundle::default());
        for geometry in self.shapes() {
            collector.add_shape(RenderableShape {
                name: None,
                geometry: ShapeGeometry::Geometry(geometry),
                attributes: Rc::clone(&attributes),
                properties: Vec::new(),
                source: None,
            });
        }
    }
}
