use std::rc::Rc;

use foundation::position::Position;
use foundation::time::Time;

use crate::kml::element::{Element, Selector};
use crate::kml::fields::{self, FieldError};
use crate::kml::registry::ElementKind;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AltitudeMode {
    #[default]
    ClampToGround,
    RelativeToGround,
    Absolute,
    ClampToSeaFloor,
    RelativeToSeaFloor,
}

impl AltitudeMode {
    pub fn parse(text: &str) -> Result<Self, FieldError> {
        match text {
            "clampToGround" => Ok(AltitudeMode::ClampToGround),
            "relativeToGround" => Ok(AltitudeMode::RelativeToGround),
            "absolute" => Ok(AltitudeMode::Absolute),
            "clampToSeaFloor" => Ok(AltitudeMode::ClampToSeaFloor),
            "relativeToSeaFloor" => Ok(AltitudeMode::RelativeToSeaFloor),
            _ => Err(FieldError::Enum {
                expected: "altitudeMode",
                found: text.to_string(),
            }),
        }
    }
}

/// Per-geometry flags shared by every geometry type.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeometryOptions {
    pub altitude_mode: AltitudeMode,
    pub extrude: bool,
    pub tessellate: bool,
}

impl GeometryOptions {
    fn from_element(element: &Element) -> Self {
        let altitude_mode = element
            .retrieve("altitudeMode", fields::altitude_mode)
            .or_else(|| element.retrieve("gx:altitudeMode", fields::altitude_mode))
            .unwrap_or_default();
        Self {
            altitude_mode,
            extrude: element.retrieve("extrude", fields::boolean).unwrap_or(false),
            tessellate: element.retrieve("tessellate", fields::boolean).unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point {
        position: Position,
        options: GeometryOptions,
    },
    LineString {
        positions: Vec<Position>,
        options: GeometryOptions,
    },
    LinearRing {
        positions: Vec<Position>,
        options: GeometryOptions,
    },
    Polygon {
        outer: Vec<Position>,
        inner: Vec<Vec<Position>>,
        options: GeometryOptions,
    },
    MultiGeometry(Vec<Geometry>),
    Track {
        when: Vec<Time>,
        positions: Vec<Position>,
        options: GeometryOptions,
    },
    MultiTrack(Vec<Geometry>),
    Model {
        location: Option<Position>,
        href: Option<String>,
        options: GeometryOptions,
    },
}

/// Result of reading a `coordinates` field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Coordinates {
    pub positions: Vec<Position>,
    /// Tuples that could not be read, verbatim.
    pub rejected: Vec<String>,
}

/// Reads whitespace separated `lon,lat[,alt]` tuples into lat/lon/alt
/// positions. Whitespace around commas is tolerated.
pub fn parse_coordinates(text: &str) -> Coordinates {
    let mut out = Coordinates::default();
    for tuple in collapse_comma_spacing(text).split_whitespace() {
        match parse_tuple(tuple) {
            Some(position) => out.positions.push(position),
            None => out.rejected.push(tuple.to_string()),
        }
    }
    out
}

fn parse_tuple(tuple: &str) -> Option<Position> {
    let mut parts = tuple.split(',');
    let lon: f64 = parts.next()?.parse().ok()?;
    let lat: f64 = parts.next()?.parse().ok()?;
    let alt: f64 = match parts.next() {
        Some(a) if !a.is_empty() => a.parse().ok()?,
        _ => 0.0,
    };
    if parts.next().is_some() {
        return None;
    }
    let position = Position::from_lon_lat(lon, lat, alt);
    position.is_valid().then_some(position)
}

fn collapse_comma_spacing(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && c != ',' && !out.ends_with(',') && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out
}

/// `gx:coord` is `lon lat alt` separated by spaces.
fn gx_coord(text: &str) -> Result<Position, FieldError> {
    let mut parts = text.split_whitespace().map(str::parse::<f64>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(lon)), Some(Ok(lat)), alt) => {
            let alt = match alt {
                Some(Ok(a)) => a,
                Some(Err(_)) => return Err(FieldError::Number(text.to_string())),
                None => 0.0,
            };
            Ok(Position::from_lon_lat(lon, lat, alt))
        }
        _ => Err(FieldError::Number(text.to_string())),
    }
}

fn coordinates_of(element: &Element) -> Vec<Position> {
    let Some(text) = element.node().child_text("coordinates") else {
        return Vec::new();
    };
    let coordinates = parse_coordinates(text);
    for tuple in &coordinates.rejected {
        element.malformed(format!("skipped coordinate tuple {tuple:?}"));
    }
    coordinates.positions
}

fn ring_of(boundary: &Rc<Element>) -> Option<Vec<Position>> {
    boundary
        .create_child_element(Selector::Tag("LinearRing"))
        .map(|ring| coordinates_of(&ring))
}

impl Geometry {
    /// Builds the geometry for a geometry-kind element. Elements without
    /// usable coordinates produce `None` and a diagnostic.
    pub fn from_element(element: &Rc<Element>) -> Option<Geometry> {
        let options = GeometryOptions::from_element(element);
        let geometry = match element.tag() {
            "Point" => {
                let Some(position) = coordinates_of(element).into_iter().next() else {
                    element.malformed("Point has no coordinates");
                    return None;
                };
                Geometry::Point { position, options }
            }
            "LineString" => Geometry::LineString {
                positions: coordinates_of(element),
                options,
            },
            "LinearRing" => Geometry::LinearRing {
                positions: coordinates_of(element),
                options,
            },
            "Polygon" => {
                let outer = element
                    .create_child_element(Selector::Tag("outerBoundaryIs"))
                    .and_then(|b| ring_of(&b));
                let Some(outer) = outer else {
                    element.malformed("Polygon has no outer boundary");
                    return None;
                };
                let mut inner = Vec::new();
                for boundary in element.children_matching(Selector::Tag("innerBoundaryIs")) {
                    for ring in boundary.children_matching(Selector::Tag("LinearRing")) {
                        inner.push(coordinates_of(ring));
                    }
                }
                Geometry::Polygon {
                    outer,
                    inner,
                    options,
                }
            }
            "MultiGeometry" => Geometry::MultiGeometry(
                element
                    .children_matching(Selector::Kind(ElementKind::Geometry))
                    .filter_map(Geometry::from_element)
                    .collect(),
            ),
            "gx:Track" => Geometry::Track {
                when: element.retrieve_all("when", fields::date),
                positions: element.retrieve_all("gx:coord", gx_coord),
                options,
            },
            "gx:MultiTrack" => Geometry::MultiTrack(
                element
                    .children_matching(Selector::Tag("gx:Track"))
                    .filter_map(Geometry::from_element)
                    .collect(),
            ),
            "Model" => {
                let location = element
                    .create_child_element(Selector::Tag("Location"))
                    .and_then(|l| {
                        let lon = l.retrieve("longitude", fields::number)?;
                        let lat = l.retrieve("latitude", fields::number)?;
                        let alt = l.retrieve("altitude", fields::number).unwrap_or(0.0);
                        Some(Position::from_lon_lat(lon, lat, alt))
                    });
                let href = element
                    .create_child_element(Selector::Tag("Link"))
                    .and_then(|l| l.retrieve("href", fields::string));
                Geometry::Model {
                    location,
                    href,
                    options,
                }
            }
            _ => return None,
        };
        Some(geometry)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => "Point",
            Geometry::LineString { .. } => "LineString",
            Geometry::LinearRing { .. } => "LinearRing",
            Geometry::Polygon { .. } => "Polygon",
            Geometry::MultiGeometry(_) => "MultiGeometry",
            Geometry::Track { .. } => "Track",
            Geometry::MultiTrack(_) => "MultiTrack",
            Geometry::Model { .. } => "Model",
        }
    }
}

impl Element {
    /// Geometry of a placemark: its first geometry-kind child.
    pub fn geometry(self: &Rc<Self>) -> Option<Geometry> {
        if !self.capabilities().geometry {
            return None;
        }
        let element = self.create_child_element(Selector::Kind(ElementKind::Geometry))?;
        Geometry::from_element(&element)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use foundation::position::Position;
    use pretty_assertions::assert_eq;

    use super::{AltitudeMode, Geometry, parse_coordinates};
    use crate::kml::element::{Element, ElementInit, ParseContext};
    use crate::kml::registry::ElementRegistry;
    use crate::kml::xml::XmlNode;

    fn placemark(body: &str) -> Rc<Element> {
        let registry = Rc::new(ElementRegistry::kml());
        let node = XmlNode::parse(&format!(
            "<Placemark xmlns:gx='http://www.google.com/kml/ext/2.2'>{body}</Placemark>"
        ))
        .unwrap();
        let constructor = *registry.lookup("Placemark").unwrap();
        constructor
            .construct(ElementInit::root(node, ParseContext::new(registry)))
            .unwrap()
    }

    #[test]
    fn line_string_swaps_to_lat_lon() {
        let p = placemark(
            "<LineString><coordinates>-122.364167,37.824787,0 -122.363917,37.824423,0</coordinates></LineString>",
        );
        let Some(Geometry::LineString { positions, .. }) = p.geometry() else {
            panic!("expected a LineString");
        };
        assert_eq!(
            positions,
            vec![
                Position::new(37.824787, -122.364167, 0.0),
                Position::new(37.824423, -122.363917, 0.0)
            ]
        );
    }

    #[test]
    fn malformed_tuples_are_skipped() {
        let coords = parse_coordinates("1,2 oops,3 4,5,6\n7 , 8");
        assert_eq!(
            coords.positions,
            vec![
                Position::new(2.0, 1.0, 0.0),
                Position::new(5.0, 4.0, 6.0),
                Position::new(8.0, 7.0, 0.0)
            ]
        );
        assert_eq!(coords.rejected, vec!["oops,3".to_string()]);
    }

    #[test]
    fn polygon_with_holes_and_options() {
        let p = placemark(
            "<Polygon><extrude>1</extrude><altitudeMode>relativeToGround</altitudeMode>\
               <outerBoundaryIs><LinearRing><coordinates>0,0 1,0 1,1 0,0</coordinates></LinearRing></outerBoundaryIs>\
               <innerBoundaryIs><LinearRing><coordinates>0.2,0.2 0.4,0.2 0.2,0.4 0.2,0.2</coordinates></LinearRing></innerBoundaryIs>\
             </Polygon>",
        );
        let Some(Geometry::Polygon {
            outer,
            inner,
            options,
        }) = p.geometry()
        else {
            panic!("expected a Polygon");
        };
        assert_eq!(outer.len(), 4);
        assert_eq!(inner.len(), 1);
        assert!(options.extrude);
        assert_eq!(options.altitude_mode, AltitudeMode::RelativeToGround);
    }

    #[test]
    fn point_without_coordinates_is_reported() {
        let p = placemark("<Point/>");
        assert_eq!(p.geometry(), None);
        assert_eq!(p.context().diagnostic_count("malformed-field"), 1);
    }

    #[test]
    fn multi_geometry_keeps_member_order() {
        let p = placemark(
            "<MultiGeometry><Point><coordinates>1,2</coordinates></Point>\
             <LineString><coordinates>1,2 3,4</coordinates></LineString></MultiGeometry>",
        );
        let Some(Geometry::MultiGeometry(parts)) = p.geometry() else {
            panic!("expected a MultiGeometry");
        };
        let names: Vec<_> = parts.iter().map(Geometry::type_name).collect();
        assert_eq!(names, vec!["Point", "LineString"]);
    }

    #[test]
    fn gx_track_reads_when_and_coord() {
        let p = placemark(
            "<gx:Track><when>2010-05-28T02:02:09Z</when><when>2010-05-28T02:02:35Z</when>\
             <gx:coord>-122.207881 37.371915 156.0</gx:coord><gx:coord>-122.205712 37.373288 152.0</gx:coord>\
             </gx:Track>",
        );
        let Some(Geometry::Track {
            when, positions, ..
        }) = p.geometry()
        else {
            panic!("expected a Track");
        };
        assert_eq!(when.len(), 2);
        assert_eq!(positions[0], Position::new(37.371915, -122.207881, 156.0));
    }
}
