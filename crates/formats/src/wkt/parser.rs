use foundation::position::Position;
use tracing::trace;

use crate::wkt::geometry::{Dimension, Wkt, WktGeometry};
use crate::wkt::tokenizer::{Token, TokenKind, tokenize};
use crate::wkt::WktError;

const GEOMETRY_TYPES: &[&str] = &[
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "TRIANGLE",
    "GEOMETRYCOLLECTION",
];

/// Nested GEOMETRYCOLLECTIONs deeper than this are rejected.
pub const MAX_COLLECTION_DEPTH: usize = 256;

/// Parses `[SRID=n;]<geometry>`. Keywords are case-insensitive.
pub fn parse(text: &str) -> Result<Wkt, WktError> {
    let (srid, body) = split_srid(text)?;
    let tokens = tokenize(body)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let (geometry, dimension) = parser.geometry()?;
    if let Some(extra) = parser.peek() {
        return Err(unexpected(extra, "end of input"));
    }
    trace!(kind = geometry.type_name(), ?srid, "parsed WKT");
    Ok(Wkt {
        srid,
        dimension,
        geometry,
    })
}

fn split_srid(text: &str) -> Result<(Option<u32>, &str), WktError> {
    let trimmed = text.trim_start();
    if !trimmed
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("SRID="))
    {
        return Ok((None, text));
    }
    let (srid, rest) = trimmed[5..]
        .split_once(';')
        .ok_or_else(|| WktError::Srid(trimmed.to_string()))?;
    let srid = srid
        .trim()
        .parse()
        .map_err(|_| WktError::Srid(srid.to_string()))?;
    Ok((Some(srid), rest))
}

/// Splits a fused dimension suffix (`POINTZ`, `LINESTRINGZM`) off a type keyword.
fn split_dimension_suffix(keyword: &str) -> (&str, Option<Dimension>) {
    if GEOMETRY_TYPES.contains(&keyword) {
        return (keyword, None);
    }
    for suffix in ["ZM", "Z", "M"] {
        if let Some(base) = keyword.strip_suffix(suffix)
            && GEOMETRY_TYPES.contains(&base)
        {
            return (base, Dimension::from_keyword(suffix));
        }
    }
    (keyword, None)
}

fn unexpected(token: &Token, expected: &'static str) -> WktError {
    WktError::UnexpectedToken {
        expected,
        found: token.value.clone(),
        offset: token.offset,
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    /// Open GEOMETRYCOLLECTIONs around the current position.
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self, expected: &'static str) -> Result<&'a Token, WktError> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or(WktError::UnexpectedEnd { expected })?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<&'a Token, WktError> {
        let token = self.next(expected)?;
        if token.is(kind) {
            Ok(token)
        } else {
            Err(unexpected(token, expected))
        }
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek().is_some_and(|t| t.is(kind)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// `( item, item, ... )`
    fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T, WktError>) -> Result<Vec<T>, WktError> {
        self.expect(TokenKind::LeftParenthesis, "'('")?;
        let mut items = vec![item(self)?];
        while self.eat(TokenKind::Comma) {
            items.push(item(self)?);
        }
        self.expect(TokenKind::RightParenthesis, "',' or ')'")?;
        Ok(items)
    }

    fn geometry(&mut self) -> Result<(WktGeometry, Dimension), WktError> {
        let keyword = self
            .expect(TokenKind::Text, "a geometry type")?
            .value
            .to_ascii_uppercase();
        let (name, fused) = split_dimension_suffix(&keyword);

        let mut dimension = fused.unwrap_or_default();
        if let Some(tagged) = self
            .peek()
            .filter(|t| t.is(TokenKind::Text))
            .and_then(|t| Dimension::from_keyword(&t.value))
        {
            self.pos += 1;
            dimension = tagged;
        }

        if self.peek().is_some_and(|t| t.is_keyword("EMPTY")) {
            self.pos += 1;
            return Ok((empty(name)?, dimension));
        }

        let geometry = match name {
            "POINT" => {
                let mut points = self.list(|p| p.position(dimension))?;
                if points.len() != 1 {
                    return Err(WktError::UnexpectedToken {
                        expected: "a single position",
                        found: format!("{} positions", points.len()),
                        offset: self.tokens[self.pos - 1].offset,
                    });
                }
                WktGeometry::Point(points.pop())
            }
            "LINESTRING" => WktGeometry::LineString(self.positions(dimension)?),
            "POLYGON" => WktGeometry::Polygon(self.rings(dimension)?),
            "TRIANGLE" => {
                let mut rings = self.rings(dimension)?;
                if rings.len() != 1 {
                    return Err(WktError::UnexpectedToken {
                        expected: "a single ring",
                        found: format!("{} rings", rings.len()),
                        offset: self.tokens[self.pos - 1].offset,
                    });
                }
                WktGeometry::Triangle(rings.swap_remove(0))
            }
            "MULTIPOINT" => WktGeometry::MultiPoint(self.list(|p| p.member_point(dimension))?),
            "MULTILINESTRING" => WktGeometry::MultiLineString(self.list(|p| p.positions(dimension))?),
            "MULTIPOLYGON" => WktGeometry::MultiPolygon(self.list(|p| p.rings(dimension))?),
            "GEOMETRYCOLLECTION" => {
                if self.depth >= MAX_COLLECTION_DEPTH {
                    return Err(WktError::TooDeep {
                        limit: MAX_COLLECTION_DEPTH,
                        offset: self.tokens[self.pos - 1].offset,
                    });
                }
                self.depth += 1;
                let members = self.list(|p| p.geometry().map(|(g, _)| g));
                self.depth -= 1;
                WktGeometry::GeometryCollection(members?)
            }
            other => return Err(WktError::UnknownGeometry(other.to_string())),
        };
        Ok((geometry, dimension))
    }

    fn positions(&mut self, dimension: Dimension) -> Result<Vec<Position>, WktError> {
        self.list(|p| p.position(dimension))
    }

    fn rings(&mut self, dimension: Dimension) -> Result<Vec<Vec<Position>>, WktError> {
        self.list(|p| p.positions(dimension))
    }

    /// MULTIPOINT members appear both bare (`10 40`) and wrapped (`(10 40)`).
    fn member_point(&mut self, dimension: Dimension) -> Result<Position, WktError> {
        if self.eat(TokenKind::LeftParenthesis) {
            let position = self.position(dimension)?;
            self.expect(TokenKind::RightParenthesis, "')'")?;
            Ok(position)
        } else {
            self.position(dimension)
        }
    }

    /// `x y [z] [m]`, read as longitude, latitude, altitude.
    fn position(&mut self, dimension: Dimension) -> Result<Position, WktError> {
        let offset = self
            .peek()
            .map(|t| t.offset)
            .ok_or(WktError::UnexpectedEnd { expected: "a coordinate" })?;
        let mut ordinates = Vec::with_capacity(4);
        while let Some(token) = self.peek().filter(|t| t.is(TokenKind::Number)) {
            ordinates.push(token.number()?);
            self.pos += 1;
        }
        let altitude = match (ordinates.len(), dimension) {
            (2, _) | (3, Dimension::Xym) => 0.0,
            (3 | 4, _) => ordinates[2],
            (0, _) => {
                return Err(unexpected(&self.tokens[self.pos], "a coordinate"));
            }
            (found, _) => return Err(WktError::CoordinateArity { found, offset }),
        };
        Ok(Position::from_lon_lat(ordinates[0], ordinates[1], altitude))
    }
}

fn empty(name: &str) -> Result<WktGeometry, WktError> {
    Ok(match name {
        "POINT" => WktGeometry::Point(None),
        "LINESTRING" => WktGeometry::LineString(Vec::new()),
        "POLYGON" => WktGeometry::Polygon(Vec::new()),
        "TRIANGLE" => WktGeometry::Triangle(Vec::new()),
        "MULTIPOINT" => WktGeometry::MultiPoint(Vec::new()),
        "MULTILINESTRING" => WktGeometry::MultiLineString(Vec::new()),
        "MULTIPOLYGON" => WktGeometry::MultiPolygon(Vec::new()),
        "GEOMETRYCOLLECTION" => WktGeometry::GeometryCollection(Vec::new()),
        other => return Err(WktError::UnknownGeometry(other.to_string())),
    })
}
