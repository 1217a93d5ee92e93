//! Well-known text geometry.
//!
//! `tokenizer` splits the text, `parser` builds a [`Wkt`] by recursive
//! descent. Parsed geometries materialize as the same [`Geometry`] values the
//! KML model produces, so both render through one collector.
//!
//! [`Geometry`]: crate::kml::geometry::Geometry

pub mod geometry;
pub mod parser;
pub mod tokenizer;

pub use geometry::{Dimension, Wkt, WktGeometry};
pub use parser::parse;
pub use tokenizer::{Token, TokenKind, tokenize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WktError {
    #[error("unexpected character {character:?} at offset {offset}")]
    UnexpectedCharacter { character: char, offset: usize },
    #[error("invalid number {text:?} at offset {offset}")]
    InvalidNumber { text: String, offset: usize },
    #[error("expected {expected}, found {found:?} at offset {offset}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        offset: usize,
    },
    #[error("expected {expected}, found end of input")]
    UnexpectedEnd { expected: &'static str },
    #[error("unknown geometry type {0:?}")]
    UnknownGeometry(String),
    #[error("a coordinate needs 2 to 4 ordinates, found {found} at offset {offset}")]
    CoordinateArity { found: usize, offset: usize },
    #[error("geometry collections nested deeper than {limit} at offset {offset}")]
    TooDeep { limit: usize, offset: usize },
    #[error("invalid SRID prefix {0:?}")]
    Srid(String),
}
