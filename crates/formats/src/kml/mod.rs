//! KML and KMZ document model.
//!
//! Parsing is lazy: a document owns the source tree, and element children,
//! ids and styles are materialized on first use.

pub mod container;
pub mod document;
pub mod element;
pub mod fields;
pub mod geometry;
pub mod network_link;
pub mod registry;
pub mod render;
pub mod resolve;
pub mod style;
pub mod xml;

pub use container::{Schema, SimpleField};
pub use document::{KmlDocument, LoadError};
pub use element::{Element, ElementError, ElementInit, ParseContext, Selector};
pub use geometry::{AltitudeMode, Geometry};
pub use network_link::{NetworkLink, RefreshMode, ViewRefreshMode};
pub use registry::{Capabilities, ElementConstructor, ElementKind, ElementRegistry, UnknownElement};
pub use render::{DetachedHost, RenderContext, RenderHost, RenderableShape, ShapeCollector, ShapeGeometry};
pub use resolve::{ResolutionPhase, StyleError, StyleHost, StyleResolver};
pub use style::{AttributeBundle, Attributes, StyleState};
