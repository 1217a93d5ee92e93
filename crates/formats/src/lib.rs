pub mod export;
pub mod kml;
pub mod session;
pub mod wkt;

pub use export::GeoJsonCollector;
pub use kml::{
    AttributeBundle, Element, Geometry, KmlDocument, LoadError, RenderableShape, ShapeCollector,
    StyleError,
};
pub use session::{Session, SessionConfig, SessionContext, TickSummary};
pub use wkt::{Wkt, WktError, WktGeometry};
