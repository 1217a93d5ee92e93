pub mod bounds;
pub mod position;
pub mod time;

pub use bounds::*;
pub use position::*;
pub use time::*;
