pub mod clock;
pub mod diagnostics;
pub mod metrics;
pub mod refresh;

pub use clock::*;
pub use diagnostics::*;
pub use metrics::*;
pub use refresh::*;
