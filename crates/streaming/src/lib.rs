pub mod archive;
pub mod cache;
pub mod fetch;
pub mod key;

pub use archive::*;
pub use cache::*;
pub use fetch::*;
pub use key::*;
