mod base;
mod batch;
mod destination;
mod loader;
mod merge;

pub use base::*;
pub use batch::*;
pub use destination::*;
pub use loader::*;
pub use merge::*;
