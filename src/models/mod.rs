//! Data model for builds, records, change logs and search results.

mod build;
mod change;
mod record;
mod search;
mod sync;

pub use build::*;
pub use change::*;
pub use record::*;
pub use search::*;
pub use sync::*;
