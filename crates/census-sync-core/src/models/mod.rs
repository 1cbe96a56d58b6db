//! Domain models for the census sync engine.

mod events;
mod history;
mod namespace;
mod record;

pub use events::*;
pub use history::*;
pub use namespace::*;
pub use record::*;
