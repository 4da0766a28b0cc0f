//! Stand-ins for the desktop surfaces: a terminal rendition and an in-memory
//! recorder for tests.

pub mod console;
pub mod memory;

pub use console::{ConsoleErrorChannel, ConsoleResponseSurface, NoopFocusRestorer, StdoutReplacer};
pub use memory::{MemoryErrorChannel, MemoryFocusRestorer, MemoryReplacer, MemoryResponseSurface};
