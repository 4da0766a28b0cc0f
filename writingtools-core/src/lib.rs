pub mod builtins;
pub mod command;
pub mod config;
pub mod legacy;
pub mod model;
pub mod prompt;
pub mod text;
pub mod types;

// Keep the public surface small and intentional.
pub use builtins::*;
pub use command::*;
pub use config::*;
pub use legacy::*;
pub use model::*;
pub use text::*;
pub use types::*;
