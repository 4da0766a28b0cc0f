pub mod cancel;
pub mod dispatch;
pub mod error;
pub mod session;
pub mod traits;

pub use error::{DispatchError, ProviderError};
