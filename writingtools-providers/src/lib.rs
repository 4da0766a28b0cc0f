//! Vendor wire formats for text-generation backends.
//!
//! Request builders are pure and return an [`request::HttpRequest`]; the
//! [`runtime`] module is the only place that touches the network.

pub mod gemini;
pub mod ollama;
pub mod openai_compatible;
pub mod parse;
pub mod request;
pub mod runtime;
pub mod stream;
