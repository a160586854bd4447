//! Anthropic `/v1/messages` <-> OpenAI `/chat/completions` wire translation.
//!
//! Submodules map 1:1 onto the four translation directions plus the shared
//! wire types they operate on: [`request`] (Anthropic → OpenAI request),
//! [`response`] (OpenAI → Anthropic non-streaming response), [`stream`]
//! (OpenAI SSE → Anthropic SSE), and [`error`] (upstream error body →
//! Anthropic error envelope).

pub mod error;
pub mod request;
pub mod response;
pub mod stream;
pub mod types;

pub use request::translate_request;
pub use response::translate_response;
pub use stream::StreamTranslator;
