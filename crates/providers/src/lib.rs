//! LLM Provider implementations for Storyloom.
//!
//! All providers implement the `storyloom_core::Provider` trait.
//! [`build_from_config`] selects the backend from configuration.

mod http;
pub mod openai_compat;
pub mod responses;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use responses::OpenAiResponsesProvider;
pub use router::build_from_config;
