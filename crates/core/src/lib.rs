//! # Storyloom Core
//!
//! Domain types, traits, and error definitions for the Storyloom canvas agent.
//! This crate has **zero framework dependencies**: it defines the domain model
//! (messages, roles, canvas tool calls, safety decisions) that the provider,
//! agent, and gateway crates implement against.
//!
//! ## Layout
//!
//! - [`provider`] and [`stream`]: the LLM abstraction and transport-independent
//!   tool-call reconstruction.
//! - [`role`] and [`tool`]: the static persona registry and the canvas
//!   operation schemas each persona may use.
//! - [`canvas`]: the read-only canvas snapshot sent by the front-end.
//! - [`reply`]: turn request / outcome records at the service boundary.
//! - [`state`]: the per-turn state the pipeline threads through its stages.

pub mod canvas;
pub mod error;
pub mod message;
pub mod provider;
pub mod reply;
pub mod role;
pub mod safety;
pub mod state;
pub mod stream;
pub mod text;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use canvas::CanvasContext;
pub use error::{Error, ProviderError, Result, RetrievalError, RuleError};
pub use message::{Message, Role};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, ResponseFormat, StreamChunk, Usage};
pub use reply::{AssistantReply, LlmErrorInfo, QuickReply, ReplyMetadata, SourceRef, TurnOutcome, TurnRequest};
pub use role::{RoleProfile, ToolTier};
pub use safety::SafetyDecision;
pub use state::ConversationState;
pub use stream::{AssembledCall, ToolCallAssembler, ToolCallDelta};
pub use tool::{CanvasOp, ToolCall, ToolDefinition};
