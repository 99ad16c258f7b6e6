//! The Storyloom turn pipeline.
//!
//! Each user turn flows through a fixed sequence of stages:
//!
//! 1. **Role selection** picks a persona and a tool-permission tier
//! 2. **Retrieval** grounds the answer in the knowledge base (optional)
//! 3. **Answer** streams the model reply and any canvas tool calls
//! 4. **Safety** classifies and rewrites unsafe content
//! 5. **Continuity policy** gates, normalizes and wires the canvas calls
//! 6. **Finishing** adds fallback text, quick replies and the next-step hook
//! 7. **Summarization** folds long threads into a rolling summary
//!
//! [`TurnPipeline`] composes them; every stage is usable on its own.

pub mod answer;
pub mod pipeline;
pub mod policy;
pub mod prompts;
pub mod retriever;
pub mod role_selector;
pub mod safety;
pub mod structured;
pub mod summarizer;
pub mod transcript;

#[cfg(test)]
mod test_helpers;

pub use answer::AnswerGenerator;
pub use pipeline::TurnPipeline;
pub use policy::{ContinuityPolicy, PolicyContext, PolicyRule, TurnDraft};
pub use retriever::{AutoRagRetriever, KnowledgeRetriever, Retrieval};
pub use role_selector::{RoleDecision, RoleSelection, RoleSelector};
pub use safety::SafetyFilter;
pub use structured::{StructuredOutput, call_structured};
pub use summarizer::MemorySummarizer;
