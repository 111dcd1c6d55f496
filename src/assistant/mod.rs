//! Remote conversation with a hosted assistant
//!
//! [`ConversationSession`] drives any [`AssistantsApi`]; [`OpenAiAssistants`]
//! is the production implementation. Tool calls requested mid-run are
//! answered from a [`ToolRegistry`].

pub mod api;
mod openai;
mod registry;
mod session;
mod tools;

pub use api::{AssistantsApi, RunStatus, ToolCall, ToolDefinition, ToolOutput};
pub use openai::OpenAiAssistants;
pub use registry::IdRegistry;
pub use session::{ConversationSession, FALLBACK_REPLY, PendingRun, Session, SessionSettings};
pub use tools::{ToolHandler, ToolRegistry, WeatherArgs, WeatherTool};
