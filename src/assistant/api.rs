//! Remote assistants API contract
//!
//! The session drives a hosted "assistant + thread + run" service through
//! [`AssistantsApi`]. Types here are the subset of the wire model the
//! session actually reads.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Tool made available to the remote assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    /// Hosted code execution
    CodeInterpreter,
    /// Locally dispatched function
    Function { function: FunctionDefinition },
    /// Any other hosted tool
    #[serde(other)]
    Other,
}

impl ToolDefinition {
    /// Function name, for function tools
    #[must_use]
    pub fn function_name(&self) -> Option<&str> {
        match self {
            Self::Function { function } => Some(&function.name),
            _ => None,
        }
    }
}

/// Name, description and JSON-schema parameters of a function tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Assistant configuration to register
#[derive(Debug, Clone, Serialize)]
pub struct AssistantSpec {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: Vec<ToolDefinition>,
}

/// A registered assistant
#[derive(Debug, Clone, Deserialize)]
pub struct Assistant {
    pub id: String,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Whether the run has stopped without completing
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Expired | Self::Incomplete
        )
    }
}

/// A pending function invocation requested by the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument payload
    pub arguments: String,
}

/// Result of a tool call, sent back to the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Snapshot of a run
#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    /// Tool calls awaiting output; empty unless `status` is `RequiresAction`
    pub tool_calls: Vec<ToolCall>,
    pub last_error: Option<String>,
}

/// Author of a thread message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A message on a thread, reduced to its text parts
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub id: String,
    pub role: MessageRole,
    /// Unix timestamp, seconds
    pub created_at: i64,
    pub text: Vec<String>,
}

/// Hosted assistant service
#[async_trait]
pub trait AssistantsApi: Send + Sync {
    /// Register an assistant
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<Assistant>;

    /// Delete an assistant; `Error::NotFound` if it does not exist
    async fn delete_assistant(&self, assistant_id: &str) -> Result<()>;

    /// Open an empty conversation thread
    async fn create_thread(&self) -> Result<String>;

    /// Delete a thread; `Error::NotFound` if it does not exist
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Append a user message
    async fn add_message(&self, thread_id: &str, text: &str) -> Result<()>;

    /// Start processing the thread with an assistant
    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run>;

    /// Current state of a run
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// Answer the run's pending tool calls
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run>;

    /// Ask the service to stop a run
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()>;

    /// Recent messages on a thread, in no guaranteed order
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;
}
