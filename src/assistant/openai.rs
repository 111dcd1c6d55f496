//! `OpenAI` Assistants API (v2) client

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::api::{
    Assistant, AssistantSpec, AssistantsApi, MessageRole, Run, RunStatus, ThreadMessage, ToolCall,
    ToolOutput,
};
use crate::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Messages fetched per reply lookup
const MESSAGE_PAGE_SIZE: u32 = 20;

/// HTTP client for the hosted assistants service
pub struct OpenAiAssistants {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAssistants {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required".to_string()));
        }
        Ok(Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different API root
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Assistant(format!("{what}: {status} - {body}")));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl AssistantsApi for OpenAiAssistants {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<Assistant> {
        let req = self.request(reqwest::Method::POST, "/assistants").json(spec);
        self.send(req, "create assistant").await
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        let req = self.request(
            reqwest::Method::DELETE,
            &format!("/assistants/{assistant_id}"),
        );
        let _: serde_json::Value = self
            .send(req, &format!("assistant {assistant_id}"))
            .await?;
        Ok(())
    }

    async fn create_thread(&self) -> Result<String> {
        let req = self
            .request(reqwest::Method::POST, "/threads")
            .json(&serde_json::json!({}));
        let thread: IdOnly = self.send(req, "create thread").await?;
        Ok(thread.id)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let req = self.request(reqwest::Method::DELETE, &format!("/threads/{thread_id}"));
        let _: serde_json::Value = self.send(req, &format!("thread {thread_id}")).await?;
        Ok(())
    }

    async fn add_message(&self, thread_id: &str, text: &str) -> Result<()> {
        let req = self
            .request(
                reqwest::Method::POST,
                &format!("/threads/{thread_id}/messages"),
            )
            .json(&serde_json::json!({ "role": "user", "content": text }));
        let _: IdOnly = self.send(req, "add message").await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        let req = self
            .request(reqwest::Method::POST, &format!("/threads/{thread_id}/runs"))
            .json(&serde_json::json!({ "assistant_id": assistant_id }));
        let run: RunObject = self.send(req, "create run").await?;
        Ok(run.into())
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let req = self.request(
            reqwest::Method::GET,
            &format!("/threads/{thread_id}/runs/{run_id}"),
        );
        let run: RunObject = self.send(req, "retrieve run").await?;
        Ok(run.into())
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run> {
        let req = self
            .request(
                reqwest::Method::POST,
                &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            )
            .json(&serde_json::json!({ "tool_outputs": outputs }));
        let run: RunObject = self.send(req, "submit tool outputs").await?;
        Ok(run.into())
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        let req = self.request(
            reqwest::Method::POST,
            &format!("/threads/{thread_id}/runs/{run_id}/cancel"),
        );
        let _: RunObject = self.send(req, "cancel run").await?;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let req = self
            .request(
                reqwest::Method::GET,
                &format!("/threads/{thread_id}/messages"),
            )
            .query(&[("limit", MESSAGE_PAGE_SIZE.to_string())]);
        let list: MessageList = self.send(req, "list messages").await?;
        Ok(list.data.into_iter().map(Into::into).collect())
    }
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct RunObject {
    id: String,
    status: RunStatus,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Deserialize)]
struct RequiredAction {
    submit_tool_outputs: SubmitToolOutputs,
}

#[derive(Deserialize)]
struct SubmitToolOutputs {
    tool_calls: Vec<ToolCallObject>,
}

#[derive(Deserialize)]
struct ToolCallObject {
    id: String,
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct RunError {
    message: String,
}

impl From<RunObject> for Run {
    fn from(run: RunObject) -> Self {
        let tool_calls = run
            .required_action
            .map(|a| {
                a.submit_tool_outputs
                    .tool_calls
                    .into_iter()
                    .map(|c| ToolCall {
                        id: c.id,
                        name: c.function.name,
                        arguments: c.function.arguments,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: run.id,
            status: run.status,
            tool_calls,
            last_error: run.last_error.map(|e| e.message),
        }
    }
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<MessageObject>,
}

#[derive(Deserialize)]
struct MessageObject {
    id: String,
    role: MessageRole,
    created_at: i64,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: TextContent },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct TextContent {
    value: String,
}

impl From<MessageObject> for ThreadMessage {
    fn from(msg: MessageObject) -> Self {
        let text = msg
            .content
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.value),
                ContentPart::Other => None,
            })
            .collect();

        Self {
            id: msg.id,
            role: msg.role,
            created_at: msg.created_at,
            text,
        }
    }
}
