//! Remote conversation lifecycle
//!
//! A [`ConversationSession`] owns the remote assistant/thread pair for one
//! process. Every id is written to an [`IdRegistry`] as soon as the service
//! returns it and removed once deletion succeeds, so a crashed run can be
//! swept by [`ConversationSession::reconcile`] on the next start.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::api::{AssistantSpec, AssistantsApi, MessageRole, Run, RunStatus, ToolDefinition};
use super::registry::IdRegistry;
use super::tools::ToolRegistry;
use crate::shutdown::ShutdownSignal;
use crate::{Error, Result};

/// Reply used when a run completes without any assistant message
pub const FALLBACK_REPLY: &str = "I'm sorry, I can't process your request right now.";

/// Live remote resources for one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub thread_id: String,
    pub assistant_id: String,
    pub created_at: DateTime<Utc>,
}

/// Assistant registration and run polling parameters
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub name: String,
    pub model: String,
    pub code_interpreter: bool,
    pub poll_interval: Duration,
    pub max_run: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name: "Magi".to_string(),
            model: "gpt-4o-mini".to_string(),
            code_interpreter: true,
            poll_interval: Duration::from_secs(1),
            max_run: Duration::from_secs(120),
        }
    }
}

/// A run that has been started and not yet awaited
#[derive(Debug)]
pub struct PendingRun {
    run: Run,
}

impl PendingRun {
    /// Remote run id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.run.id
    }
}

/// Creates, drives and tears down the remote conversation
pub struct ConversationSession {
    api: Arc<dyn AssistantsApi>,
    tools: ToolRegistry,
    threads: IdRegistry,
    assistants: IdRegistry,
    settings: SessionSettings,
    shutdown: ShutdownSignal,
}

impl ConversationSession {
    #[must_use]
    pub fn new(
        api: Arc<dyn AssistantsApi>,
        tools: ToolRegistry,
        threads: IdRegistry,
        assistants: IdRegistry,
        settings: SessionSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            api,
            tools,
            threads,
            assistants,
            settings,
            shutdown,
        }
    }

    /// Delete every id left behind by an earlier process
    ///
    /// Ids whose deletion fails for any reason other than "not found" stay
    /// recorded for the next attempt.
    ///
    /// # Errors
    ///
    /// Returns error if a registry file cannot be read
    pub async fn reconcile(&self) -> Result<usize> {
        let mut removed = 0;

        for id in self.threads.ids()? {
            tracing::info!(thread_id = %id, "removing orphaned thread");
            if self
                .release(&self.threads, "thread", &id, self.api.delete_thread(&id))
                .await
            {
                removed += 1;
            }
        }

        for id in self.assistants.ids()? {
            tracing::info!(assistant_id = %id, "removing orphaned assistant");
            if self
                .release(&self.assistants, "assistant", &id, self.api.delete_assistant(&id))
                .await
            {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "reconciled leftover remote resources");
        }
        Ok(removed)
    }

    /// Register an assistant and open a thread
    ///
    /// # Errors
    ///
    /// Returns error if either remote call fails, an id cannot be recorded,
    /// or the assistant's tools do not match the local handlers
    pub async fn create(&self, system_prompt: &str) -> Result<Session> {
        let mut tools = Vec::new();
        if self.settings.code_interpreter {
            tools.push(ToolDefinition::CodeInterpreter);
        }
        tools.extend(self.tools.definitions());

        let spec = AssistantSpec {
            name: self.settings.name.clone(),
            instructions: system_prompt.to_string(),
            model: self.settings.model.clone(),
            tools,
        };

        let assistant = self.api.create_assistant(&spec).await?;
        self.assistants.record(&assistant.id)?;
        tracing::info!(assistant_id = %assistant.id, "assistant created");

        let thread_id = match self.open_thread(&assistant.tools).await {
            Ok(id) => id,
            Err(e) => {
                self.release(
                    &self.assistants,
                    "assistant",
                    &assistant.id,
                    self.api.delete_assistant(&assistant.id),
                )
                .await;
                return Err(e);
            }
        };

        Ok(Session {
            thread_id,
            assistant_id: assistant.id,
            created_at: Utc::now(),
        })
    }

    async fn open_thread(&self, remote_tools: &[ToolDefinition]) -> Result<String> {
        self.tools.validate(remote_tools)?;

        let thread_id = self.api.create_thread().await?;
        self.threads.record(&thread_id)?;
        tracing::info!(thread_id = %thread_id, "thread created");
        Ok(thread_id)
    }

    /// Send a command and wait for the reply
    ///
    /// Remote failures are logged and yield `None`.
    pub async fn submit(&self, session: &Session, text: &str) -> Option<String> {
        let result = match self.start_run(session, text).await {
            Ok(run) => self.wait_for_reply(session, run).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::error!(error = %e, "command processing failed");
                None
            }
        }
    }

    /// Append the command to the thread and start a run
    ///
    /// # Errors
    ///
    /// Returns error if either remote call fails
    pub async fn start_run(&self, session: &Session, text: &str) -> Result<PendingRun> {
        self.api.add_message(&session.thread_id, text).await?;
        let run = self
            .api
            .create_run(&session.thread_id, &session.assistant_id)
            .await?;
        tracing::debug!(run_id = %run.id, "run created");
        Ok(PendingRun { run })
    }

    /// Poll the run to completion, answering tool calls, then fetch the reply
    ///
    /// # Errors
    ///
    /// Returns error if the run fails, exceeds the configured maximum wait,
    /// is interrupted by shutdown, or a remote call fails
    pub async fn wait_for_reply(&self, session: &Session, pending: PendingRun) -> Result<String> {
        let thread_id = session.thread_id.as_str();
        let mut run = pending.run;
        let deadline = Instant::now() + self.settings.max_run;

        loop {
            match run.status {
                RunStatus::Completed => break,
                RunStatus::RequiresAction => {
                    let mut outputs = Vec::with_capacity(run.tool_calls.len());
                    for call in &run.tool_calls {
                        outputs.push(self.tools.dispatch(call).await);
                    }
                    run = self
                        .api
                        .submit_tool_outputs(thread_id, &run.id, &outputs)
                        .await?;
                    tracing::debug!(run_id = %run.id, outputs = outputs.len(), "tool outputs submitted");
                }
                status if status.is_failure() => {
                    return Err(Error::Assistant(format!(
                        "run {} ended as {status:?}: {}",
                        run.id,
                        run.last_error.as_deref().unwrap_or("no details")
                    )));
                }
                status => tracing::trace!(run_id = %run.id, ?status, "run pending"),
            }

            if Instant::now() >= deadline {
                self.abandon(thread_id, &run.id).await;
                return Err(Error::Timeout(format!(
                    "run {} exceeded {:?}",
                    run.id, self.settings.max_run
                )));
            }

            tokio::select! {
                () = tokio::time::sleep(self.settings.poll_interval) => {}
                () = self.shutdown.wait() => {
                    self.abandon(thread_id, &run.id).await;
                    return Err(Error::Cancelled(format!("run {} interrupted", run.id)));
                }
            }

            run = self.api.retrieve_run(thread_id, &run.id).await?;
        }

        let messages = self.api.list_messages(thread_id).await?;
        let reply = messages
            .into_iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .max_by_key(|m| m.created_at)
            .and_then(|m| m.text.into_iter().last())
            .unwrap_or_else(|| FALLBACK_REPLY.to_string());

        tracing::info!(reply = %reply, "assistant replied");
        Ok(reply)
    }

    /// Delete both remote resources and drop their ids
    ///
    /// Already-deleted resources count as deleted; calling this twice is a no-op.
    pub async fn destroy(&self, session: &Session) {
        self.release(
            &self.threads,
            "thread",
            &session.thread_id,
            self.api.delete_thread(&session.thread_id),
        )
        .await;
        self.release(
            &self.assistants,
            "assistant",
            &session.assistant_id,
            self.api.delete_assistant(&session.assistant_id),
        )
        .await;
    }

    async fn abandon(&self, thread_id: &str, run_id: &str) {
        if let Err(e) = self.api.cancel_run(thread_id, run_id).await {
            tracing::warn!(run_id, error = %e, "failed to cancel run");
        }
    }

    /// Run a remote deletion and forget the id if it is gone
    async fn release(
        &self,
        registry: &IdRegistry,
        kind: &str,
        id: &str,
        delete: impl Future<Output = Result<()>>,
    ) -> bool {
        match delete.await {
            Ok(()) => tracing::info!(kind, id, "deleted"),
            Err(Error::NotFound(_)) => tracing::warn!(kind, id, "already deleted"),
            Err(e) => {
                tracing::error!(kind, id, error = %e, "deletion failed");
                return false;
            }
        }

        if let Err(e) = registry.remove(id) {
            tracing::error!(kind, id, error = %e, "failed to update registry");
            return false;
        }
        true
    }
}
