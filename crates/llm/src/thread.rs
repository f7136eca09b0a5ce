//! One conversation thread and its streaming runs.
//!
//! A thread streams at most one run at a time. Text deltas pass through a
//! [`LinkBuffer`] before being fired on `on_message_delta`; when the stream
//! ends the final run status decides the [`RunOutcome`]. A run paused for
//! tool outputs is also announced on `on_requires_action`, and the caller
//! resumes it with [`AssistantThread::submit_tool_outputs`].

use crate::client::{AssistantClient, RunStream};
use crate::delta::LinkBuffer;
use crate::types::{RequiredToolCalls, Run, RunStatus, RunStreamEvent, ThreadMessage, ToolCall, ToolOutput};
use aide_core::{AppError, AppResult, Emitter, Subscription};
use futures::future::{AbortHandle, Abortable};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Longest silence tolerated on a run stream.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// How a run stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    /// The run is paused until tool outputs are submitted
    RequiresAction(RequiredToolCalls),
    /// The run ended in another status (failed, expired, ...)
    Ended { status: RunStatus },
    /// The stream was aborted by `dispose`
    Aborted,
}

pub struct AssistantThread {
    client: Arc<dyn AssistantClient>,
    assistant_id: String,
    thread_id: String,
    idle_timeout: Duration,
    streaming: AtomicBool,
    disposed: AtomicBool,
    current: Mutex<Option<AbortHandle>>,
    on_message_delta: Emitter<String>,
    on_requires_action: Emitter<RequiredToolCalls>,
    on_function_tool_call: Emitter<ToolCall>,
}

/// Holds the single-flight flag for the lifetime of one run stream.
struct StreamGuard<'a> {
    thread: &'a AssistantThread,
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        self.thread.current_handle().take();
        self.thread.streaming.store(false, Ordering::SeqCst);
    }
}

impl AssistantThread {
    /// Create a remote thread for `assistant_id`.
    pub async fn create(
        client: Arc<dyn AssistantClient>,
        assistant_id: impl Into<String>,
    ) -> AppResult<Self> {
        let thread_id = client.create_thread().await?;
        tracing::info!("Created assistant thread {}", thread_id);

        Ok(Self {
            client,
            assistant_id: assistant_id.into(),
            thread_id,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            streaming: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            current: Mutex::new(None),
            on_message_delta: Emitter::new(),
            on_requires_action: Emitter::new(),
            on_function_tool_call: Emitter::new(),
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.thread_id
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn on_message_delta<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.on_message_delta.subscribe(listener)
    }

    pub fn on_requires_action<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RequiredToolCalls) + Send + Sync + 'static,
    {
        self.on_requires_action.subscribe(listener)
    }

    /// Fired as soon as the model starts a function call, before its
    /// arguments are complete.
    pub fn on_function_tool_call<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ToolCall) + Send + Sync + 'static,
    {
        self.on_function_tool_call.subscribe(listener)
    }

    /// Post a user message and stream the run it starts.
    pub async fn add_message(&self, content: &str, instructions: &str) -> AppResult<RunOutcome> {
        let _guard = self.begin()?;
        self.client.add_message(&self.thread_id, content).await?;
        let stream = self
            .client
            .create_run(&self.thread_id, &self.assistant_id, instructions)
            .await?;
        self.observe(stream).await
    }

    /// Resume a paused run and stream its continuation.
    pub async fn submit_tool_outputs(
        &self,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> AppResult<RunOutcome> {
        let _guard = self.begin()?;
        let stream = self
            .client
            .submit_tool_outputs(&self.thread_id, run_id, outputs)
            .await?;
        self.observe(stream).await
    }

    /// Messages of the thread, newest first.
    pub async fn messages(&self) -> AppResult<Vec<ThreadMessage>> {
        self.client.list_messages(&self.thread_id).await
    }

    /// Abort any in-flight stream and release listeners.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.current_handle().take() {
            tracing::debug!("Aborting run stream on thread {}", self.thread_id);
            handle.abort();
        }
        self.on_message_delta.dispose();
        self.on_requires_action.dispose();
        self.on_function_tool_call.dispose();
    }

    fn current_handle(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> AppResult<StreamGuard<'_>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(AppError::Llm(format!(
                "Thread {} has been disposed",
                self.thread_id
            )));
        }
        if self.streaming.swap(true, Ordering::SeqCst) {
            return Err(AppError::Llm(format!(
                "A run is already streaming on thread {}",
                self.thread_id
            )));
        }
        Ok(StreamGuard { thread: self })
    }

    async fn observe(&self, stream: RunStream) -> AppResult<RunOutcome> {
        let (handle, registration) = AbortHandle::new_pair();
        *self.current_handle() = Some(handle);

        // Disposed between `begin` and here: the handle was never seen.
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(RunOutcome::Aborted);
        }

        match Abortable::new(self.consume(stream), registration).await {
            Ok(result) => result,
            Err(_aborted) => {
                tracing::info!("Run stream on thread {} aborted", self.thread_id);
                Ok(RunOutcome::Aborted)
            }
        }
    }

    async fn consume(&self, mut stream: RunStream) -> AppResult<RunOutcome> {
        let mut links = LinkBuffer::new();
        let mut last_run: Option<Run> = None;

        loop {
            let Ok(next) = tokio::time::timeout(self.idle_timeout, stream.next()).await else {
                if let Some(text) = links.flush() {
                    self.on_message_delta.fire(&text);
                }
                return Err(AppError::Llm(format!(
                    "Run stream on thread {} stalled for {:?}",
                    self.thread_id, self.idle_timeout
                )));
            };

            match next {
                None => break,
                Some(Err(e)) => {
                    if let Some(text) = links.flush() {
                        self.on_message_delta.fire(&text);
                    }
                    return Err(e);
                }
                Some(Ok(RunStreamEvent::TextDelta(delta))) => {
                    if let Some(text) = links.push(&delta) {
                        self.on_message_delta.fire(&text);
                    }
                }
                Some(Ok(RunStreamEvent::ToolCallCreated(call))) => {
                    tracing::debug!("Tool call created: {} ({})", call.function.name, call.id);
                    self.on_function_tool_call.fire(&call);
                }
                Some(Ok(RunStreamEvent::RunUpdated(run))) => {
                    tracing::debug!("Run {} is {}", run.id, run.status);
                    last_run = Some(run);
                }
            }
        }

        if let Some(text) = links.flush() {
            self.on_message_delta.fire(&text);
        }

        let Some(run) = last_run else {
            return Ok(RunOutcome::Ended {
                status: RunStatus::Unknown,
            });
        };

        if let Some(calls) = run.pending_tool_calls() {
            let required = RequiredToolCalls {
                run_id: run.id.clone(),
                tool_calls: calls.to_vec(),
            };
            tracing::info!(
                "Run {} requires {} tool output(s)",
                run.id,
                required.tool_calls.len()
            );
            self.on_requires_action.fire(&required);
            return Ok(RunOutcome::RequiresAction(required));
        }

        match run.status {
            RunStatus::Completed => Ok(RunOutcome::Completed),
            status => {
                if let Some(error) = &run.last_error {
                    tracing::warn!("Run {} ended as {}: {}", run.id, status, error.message);
                } else {
                    tracing::warn!("Run {} ended as {}", run.id, status);
                }
                Ok(RunOutcome::Ended { status })
            }
        }
    }
}

impl std::fmt::Debug for AssistantThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantThread")
            .field("thread_id", &self.thread_id)
            .field("assistant_id", &self.assistant_id)
            .field("streaming", &self.is_streaming())
            .finish()
    }
}
