//! Drives assistant runs against the workspace tools.

use crate::events::{TerminalOutput, ToolCallEvent};
use crate::tools::{AssistantTools, DevelopmentLog, RuntimeMessage};
use aide_core::{AppResult, Emitter, Subscription};
use aide_llm::{AssistantClient, AssistantThread, RunOutcome, ThreadMessage};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument};

/// The live thread and the subscription forwarding its deltas.
struct ThreadSlot {
    thread: Arc<AssistantThread>,
    _deltas: Subscription,
}

pub struct Assistant {
    client: Arc<dyn AssistantClient>,
    assistant_id: String,
    tools: AssistantTools,
    current: tokio::sync::Mutex<Option<ThreadSlot>>,
    /// Mirrors `current` for synchronous `dispose`
    live: Mutex<Option<Arc<AssistantThread>>>,
    on_message_delta: Arc<Emitter<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Assistant {
    pub fn new(
        client: Arc<dyn AssistantClient>,
        assistant_id: impl Into<String>,
        tools: AssistantTools,
    ) -> Self {
        Self {
            client,
            assistant_id: assistant_id.into(),
            tools,
            current: tokio::sync::Mutex::new(None),
            live: Mutex::new(None),
            on_message_delta: Arc::new(Emitter::new()),
        }
    }

    pub fn tools(&self) -> &AssistantTools {
        &self.tools
    }

    /// Assistant text as it streams, across thread changes.
    pub fn on_message_delta<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.on_message_delta.subscribe(listener)
    }

    pub fn on_tool_call_event<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ToolCallEvent) + Send + Sync + 'static,
    {
        self.tools.on_tool_call_event(listener)
    }

    pub fn on_terminal_output<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&TerminalOutput) + Send + Sync + 'static,
    {
        self.tools.on_terminal_output(listener)
    }

    pub fn on_port_opened<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&u16) + Send + Sync + 'static,
    {
        self.tools.on_port_opened(listener)
    }

    /// Start a fresh thread, disposing the previous one. Returns its id.
    pub async fn new_thread(&self) -> AppResult<String> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            previous.thread.dispose();
        }
        let slot = self.open_thread().await?;
        let id = slot.thread.id().to_string();
        *current = Some(slot);
        Ok(id)
    }

    async fn open_thread(&self) -> AppResult<ThreadSlot> {
        let thread = Arc::new(
            AssistantThread::create(self.client.clone(), self.assistant_id.clone()).await?,
        );
        let forward = self.on_message_delta.clone();
        let deltas = thread.on_message_delta(move |text| forward.fire(text));
        *lock(&self.live) = Some(thread.clone());
        Ok(ThreadSlot {
            thread,
            _deltas: deltas,
        })
    }

    async fn thread(&self) -> AppResult<Arc<AssistantThread>> {
        let mut current = self.current.lock().await;
        if let Some(slot) = current.as_ref() {
            return Ok(slot.thread.clone());
        }
        let slot = self.open_thread().await?;
        let thread = slot.thread.clone();
        *current = Some(slot);
        Ok(thread)
    }

    /// Send a user message and run until the assistant stops asking for
    /// tools.
    #[instrument(skip(self, content), fields(content_len = content.len()))]
    pub async fn send_message(&self, content: &str) -> AppResult<RunOutcome> {
        let thread = self.thread().await?;
        let instructions = aide_prompt::build_instructions(self.tools.workspace())?;

        let mut outcome = thread.add_message(content, &instructions).await?;
        let mut rounds = 0usize;
        while let RunOutcome::RequiresAction(pending) = outcome {
            rounds += 1;
            debug!(
                "Run {} requires {} tool output(s) (round {})",
                pending.run_id,
                pending.tool_calls.len(),
                rounds
            );
            let outputs = self.tools.handle_tool_calls(&pending.tool_calls).await;
            outcome = thread.submit_tool_outputs(&pending.run_id, &outputs).await?;
        }

        info!("Run finished with {:?} after {} tool round(s)", outcome, rounds);
        Ok(outcome)
    }

    /// Messages of the current thread, newest first. Empty before the first
    /// message.
    pub async fn messages(&self) -> AppResult<Vec<ThreadMessage>> {
        let thread = lock(&self.live).clone();
        match thread {
            Some(thread) => thread.messages().await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn handle_terminal_input(&self, id: &str, input: &str) -> AppResult<()> {
        self.tools.handle_terminal_input(id, input).await
    }

    pub fn handle_kill_terminal(&self, id: &str) {
        self.tools.handle_kill_terminal(id);
    }

    pub fn handle_keep_terminal(&self, id: &str) {
        self.tools.handle_keep_terminal(id);
    }

    pub fn report_runtime_message(&self, message: RuntimeMessage) {
        self.tools.report_runtime_message(message);
    }

    pub fn development_logs(&self) -> Vec<DevelopmentLog> {
        self.tools.read_development_logs()
    }

    /// Abort the running stream, kill terminals and drop listeners.
    pub fn dispose(&self) {
        if let Some(thread) = lock(&self.live).take() {
            thread.dispose();
        }
        self.tools.dispose();
        self.on_message_delta.dispose();
    }
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("provider", &self.client.provider_name())
            .field("assistant_id", &self.assistant_id)
            .finish()
    }
}
