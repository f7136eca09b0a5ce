//! Scripted assistant client.
//!
//! Plays back pre-arranged run streams, one [`ScriptedTurn`] per
//! `create_run`/`submit_tool_outputs` call, and records what it was sent.
//! With nothing scripted it echoes the last user message, which makes it
//! usable as an offline provider.

use crate::client::{AssistantClient, RunStream};
use crate::types::{Run, RunStatus, RunStreamEvent, ThreadMessage, ToolCall, ToolOutput};
use aide_core::{AppError, AppResult};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Events streamed for one run segment.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    events: Vec<RunStreamEvent>,
    /// Keep the stream open after the last event
    stall: bool,
}

impl ScriptedTurn {
    pub fn new(events: Vec<RunStreamEvent>) -> Self {
        Self {
            events,
            stall: false,
        }
    }

    /// Text deltas followed by a completed run.
    pub fn reply(run_id: &str, deltas: &[&str]) -> Self {
        let mut events: Vec<RunStreamEvent> = deltas
            .iter()
            .map(|d| RunStreamEvent::TextDelta(d.to_string()))
            .collect();
        events.push(RunStreamEvent::RunUpdated(Run::new(
            run_id,
            RunStatus::Completed,
        )));
        Self::new(events)
    }

    /// Tool-call announcements followed by a run paused on them.
    pub fn tool_calls(run_id: &str, calls: Vec<ToolCall>) -> Self {
        let mut events: Vec<RunStreamEvent> = calls
            .iter()
            .cloned()
            .map(RunStreamEvent::ToolCallCreated)
            .collect();
        events.push(RunStreamEvent::RunUpdated(Run::requiring(run_id, calls)));
        Self::new(events)
    }

    /// Never end the stream after the scripted events.
    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                RunStreamEvent::TextDelta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// What the client has been sent.
#[derive(Debug, Clone, Default)]
pub struct ScriptLog {
    /// `(thread_id, content)` of every added message
    pub messages: Vec<(String, String)>,
    /// Instructions of every created run
    pub instructions: Vec<String>,
    /// `(run_id, outputs)` of every submission
    pub tool_outputs: Vec<(String, Vec<ToolOutput>)>,
}

#[derive(Default)]
pub struct ScriptedClient {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    log: Mutex<ScriptLog>,
    /// `(thread_id, message)` in insertion order
    history: Mutex<Vec<(String, ThreadMessage)>>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turns(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        let client = Self::new();
        lock(&client.turns).extend(turns);
        client
    }

    pub fn push_turn(&self, turn: ScriptedTurn) {
        lock(&self.turns).push_back(turn);
    }

    pub fn log(&self) -> ScriptLog {
        lock(&self.log).clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn record(&self, thread_id: &str, role: &str, text: String) {
        let message = ThreadMessage {
            id: self.next_id("msg"),
            role: role.to_string(),
            text,
        };
        lock(&self.history).push((thread_id.to_string(), message));
    }

    fn play(&self, thread_id: &str) -> RunStream {
        let turn = lock(&self.turns).pop_front().unwrap_or_else(|| {
            let last = lock(&self.log)
                .messages
                .iter()
                .rev()
                .find(|(t, _)| t == thread_id)
                .map(|(_, content)| content.clone())
                .unwrap_or_default();
            let echo = format!("Echo: {}", last);
            ScriptedTurn::reply(&self.next_id("run"), &[echo.as_str()])
        });

        let text = turn.text();
        if !text.is_empty() {
            self.record(thread_id, "assistant", text);
        }

        let events = futures::stream::iter(turn.events.into_iter().map(Ok));
        if turn.stall {
            Box::pin(events.chain(futures::stream::pending()))
        } else {
            Box::pin(events)
        }
    }
}

#[async_trait::async_trait]
impl AssistantClient for ScriptedClient {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn create_thread(&self) -> AppResult<String> {
        Ok(self.next_id("thread"))
    }

    async fn add_message(&self, thread_id: &str, content: &str) -> AppResult<()> {
        lock(&self.log)
            .messages
            .push((thread_id.to_string(), content.to_string()));
        self.record(thread_id, "user", content.to_string());
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        _assistant_id: &str,
        instructions: &str,
    ) -> AppResult<RunStream> {
        lock(&self.log).instructions.push(instructions.to_string());
        Ok(self.play(thread_id))
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> AppResult<RunStream> {
        if outputs.is_empty() {
            return Err(AppError::Llm("No tool outputs submitted".to_string()));
        }
        lock(&self.log)
            .tool_outputs
            .push((run_id.to_string(), outputs.to_vec()));
        Ok(self.play(thread_id))
    }

    async fn list_messages(&self, thread_id: &str) -> AppResult<Vec<ThreadMessage>> {
        Ok(lock(&self.history)
            .iter()
            .rev()
            .filter(|(t, _)| t == thread_id)
            .map(|(_, m)| m.clone())
            .collect())
    }
}
