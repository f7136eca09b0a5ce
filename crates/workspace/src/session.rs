//! A workspace session: embedder, assistant and transcript wired together.
//!
//! Every dependency is built from one [`AppConfig`] and handed down
//! explicitly. Assistant deltas and tool-call events are folded into a
//! shared [`Transcript`]; each change is published on
//! `on_transcript_change` with the full message list.

use crate::assistant::Assistant;
use crate::events::TerminalOutput;
use crate::ports::PortDetector;
use crate::tools::AssistantTools;
use crate::transcript::{ChatMessage, Transcript};
use aide_core::{AppConfig, AppError, AppResult, Emitter, Subscription};
use aide_index::{
    create_provider, Embedder, EmbedderSettings, EmbedderState, ProgressReporter, SqliteIndex,
};
use aide_llm::{create_client, AssistantClient, RunOutcome};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

type TranscriptCell = Arc<Mutex<Transcript>>;

fn lock(transcript: &Mutex<Transcript>) -> MutexGuard<'_, Transcript> {
    transcript.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Session {
    embedder: Embedder,
    assistant: Arc<Assistant>,
    transcript: TranscriptCell,
    on_transcript_change: Arc<Emitter<Vec<ChatMessage>>>,
    _subscriptions: Vec<Subscription>,
}

impl Session {
    /// Build every component for `config.workspace` and start indexing.
    pub async fn start(config: &AppConfig, progress: ProgressReporter) -> AppResult<Self> {
        config.validate()?;
        config.validate_assistant()?;

        let provider = create_provider(
            &config.embedding,
            config.resolve_api_key(&config.embedding.api_key_env),
        )
        .await?;
        let index = Arc::new(SqliteIndex::for_workspace(
            &config.workspace,
            &config.index.storage_dir,
        ));
        let embedder = Embedder::spawn(
            config.workspace.clone(),
            index,
            provider,
            EmbedderSettings::from_config(config),
            progress,
        );

        let client = create_client(
            &config.assistant,
            config.resolve_api_key(&config.assistant.api_key_env),
        )?;
        let assistant_id = match (&config.assistant.assistant_id, config.assistant.provider.as_str()) {
            (Some(id), _) => id.clone(),
            (None, "scripted") => "scripted".to_string(),
            (None, _) => {
                return Err(AppError::Config("No assistant id configured".to_string()));
            }
        };

        info!(
            "Starting session for {:?} with assistant {} ({})",
            config.workspace,
            assistant_id,
            client.provider_name()
        );
        Ok(Self::assemble(embedder, client, assistant_id, &config.index.storage_dir))
    }

    /// Wire a session from already built parts.
    pub fn assemble(
        embedder: Embedder,
        client: Arc<dyn AssistantClient>,
        assistant_id: impl Into<String>,
        storage_dir: &str,
    ) -> Self {
        let tools = AssistantTools::with_parts(
            embedder.workspace().to_path_buf(),
            Arc::new(embedder.clone()),
            storage_dir.to_string(),
            PortDetector::new(),
        );
        let assistant = Arc::new(Assistant::new(client, assistant_id, tools));
        let transcript: TranscriptCell = Arc::new(Mutex::new(Transcript::new()));
        let on_transcript_change = Arc::new(Emitter::new());

        let deltas = {
            let transcript = transcript.clone();
            let changes = on_transcript_change.clone();
            assistant.on_message_delta(move |text| {
                let snapshot = {
                    let mut transcript = lock(&transcript);
                    transcript.append_text(text);
                    transcript.messages().to_vec()
                };
                changes.fire(&snapshot);
            })
        };
        let tool_events = {
            let transcript = transcript.clone();
            let changes = on_transcript_change.clone();
            assistant.on_tool_call_event(move |event| {
                let snapshot = {
                    let mut transcript = lock(&transcript);
                    transcript.apply_event(event);
                    transcript.messages().to_vec()
                };
                changes.fire(&snapshot);
            })
        };
        let ports = assistant.on_port_opened(|port| info!("Opened port {}", port));

        Self {
            embedder,
            assistant,
            transcript,
            on_transcript_change,
            _subscriptions: vec![deltas, tool_events, ports],
        }
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn assistant(&self) -> &Assistant {
        &self.assistant
    }

    pub fn embedder_state(&self) -> EmbedderState {
        self.embedder.state()
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        lock(&self.transcript).messages().to_vec()
    }

    pub fn on_transcript_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Vec<ChatMessage>) + Send + Sync + 'static,
    {
        self.on_transcript_change.subscribe(listener)
    }

    pub fn on_terminal_output<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&TerminalOutput) + Send + Sync + 'static,
    {
        self.assistant.on_terminal_output(listener)
    }

    pub fn on_embedder_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&EmbedderState) + Send + Sync + 'static,
    {
        self.embedder.on_state_change(listener)
    }

    /// Record the user message and run the assistant on it.
    pub async fn send_message(&self, text: &str) -> AppResult<RunOutcome> {
        let snapshot = {
            let mut transcript = lock(&self.transcript);
            transcript.push_user(text);
            transcript.messages().to_vec()
        };
        self.on_transcript_change.fire(&snapshot);
        self.assistant.send_message(text).await
    }

    /// Start over on a new thread with an empty transcript.
    pub async fn new_thread(&self) -> AppResult<String> {
        let id = self.assistant.new_thread().await?;
        let snapshot = {
            let mut transcript = lock(&self.transcript);
            *transcript = Transcript::new();
            transcript.messages().to_vec()
        };
        self.on_transcript_change.fire(&snapshot);
        Ok(id)
    }

    pub fn dispose(&self) {
        self.assistant.dispose();
        self.embedder.dispose();
        self.on_transcript_change.dispose();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("workspace", &self.embedder.workspace())
            .field("assistant", &self.assistant)
            .finish()
    }
}
