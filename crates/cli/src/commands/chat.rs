//! Chat command handler.
//!
//! Starts a full session (embedder, tools, assistant) for the workspace.
//! With `--message` it sends one message and exits; otherwise it reads
//! lines from stdin. Lines starting with `/` control terminals and the
//! thread while a run is in flight.

use aide_core::{config::AppConfig, AppError, AppResult};
use aide_index::ProgressReporter;
use aide_llm::RunOutcome;
use aide_workspace::{Session, ToolCallStatus};
use clap::Args;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

/// Chat with the assistant about the workspace
#[derive(Args, Debug)]
pub struct ChatCommand {
    /// Send a single message and exit
    #[arg(short, long)]
    pub message: Option<String>,

    /// Print indexing progress
    #[arg(long)]
    pub progress: bool,
}

/// One line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChatInput {
    Message(String),
    /// `/input <terminal> <text>`
    Input { terminal: String, text: String },
    /// `/kill <terminal>`
    Kill(String),
    /// `/keep <terminal>`
    Keep(String),
    /// `/logs`
    Logs,
    /// `/new`
    NewThread,
    /// `/quit`
    Quit,
    Empty,
    Unknown(String),
}

impl ChatInput {
    fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return ChatInput::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return ChatInput::Message(line.to_string());
        };

        let (name, rest) = match command.split_once(' ') {
            Some((name, rest)) => (name, rest.trim_start()),
            None => (command, ""),
        };
        match (name, rest) {
            ("input", rest) if !rest.is_empty() => match rest.split_once(' ') {
                Some((terminal, text)) => ChatInput::Input {
                    terminal: terminal.to_string(),
                    text: format!("{}\n", text),
                },
                None => ChatInput::Input {
                    terminal: rest.to_string(),
                    text: "\n".to_string(),
                },
            },
            ("kill", id) if !id.is_empty() => ChatInput::Kill(id.trim().to_string()),
            ("keep", id) if !id.is_empty() => ChatInput::Keep(id.trim().to_string()),
            ("logs", "") => ChatInput::Logs,
            ("new", "") => ChatInput::NewThread,
            ("quit", "") | ("exit", "") => ChatInput::Quit,
            _ => ChatInput::Unknown(line.to_string()),
        }
    }
}

type RunTask = JoinHandle<AppResult<RunOutcome>>;

/// Resolves when the running send finishes; never when nothing runs.
async fn finished(task: &mut Option<RunTask>) -> AppResult<RunOutcome> {
    match task {
        Some(handle) => handle
            .await
            .map_err(|e| AppError::Other(format!("Run task failed: {}", e)))?,
        None => std::future::pending().await,
    }
}

fn report(outcome: AppResult<RunOutcome>) {
    println!();
    match outcome {
        Ok(RunOutcome::Completed) => {}
        Ok(RunOutcome::Aborted) => eprintln!("[run aborted]"),
        Ok(RunOutcome::Ended { status }) => eprintln!("[run ended: {:?}]", status),
        Ok(RunOutcome::RequiresAction(_)) => eprintln!("[run stopped waiting for tools]"),
        Err(e) => eprintln!("[error] {}", e),
    }
}

impl ChatCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing chat command");
        tracing::debug!("Chat options: {:?}", self);

        let progress = if self.progress {
            super::stderr_progress()
        } else {
            ProgressReporter::noop()
        };
        let session = Arc::new(Session::start(config, progress).await?);

        let _subscriptions = vec![
            session.assistant().on_message_delta(|text| {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }),
            session.assistant().on_tool_call_event(|event| match &event.status {
                ToolCallStatus::Pending => {
                    eprintln!("[{}] {} ...", event.id, event.action.name())
                }
                ToolCallStatus::Resolved => {
                    eprintln!("[{}] {} done", event.id, event.action.name())
                }
                ToolCallStatus::Rejected { error } => {
                    eprintln!("[{}] {} failed: {}", event.id, event.action.name(), error)
                }
            }),
            session.on_terminal_output(|chunk| eprint!("{}", chunk.data)),
            session.assistant().on_port_opened(|port| {
                eprintln!("[port] something is listening on {}", port)
            }),
            session.on_embedder_state_change(|state| eprintln!("[index] {}", state)),
        ];

        let result = match &self.message {
            Some(message) => {
                let outcome = session.send_message(message).await;
                report(outcome);
                Ok(())
            }
            None => self.repl(session.clone()).await,
        };

        session.dispose();
        result
    }

    async fn repl(&self, session: Arc<Session>) -> AppResult<()> {
        eprintln!(
            "Chatting in {:?}. /quit to leave.",
            session.embedder().workspace()
        );
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut running: Option<RunTask> = None;

        loop {
            tokio::select! {
                outcome = finished(&mut running) => {
                    running = None;
                    report(outcome);
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    match ChatInput::parse(&line) {
                        ChatInput::Empty => {}
                        ChatInput::Message(text) => {
                            if running.is_some() {
                                eprintln!("[busy] wait for the current run to finish");
                                continue;
                            }
                            let session = session.clone();
                            running = Some(tokio::spawn(async move {
                                session.send_message(&text).await
                            }));
                        }
                        ChatInput::Input { terminal, text } => {
                            session.assistant().handle_terminal_input(&terminal, &text).await?;
                        }
                        ChatInput::Kill(terminal) => session.assistant().handle_kill_terminal(&terminal),
                        ChatInput::Keep(terminal) => session.assistant().handle_keep_terminal(&terminal),
                        ChatInput::Logs => {
                            let logs = session.assistant().development_logs();
                            println!("{}", serde_json::to_string_pretty(&logs)?);
                        }
                        ChatInput::NewThread => {
                            if running.is_some() {
                                eprintln!("[busy] wait for the current run to finish");
                                continue;
                            }
                            let id = session.new_thread().await?;
                            eprintln!("[thread] {}", id);
                        }
                        ChatInput::Quit => break,
                        ChatInput::Unknown(line) => eprintln!("[?] unknown command: {}", line),
                    }
                }
            }
        }

        if let Some(handle) = running.take() {
            handle.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_lines_are_messages() {
        assert_eq!(
            ChatInput::parse("start the dev server\n"),
            ChatInput::Message("start the dev server".to_string())
        );
        assert_eq!(ChatInput::parse("   "), ChatInput::Empty);
    }

    #[test]
    fn test_terminal_commands() {
        assert_eq!(
            ChatInput::parse("/input 3 y"),
            ChatInput::Input {
                terminal: "3".to_string(),
                text: "y\n".to_string()
            }
        );
        assert_eq!(
            ChatInput::parse("/input 3"),
            ChatInput::Input {
                terminal: "3".to_string(),
                text: "\n".to_string()
            }
        );
        assert_eq!(ChatInput::parse("/kill 3"), ChatInput::Kill("3".to_string()));
        assert_eq!(ChatInput::parse("/keep 3"), ChatInput::Keep("3".to_string()));
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(ChatInput::parse("/logs"), ChatInput::Logs);
        assert_eq!(ChatInput::parse("/new"), ChatInput::NewThread);
        assert_eq!(ChatInput::parse("/quit"), ChatInput::Quit);
        assert_eq!(ChatInput::parse("/exit"), ChatInput::Quit);
    }

    #[test]
    fn test_unknown_and_incomplete_commands() {
        assert_eq!(
            ChatInput::parse("/kill"),
            ChatInput::Unknown("/kill".to_string())
        );
        assert_eq!(
            ChatInput::parse("/rm -rf"),
            ChatInput::Unknown("/rm -rf".to_string())
        );
    }
}
