//! Tool dispatch for assistant runs.
//!
//! [`AssistantTools::handle_tool_calls`] answers a batch of tool calls
//! concurrently and returns one output per call, in request order. A failing
//! call never fails the batch: its error becomes the output text and a
//! `Rejected` event.

use crate::events::{TerminalOutput, ToolAction, ToolCallEvent};
use crate::ports::PortDetector;
use crate::terminal::{Terminal, TerminalEvent, TerminalOptions};
use aide_core::{AppError, AppResult, Emitter, Subscription};
use aide_index::ignore::relative_path;
use aide_index::{IgnoreRules, SemanticSearch};
use aide_llm::{FunctionCall, ToolCall, ToolOutput};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_STORAGE_DIR: &str = ".embeddings";

/// An error captured by the app running in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeError {
    pub message: String,
    #[serde(default)]
    pub stack: String,
}

/// Messages from the external runtime-error channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeMessage {
    /// The app (re)loaded; earlier errors are stale
    Loaded,
    Errors { errors: Vec<RuntimeError> },
}

/// One entry returned by `read_development_logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DevelopmentLog {
    Process { command: String, output: String },
    Runtime { message: String, stack: String },
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    #[serde(alias = "path")]
    query: String,
}

#[derive(Debug, Deserialize)]
struct CommandArgs {
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

/// A tool call with its arguments decoded.
#[derive(Debug)]
enum ToolRequest {
    ReadFile(PathArgs),
    WriteFile(WriteArgs),
    ReadDirectory(PathArgs),
    DeleteFileOrDirectory(PathArgs),
    SearchCodeEmbeddings(QueryArgs),
    SearchDocEmbeddings(QueryArgs),
    SearchFilePaths(QueryArgs),
    RunTerminalCommand(CommandArgs),
    ReadDevelopmentLogs,
}

impl ToolRequest {
    /// Decode a call, or describe why it cannot be run.
    fn parse(function: &FunctionCall) -> Result<Self, (ToolAction, String)> {
        fn args<T: serde::de::DeserializeOwned>(
            function: &FunctionCall,
        ) -> Result<T, (ToolAction, String)> {
            serde_json::from_str(&function.arguments).map_err(|e| {
                (
                    ToolAction::Malformed {
                        name: function.name.clone(),
                        arguments: function.arguments.clone(),
                    },
                    format!("Invalid arguments for {}: {}", function.name, e),
                )
            })
        }

        Ok(match function.name.as_str() {
            "read_file" => ToolRequest::ReadFile(args(function)?),
            "write_file" => ToolRequest::WriteFile(args(function)?),
            "read_directory" => ToolRequest::ReadDirectory(args(function)?),
            "delete_file_or_directory" => ToolRequest::DeleteFileOrDirectory(args(function)?),
            "search_code_embeddings" => ToolRequest::SearchCodeEmbeddings(args(function)?),
            "search_doc_embeddings" => ToolRequest::SearchDocEmbeddings(args(function)?),
            "search_file_paths" => ToolRequest::SearchFilePaths(args(function)?),
            "run_terminal_command" => ToolRequest::RunTerminalCommand(args(function)?),
            "read_development_logs" => ToolRequest::ReadDevelopmentLogs,
            other => {
                return Err((
                    ToolAction::Unsupported {
                        name: other.to_string(),
                    },
                    format!("Tool {} is not supported", other),
                ))
            }
        })
    }
}

/// How a terminal stopped being a pending action.
enum Settlement {
    Closed { exit_code: Option<i32> },
    Detached,
}

struct Inner {
    workspace: PathBuf,
    storage_dir: String,
    search: Arc<dyn SemanticSearch>,
    terminals: Mutex<BTreeMap<String, Arc<Terminal>>>,
    runtime_errors: Mutex<Vec<RuntimeError>>,
    ports: PortDetector,
    disposed: AtomicBool,
    on_tool_call_event: Emitter<ToolCallEvent>,
    on_terminal_output: Emitter<TerminalOutput>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The tool surface of one workspace.
#[derive(Clone)]
pub struct AssistantTools {
    inner: Arc<Inner>,
}

impl AssistantTools {
    pub fn new(workspace: impl Into<PathBuf>, search: Arc<dyn SemanticSearch>) -> Self {
        Self::with_parts(
            workspace,
            search,
            DEFAULT_STORAGE_DIR.to_string(),
            PortDetector::new(),
        )
    }

    /// `storage_dir` is excluded from `search_file_paths` like the index
    /// excludes it.
    pub fn with_parts(
        workspace: impl Into<PathBuf>,
        search: Arc<dyn SemanticSearch>,
        storage_dir: String,
        ports: PortDetector,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                workspace: normalize(&absolute(workspace.into())),
                storage_dir,
                search,
                terminals: Mutex::new(BTreeMap::new()),
                runtime_errors: Mutex::new(Vec::new()),
                ports,
                disposed: AtomicBool::new(false),
                on_tool_call_event: Emitter::new(),
                on_terminal_output: Emitter::new(),
            }),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.inner.workspace
    }

    pub fn on_tool_call_event<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ToolCallEvent) + Send + Sync + 'static,
    {
        self.inner.on_tool_call_event.subscribe(listener)
    }

    pub fn on_terminal_output<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&TerminalOutput) + Send + Sync + 'static,
    {
        self.inner.on_terminal_output.subscribe(listener)
    }

    pub fn on_port_opened<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&u16) + Send + Sync + 'static,
    {
        self.inner.ports.on_port_opened(listener)
    }

    /// Ids of terminals that have not exited yet.
    pub fn terminal_ids(&self) -> Vec<String> {
        lock(&self.inner.terminals).keys().cloned().collect()
    }

    /// Answer every call of a batch; outputs follow the input order.
    #[instrument(skip(self, calls), fields(calls = calls.len()))]
    pub async fn handle_tool_calls(&self, calls: &[ToolCall]) -> Vec<ToolOutput> {
        join_all(calls.iter().map(|call| self.handle_tool_call(call))).await
    }

    async fn handle_tool_call(&self, call: &ToolCall) -> ToolOutput {
        debug!("Tool call {} -> {}", call.id, call.function.name);

        let output = match ToolRequest::parse(&call.function) {
            Ok(request) => self.dispatch(&call.id, request).await,
            Err((action, error)) => {
                warn!("Rejecting tool call {}: {}", call.id, error);
                self.fire(ToolCallEvent::pending(&call.id, action.clone()));
                self.fire(ToolCallEvent::rejected(&call.id, action, &error));
                format!("Error: {}", error)
            }
        };

        ToolOutput {
            tool_call_id: call.id.clone(),
            output,
        }
    }

    async fn dispatch(&self, id: &str, request: ToolRequest) -> String {
        match request {
            ToolRequest::ReadFile(args) => {
                let target = self.resolve(&args.path);
                let action = ToolAction::ReadFile {
                    path: display_path(&target, &args.path),
                };
                self.settle(id, action, read_file(target)).await
            }

            ToolRequest::WriteFile(args) => {
                let target = self.resolve(&args.path);
                let action = ToolAction::WriteFile {
                    path: display_path(&target, &args.path),
                    content: args.content.clone(),
                };
                self.settle(id, action, write_file(target, args.content)).await
            }

            ToolRequest::ReadDirectory(args) => {
                let target = self.resolve(&args.path);
                let action = ToolAction::ReadDirectory {
                    path: display_path(&target, &args.path),
                };
                self.settle(id, action, read_directory(target)).await
            }

            ToolRequest::DeleteFileOrDirectory(args) => {
                let target = self.resolve(&args.path);
                let action = ToolAction::DeleteFileOrDirectory {
                    path: display_path(&target, &args.path),
                };
                self.settle(id, action, delete_file_or_directory(target)).await
            }

            ToolRequest::SearchCodeEmbeddings(args) => {
                let action = ToolAction::SearchCodeEmbeddings {
                    query: args.query.clone(),
                };
                let search = self.inner.search.clone();
                self.settle(id, action, async move {
                    let hits = search.search_code_embeddings(&args.query).await?;
                    to_json(&hits)
                })
                .await
            }

            ToolRequest::SearchDocEmbeddings(args) => {
                let action = ToolAction::SearchDocEmbeddings {
                    query: args.query.clone(),
                };
                let search = self.inner.search.clone();
                self.settle(id, action, async move {
                    let hits = search.search_doc_embeddings(&args.query).await?;
                    to_json(&hits)
                })
                .await
            }

            ToolRequest::SearchFilePaths(args) => {
                let action = ToolAction::SearchFilePaths {
                    query: args.query.clone(),
                };
                self.settle(id, action, self.search_file_paths(args.query)).await
            }

            ToolRequest::RunTerminalCommand(args) => {
                self.run_terminal_command(id, args.command, args.args).await
            }

            ToolRequest::ReadDevelopmentLogs => {
                let logs = self.read_development_logs();
                self.settle(id, ToolAction::ReadDevelopmentLogs, async move { to_json(&logs) })
                    .await
            }
        }
    }

    /// Fire `Pending`, run `operation`, then fire its settled event.
    async fn settle<F>(&self, id: &str, action: ToolAction, operation: F) -> String
    where
        F: std::future::Future<Output = AppResult<String>>,
    {
        self.fire(ToolCallEvent::pending(id, action.clone()));
        match operation.await {
            Ok(output) => {
                self.fire(ToolCallEvent::resolved(id, action));
                output
            }
            Err(e) => {
                let message = error_message(&e);
                debug!("Tool call {} ({}) failed: {}", id, action.name(), message);
                self.fire(ToolCallEvent::rejected(id, action, &message));
                format!("Error: {}", message)
            }
        }
    }

    fn fire(&self, event: ToolCallEvent) {
        self.inner.on_tool_call_event.fire(&event);
    }

    /// Absolute path and workspace-relative path for a tool argument.
    fn resolve(&self, path: &str) -> AppResult<(PathBuf, String)> {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.inner.workspace.join(candidate)
        };
        let normalized = normalize(&joined);

        if normalized == self.inner.workspace {
            return Ok((normalized, String::new()));
        }
        let rel = relative_path(&self.inner.workspace, &normalized).ok_or_else(|| {
            AppError::Tool(format!("Path {} is outside the workspace", path))
        })?;
        Ok((normalized, rel))
    }

    async fn search_file_paths(&self, query: String) -> AppResult<String> {
        let workspace = self.inner.workspace.clone();
        let storage_dir = self.inner.storage_dir.clone();
        let files = tokio::task::spawn_blocking(move || {
            IgnoreRules::load(&workspace, &storage_dir).map(|rules| rules.walk(&workspace))
        })
        .await
        .map_err(|e| AppError::Tool(format!("File search failed: {}", e)))??;

        let matches: Vec<String> = files.into_iter().filter(|f| f.contains(&query)).collect();
        to_json(&matches)
    }

    /// Output of every live terminal, then buffered runtime errors. The
    /// runtime errors are cleared.
    pub fn read_development_logs(&self) -> Vec<DevelopmentLog> {
        let mut logs: Vec<DevelopmentLog> = lock(&self.inner.terminals)
            .values()
            .map(|terminal| DevelopmentLog::Process {
                command: terminal.command_line().to_string(),
                output: terminal.output(),
            })
            .collect();

        let errors = std::mem::take(&mut *lock(&self.inner.runtime_errors));
        logs.extend(errors.into_iter().map(|e| DevelopmentLog::Runtime {
            message: e.message,
            stack: e.stack,
        }));
        logs
    }

    pub fn report_runtime_message(&self, message: RuntimeMessage) {
        let mut errors = lock(&self.inner.runtime_errors);
        match message {
            RuntimeMessage::Loaded => errors.clear(),
            RuntimeMessage::Errors { errors: reported } => {
                debug!("Buffered {} runtime error(s)", reported.len());
                errors.extend(reported);
            }
        }
    }

    async fn run_terminal_command(&self, id: &str, command: String, args: Vec<String>) -> String {
        let (events, mut rx) = mpsc::unbounded_channel();
        let terminal = Arc::new(Terminal::spawn(
            TerminalOptions {
                id: id.to_string(),
                command,
                args,
                working_directory: self.inner.workspace.clone(),
            },
            events,
        ));
        let command_line = terminal.command_line().to_string();

        lock(&self.inner.terminals).insert(id.to_string(), terminal.clone());
        self.inner.ports.start();
        self.fire(ToolCallEvent::pending(
            id,
            ToolAction::RunTerminalCommand {
                command: command_line.clone(),
                buffer: String::new(),
            },
        ));

        let (settled_tx, settled_rx) = oneshot::channel();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let terminal_id = id.to_string();
        tokio::spawn(async move {
            let mut settled = Some(settled_tx);
            while let Some(event) = rx.recv().await {
                match event {
                    TerminalEvent::Output(data) => {
                        if let Some(inner) = weak.upgrade() {
                            inner.on_terminal_output.fire(&TerminalOutput {
                                id: terminal_id.clone(),
                                data,
                            });
                        }
                    }
                    TerminalEvent::Detached => {
                        if let Some(tx) = settled.take() {
                            let _ = tx.send(Settlement::Detached);
                        }
                    }
                    TerminalEvent::Closed { exit_code } => {
                        if let Some(inner) = weak.upgrade() {
                            lock(&inner.terminals).remove(&terminal_id);
                            inner.ports.stop();
                        }
                        if let Some(tx) = settled.take() {
                            let _ = tx.send(Settlement::Closed { exit_code });
                        }
                        break;
                    }
                }
            }
        });

        let settlement = settled_rx
            .await
            .unwrap_or(Settlement::Closed { exit_code: None });
        let output = terminal.output();
        let action = ToolAction::RunTerminalCommand {
            command: command_line,
            buffer: output.clone(),
        };

        match settlement {
            Settlement::Detached => {
                self.fire(ToolCallEvent::resolved(id, action));
                json!({ "exitCode": null, "output": output, "detached": true }).to_string()
            }
            Settlement::Closed { exit_code } => {
                let failure = match exit_code {
                    None => Some("Process did not report an exit code".to_string()),
                    Some(code) if code != 0 => Some(format!("Exited with code {}", code)),
                    Some(_) if terminal.has_error() => {
                        Some("Process reported errors on stderr".to_string())
                    }
                    Some(_) => None,
                };
                match failure {
                    Some(error) => self.fire(ToolCallEvent::rejected(id, action, error)),
                    None => self.fire(ToolCallEvent::resolved(id, action)),
                }
                json!({ "exitCode": exit_code, "output": output, "detached": false }).to_string()
            }
        }
    }

    fn terminal(&self, id: &str) -> Option<Arc<Terminal>> {
        lock(&self.inner.terminals).get(id).cloned()
    }

    /// Write to a terminal's stdin. Unknown ids are ignored.
    pub async fn handle_terminal_input(&self, id: &str, input: &str) -> AppResult<()> {
        match self.terminal(id) {
            Some(terminal) => terminal.send_input(input).await,
            None => Ok(()),
        }
    }

    /// Terminate a terminal; it is unregistered once it exits.
    pub fn handle_kill_terminal(&self, id: &str) {
        if let Some(terminal) = self.terminal(id) {
            info!("Killing terminal {}", id);
            terminal.dispose();
        }
    }

    /// Stop waiting on a terminal and let it run in the background.
    pub fn handle_keep_terminal(&self, id: &str) {
        if let Some(terminal) = self.terminal(id) {
            terminal.detach();
        }
    }

    /// Kill every live terminal and release listeners. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let terminals: Vec<Arc<Terminal>> = lock(&self.inner.terminals).values().cloned().collect();
        for terminal in terminals {
            terminal.dispose();
        }
        self.inner.ports.dispose();
        self.inner.on_tool_call_event.dispose();
        self.inner.on_terminal_output.dispose();
    }
}

impl std::fmt::Debug for AssistantTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantTools")
            .field("workspace", &self.inner.workspace)
            .field("terminals", &self.terminal_ids())
            .finish()
    }
}

/// Message shown to the model; tool errors are already self-describing.
fn error_message(error: &AppError) -> String {
    match error {
        AppError::Tool(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Relative path for events, or the raw argument if it did not resolve.
fn display_path(target: &AppResult<(PathBuf, String)>, raw: &str) -> String {
    match target {
        Ok((_, rel)) => rel.clone(),
        Err(_) => raw.to_string(),
    }
}

/// Anchor a relative root at the current directory.
fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            warn!("Cannot resolve {:?} against the current directory: {}", path, e);
            path
        }
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn to_json<T: Serialize>(value: &T) -> AppResult<String> {
    Ok(serde_json::to_string(value)?)
}

async fn read_file(target: AppResult<(PathBuf, String)>) -> AppResult<String> {
    let (path, rel) = target?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::Tool(format!("Failed to read {}: {}", rel, e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Missing parent directories are created.
async fn write_file(target: AppResult<(PathBuf, String)>, content: String) -> AppResult<String> {
    let (path, rel) = target?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::Tool(format!("Failed to create parent of {}: {}", rel, e)))?;
    }
    tokio::fs::write(&path, content.as_bytes())
        .await
        .map_err(|e| AppError::Tool(format!("Failed to write {}: {}", rel, e)))?;
    info!("Wrote {}", rel);
    Ok("success".to_string())
}

/// Entry names, sorted, as a JSON array.
async fn read_directory(target: AppResult<(PathBuf, String)>) -> AppResult<String> {
    let (path, rel) = target?;
    let read_error = |e: std::io::Error| AppError::Tool(format!("Failed to read directory {}: {}", rel, e));

    let mut entries = tokio::fs::read_dir(&path).await.map_err(read_error)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    to_json(&names)
}

async fn delete_file_or_directory(target: AppResult<(PathBuf, String)>) -> AppResult<String> {
    let (path, rel) = target?;
    if rel.is_empty() {
        return Err(AppError::Tool(
            "Refusing to delete the workspace root".to_string(),
        ));
    }
    remove_path(&path)
        .await
        .map_err(|e| AppError::Tool(format!("Failed to delete {}: {}", rel, e)))?;
    info!("Deleted {}", rel);
    Ok("success".to_string())
}

/// Recursive, and a missing target is not an error.
async fn remove_path(path: &Path) -> std::io::Result<()> {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aide_index::SearchHit;
    use tempfile::TempDir;

    struct NoSearch;

    #[async_trait::async_trait]
    impl SemanticSearch for NoSearch {
        async fn search_code_embeddings(&self, _query: &str) -> AppResult<Vec<SearchHit>> {
            Ok(Vec::new())
        }

        async fn search_doc_embeddings(&self, _query: &str) -> AppResult<Vec<SearchHit>> {
            Err(AppError::Index("index is not ready".to_string()))
        }
    }

    fn tools(dir: &TempDir) -> AssistantTools {
        AssistantTools::new(dir.path(), Arc::new(NoSearch))
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/w/a/../b/./c")), PathBuf::from("/w/b/c"));
        assert_eq!(normalize(Path::new("/w/../../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_resolve_keeps_paths_inside_workspace() {
        let dir = TempDir::new().unwrap();
        let tools = tools(&dir);

        let (abs, rel) = tools.resolve("src/../lib/mod.rs").unwrap();
        assert_eq!(rel, "lib/mod.rs");
        assert_eq!(abs, tools.workspace().join("lib/mod.rs"));

        let (_, rel) = tools.resolve(".").unwrap();
        assert_eq!(rel, "");

        let inside = tools.workspace().join("a.txt");
        assert_eq!(tools.resolve(inside.to_str().unwrap()).unwrap().1, "a.txt");

        assert!(tools.resolve("../outside.txt").is_err());
        assert!(tools.resolve("/etc/passwd").is_err());
    }

    #[test]
    fn test_relative_roots_are_anchored_at_current_dir() {
        let cwd = std::env::current_dir().unwrap();

        let here = AssistantTools::new(".", Arc::new(NoSearch));
        assert_eq!(here.workspace(), cwd.as_path());

        let sibling = AssistantTools::new("../x", Arc::new(NoSearch));
        assert!(sibling.workspace().is_absolute());
        assert_eq!(sibling.workspace(), normalize(&cwd.join("../x")));
    }

    #[tokio::test]
    async fn test_tools_work_from_dot_root() {
        let tools = AssistantTools::new(".", Arc::new(NoSearch));

        let outputs = tools
            .handle_tool_calls(&[
                ToolCall::new("r", "read_file", r#"{"path": "Cargo.toml"}"#),
                ToolCall::new("s", "search_file_paths", r#"{"query": "Cargo.toml"}"#),
            ])
            .await;

        assert!(outputs[0].output.contains("aide-workspace"));
        let found: Vec<String> = serde_json::from_str(&outputs[1].output).unwrap();
        assert!(found.contains(&"Cargo.toml".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminal_starts_in_dot_root() {
        let tools = AssistantTools::new(".", Arc::new(NoSearch));

        let outputs = tools
            .handle_tool_calls(&[ToolCall::new("p", "run_terminal_command", r#"{"command": "pwd"}"#)])
            .await;
        tools.dispose();

        let result: serde_json::Value = serde_json::from_str(&outputs[0].output).unwrap();
        assert_eq!(result["exitCode"], 0);
        let printed = result["output"].as_str().unwrap().trim().to_string();
        assert_eq!(
            Path::new(&printed).canonicalize().unwrap(),
            std::env::current_dir().unwrap().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_parse_requests() {
        let call = FunctionCall {
            name: "search_file_paths".to_string(),
            arguments: r#"{"path": "term"}"#.to_string(),
        };
        assert!(matches!(
            ToolRequest::parse(&call),
            Ok(ToolRequest::SearchFilePaths(QueryArgs { query })) if query == "term"
        ));

        let call = FunctionCall {
            name: "run_terminal_command".to_string(),
            arguments: r#"{"command": "npm"}"#.to_string(),
        };
        assert!(matches!(
            ToolRequest::parse(&call),
            Ok(ToolRequest::RunTerminalCommand(CommandArgs { args, .. })) if args.is_empty()
        ));

        let call = FunctionCall {
            name: "read_development_logs".to_string(),
            arguments: String::new(),
        };
        assert!(matches!(
            ToolRequest::parse(&call),
            Ok(ToolRequest::ReadDevelopmentLogs)
        ));

        let call = FunctionCall {
            name: "read_file".to_string(),
            arguments: "{not json".to_string(),
        };
        assert!(matches!(
            ToolRequest::parse(&call),
            Err((ToolAction::Malformed { .. }, _))
        ));
    }

    #[tokio::test]
    async fn test_write_then_read_file() {
        let dir = TempDir::new().unwrap();
        let tools = tools(&dir);

        let outputs = tools
            .handle_tool_calls(&[ToolCall::new(
                "w",
                "write_file",
                r#"{"path": "nested/dir/hello.txt", "content": "hi there"}"#,
            )])
            .await;
        assert_eq!(outputs[0].output, "success");

        let outputs = tools
            .handle_tool_calls(&[ToolCall::new(
                "r",
                "read_file",
                r#"{"path": "nested/dir/hello.txt"}"#,
            )])
            .await;
        assert_eq!(outputs[0].output, "hi there");
    }

    #[tokio::test]
    async fn test_read_directory_is_sorted_json() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.ts"), "").unwrap();
        std::fs::write(dir.path().join("a.ts"), "").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let tools = tools(&dir);

        let outputs = tools
            .handle_tool_calls(&[ToolCall::new("d", "read_directory", r#"{"path": "."}"#)])
            .await;
        let names: Vec<String> = serde_json::from_str(&outputs[0].output).unwrap();
        assert_eq!(names, vec!["a.ts", "b.ts", "src"]);
    }

    #[tokio::test]
    async fn test_search_file_paths_honors_ignores() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/terminal")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/terminal")).unwrap();
        std::fs::write(dir.path().join("src/terminal/index.ts"), "").unwrap();
        std::fs::write(dir.path().join("node_modules/terminal/index.js"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        let tools = tools(&dir);

        let outputs = tools
            .handle_tool_calls(&[ToolCall::new(
                "s",
                "search_file_paths",
                r#"{"query": "terminal"}"#,
            )])
            .await;
        let paths: Vec<String> = serde_json::from_str(&outputs[0].output).unwrap();
        assert_eq!(paths, vec!["src/terminal/index.ts"]);
    }

    #[tokio::test]
    async fn test_search_failure_is_rejected_output() {
        let dir = TempDir::new().unwrap();
        let tools = tools(&dir);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = tools.on_tool_call_event(move |e| sink.lock().unwrap().push(e.clone()));

        let outputs = tools
            .handle_tool_calls(&[ToolCall::new(
                "q",
                "search_doc_embeddings",
                r#"{"query": "setup"}"#,
            )])
            .await;
        assert_eq!(outputs[0].output, "Error: Index error: index is not ready");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1].status,
            crate::events::ToolCallStatus::Rejected {
                error: "Index error: index is not ready".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_development_logs_are_read_once() {
        let dir = TempDir::new().unwrap();
        let tools = tools(&dir);

        tools.report_runtime_message(RuntimeMessage::Errors {
            errors: vec![RuntimeError {
                message: "x is undefined".to_string(),
                stack: "at App.tsx:3".to_string(),
            }],
        });
        assert_eq!(
            tools.read_development_logs(),
            vec![DevelopmentLog::Runtime {
                message: "x is undefined".to_string(),
                stack: "at App.tsx:3".to_string(),
            }]
        );
        assert!(tools.read_development_logs().is_empty());

        tools.report_runtime_message(RuntimeMessage::Errors {
            errors: vec![RuntimeError {
                message: "stale".to_string(),
                stack: String::new(),
            }],
        });
        tools.report_runtime_message(RuntimeMessage::Loaded);
        assert!(tools.read_development_logs().is_empty());
    }

    #[test]
    fn test_runtime_message_wire_form() {
        let message: RuntimeMessage = serde_json::from_str(
            r#"{"type": "errors", "errors": [{"message": "boom", "stack": "s"}]}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            RuntimeMessage::Errors {
                errors: vec![RuntimeError {
                    message: "boom".to_string(),
                    stack: "s".to_string()
                }]
            }
        );
        assert_eq!(
            serde_json::from_str::<RuntimeMessage>(r#"{"type": "loaded"}"#).unwrap(),
            RuntimeMessage::Loaded
        );
    }

    #[tokio::test]
    async fn test_terminal_controls_ignore_unknown_ids() {
        let dir = TempDir::new().unwrap();
        let tools = tools(&dir);

        tools.handle_terminal_input("nope", "y\n").await.unwrap();
        tools.handle_kill_terminal("nope");
        tools.handle_keep_terminal("nope");
        assert!(tools.terminal_ids().is_empty());
    }
}
