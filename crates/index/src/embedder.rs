//! Incrementally maintained embedding index for one workspace.
//!
//! The embedder builds the index once, then keeps it current from
//! filesystem events. Every index write goes through its
//! [`EmbeddingQueue`], one task per file, so a failure touches only that
//! file. Its public state is `Creating` until the index storage exists, and
//! afterwards follows the queue: `Updating` while work is pending, `Ready`
//! when the queue drains.

use crate::embeddings::EmbeddingProvider;
use crate::ignore::{relative_path, IgnoreRules};
use crate::progress::ProgressReporter;
use crate::queue::{EmbeddingQueue, QueueState, QueueTask};
use crate::search::SemanticSearch;
use crate::types::{EntryKind, EntryMetadata, IndexEntry, IndexStats, SearchHit};
use crate::vector_index::VectorIndex;
use crate::watcher::{self, PathChange, WatchHandle};
use aide_core::{AppConfig, AppError, AppResult, Emitter, Subscription};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// Characters of file content sent to the embedding model.
const MAX_EMBED_CHARS: usize = 24_000;

/// Public lifecycle of the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedderState {
    /// Index storage does not exist yet
    Creating,
    /// Index exists and the queue has pending work
    Updating,
    /// Index exists and the queue is idle
    Ready,
    /// Index storage could not be created; nothing will be indexed
    Failed(String),
}

impl std::fmt::Display for EmbedderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedderState::Creating => f.write_str("CREATING"),
            EmbedderState::Updating => f.write_str("UPDATING"),
            EmbedderState::Ready => f.write_str("READY"),
            EmbedderState::Failed(reason) => write!(f, "FAILED: {}", reason),
        }
    }
}

/// Knobs for one embedder instance.
#[derive(Debug, Clone)]
pub struct EmbedderSettings {
    /// Storage directory relative to the workspace root
    pub storage_dir: String,
    pub top_k: usize,
    pub code_extensions: Vec<String>,
    pub doc_extensions: Vec<String>,
    pub task_timeout: Duration,
    /// Install a filesystem watcher after the initial build
    pub watch: bool,
}

impl EmbedderSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            storage_dir: config.index.storage_dir.clone(),
            top_k: config.index.top_k,
            code_extensions: config.index.code_extensions.clone(),
            doc_extensions: config.index.doc_extensions.clone(),
            task_timeout: Duration::from_secs(config.index.task_timeout_secs),
            watch: true,
        }
    }
}

impl Default for EmbedderSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Default)]
struct Lifecycle {
    created: bool,
    failed: Option<String>,
    disposed: bool,
}

struct Inner {
    workspace: PathBuf,
    storage_path: PathBuf,
    settings: EmbedderSettings,
    index: Arc<dyn VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    queue: EmbeddingQueue,
    rules: RwLock<IgnoreRules>,
    lifecycle: Mutex<Lifecycle>,
    state: watch::Sender<EmbedderState>,
    on_state_change: Emitter<EmbedderState>,
    watcher: Mutex<Option<WatchHandle>>,
    queue_subscription: Mutex<Option<Subscription>>,
    progress: ProgressReporter,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running embedder. Clones share the same instance.
#[derive(Clone)]
pub struct Embedder {
    inner: Arc<Inner>,
}

impl Embedder {
    /// Start an embedder for `workspace` and queue the initial build.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        workspace: PathBuf,
        index: Arc<dyn VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        settings: EmbedderSettings,
        progress: ProgressReporter,
    ) -> Self {
        let storage_path = workspace.join(&settings.storage_dir);
        let rules = IgnoreRules::from_lines(std::iter::empty());
        let (state, _) = watch::channel(EmbedderState::Creating);

        let inner = Arc::new(Inner {
            queue: EmbeddingQueue::new(settings.task_timeout),
            workspace,
            storage_path,
            settings,
            index,
            provider,
            rules: RwLock::new(rules),
            lifecycle: Mutex::new(Lifecycle::default()),
            state,
            on_state_change: Emitter::new(),
            watcher: Mutex::new(None),
            queue_subscription: Mutex::new(None),
            progress,
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.queue.on_state_change(move |queue_state| {
            if let Some(inner) = weak.upgrade() {
                inner.refresh_state(*queue_state);
            }
        });
        *lock(&inner.queue_subscription) = Some(subscription);

        tracing::info!(
            "Starting embedder for {:?} (provider={}, model={})",
            inner.workspace,
            inner.provider.provider_name(),
            inner.provider.model_name()
        );
        inner.queue.add(inner.initialize_task());

        Self { inner }
    }

    pub fn state(&self) -> EmbedderState {
        self.inner.state.borrow().clone()
    }

    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&EmbedderState) + Send + Sync + 'static,
    {
        self.inner.on_state_change.subscribe(listener)
    }

    pub fn workspace(&self) -> &Path {
        &self.inner.workspace
    }

    /// Wait until the index is `Ready` (or `Failed`).
    pub async fn wait_until_ready(&self, timeout: Duration) -> AppResult<EmbedderState> {
        let mut rx = self.inner.state.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| matches!(s, EmbedderState::Ready | EmbedderState::Failed(_))),
        )
        .await;

        match waited {
            Ok(Ok(state)) => Ok(state.clone()),
            Ok(Err(_)) => Err(AppError::Index("Embedder stopped".to_string())),
            Err(_) => Err(AppError::Index(format!(
                "Index not ready after {:?} (state: {})",
                timeout,
                self.state()
            ))),
        }
    }

    pub async fn search_code_embeddings(&self, query: &str) -> AppResult<Vec<SearchHit>> {
        self.inner.search(query, EntryKind::Code).await
    }

    pub async fn search_doc_embeddings(&self, query: &str) -> AppResult<Vec<SearchHit>> {
        self.inner.search(query, EntryKind::Doc).await
    }

    pub fn stats(&self) -> AppResult<IndexStats> {
        self.inner.index.stats()
    }

    /// Stop watching, drop pending work and release listeners.
    pub fn dispose(&self) {
        {
            let mut lifecycle = lock(&self.inner.lifecycle);
            if lifecycle.disposed {
                return;
            }
            lifecycle.disposed = true;
        }
        lock(&self.inner.watcher).take();
        lock(&self.inner.queue_subscription).take();
        self.inner.queue.dispose();
        self.inner.on_state_change.dispose();
        tracing::info!("Embedder for {:?} disposed", self.inner.workspace);
    }

    /// Route one filesystem event as the watcher would.
    #[cfg(test)]
    pub(crate) fn handle_path_change(&self, path: &Path, change: PathChange) {
        self.inner.handle_path_change(path, change);
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("workspace", &self.inner.workspace)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait::async_trait]
impl SemanticSearch for Embedder {
    async fn search_code_embeddings(&self, query: &str) -> AppResult<Vec<SearchHit>> {
        Embedder::search_code_embeddings(self, query).await
    }

    async fn search_doc_embeddings(&self, query: &str) -> AppResult<Vec<SearchHit>> {
        Embedder::search_doc_embeddings(self, query).await
    }
}

/// Counts embeds of one initial build for progress reporting.
struct BuildProgress {
    done: AtomicU64,
    total: u64,
}

impl Inner {
    fn is_disposed(&self) -> bool {
        lock(&self.lifecycle).disposed
    }

    /// Recompute the public state from the lifecycle and a queue state.
    ///
    /// Queue notifications pass the state they carry, so the embedder
    /// follows queue transitions in the order they happened.
    fn refresh_state(&self, queue_state: QueueState) {
        let next = {
            let lifecycle = lock(&self.lifecycle);
            if let Some(reason) = &lifecycle.failed {
                EmbedderState::Failed(reason.clone())
            } else if !lifecycle.created {
                EmbedderState::Creating
            } else if queue_state == QueueState::Running {
                EmbedderState::Updating
            } else {
                EmbedderState::Ready
            }
        };

        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });

        if changed {
            match &next {
                EmbedderState::Failed(reason) => tracing::error!("Embedder failed: {}", reason),
                other => tracing::info!("Embedder state: {}", other),
            }
            self.on_state_change.fire(&next);
        }
    }

    fn initialize_task(self: &Arc<Self>) -> QueueTask {
        let weak = Arc::downgrade(self);
        Box::pin(async move {
            if let Some(inner) = weak.upgrade() {
                inner.initialize().await;
            }
        })
    }

    fn upsert_task(self: &Arc<Self>, rel: String, build: Option<Arc<BuildProgress>>) -> QueueTask {
        let weak = Arc::downgrade(self);
        Box::pin(async move {
            let Some(inner) = weak.upgrade() else { return };
            if let Err(e) = inner.update_file(&rel).await {
                tracing::warn!("Failed to index {}: {}", rel, e);
            }
            if let Some(build) = build {
                let done = build.done.fetch_add(1, Ordering::SeqCst) + 1;
                inner.progress.embed(done, Some(build.total), &rel);
            }
        })
    }

    fn remove_task(self: &Arc<Self>, rel: String) -> QueueTask {
        let weak = Arc::downgrade(self);
        Box::pin(async move {
            let Some(inner) = weak.upgrade() else { return };
            if let Err(e) = inner.remove_path(&rel) {
                tracing::warn!("Failed to remove {} from index: {}", rel, e);
            }
        })
    }

    /// Full build: storage, watcher, walk, one upsert per file, prune.
    async fn initialize(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }

        let rules = match IgnoreRules::load(&self.workspace, &self.settings.storage_dir) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!("Failed to load ignore rules: {}", e);
                IgnoreRules::from_lines(std::iter::empty())
            }
        };
        *self.rules.write().unwrap_or_else(|p| p.into_inner()) = rules.clone();

        if let Err(e) = self.index.create() {
            lock(&self.lifecycle).failed = Some(e.to_string());
            self.refresh_state(self.queue.state());
            return;
        }
        {
            let mut lifecycle = lock(&self.lifecycle);
            lifecycle.created = true;
            lifecycle.failed = None;
        }
        self.refresh_state(self.queue.state());

        if self.settings.watch {
            self.ensure_watcher().await;
        }

        let root = self.workspace.clone();
        let walked = tokio::task::spawn_blocking(move || rules.walk(&root))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Workspace walk failed: {}", e);
                Vec::new()
            });
        let files: Vec<String> = walked
            .into_iter()
            .filter(|rel| self.classify(rel).is_some())
            .collect();

        self.progress
            .discover(files.len() as u64, &self.workspace.display().to_string());
        tracing::info!("Queueing {} files for indexing", files.len());

        let build = Arc::new(BuildProgress {
            done: AtomicU64::new(0),
            total: files.len() as u64,
        });
        for rel in &files {
            self.queue
                .add(self.upsert_task(rel.clone(), Some(build.clone())));
        }

        let present: HashSet<&str> = files.iter().map(String::as_str).collect();
        match self.index.ids() {
            Ok(ids) => {
                let stale: Vec<String> = ids
                    .into_iter()
                    .filter(|id| !present.contains(id.as_str()))
                    .collect();
                self.progress.index(stale.len() as u64);
                for id in stale {
                    self.queue.add(self.remove_task(id));
                }
            }
            Err(e) => tracing::warn!("Failed to list indexed files: {}", e),
        }
    }

    async fn ensure_watcher(self: &Arc<Self>) {
        if lock(&self.watcher).is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let handle = watcher::watch(self.workspace.clone(), move |path, change| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_path_change(&path, change);
            }
        })
        .await;

        match handle {
            Ok(handle) => *lock(&self.watcher) = Some(handle),
            Err(e) => tracing::warn!("File watching disabled: {}", e),
        }
    }

    fn handle_path_change(self: &Arc<Self>, path: &Path, change: PathChange) {
        if self.is_disposed() {
            return;
        }

        if path.starts_with(&self.storage_path) {
            // Our own writes land here too; only a vanished index matters.
            let created = lock(&self.lifecycle).created;
            if created && !self.index.is_created() {
                self.restart();
            }
            return;
        }

        let Some(rel) = relative_path(&self.workspace, path) else {
            return;
        };

        if rel == ".gitignore" {
            tracing::info!("Ignore rules changed; rescanning workspace");
            self.queue.add(self.initialize_task());
            return;
        }

        if self
            .rules
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .is_ignored(&rel)
        {
            return;
        }

        match change {
            PathChange::Changed => {
                if self.classify(&rel).is_some() && path.is_file() {
                    tracing::debug!("Queueing update for {}", rel);
                    self.queue.add(self.upsert_task(rel, None));
                }
            }
            PathChange::Removed => {
                tracing::debug!("Queueing removal of {}", rel);
                self.queue.add(self.remove_task(rel));
            }
        }
    }

    /// The storage directory disappeared: drop pending work and rebuild.
    fn restart(self: &Arc<Self>) {
        tracing::warn!(
            "Index storage {:?} was removed; rebuilding the index",
            self.storage_path
        );
        self.queue.clear();
        lock(&self.lifecycle).created = false;
        self.refresh_state(self.queue.state());
        self.queue.add(self.initialize_task());
    }

    fn classify(&self, rel: &str) -> Option<EntryKind> {
        let ext = Path::new(rel).extension()?.to_str()?;
        let matches = |list: &[String]| {
            list.iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
        };
        if matches(&self.settings.doc_extensions) {
            Some(EntryKind::Doc)
        } else if matches(&self.settings.code_extensions) {
            Some(EntryKind::Code)
        } else {
            None
        }
    }

    /// Embed one file unless its stored hash is current.
    ///
    /// Returns whether the index was written.
    async fn update_file(&self, rel: &str) -> AppResult<bool> {
        let Some(kind) = self.classify(rel) else {
            return Ok(false);
        };

        let bytes = match tokio::fs::read(self.workspace.join(rel)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between the event and now.
                self.index.delete(rel)?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let content_hash = format!("{:x}", Sha256::digest(&bytes));
        if let Some(existing) = self.index.get(rel)? {
            if existing.content_hash == content_hash && existing.kind == kind {
                tracing::debug!("Skipping unchanged {}", rel);
                return Ok(false);
            }
        }

        let text = String::from_utf8_lossy(&bytes);
        let input = if text.trim().is_empty() {
            // Empty files are still findable by name.
            rel.to_string()
        } else {
            text.chars().take(MAX_EMBED_CHARS).collect()
        };

        let vector = self.provider.embed(&input).await?;
        self.index.upsert(&IndexEntry {
            id: rel.to_string(),
            vector,
            metadata: EntryMetadata {
                filepath: rel.to_string(),
                kind,
                content_hash,
                indexed_at: Utc::now(),
            },
        })?;

        tracing::debug!("Indexed {} as {}", rel, kind);
        Ok(true)
    }

    /// Remove a file entry, or every entry beneath a removed directory.
    fn remove_path(&self, rel: &str) -> AppResult<()> {
        if self.classify(rel).is_some() {
            return self.index.delete(rel);
        }
        let prefix = format!("{}/", rel);
        for id in self.index.ids()? {
            if id.starts_with(&prefix) {
                self.index.delete(&id)?;
            }
        }
        Ok(())
    }

    async fn search(&self, query: &str, kind: EntryKind) -> AppResult<Vec<SearchHit>> {
        let vector = self.provider.embed(query).await?;
        let filter = move |m: &EntryMetadata| m.kind == kind;
        let results = self.index.query(&vector, self.settings.top_k, &filter)?;
        Ok(results
            .into_iter()
            .map(|(entry, score)| SearchHit {
                filepath: entry.metadata.filepath,
                kind: entry.metadata.kind,
                score,
            })
            .collect())
    }
}
