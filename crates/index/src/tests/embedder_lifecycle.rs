//! End-to-end behaviour of the embedder: initial build, incremental
//! updates, pruning and recovery from a deleted index.

use crate::embeddings::providers::mock::MockProvider;
use crate::embedder::{Embedder, EmbedderSettings, EmbedderState};
use crate::index::SqliteIndex;
use crate::progress::ProgressReporter;
use crate::types::EntryKind;
use crate::vector_index::VectorIndex;
use crate::watcher::PathChange;
use aide_core::Subscription;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const READY_TIMEOUT: Duration = Duration::from_secs(10);

struct Fixture {
    index: Arc<SqliteIndex>,
    embedder: Embedder,
    states: Arc<Mutex<Vec<EmbedderState>>>,
    _subscription: Subscription,
}

impl Fixture {
    fn start(root: &Path) -> Self {
        Self::start_with(root, false)
    }

    /// Like `start`, with the filesystem watcher installed.
    fn start_watching(root: &Path) -> Self {
        Self::start_with(root, true)
    }

    fn start_with(root: &Path, watch: bool) -> Self {
        let settings = EmbedderSettings {
            watch,
            ..Default::default()
        };
        let index = Arc::new(SqliteIndex::for_workspace(root, &settings.storage_dir));
        let embedder = Embedder::spawn(
            root.to_path_buf(),
            index.clone(),
            Arc::new(MockProvider::new(MockProvider::DEFAULT_DIMENSIONS)),
            settings,
            ProgressReporter::noop(),
        );

        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        let subscription = embedder.on_state_change(move |state| {
            sink.lock().unwrap().push(state.clone());
        });

        Self {
            index,
            embedder,
            states,
            _subscription: subscription,
        }
    }

    fn states(&self) -> Vec<EmbedderState> {
        self.states.lock().unwrap().clone()
    }

    /// Wait until `count` state changes have been observed.
    async fn wait_for_states(&self, count: usize) -> Vec<EmbedderState> {
        for _ in 0..500 {
            if self.states.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.states()
    }

    fn indexed_ids(&self) -> Vec<String> {
        let mut ids = self.index.ids().unwrap();
        ids.sort();
        ids
    }

    /// Poll the index until it holds exactly `expected`.
    async fn wait_for_ids(&self, expected: &[&str]) -> Vec<String> {
        let mut ids = Vec::new();
        for _ in 0..500 {
            if let Ok(mut current) = self.index.ids() {
                current.sort();
                ids = current;
                if ids == expected {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        ids
    }
}

fn workspace() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::create_dir_all(root.join("docs")).unwrap();
    std::fs::write(
        root.join("src/terminal.ts"),
        "export class TerminalOutputBuffer { appendOutput(chunk) {} }",
    )
    .unwrap();
    std::fs::write(
        root.join("docs/guide.md"),
        "# Contributor guide\n\nHow to write markdown documentation.",
    )
    .unwrap();
    std::fs::write(root.join("notes.bin"), [0u8, 1, 2]).unwrap();
    (dir, root)
}

#[tokio::test]
async fn test_initial_build_reaches_ready() {
    let (_dir, root) = workspace();
    let fixture = Fixture::start(&root);
    assert_eq!(fixture.embedder.state(), EmbedderState::Creating);

    let state = fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    assert_eq!(state, EmbedderState::Ready);
    assert_eq!(
        fixture.wait_for_states(2).await,
        vec![EmbedderState::Updating, EmbedderState::Ready]
    );
    assert_eq!(fixture.indexed_ids(), vec!["docs/guide.md", "src/terminal.ts"]);

    let stats = fixture.embedder.stats().unwrap();
    assert_eq!(stats.code_entries, 1);
    assert_eq!(stats.doc_entries, 1);
}

#[tokio::test]
async fn test_search_is_filtered_by_kind() {
    let (_dir, root) = workspace();
    let fixture = Fixture::start(&root);
    fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();

    let code = fixture
        .embedder
        .search_code_embeddings("terminal output buffer")
        .await
        .unwrap();
    assert_eq!(code.len(), 1);
    assert_eq!(code[0].filepath, "src/terminal.ts");
    assert_eq!(code[0].kind, EntryKind::Code);

    let docs = fixture
        .embedder
        .search_doc_embeddings("contributor guide")
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].filepath, "docs/guide.md");
}

#[tokio::test]
async fn test_removed_file_leaves_the_index() {
    let (_dir, root) = workspace();
    let fixture = Fixture::start(&root);
    fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    fixture.wait_for_states(2).await;

    let path = root.join("src/terminal.ts");
    std::fs::remove_file(&path).unwrap();
    fixture.embedder.handle_path_change(&path, PathChange::Removed);

    assert_eq!(
        fixture.wait_for_states(4).await,
        vec![
            EmbedderState::Updating,
            EmbedderState::Ready,
            EmbedderState::Updating,
            EmbedderState::Ready,
        ]
    );
    assert_eq!(fixture.indexed_ids(), vec!["docs/guide.md"]);
    let hits = fixture
        .embedder
        .search_code_embeddings("terminal output buffer")
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_removed_directory_removes_entries_below_it() {
    let (_dir, root) = workspace();
    let fixture = Fixture::start(&root);
    fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    fixture.wait_for_states(2).await;

    std::fs::remove_dir_all(root.join("src")).unwrap();
    fixture
        .embedder
        .handle_path_change(&root.join("src"), PathChange::Removed);

    fixture.wait_for_states(4).await;
    assert_eq!(fixture.indexed_ids(), vec!["docs/guide.md"]);
}

#[tokio::test]
async fn test_new_file_is_indexed_and_unchanged_file_is_skipped() {
    let (_dir, root) = workspace();
    let fixture = Fixture::start(&root);
    fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    fixture.wait_for_states(2).await;

    let before = fixture.index.get("src/terminal.ts").unwrap().unwrap();

    let added = root.join("src/ports.ts");
    std::fs::write(&added, "export function detectPorts() {}").unwrap();
    fixture.embedder.handle_path_change(&added, PathChange::Changed);
    fixture
        .embedder
        .handle_path_change(&root.join("src/terminal.ts"), PathChange::Changed);
    fixture.wait_for_states(4).await;

    assert_eq!(
        fixture.indexed_ids(),
        vec!["docs/guide.md", "src/ports.ts", "src/terminal.ts"]
    );
    let after = fixture.index.get("src/terminal.ts").unwrap().unwrap();
    assert_eq!(before.indexed_at, after.indexed_at);
    assert_eq!(before.content_hash, after.content_hash);
}

#[tokio::test]
async fn test_ignored_and_ineligible_changes_are_dropped() {
    let (_dir, root) = workspace();
    std::fs::write(root.join(".gitignore"), "generated\n!generated/keep.ts\n").unwrap();
    std::fs::create_dir_all(root.join("generated")).unwrap();
    std::fs::write(root.join("generated/keep.ts"), "export {}").unwrap();

    let fixture = Fixture::start(&root);
    fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    fixture.wait_for_states(2).await;

    // Negated patterns are not honored.
    assert_eq!(fixture.indexed_ids(), vec!["docs/guide.md", "src/terminal.ts"]);

    fixture
        .embedder
        .handle_path_change(&root.join("generated/keep.ts"), PathChange::Changed);
    fixture
        .embedder
        .handle_path_change(&root.join("notes.bin"), PathChange::Changed);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(fixture.states().len(), 2);
    assert_eq!(fixture.embedder.state(), EmbedderState::Ready);
}

#[tokio::test]
async fn test_rebuilds_after_storage_is_deleted() {
    let (_dir, root) = workspace();
    let fixture = Fixture::start(&root);
    fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    fixture.wait_for_states(2).await;

    let storage = root.join(".embeddings");
    std::fs::remove_dir_all(&storage).unwrap();
    fixture
        .embedder
        .handle_path_change(&storage.join("index.sqlite"), PathChange::Removed);

    assert_eq!(
        fixture.wait_for_states(5).await,
        vec![
            EmbedderState::Updating,
            EmbedderState::Ready,
            EmbedderState::Creating,
            EmbedderState::Updating,
            EmbedderState::Ready,
        ]
    );
    assert!(fixture.index.is_created());
    assert_eq!(fixture.indexed_ids(), vec!["docs/guide.md", "src/terminal.ts"]);
}

#[tokio::test]
async fn test_storage_events_are_ignored_while_index_exists() {
    let (_dir, root) = workspace();
    let fixture = Fixture::start(&root);
    fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    fixture.wait_for_states(2).await;

    fixture.embedder.handle_path_change(
        &root.join(".embeddings/index.sqlite"),
        PathChange::Changed,
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fixture.states().len(), 2);
}

#[tokio::test]
async fn test_restart_prunes_files_deleted_while_stopped() {
    let (_dir, root) = workspace();
    {
        let fixture = Fixture::start(&root);
        fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
        fixture.embedder.dispose();
    }

    std::fs::remove_file(root.join("docs/guide.md")).unwrap();

    let fixture = Fixture::start(&root);
    fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    fixture.wait_for_states(2).await;
    assert_eq!(fixture.indexed_ids(), vec!["src/terminal.ts"]);
}

#[tokio::test]
async fn test_uncreatable_storage_fails() {
    let (_dir, root) = workspace();
    // A file where the storage directory should go.
    std::fs::write(root.join(".embeddings"), "not a directory").unwrap();

    let fixture = Fixture::start(&root);
    let state = fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    assert!(matches!(state, EmbedderState::Failed(_)));
    assert!(fixture.index.ids().is_err());
}

#[tokio::test]
async fn test_dispose_ignores_later_changes() {
    let (_dir, root) = workspace();
    let fixture = Fixture::start(&root);
    fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();

    fixture.embedder.dispose();
    fixture.embedder.dispose();

    let added = root.join("src/late.ts");
    std::fs::write(&added, "export const late = 1;").unwrap();
    fixture.embedder.handle_path_change(&added, PathChange::Changed);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!fixture.indexed_ids().contains(&"src/late.ts".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_follows_external_changes() {
    let (_dir, root) = workspace();
    let fixture = Fixture::start_watching(&root);
    fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    assert_eq!(fixture.indexed_ids(), vec!["docs/guide.md", "src/terminal.ts"]);

    std::fs::remove_file(root.join("src/terminal.ts")).unwrap();
    std::fs::write(root.join("src/new.ts"), "export function detectPorts() {}").unwrap();

    assert_eq!(
        fixture.wait_for_ids(&["docs/guide.md", "src/new.ts"]).await,
        vec!["docs/guide.md", "src/new.ts"]
    );
    let state = fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    assert_eq!(state, EmbedderState::Ready);

    let hits = fixture
        .embedder
        .search_code_embeddings("TerminalOutputBuffer")
        .await
        .unwrap();
    assert!(hits.iter().all(|hit| hit.filepath != "src/terminal.ts"));

    fixture.embedder.dispose();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_rebuilds_deleted_storage() {
    let (_dir, root) = workspace();
    let fixture = Fixture::start_watching(&root);
    fixture.embedder.wait_until_ready(READY_TIMEOUT).await.unwrap();
    fixture.wait_for_states(2).await;

    std::fs::remove_dir_all(root.join(".embeddings")).unwrap();

    // The open connection still sees the unlinked file, so wait for the
    // rebuild itself before looking at the index.
    let mut rebuilt = false;
    for _ in 0..500 {
        let states = fixture.states();
        if states[2..].contains(&EmbedderState::Creating)
            && fixture.embedder.state() == EmbedderState::Ready
            && fixture.index.is_created()
        {
            rebuilt = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(rebuilt, "storage was not rebuilt: {:?}", fixture.states());
    assert_eq!(
        fixture.wait_for_ids(&["docs/guide.md", "src/terminal.ts"]).await,
        vec!["docs/guide.md", "src/terminal.ts"]
    );

    fixture.embedder.dispose();
}
