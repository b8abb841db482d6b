mod common;

use common::{fixture, index, index_forced, open_engine, write_file};
use tokio_util::sync::CancellationToken;

use viberag::config::manifest_path;
use viberag::error::Error;
use viberag::events::EventSink;
use viberag::indexer::IndexOptions;
use viberag::model::SCHEMA_VERSION;

#[tokio::test]
async fn initial_index_counts_every_file_as_new() {
    let (_tmp, engine) = fixture(&[
        ("math.py", "def add(a, b):\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n"),
        ("utils.js", "export function helper() { return 1; }\n"),
    ])
    .await;

    let stats = index(&engine).await;
    assert_eq!(stats.file_count, 2);
    assert_eq!(stats.files_new, 2);
    assert_eq!(stats.files_modified, 0);
    assert_eq!(stats.files_deleted, 0);
    assert!(stats.symbols_added >= 2);
    assert!(stats.embeddings_computed > 0);
    engine.close().await;
}

#[tokio::test]
async fn reindex_with_no_changes_is_a_no_op() {
    let (_tmp, engine) = fixture(&[("math.py", "def add(a, b):\n    return a + b\n")]).await;
    index(&engine).await;

    let stats = index(&engine).await;
    assert_eq!(stats.files_new, 0);
    assert_eq!(stats.files_modified, 0);
    assert_eq!(stats.files_deleted, 0);
    assert_eq!(stats.symbols_added, 0);
    assert_eq!(stats.chunks_added, 0);
    engine.close().await;
}

#[tokio::test]
async fn incremental_diff_reports_new_modified_deleted() {
    let (tmp, engine) = fixture(&[
        ("math.py", "def add(a, b):\n    return a + b\n"),
        ("utils.js", "export function helper() { return 1; }\n"),
    ])
    .await;
    index(&engine).await;

    write_file(tmp.path(), "new_module.py", "def fresh():\n    return 2\n");
    write_file(tmp.path(), "math.py", "def add(a, b):\n    return a + b + 0\n");
    std::fs::remove_file(tmp.path().join("utils.js")).unwrap();

    let stats = index(&engine).await;
    assert_eq!(stats.files_new, 1);
    assert_eq!(stats.files_modified, 1);
    assert_eq!(stats.files_deleted, 1);
    engine.close().await;
}

#[tokio::test]
async fn forced_reindex_hits_the_embedding_cache() {
    let (_tmp, engine) = fixture(&[
        ("math.py", "def add(a, b):\n    return a + b\n"),
        ("app.py", "def main():\n    return add(1, 2)\n"),
    ])
    .await;
    let first = index(&engine).await;
    assert!(first.embeddings_computed > 0);

    let forced = index_forced(&engine).await;
    assert_eq!(forced.files_new, forced.file_count);
    assert!(forced.embeddings_cached > 0);
    assert_eq!(forced.embeddings_computed, 0);
    engine.close().await;
}

#[tokio::test]
async fn forced_then_plain_reindex_is_idempotent_at_row_level() {
    let (_tmp, engine) = fixture(&[("math.py", "def add(a, b):\n    return a + b\n")]).await;
    index(&engine).await;
    index_forced(&engine).await;
    let counts_after_force = engine.store().table_counts().await.unwrap();

    let stats = index(&engine).await;
    assert_eq!(stats.files_new + stats.files_modified + stats.files_deleted, 0);
    let counts_after_plain = engine.store().table_counts().await.unwrap();
    assert_eq!(counts_after_force, counts_after_plain);
    engine.close().await;
}

#[tokio::test]
async fn schema_version_mismatch_requires_forced_reindex() {
    let (tmp, engine) = fixture(&[("math.py", "def add(a, b):\n    return a + b\n")]).await;
    index(&engine).await;

    // Rewrite the persisted manifest as if an older build produced it.
    let path = manifest_path(tmp.path());
    let mut value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    value["schemaVersion"] = serde_json::json!(SCHEMA_VERSION - 1);
    std::fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

    let err = engine
        .index(
            IndexOptions { force: false },
            EventSink::disabled(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReindexRequired { .. }));
    assert_eq!(err.wire_code(), "reindex_required");

    // Reads are blocked too.
    let search_err = engine
        .search(&viberag::search::SearchRequest {
            query: "add".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(search_err.wire_code(), "reindex_required");

    // A forced run restores compatibility.
    index_forced(&engine).await;
    let status = engine.status().await.unwrap();
    assert!(status.indexed);
    assert_eq!(status.index_schema_version, Some(SCHEMA_VERSION));
    engine.close().await;
}

#[tokio::test]
async fn deleting_a_file_removes_rows_from_all_tables() {
    let (tmp, engine) = fixture(&[
        ("gone.py", "def vanish_completely():\n    return vanish_helper()\n"),
        ("keep.py", "def stay():\n    return 1\n"),
    ])
    .await;
    index(&engine).await;

    let before = engine.store().count_rows_for_file("gone.py").await.unwrap();
    assert!(before.total() > 0);

    std::fs::remove_file(tmp.path().join("gone.py")).unwrap();
    index(&engine).await;

    let after = engine.store().count_rows_for_file("gone.py").await.unwrap();
    assert_eq!(after.total(), 0);

    // And its identifiers no longer answer usage queries.
    let usages = engine
        .find_usages(None, Some("vanish_helper"), &Default::default(), 10)
        .await
        .unwrap();
    assert_eq!(usages.total_refs, 0);
    engine.close().await;
}

#[tokio::test]
async fn symbol_ids_are_stable_across_forced_rebuilds() {
    let (_tmp, engine) = fixture(&[(
        "g.py",
        "class Greeter:\n    def greet(self):\n        return 'hi'\n",
    )])
    .await;
    index(&engine).await;
    let first: Vec<String> = engine
        .store()
        .sample_symbols(10)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.symbol_id)
        .collect();

    index_forced(&engine).await;
    let second: Vec<String> = engine
        .store()
        .sample_symbols(10)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.symbol_id)
        .collect();

    assert_eq!(first, second);
    engine.close().await;
}

#[tokio::test]
async fn boundary_files_never_crash_the_pipeline() {
    let (_tmp, engine) = fixture(&[
        ("empty.py", ""),
        ("binary.js", "\u{0}\u{1}\u{2}binaryish\u{3}content"),
        ("broken.py", "def broken(:\n    ???\n"),
        ("a/b/c/d/deep.py", "def deep_fn():\n    return 1\n"),
    ])
    .await;

    let stats = index(&engine).await;
    assert_eq!(stats.file_count, 4);

    // The syntax-error file is searchable by its content.
    let deep = engine.store().count_rows_for_file("a/b/c/d/deep.py").await.unwrap();
    assert!(deep.symbols >= 1);
    let broken = engine.store().count_rows_for_file("broken.py").await.unwrap();
    assert!(broken.total() >= 1);
    engine.close().await;
}

#[tokio::test]
async fn deep_nesting_diffs_like_root() {
    let (tmp, engine) = fixture(&[("a/b/c/d/deep.py", "def deep_fn():\n    return 1\n")]).await;
    index(&engine).await;

    write_file(tmp.path(), "a/b/c/d/deep.py", "def deep_fn():\n    return 2\n");
    let stats = index(&engine).await;
    assert_eq!(stats.files_modified, 1);

    std::fs::remove_file(tmp.path().join("a/b/c/d/deep.py")).unwrap();
    let stats = index(&engine).await;
    assert_eq!(stats.files_deleted, 1);
    assert_eq!(
        engine
            .store()
            .count_rows_for_file("a/b/c/d/deep.py")
            .await
            .unwrap()
            .total(),
        0
    );
    engine.close().await;
}

#[tokio::test]
async fn searching_an_unindexed_repo_reports_not_indexed() {
    let (_tmp, engine) = fixture(&[("math.py", "def add(a, b):\n    return a + b\n")]).await;
    let err = engine
        .search(&viberag::search::SearchRequest {
            query: "add".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.wire_code(), "not_indexed");

    let status = engine.status().await.unwrap();
    assert!(!status.indexed);
    assert!(status.instruction.is_some());
    engine.close().await;
}

#[tokio::test]
async fn cancellation_is_a_distinct_outcome() {
    let (_tmp, engine) = fixture(&[("math.py", "def add(a, b):\n    return a + b\n")]).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine
        .index(IndexOptions { force: false }, EventSink::disabled(), cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.wire_code(), "cancelled");
    engine.close().await;
}

#[tokio::test]
async fn reopening_an_engine_sees_the_persisted_index() {
    let (tmp, engine) = fixture(&[("math.py", "def add(a, b):\n    return a + b\n")]).await;
    index(&engine).await;
    engine.close().await;

    let engine = open_engine(tmp.path()).await;
    let status = engine.status().await.unwrap();
    assert!(status.indexed);
    assert!(status.symbols >= 1);
    engine.close().await;
}
