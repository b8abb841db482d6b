#![allow(dead_code)]
//! Shared fixture helpers for the integration suites.
//!
//! Every test repository gets a `.viberag/config.json` and an engine wired
//! to the deterministic hash embedding provider, so nothing downloads
//! models or touches the network.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use viberag::embed::provider::HashProvider;
use viberag::engine::{Engine, EngineOptions};
use viberag::events::EventSink;
use viberag::indexer::IndexOptions;
use viberag::model::IndexStats;

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub async fn open_engine(root: &Path) -> Engine {
    Engine::open(
        root,
        EngineOptions {
            provider: Some(Arc::new(HashProvider::default())),
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

pub async fn fixture(files: &[(&str, &str)]) -> (TempDir, Engine) {
    let tmp = TempDir::new().unwrap();
    write_file(tmp.path(), ".viberag/config.json", "{}");
    for (rel, content) in files {
        write_file(tmp.path(), rel, content);
    }
    let engine = open_engine(tmp.path()).await;
    (tmp, engine)
}

pub async fn index(engine: &Engine) -> IndexStats {
    engine
        .index(
            IndexOptions { force: false },
            EventSink::disabled(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
}

pub async fn index_forced(engine: &Engine) -> IndexStats {
    engine
        .index(
            IndexOptions { force: true },
            EventSink::disabled(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
}
