//! Long-lived daemon: one process per repository.
//!
//! Listens on a Unix domain socket under `.viberag/` and speaks
//! newline-delimited JSON-RPC 2.0. The daemon owns the engine (storage
//! handles, parser state, embedding provider), runs optional warmup on
//! start, consumes watcher batches, and arbitrates concurrent clients.
//! Indexing stays serialized through the engine's global mutex; `cancel`
//! signals the respective operation's token and the abort surfaces as a
//! `cancelled` outcome, never as an internal failure.

use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::socket_path;
use crate::engine::{Engine, EngineOptions};
use crate::error::{Error, Result};
use crate::eval::{run_eval, EvalOptions};
use crate::events::EventSink;
use crate::indexer::IndexOptions;
use crate::protocol::{
    parse_params, CancelParams, CancelTarget, EvalParams, ExpandContextParams, FindUsagesParams,
    GetSymbolParams, IndexParams, Request, Response, SearchParams, PROTOCOL_VERSION,
};
use crate::search::SearchRequest;
use crate::watcher::{watch, WatchState};

/// Daemon start options.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Eagerly initialize the embedding provider on start.
    pub warmup: bool,
    /// Watch the repository and index incrementally on changes.
    pub watch: bool,
    pub debounce: Duration,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            warmup: true,
            watch: false,
            debounce: Duration::from_millis(400),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
enum LifecycleState {
    Initializing,
    Ready,
    Indexing,
    Cancelling,
}

struct Daemon {
    engine: Arc<Engine>,
    state: StdMutex<LifecycleState>,
    index_cancel: Mutex<Option<CancellationToken>>,
    warmup_cancel: Mutex<Option<CancellationToken>>,
    watch_state: Arc<WatchState>,
    shutdown: CancellationToken,
    started_at: Instant,
}

impl Daemon {
    fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap() = state;
    }

    /// Refuse new index work while init, an index run, or a cancel is in
    /// flight.
    fn busy(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::Initializing | LifecycleState::Indexing | LifecycleState::Cancelling
        )
    }
}

/// Run the daemon until a `shutdown` request arrives.
pub async fn run_daemon(repo_root: &Path, options: DaemonOptions) -> Result<()> {
    let engine = Arc::new(Engine::open(repo_root, EngineOptions::default()).await?);
    run_daemon_with_engine(repo_root.to_path_buf(), engine, options).await
}

/// Daemon loop over an already-constructed engine (tests inject providers).
pub async fn run_daemon_with_engine(
    repo_root: std::path::PathBuf,
    engine: Arc<Engine>,
    options: DaemonOptions,
) -> Result<()> {
    let sock = socket_path(&repo_root);
    if let Some(parent) = sock.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // A previous daemon may have exited uncleanly; the socket file is stale.
    let _ = std::fs::remove_file(&sock);
    let listener = UnixListener::bind(&sock)
        .map_err(|e| Error::Internal(anyhow::anyhow!("bind {}: {}", sock.display(), e)))?;
    info!(socket = %sock.display(), "daemon listening");

    let daemon = Arc::new(Daemon {
        engine,
        state: StdMutex::new(LifecycleState::Initializing),
        index_cancel: Mutex::new(None),
        warmup_cancel: Mutex::new(None),
        watch_state: Arc::new(WatchState::default()),
        shutdown: CancellationToken::new(),
        started_at: Instant::now(),
    });

    // Warmup, abortable via `cancel {target: warmup}`.
    if options.warmup {
        let token = CancellationToken::new();
        *daemon.warmup_cancel.lock().await = Some(token.clone());
        let d = Arc::clone(&daemon);
        tokio::spawn(async move {
            match d.engine.warmup(&token).await {
                Ok(()) => info!("warmup complete"),
                Err(e) if e.is_cancelled() => info!("warmup cancelled"),
                Err(e) => warn!(error = %e, "warmup failed; first query pays cold start"),
            }
            d.warmup_cancel.lock().await.take();
            if d.state() == LifecycleState::Initializing {
                d.set_state(LifecycleState::Ready);
            }
        });
    } else {
        daemon.set_state(LifecycleState::Ready);
    }

    // Watcher: each batch enqueues an incremental run; the engine's global
    // mutex coalesces concurrent batches.
    let _watcher = if options.watch {
        let (watcher, mut rx) = watch(
            &repo_root,
            options.debounce,
            Arc::clone(&daemon.watch_state),
        )?;
        if let Ok(status) = daemon.engine.status().await {
            daemon
                .watch_state
                .files_watched
                .store(status.files, std::sync::atomic::Ordering::Relaxed);
        }
        let d = Arc::clone(&daemon);
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                d.watch_state
                    .pending
                    .fetch_add(batch.changes.len() as u64, std::sync::atomic::Ordering::Relaxed);

                match run_index_with_state(&d, false).await {
                    Ok(stats) => {
                        d.watch_state.last_index_update.store(
                            chrono::Utc::now().timestamp_millis() as u64,
                            std::sync::atomic::Ordering::Relaxed,
                        );
                        d.watch_state
                            .pending
                            .store(0, std::sync::atomic::Ordering::Relaxed);
                        d.watch_state
                            .files_watched
                            .store(stats.file_count, std::sync::atomic::Ordering::Relaxed);
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => warn!(error = %e, "watcher-triggered index failed"),
                }
            }
        });
        Some(watcher)
    } else {
        None
    };

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let d = Arc::clone(&daemon);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(d, stream).await {
                                warn!(error = %e, "connection closed with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
            _ = daemon.shutdown.cancelled() => break,
        }
    }

    let _ = std::fs::remove_file(&sock);
    daemon.engine.close().await;
    info!("daemon stopped");
    Ok(())
}

async fn handle_connection(daemon: Arc<Daemon>, stream: UnixStream) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let (response, shutdown_after) = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&daemon, request).await,
            Err(e) => (
                Response::err(Value::Null, &Error::InvalidParams(e.to_string())),
                false,
            ),
        };

        let mut frame = serde_json::to_string(&response)?;
        frame.push('\n');
        write_half.write_all(frame.as_bytes()).await?;
        write_half.flush().await?;

        // Shutdown is scheduled after the acknowledging response is flushed.
        if shutdown_after {
            daemon.shutdown.cancel();
            break;
        }
    }

    Ok(())
}

async fn dispatch(daemon: &Arc<Daemon>, request: Request) -> (Response, bool) {
    let id = request.id.clone();
    let method = request.method.clone();

    if method == "shutdown" {
        return (Response::ok(id, json!({ "ok": true })), true);
    }

    let result = handle_method(daemon, &method, request.params).await;
    match result {
        Ok(value) => (Response::ok(id, value), false),
        Err(e) => (Response::err(id, &e), false),
    }
}

async fn handle_method(daemon: &Arc<Daemon>, method: &str, params: Value) -> Result<Value> {
    match method {
        "ping" => Ok(json!({ "pong": true, "protocolVersion": PROTOCOL_VERSION })),

        "health" => Ok(json!({
            "ok": true,
            "protocolVersion": PROTOCOL_VERSION,
            "state": daemon.state(),
            "uptimeMs": daemon.started_at.elapsed().as_millis() as u64,
            "pid": std::process::id(),
        })),

        "status" => {
            let report = daemon.engine.status().await?;
            let mut value = serde_json::to_value(report)?;
            value["state"] = serde_json::to_value(daemon.state())?;
            Ok(value)
        }

        "watchStatus" => Ok(serde_json::to_value(daemon.watch_state.snapshot())?),

        "search" => {
            let params: SearchParams = parse_params(params)?;
            let intent = params.parsed_intent()?;
            let response = daemon
                .engine
                .search(&SearchRequest {
                    query: params.query,
                    intent,
                    scope: params.scope,
                    k: params.k,
                    explain: params.explain,
                })
                .await?;
            Ok(serde_json::to_value(response)?)
        }

        "getSymbol" => {
            let params: GetSymbolParams = parse_params(params)?;
            let symbol = daemon.engine.get_symbol(&params.id).await?;
            Ok(json!({ "symbol": symbol }))
        }

        "findUsages" => {
            let params: FindUsagesParams = parse_params(params)?;
            let response = daemon
                .engine
                .find_usages(
                    params.symbol_id.as_deref(),
                    params.symbol_name.as_deref(),
                    &params.scope,
                    params.k,
                )
                .await?;
            Ok(serde_json::to_value(response)?)
        }

        "expandContext" => {
            let params: ExpandContextParams = parse_params(params)?;
            let response = daemon
                .engine
                .expand_context(&params.table, &params.id, params.limit)
                .await?;
            Ok(serde_json::to_value(response)?)
        }

        "index" => {
            let params: IndexParams = parse_params(params)?;
            // A forced run never queues behind an in-flight one.
            if params.force && daemon.busy() {
                return Err(Error::InProgress);
            }
            let stats = run_index_with_state(daemon, params.force).await?;
            Ok(serde_json::to_value(stats)?)
        }

        "indexAsync" => {
            let params: IndexParams = parse_params(params)?;
            if daemon.busy() {
                return Ok(json!({ "started": false, "reason": "in_progress" }));
            }
            // Claim the state before the task is scheduled so a racing
            // second request is refused.
            daemon.set_state(LifecycleState::Indexing);
            let d = Arc::clone(daemon);
            tokio::spawn(async move {
                match run_index_with_state(&d, params.force).await {
                    Ok(_) => {}
                    Err(e) if e.is_cancelled() => info!("async index cancelled"),
                    Err(e) => warn!(error = %e, "async index failed"),
                }
            });
            Ok(json!({ "started": true }))
        }

        "eval" => {
            let params: EvalParams = parse_params(params)?;
            let report = run_eval(
                &daemon.engine,
                EvalOptions {
                    k: params.k,
                    max_queries: params.max_queries,
                },
            )
            .await?;
            Ok(serde_json::to_value(report)?)
        }

        "cancel" => {
            let params: CancelParams = parse_params(params)?;
            let mut signalled: Vec<&str> = Vec::new();

            if matches!(params.target, CancelTarget::Indexing | CancelTarget::All) {
                if let Some(token) = daemon.index_cancel.lock().await.as_ref() {
                    token.cancel();
                    signalled.push("indexing");
                    if daemon.state() == LifecycleState::Indexing {
                        daemon.set_state(LifecycleState::Cancelling);
                    }
                }
            }
            if matches!(params.target, CancelTarget::Warmup | CancelTarget::All) {
                if let Some(token) = daemon.warmup_cancel.lock().await.as_ref() {
                    token.cancel();
                    signalled.push("warmup");
                }
            }

            Ok(json!({ "signalled": signalled }))
        }

        other => Err(Error::InvalidParams(format!("unknown method: {}", other))),
    }
}

/// Run one indexing pass with lifecycle bookkeeping: `indexing` while the
/// run holds the slot, `cancelling` once an abort is requested, `ready`
/// afterwards.
async fn run_index_with_state(
    daemon: &Arc<Daemon>,
    force: bool,
) -> Result<crate::model::IndexStats> {
    let token = CancellationToken::new();
    *daemon.index_cancel.lock().await = Some(token.clone());
    daemon.set_state(LifecycleState::Indexing);

    let result = daemon
        .engine
        .index(IndexOptions { force }, EventSink::disabled(), token)
        .await;

    daemon.index_cancel.lock().await.take();
    daemon.set_state(LifecycleState::Ready);
    result
}
