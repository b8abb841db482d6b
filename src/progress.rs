//! Index progress reporting for the CLI.
//!
//! Drains an indexing run's event channel and renders it on **stderr** so
//! stdout stays parseable for scripts. Human mode is the default on a TTY;
//! JSON mode emits one event object per line.

use std::io::Write;
use tokio::sync::mpsc;

use crate::events::IndexEvent;

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }
}

/// Drain events until the channel closes, rendering per the mode.
pub async fn drain(mode: ProgressMode, mut rx: mpsc::UnboundedReceiver<IndexEvent>) {
    while let Some(event) = rx.recv().await {
        match mode {
            ProgressMode::Off => {}
            ProgressMode::Human => render_human(&event),
            ProgressMode::Json => render_json(&event),
        }
    }
}

fn render_human(event: &IndexEvent) {
    let line = match event {
        IndexEvent::Start => Some("index  starting...\n".to_string()),
        IndexEvent::Progress {
            phase,
            stage,
            current,
            total,
            unit,
        } => Some(format!(
            "index  {:<8} {:<12} {} / {} {}\n",
            phase.as_str(),
            stage,
            current,
            total,
            unit
        )),
        IndexEvent::ChunkProgress { chunks_processed } => {
            Some(format!("index  embed    {} chunks processed\n", chunks_processed))
        }
        IndexEvent::Throttle { message: Some(m) } => Some(format!("index  throttled: {}\n", m)),
        IndexEvent::Throttle { message: None } => None,
        IndexEvent::Complete { stats } => Some(format!(
            "index  done: +{} new, ~{} modified, -{} deleted, {} embedded ({} cached) in {}ms\n",
            stats.files_new,
            stats.files_modified,
            stats.files_deleted,
            stats.embeddings_computed,
            stats.embeddings_cached,
            stats.duration_ms
        )),
        IndexEvent::Error { error } => Some(format!("index  failed: {}\n", error)),
        IndexEvent::Cancelled { reason } => Some(format!("index  cancelled: {}\n", reason)),
    };
    if let Some(line) = line {
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

fn render_json(event: &IndexEvent) {
    if let Ok(line) = serde_json::to_string(event) {
        let _ = writeln!(std::io::stderr().lock(), "{}", line);
    }
}
