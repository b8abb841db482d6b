//! Progress and lifecycle events for long-running operations.
//!
//! Each indexing run owns an outbound channel; subscribers (CLI progress
//! reporter, daemon clients) pull events from the receiving end. There is no
//! shared observer registry: a run without a subscriber sends into a closed
//! channel and the sends become no-ops.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::model::IndexStats;

/// Pipeline phase for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPhase {
    Init,
    Scan,
    Chunk,
    Embed,
    Persist,
    Finalize,
}

impl IndexPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexPhase::Init => "init",
            IndexPhase::Scan => "scan",
            IndexPhase::Chunk => "chunk",
            IndexPhase::Embed => "embed",
            IndexPhase::Persist => "persist",
            IndexPhase::Finalize => "finalize",
        }
    }
}

/// Events emitted during an indexing run, in phase order. Within one phase,
/// `(current, total)` is monotonically non-decreasing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum IndexEvent {
    Start,
    Progress {
        phase: IndexPhase,
        stage: String,
        current: u64,
        total: u64,
        unit: String,
    },
    ChunkProgress {
        chunks_processed: u64,
    },
    /// Provider throttling message, or `None` when the throttle clears.
    Throttle {
        message: Option<String>,
    },
    Complete {
        stats: IndexStats,
    },
    Error {
        error: String,
    },
    Cancelled {
        reason: String,
    },
}

/// Cheap cloneable sender handle. A sink without a channel drops events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<IndexEvent>>,
}

impl EventSink {
    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A sink plus the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<IndexEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: IndexEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn progress(&self, phase: IndexPhase, stage: &str, current: u64, total: u64, unit: &str) {
        self.emit(IndexEvent::Progress {
            phase,
            stage: stage.to_string(),
            current,
            total,
            unit: unit.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sink_drops_events() {
        let sink = EventSink::disabled();
        sink.emit(IndexEvent::Start);
    }

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(IndexEvent::Start);
        sink.progress(IndexPhase::Scan, "merkle", 1, 2, "files");
        sink.emit(IndexEvent::ChunkProgress {
            chunks_processed: 5,
        });

        assert!(matches!(rx.recv().await, Some(IndexEvent::Start)));
        assert!(matches!(
            rx.recv().await,
            Some(IndexEvent::Progress { current: 1, total: 2, .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(IndexEvent::ChunkProgress { chunks_processed: 5 })
        ));
    }

    #[test]
    fn events_serialize_with_kebab_tags() {
        let json = serde_json::to_string(&IndexEvent::ChunkProgress {
            chunks_processed: 3,
        })
        .unwrap();
        assert!(json.contains("\"chunk-progress\""));
    }
}
