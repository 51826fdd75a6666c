//! Progress, result and completion events delivered to the collaborator.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::errors::AppError;
use crate::models::SearchHit;

/// The three long-running operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Sync,
    RebuildIndex,
    Search,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Sync => "sync",
            OperationKind::RebuildIndex => "rebuildIndex",
            OperationKind::Search => "search",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `onProgress`, `onResult`, `onComplete` and `onError`, as one stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OperationEvent {
    Progress {
        message: String,
        /// `None` while the amount of remaining work is unknown.
        percent: Option<u8>,
    },
    Result {
        hit: SearchHit,
    },
    Complete {
        count: usize,
    },
    Error {
        kind: String,
        message: String,
    },
}

/// Sending half handed to the components. Events sent after the receiver
/// went away are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<OperationEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<OperationEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything.
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn progress(&self, message: impl Into<String>, percent: Option<u8>) {
        let message = message.into();
        tracing::debug!(percent = ?percent, "{}", message);
        self.send(OperationEvent::Progress { message, percent });
    }

    pub fn result(&self, hit: SearchHit) {
        self.send(OperationEvent::Result { hit });
    }

    pub fn complete(&self, count: usize) {
        self.send(OperationEvent::Complete { count });
    }

    pub fn error(&self, err: &AppError) {
        self.send(OperationEvent::Error {
            kind: err.error_code().to_string(),
            message: err.message(),
        });
    }

    fn send(&self, event: OperationEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Integer percentage of `done` out of `total`.
pub fn percent(done: usize, total: usize) -> Option<u8> {
    if total == 0 {
        return None;
    }
    Some(((done.min(total) * 100) / total) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_percent() {
        assert_eq!(percent(1, 4), Some(25));
        assert_eq!(percent(4, 4), Some(100));
        assert_eq!(percent(9, 4), Some(100));
        assert_eq!(percent(0, 0), None);
    }

    #[test]
    fn test_events_after_receiver_dropped_are_discarded() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        drop(rx);

        sink.progress("still running", Some(50));
        sink.complete(3);
    }

    #[test]
    fn test_error_event_carries_kind() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        sink.error(&AppError::QueryDataMissing("no snapshot".into()));

        match rx.try_recv().unwrap() {
            OperationEvent::Error { kind, message } => {
                assert_eq!(kind, "QUERY_DATA_MISSING");
                assert!(message.contains("no snapshot"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
