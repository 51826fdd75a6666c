//! Last known state of each operation kind, fed from operation events.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OperationEvent, OperationHandle, OperationKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    pub run_id: Option<Uuid>,
    pub state: OperationState,
    pub message: Option<String>,
    pub percent: Option<u8>,
    pub count: Option<usize>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Shared registry read by the status endpoint.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    runs: Arc<RwLock<HashMap<OperationKind, OperationStatus>>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `run_id` as the current run of `kind`.
    pub async fn begin(&self, kind: OperationKind, run_id: Uuid) {
        let mut runs = self.runs.write().await;
        runs.insert(
            kind,
            OperationStatus {
                run_id: Some(run_id),
                state: OperationState::Running,
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        );
    }

    /// Fold one event into the status of its run. Events of a run that is no
    /// longer current are dropped.
    pub async fn apply(&self, kind: OperationKind, run_id: Uuid, event: &OperationEvent) {
        let mut runs = self.runs.write().await;
        let Some(status) = runs.get_mut(&kind) else {
            return;
        };
        if status.run_id != Some(run_id) {
            return;
        }

        match event {
            OperationEvent::Progress { message, percent } => {
                status.message = Some(message.clone());
                status.percent = *percent;
            }
            OperationEvent::Result { .. } => {}
            OperationEvent::Complete { count } => {
                status.state = OperationState::Completed;
                status.count = Some(*count);
                status.percent = Some(100);
                status.finished_at = Some(Utc::now());
            }
            OperationEvent::Error { kind, message } => {
                status.state = OperationState::Failed;
                status.error_kind = Some(kind.clone());
                status.error = Some(message.clone());
                status.finished_at = Some(Utc::now());
            }
        }
    }

    /// Record the run and follow its events in the background.
    pub async fn track<T: Send + 'static>(&self, mut handle: OperationHandle<T>) -> Uuid {
        let (kind, run_id) = (handle.kind, handle.id);
        self.begin(kind, run_id).await;

        let registry = self.clone();
        tokio::spawn(async move {
            while let Some(event) = handle.events.recv().await {
                registry.apply(kind, run_id, &event).await;
            }
            if let Err(err) = handle.wait().await {
                tracing::debug!("Tracked {} run {} ended with {}", kind, run_id, err);
            }
        });
        run_id
    }

    pub async fn get(&self, kind: OperationKind) -> OperationStatus {
        self.runs.read().await.get(&kind).cloned().unwrap_or_default()
    }
}
