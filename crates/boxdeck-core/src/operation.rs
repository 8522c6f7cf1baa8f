use crate::{CoreError, ErrorKind};
use boxdeck_schema::{ComponentName, ComponentState, ComponentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Install,
    Uninstall,
    Restart,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Install => write!(f, "install"),
            OperationKind::Uninstall => write!(f, "uninstall"),
            OperationKind::Restart => write!(f, "restart"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStep {
    Resolving,
    Submitting,
    #[serde(rename = "awaiting_convergence")]
    Converging,
    CleaningUp,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OperationOutcome {
    Succeeded { state: ComponentState },
    Failed { kind: ErrorKind, message: String },
}

/// One install, uninstall or restart request and how far it got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationOperation {
    pub id: u64,
    pub kind: OperationKind,
    pub component: ComponentName,
    pub step: OperationStep,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OperationOutcome>,
}

struct LogInner {
    next_id: u64,
    in_flight: BTreeMap<u64, OrchestrationOperation>,
    archive: VecDeque<OrchestrationOperation>,
    archive_len: usize,
}

/// In-flight operations plus a bounded archive of finished ones.
#[derive(Clone)]
pub struct OperationLog {
    inner: Arc<Mutex<LogInner>>,
}

impl OperationLog {
    pub fn new(archive_len: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                next_id: 1,
                in_flight: BTreeMap::new(),
                archive: VecDeque::new(),
                archive_len,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new operation. Dropping the tracker before
    /// [`finish`](OperationTracker::finish) archives it as cancelled.
    pub fn begin(&self, kind: OperationKind, component: &str) -> OperationTracker {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.in_flight.insert(
            id,
            OrchestrationOperation {
                id,
                kind,
                component: ComponentName::new(component),
                step: OperationStep::Resolving,
                started_at: Utc::now(),
                finished_at: None,
                outcome: None,
            },
        );
        OperationTracker {
            log: self.clone(),
            id,
            kind,
            component: component.to_owned(),
            finished: false,
        }
    }

    /// In-flight operations first, then the archive newest-first.
    pub fn list(&self) -> Vec<OrchestrationOperation> {
        let inner = self.lock();
        inner
            .in_flight
            .values()
            .cloned()
            .chain(inner.archive.iter().rev().cloned())
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<OrchestrationOperation> {
        let inner = self.lock();
        inner
            .in_flight
            .get(&id)
            .or_else(|| inner.archive.iter().find(|op| op.id == id))
            .cloned()
    }

    fn set_step(&self, id: u64, step: OperationStep) {
        if let Some(op) = self.lock().in_flight.get_mut(&id) {
            op.step = step;
        }
    }

    fn complete(&self, id: u64, outcome: OperationOutcome) {
        let mut inner = self.lock();
        let Some(mut op) = inner.in_flight.remove(&id) else {
            return;
        };
        op.step = OperationStep::Done;
        op.finished_at = Some(Utc::now());
        op.outcome = Some(outcome);
        if inner.archive_len == 0 {
            return;
        }
        while inner.archive.len() >= inner.archive_len {
            inner.archive.pop_front();
        }
        inner.archive.push_back(op);
    }
}

/// Handle an orchestrator holds while an operation runs.
pub struct OperationTracker {
    log: OperationLog,
    id: u64,
    kind: OperationKind,
    component: String,
    finished: bool,
}

impl OperationTracker {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn step(&self, step: OperationStep) {
        self.log.set_step(self.id, step);
    }

    pub fn finish(mut self, result: &Result<ComponentStatus, CoreError>) {
        let outcome = match result {
            Ok(status) => OperationOutcome::Succeeded {
                state: status.state,
            },
            Err(e) => OperationOutcome::Failed {
                kind: e.kind(),
                message: e.to_string(),
            },
        };
        self.log.complete(self.id, outcome);
        self.finished = true;
    }
}

impl Drop for OperationTracker {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let err = CoreError::Cancelled {
            name: self.component.clone(),
            operation: self.kind,
        };
        self.log.complete(
            self.id,
            OperationOutcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        );
    }
}
