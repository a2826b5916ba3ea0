// swadge_flash/src/status.rs

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Where a flash worker is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashPhase {
    Pending,
    Flashing,
    Succeeded,
    Failed(String),
    Resetting,
    Terminated,
}

impl fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashPhase::Pending => f.write_str("pending"),
            FlashPhase::Flashing => f.write_str("flashing"),
            FlashPhase::Succeeded => f.write_str("succeeded"),
            FlashPhase::Failed(_) => f.write_str("failed"),
            FlashPhase::Resetting => f.write_str("resetting"),
            FlashPhase::Terminated => f.write_str("terminated"),
        }
    }
}

/// How a status line should be coloured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    #[default]
    Neutral,
    Success,
    Failure,
}

/// Result of the write step. The reset step never changes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct WorkerStatus {
    path: String,
    phase: FlashPhase,
    outcome: Option<Outcome>,
    cancelled: bool,
    history: Vec<FlashPhase>,
}

impl WorkerStatus {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            phase: FlashPhase::Pending,
            outcome: None,
            cancelled: false,
            history: vec![FlashPhase::Pending],
        }
    }

    pub fn phase(&self) -> &FlashPhase {
        &self.phase
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Every phase entered so far, oldest first.
    pub fn history(&self) -> &[FlashPhase] {
        &self.history
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == FlashPhase::Terminated
    }

    pub fn text(&self) -> String {
        match (&self.outcome, self.cancelled) {
            (Some(Outcome::Succeeded), _) => format!("Flash succeeded on {}", self.path),
            (Some(Outcome::Failed(reason)), _) => {
                format!("Flash failed on {} because: {}", self.path, reason)
            }
            (None, true) => format!("Flash cancelled on {}", self.path),
            (None, false) => format!("Attempting flash on {}", self.path),
        }
    }

    pub fn severity(&self) -> Severity {
        match self.outcome {
            Some(Outcome::Succeeded) => Severity::Success,
            Some(Outcome::Failed(_)) => Severity::Failure,
            None => Severity::Neutral,
        }
    }

    fn enter(&mut self, phase: FlashPhase) {
        match &phase {
            FlashPhase::Succeeded => self.outcome = Some(Outcome::Succeeded),
            FlashPhase::Failed(reason) => self.outcome = Some(Outcome::Failed(reason.clone())),
            _ => {}
        }
        self.history.push(phase.clone());
        self.phase = phase;
    }
}

/// The "something changed since the observer last looked" flag.
#[derive(Debug, Clone, Default)]
pub struct ChangeSignal(Arc<AtomicBool>);

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Read and clear.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// A worker's status, written only by that worker and read by anyone.
#[derive(Debug, Clone)]
pub struct StatusCell {
    inner: Arc<RwLock<WorkerStatus>>,
    changed: ChangeSignal,
}

impl StatusCell {
    pub fn new(path: impl Into<String>, changed: ChangeSignal) -> Self {
        Self {
            inner: Arc::new(RwLock::new(WorkerStatus::new(path))),
            changed,
        }
    }

    pub fn get(&self) -> WorkerStatus {
        match self.inner.read() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn enter(&self, phase: FlashPhase) {
        self.update(|s| s.enter(phase));
    }

    pub(crate) fn cancel(&self) {
        self.update(|s| {
            s.cancelled = true;
            s.enter(FlashPhase::Terminated);
        });
    }

    fn update(&self, f: impl FnOnce(&mut WorkerStatus)) {
        {
            let mut guard = match self.inner.write() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            f(&mut guard);
        }
        self.changed.mark();
    }
}
