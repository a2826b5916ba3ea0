// swadge_flash/src/worker.rs

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::device::DeviceIdentity;
use crate::esptool::FlashTool;
use crate::status::{ChangeSignal, FlashPhase, StatusCell, WorkerStatus};
use crate::FlashError;

/// Pauses that give USB enumeration and freshly written firmware time to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub settle_before_flash: Duration,
    pub settle_before_reset: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_before_flash: Duration::from_secs(2),
            settle_before_reset: Duration::from_secs(2),
        }
    }
}

/// Flashes one device, once, on its own task.
///
/// The worker only ever writes its own [`StatusCell`]; the tracker decides
/// when it goes away.
#[derive(Debug)]
pub struct FlashWorker {
    identity: DeviceIdentity,
    status: StatusCell,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl FlashWorker {
    /// Start flashing `identity`. Must be called from inside a tokio runtime.
    pub fn spawn(
        identity: DeviceIdentity,
        tool: Arc<dyn FlashTool>,
        timing: Timing,
        changed: ChangeSignal,
    ) -> Self {
        let status = StatusCell::new(identity.path.clone(), changed);
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run(
            identity.path.clone(),
            tool,
            timing,
            status.clone(),
            cancel_rx,
        ));
        Self {
            identity,
            status,
            cancel,
            task: Some(task),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn status(&self) -> &StatusCell {
        &self.status
    }

    /// Ask the worker to stop at the next state boundary.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Wait for the worker's task to end and return its final status.
    pub async fn join(mut self) -> WorkerStatus {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("{}: worker task ended abnormally: {}", self.identity.path, e);
            }
        }
        self.status.get()
    }
}

struct Cancelled;

#[derive(Debug, Clone, Copy)]
enum Step {
    Write,
    Reset,
}

async fn settle(delay: Duration, cancel: &mut watch::Receiver<bool>) -> Result<(), Cancelled> {
    if *cancel.borrow() {
        return Err(Cancelled);
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.wait_for(|stop| *stop) => Err(Cancelled),
    }
}

async fn call_tool(tool: &Arc<dyn FlashTool>, path: &str, step: Step) -> Result<(), FlashError> {
    let tool = Arc::clone(tool);
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || match step {
        Step::Write => tool.write_flash(&path),
        Step::Reset => tool.reset(&path),
    })
    .await
    .map_err(|e| FlashError::Join(e.to_string()))?
}

async fn run(
    path: String,
    tool: Arc<dyn FlashTool>,
    timing: Timing,
    status: StatusCell,
    mut cancel: watch::Receiver<bool>,
) {
    info!("{path}: attempting flash");

    if settle(timing.settle_before_flash, &mut cancel).await.is_err() {
        debug!("{path}: removed before flashing started");
        status.cancel();
        return;
    }

    status.enter(FlashPhase::Flashing);
    match call_tool(&tool, &path, Step::Write).await {
        Ok(()) => {
            info!("{path}: flash succeeded");
            status.enter(FlashPhase::Succeeded);
        }
        Err(e) => {
            warn!("{path}: flash failed: {e}");
            status.enter(FlashPhase::Failed(e.reason()));
        }
    }

    if settle(timing.settle_before_reset, &mut cancel).await.is_err() {
        debug!("{path}: removed before reset");
        status.cancel();
        return;
    }

    status.enter(FlashPhase::Resetting);
    if let Err(e) = call_tool(&tool, &path, Step::Reset).await {
        debug!("{path}: reset failed, ignoring: {e}");
    }
    status.enter(FlashPhase::Terminated);
    debug!("{path}: worker done");
}
