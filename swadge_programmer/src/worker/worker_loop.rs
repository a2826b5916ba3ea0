use crate::types::Command;
use crossbeam::channel::{Receiver, TryRecvError};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use swadge_flash::{DeviceTracker, FlashError, PortRecord, PortScanner};

/// Enumerate ports on the blocking pool; the OS query can be slow.
async fn scan<S: PortScanner + 'static>(scanner: &Arc<S>) -> Result<Vec<PortRecord>, FlashError> {
    let scanner = Arc::clone(scanner);
    tokio::task::spawn_blocking(move || scanner.scan())
        .await
        .map_err(|e| FlashError::Join(e.to_string()))?
}

/// Poll `scanner` and reconcile until told to stop, then shut the tracker down.
pub async fn worker_loop<S: PortScanner + 'static>(
    rx: Receiver<Command>,
    mut tracker: DeviceTracker,
    scanner: Arc<S>,
    poll: Duration,
) {
    info!("watching serial ports");
    let mut scan_ok = true;
    loop {
        match rx.try_recv() {
            Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        match scan(&scanner).await {
            Ok(ports) => {
                scan_ok = true;
                tracker.reconcile(&ports).await;
            }
            Err(e) => {
                // one warning per failure streak
                if scan_ok {
                    warn!("port scan failed: {e}");
                }
                scan_ok = false;
            }
        }
        tokio::time::sleep(poll).await;
    }

    if !tracker.is_empty() {
        info!("waiting for {} device(s) to finish", tracker.len());
    }
    tracker.shutdown().await;
    info!("stopped watching serial ports");
}
