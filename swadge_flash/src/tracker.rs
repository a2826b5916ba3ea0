// swadge_flash/src/tracker.rs

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use crate::device::{DeviceIdentity, PortRecord, TargetDevice};
use crate::esptool::FlashTool;
use crate::status::{ChangeSignal, FlashPhase, Severity, StatusCell};
use crate::worker::{FlashWorker, Timing};

/// One row of what an observer shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceView {
    pub path: String,
    pub phase: FlashPhase,
    pub text: String,
    pub severity: Severity,
}

/// State shared between the tracker and whoever displays it.
///
/// Observers only read. The map is keyed by port path so rows come out in a
/// stable order.
#[derive(Debug, Default)]
pub struct Session {
    changed: ChangeSignal,
    devices: Mutex<BTreeMap<String, StatusCell>>,
}

impl Session {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn devices(&self) -> MutexGuard<'_, BTreeMap<String, StatusCell>> {
        match self.devices.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> Vec<DeviceView> {
        self.devices()
            .iter()
            .map(|(path, cell)| {
                let status = cell.get();
                DeviceView {
                    path: path.clone(),
                    phase: status.phase().clone(),
                    text: status.text(),
                    severity: status.severity(),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if anything changed since the last call.
    pub fn take_changed(&self) -> bool {
        self.changed.take()
    }
}

/// Keeps one [`FlashWorker`] alive per attached target device.
pub struct DeviceTracker {
    target: TargetDevice,
    tool: Arc<dyn FlashTool>,
    timing: Timing,
    session: Arc<Session>,
    workers: BTreeMap<String, FlashWorker>,
    shut_down: bool,
}

impl DeviceTracker {
    pub fn new(
        target: TargetDevice,
        tool: Arc<dyn FlashTool>,
        timing: Timing,
        session: Arc<Session>,
    ) -> Self {
        Self {
            target,
            tool,
            timing,
            session,
            workers: BTreeMap::new(),
            shut_down: false,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.workers.contains_key(path)
    }

    /// Paths of every tracked device, sorted.
    pub fn tracked(&self) -> Vec<&str> {
        self.workers.keys().map(String::as_str).collect()
    }

    /// Bring the worker set in line with `snapshot`.
    ///
    /// New target devices get a worker started immediately. Devices that are
    /// gone are all cancelled, then joined before their workers are dropped,
    /// which is the only place this waits.
    pub async fn reconcile(&mut self, snapshot: &[PortRecord]) {
        if self.shut_down {
            return;
        }

        let present: Vec<DeviceIdentity> = self.target.filter(snapshot).collect();
        let present_paths: HashSet<&str> = present.iter().map(|d| d.path.as_str()).collect();

        let gone: Vec<String> = self
            .workers
            .keys()
            .filter(|path| !present_paths.contains(path.as_str()))
            .cloned()
            .collect();
        self.remove_all(&gone).await;

        for identity in present {
            if !self.workers.contains_key(&identity.path) {
                self.add(identity);
            }
        }
    }

    fn add(&mut self, identity: DeviceIdentity) {
        info!("device attached: {identity}");
        let path = identity.path.clone();
        let worker = FlashWorker::spawn(
            identity,
            Arc::clone(&self.tool),
            self.timing,
            self.session.changed.clone(),
        );
        self.session
            .devices()
            .insert(path.clone(), worker.status().clone());
        self.workers.insert(path, worker);
        self.session.changed.mark();
    }

    /// Cancel every worker in `paths` first, then join them one by one, so a
    /// worker stuck in a tool call never delays its siblings' cancellation.
    async fn remove_all(&mut self, paths: &[String]) {
        let leaving: Vec<FlashWorker> = paths
            .iter()
            .filter_map(|path| self.workers.remove(path))
            .collect();
        for worker in &leaving {
            info!("device detached: {}", worker.identity());
            worker.cancel();
        }
        for worker in leaving {
            let path = worker.identity().path.clone();
            let last = worker.join().await;
            debug!("{path}: joined in phase {}", last.phase());
            self.session.devices().remove(&path);
            self.session.changed.mark();
        }
    }

    /// Stop taking snapshots, then cancel and join every worker.
    pub async fn shutdown(&mut self) {
        self.shut_down = true;
        let paths: Vec<String> = self.workers.keys().cloned().collect();
        self.remove_all(&paths).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::{ESP32_S2_PID, ESP32_S2_VID};
    use crate::worker::testing::{quick, wait_until, ScriptedTool};

    fn swadge(path: &str) -> PortRecord {
        PortRecord::usb(path, ESP32_S2_VID, ESP32_S2_PID)
    }

    fn tracker(tool: &Arc<ScriptedTool>, timing: Timing) -> DeviceTracker {
        DeviceTracker::new(
            TargetDevice::default(),
            tool.clone(),
            timing,
            Session::new(),
        )
    }

    fn slow() -> Timing {
        Timing {
            settle_before_flash: Duration::from_secs(60),
            settle_before_reset: Duration::from_secs(60),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tracked_set_matches_latest_snapshot() {
        let tool = Arc::new(ScriptedTool::new());
        let mut t = tracker(&tool, slow());

        let snapshots = vec![
            vec![swadge("/dev/ttyACM0"), PortRecord::other("/dev/ttyS0")],
            vec![
                swadge("/dev/ttyACM0"),
                swadge("/dev/ttyACM1"),
                PortRecord::usb("/dev/ttyUSB0", 0x10C4, 0xEA60),
            ],
            vec![swadge("/dev/ttyACM1")],
            vec![],
            vec![swadge("/dev/ttyACM0"), swadge("/dev/ttyACM0")],
        ];
        let expected: Vec<Vec<&str>> = vec![
            vec!["/dev/ttyACM0"],
            vec!["/dev/ttyACM0", "/dev/ttyACM1"],
            vec!["/dev/ttyACM1"],
            vec![],
            vec!["/dev/ttyACM0"],
        ];
        for (snapshot, want) in snapshots.iter().zip(expected) {
            t.reconcile(snapshot).await;
            assert_eq!(t.tracked(), want);
            assert_eq!(t.session().len(), want.len());
        }
        t.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn repeated_snapshot_does_not_spawn_twice() {
        let tool = Arc::new(ScriptedTool::new());
        let mut t = tracker(&tool, quick());
        for _ in 0..5 {
            t.reconcile(&[swadge("/dev/ttyX")]).await;
        }
        assert_eq!(t.len(), 1);
        let session = t.session().clone();
        wait_until(|| session.snapshot()[0].phase == FlashPhase::Terminated).await;
        t.reconcile(&[swadge("/dev/ttyX")]).await;
        assert_eq!(tool.count("/dev/ttyX", "write"), 1);
        t.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn finished_worker_stays_until_unplugged() {
        let tool = Arc::new(ScriptedTool::new());
        let mut t = tracker(&tool, quick());
        t.reconcile(&[swadge("/dev/ttyX")]).await;
        let session = t.session().clone();
        wait_until(|| session.snapshot()[0].phase == FlashPhase::Terminated).await;

        let rows = session.snapshot();
        assert_eq!(rows[0].text, "Flash succeeded on /dev/ttyX");
        assert_eq!(rows[0].severity, Severity::Success);
        assert!(t.contains("/dev/ttyX"));

        t.reconcile(&[]).await;
        assert!(t.is_empty());
        assert!(session.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_devices_report_their_own_paths() {
        let tool = Arc::new(ScriptedTool::new());
        tool.fail_write("/dev/ttyACM1", "timed out");
        let mut t = tracker(&tool, quick());
        t.reconcile(&[swadge("/dev/ttyACM0"), swadge("/dev/ttyACM1")]).await;
        let session = t.session().clone();
        wait_until(|| {
            session
                .snapshot()
                .iter()
                .all(|r| r.phase == FlashPhase::Terminated)
        })
        .await;

        let rows = session.snapshot();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text, "Flash succeeded on /dev/ttyACM0");
        assert_eq!(rows[0].severity, Severity::Success);
        assert_eq!(
            rows[1].text,
            "Flash failed on /dev/ttyACM1 because: timed out"
        );
        assert_eq!(rows[1].severity, Severity::Failure);
        t.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn removal_before_flashing_cancels_and_removes() {
        let tool = Arc::new(ScriptedTool::new());
        let mut t = tracker(&tool, slow());
        t.reconcile(&[swadge("/dev/ttyX")]).await;
        assert!(t.contains("/dev/ttyX"));
        assert_eq!(t.session().snapshot()[0].phase, FlashPhase::Pending);

        t.reconcile(&[]).await;
        assert!(!t.contains("/dev/ttyX"));
        assert!(t.session().is_empty());
        assert!(tool.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn removal_mid_flash_does_not_disturb_siblings() {
        let tool = Arc::new(ScriptedTool::new());
        tool.hold("/dev/ttyACM0");
        let mut t = tracker(&tool, quick());
        t.reconcile(&[swadge("/dev/ttyACM0"), swadge("/dev/ttyACM1")]).await;
        let session = t.session().clone();
        wait_until(|| session.snapshot()[0].phase == FlashPhase::Flashing).await;
        wait_until(|| session.snapshot()[1].phase == FlashPhase::Terminated).await;

        let releaser = {
            let tool = tool.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                tool.release("/dev/ttyACM0");
            })
        };
        t.reconcile(&[swadge("/dev/ttyACM1")]).await;
        releaser.await.unwrap();

        assert_eq!(t.tracked(), ["/dev/ttyACM1"]);
        let rows = session.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "Flash succeeded on /dev/ttyACM1");
        assert_eq!(tool.count("/dev/ttyACM1", "write"), 1);
        t.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn devices_removed_together_are_all_cancelled_up_front() {
        let tool = Arc::new(ScriptedTool::new());
        tool.hold("/dev/ttyA");
        tool.hold("/dev/ttyB");
        let mut t = tracker(&tool, quick());
        t.reconcile(&[swadge("/dev/ttyA"), swadge("/dev/ttyB")]).await;
        let session = t.session().clone();
        wait_until(|| {
            session
                .snapshot()
                .iter()
                .all(|r| r.phase == FlashPhase::Flashing)
        })
        .await;

        // B finishes its write long before A, while A is still being joined
        let releaser = {
            let tool = tool.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                tool.release("/dev/ttyB");
                tokio::time::sleep(Duration::from_millis(300)).await;
                tool.release("/dev/ttyA");
            })
        };
        t.reconcile(&[]).await;
        releaser.await.unwrap();

        assert!(t.is_empty());
        assert!(session.is_empty());
        assert_eq!(tool.count("/dev/ttyA", "reset"), 0);
        assert_eq!(tool.count("/dev/ttyB", "reset"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_flash_does_not_touch_siblings() {
        let tool = Arc::new(ScriptedTool::new());
        tool.panic_on_write("/dev/ttyACM0");
        let mut t = tracker(&tool, quick());
        t.reconcile(&[swadge("/dev/ttyACM0"), swadge("/dev/ttyACM1")]).await;
        let session = t.session().clone();
        wait_until(|| {
            session
                .snapshot()
                .iter()
                .all(|r| r.phase == FlashPhase::Terminated)
        })
        .await;

        let rows = session.snapshot();
        assert_eq!(rows[0].severity, Severity::Failure);
        assert!(rows[0]
            .text
            .starts_with("Flash failed on /dev/ttyACM0 because:"));
        assert_eq!(rows[1].severity, Severity::Success);
        assert_eq!(rows[1].text, "Flash succeeded on /dev/ttyACM1");
        assert_eq!(t.len(), 2);
        t.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn replug_gets_a_fresh_worker() {
        let tool = Arc::new(ScriptedTool::new());
        tool.fail_write("/dev/ttyX", "timed out");
        let mut t = tracker(&tool, quick());
        t.reconcile(&[swadge("/dev/ttyX")]).await;
        let session = t.session().clone();
        wait_until(|| session.snapshot()[0].phase == FlashPhase::Terminated).await;
        assert_eq!(session.snapshot()[0].severity, Severity::Failure);

        t.reconcile(&[]).await;
        t.reconcile(&[swadge("/dev/ttyX")]).await;
        let row = &session.snapshot()[0];
        assert_eq!(row.phase, FlashPhase::Pending);
        assert_eq!(row.severity, Severity::Neutral);
        t.shutdown().await;
        assert_eq!(tool.count("/dev/ttyX", "write"), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn changes_raise_the_signal() {
        let tool = Arc::new(ScriptedTool::new());
        let mut t = tracker(&tool, slow());
        let session = t.session().clone();
        assert!(!session.take_changed());

        t.reconcile(&[swadge("/dev/ttyX")]).await;
        assert!(session.take_changed());
        assert!(!session.take_changed());

        t.reconcile(&[swadge("/dev/ttyX")]).await;
        assert!(!session.take_changed());

        t.reconcile(&[]).await;
        assert!(session.take_changed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_joins_everything_and_ignores_later_snapshots() {
        let tool = Arc::new(ScriptedTool::new());
        let mut t = tracker(&tool, slow());
        t.reconcile(&[swadge("/dev/ttyACM0"), swadge("/dev/ttyACM1")]).await;
        assert_eq!(t.len(), 2);

        t.shutdown().await;
        assert!(t.is_empty());
        assert!(t.session().is_empty());

        t.reconcile(&[swadge("/dev/ttyACM2")]).await;
        assert!(t.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_outcome_is_kept_across_reset() {
        let tool = Arc::new(ScriptedTool::failing_reset());
        let mut t = tracker(&tool, quick());
        t.reconcile(&[swadge("COM9")]).await;
        let session = t.session().clone();
        wait_until(|| session.snapshot()[0].phase == FlashPhase::Terminated).await;
        assert_eq!(session.snapshot()[0].severity, Severity::Success);
        assert_eq!(tool.count("COM9", "reset"), 1);
        t.shutdown().await;
    }
}
