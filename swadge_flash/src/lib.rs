//! Watch the host's serial ports and flash every ESP32-S2 Swadge that shows up.
//!
//! A [`DeviceTracker`] is fed port snapshots from a [`PortScanner`]. Each new
//! matching port gets its own [`FlashWorker`], which waits for the device to
//! settle, runs the [`FlashTool`] write, then asks the tool to reset the
//! device. Front ends read progress through the shared [`Session`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use swadge_flash::{
//!     DeviceTracker, Esptool, FlashPlan, PortScanner, SerialPortScanner, Session, TargetDevice,
//!     Timing,
//! };
//!
//! # async fn watch() -> Result<(), swadge_flash::FlashError> {
//! let session = Session::new();
//! let tool = Arc::new(Esptool::new("esptool.py", FlashPlan::default()));
//! let mut tracker = DeviceTracker::new(
//!     TargetDevice::default(),
//!     tool,
//!     Timing::default(),
//!     session.clone(),
//! );
//! let ports = SerialPortScanner.scan()?;
//! tracker.reconcile(&ports).await;
//! for row in session.snapshot() {
//!     println!("{}", row.text);
//! }
//! tracker.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod device;
mod error;
pub mod esptool;
pub mod status;
pub mod tracker;
pub mod worker;

pub use device::{DeviceIdentity, PortRecord, PortScanner, SerialPortScanner, TargetDevice};
pub use error::FlashError;
pub use esptool::{Esptool, FlashImage, FlashPlan, FlashTool, MIN_ESPTOOL_VERSION};
pub use status::{ChangeSignal, FlashPhase, Outcome, Severity, StatusCell, WorkerStatus};
pub use tracker::{DeviceTracker, DeviceView, Session};
pub use worker::{FlashWorker, Timing};
