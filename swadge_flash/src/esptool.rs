// swadge_flash/src/esptool.rs

use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use log::debug;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::FlashError;

/// Oldest esptool that knows the `no_reset_stub` after-mode.
pub const MIN_ESPTOOL_VERSION: &str = "4.9.0-dev.3";

/// The external programmer. Both calls block until the tool is done.
pub trait FlashTool: Send + Sync {
    /// Write every image of the plan to the device on `port`.
    fn write_flash(&self, port: &str) -> Result<(), FlashError>;
    /// Kick the device on `port` out of its bootloader.
    fn reset(&self, port: &str) -> Result<(), FlashError>;
}

/// One binary written at a fixed flash offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashImage {
    pub offset: u32,
    pub file: PathBuf,
}

impl FlashImage {
    pub fn new(offset: u32, file: impl Into<PathBuf>) -> Self {
        Self {
            offset,
            file: file.into(),
        }
    }
}

/// Fixed argument set for a `write_flash` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashPlan {
    pub chip: String,
    pub baud: u32,
    pub before: String,
    pub after: String,
    pub flash_mode: String,
    pub flash_freq: String,
    pub flash_size: String,
    /// Directory the image files are relative to.
    pub firmware_dir: PathBuf,
    pub images: Vec<FlashImage>,
}

impl Default for FlashPlan {
    fn default() -> Self {
        Self {
            chip: "esp32s2".into(),
            baud: 2_000_000,
            before: "default_reset".into(),
            after: "no_reset_stub".into(),
            flash_mode: "dio".into(),
            flash_freq: "80m".into(),
            flash_size: "4MB".into(),
            firmware_dir: PathBuf::from("."),
            images: vec![
                FlashImage::new(0x1000, "bootloader.bin"),
                FlashImage::new(0x8000, "partition-table.bin"),
                FlashImage::new(0x10000, "swadge2024.bin"),
            ],
        }
    }
}

impl FlashPlan {
    pub fn write_args(&self, port: &str) -> Vec<String> {
        let mut args = vec![
            "--chip".to_owned(),
            self.chip.clone(),
            "-p".to_owned(),
            port.to_owned(),
            "-b".to_owned(),
            self.baud.to_string(),
            format!("--before={}", self.before),
            format!("--after={}", self.after),
            "write_flash".to_owned(),
            "--flash_mode".to_owned(),
            self.flash_mode.clone(),
            "--flash_freq".to_owned(),
            self.flash_freq.clone(),
            "--flash_size".to_owned(),
            self.flash_size.clone(),
        ];
        for image in &self.images {
            args.push(format!("{:#x}", image.offset));
            args.push(
                self.firmware_dir
                    .join(&image.file)
                    .to_string_lossy()
                    .into_owned(),
            );
        }
        args
    }

    pub fn reset_args(port: &str) -> Vec<String> {
        ["-p", port, "--after", "hard_reset", "chip_id"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Image files that do not exist on disk.
    pub fn missing_images(&self) -> Vec<PathBuf> {
        self.images
            .iter()
            .map(|i| self.firmware_dir.join(&i.file))
            .filter(|p| !p.is_file())
            .collect()
    }
}

/// Runs esptool as a child process.
#[derive(Debug, Clone)]
pub struct Esptool {
    program: String,
    plan: FlashPlan,
}

impl Esptool {
    pub fn new(program: impl Into<String>, plan: FlashPlan) -> Self {
        Self {
            program: program.into(),
            plan,
        }
    }

    pub fn plan(&self) -> &FlashPlan {
        &self.plan
    }

    fn run(&self, args: &[String]) -> Result<Output, FlashError> {
        debug!("{} {}", self.program, args.join(" "));
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| FlashError::Spawn {
                program: self.program.clone(),
                source,
            })
    }

    fn run_checked(&self, args: &[String]) -> Result<(), FlashError> {
        let out = self.run(args)?;
        if out.status.success() {
            return Ok(());
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        let stderr = String::from_utf8_lossy(&out.stderr);
        Err(FlashError::Tool(failure_reason(
            &out.status.to_string(),
            &stdout,
            &stderr,
        )))
    }

    /// Make sure the installed esptool is new enough. Returns the version found.
    pub fn check_version(&self, required: &str) -> Result<Version, FlashError> {
        let out = self.run(&["version".to_owned()])?;
        let text = String::from_utf8_lossy(&out.stdout);
        let found = parse_tool_version(&text)?;
        let min = Version::parse(required)
            .map_err(|_| FlashError::UnknownToolVersion(required.to_owned()))?;
        if found < min {
            return Err(FlashError::ToolTooOld {
                found: found.to_string(),
                required: required.to_owned(),
            });
        }
        Ok(found)
    }
}

impl FlashTool for Esptool {
    fn write_flash(&self, port: &str) -> Result<(), FlashError> {
        self.run_checked(&self.plan.write_args(port))
    }

    fn reset(&self, port: &str) -> Result<(), FlashError> {
        self.run_checked(&FlashPlan::reset_args(port))
    }
}

const FATAL_MARKER: &str = "A fatal error occurred:";

/// Pull the most useful line out of a failed esptool run.
pub fn failure_reason(status: &str, stdout: &str, stderr: &str) -> String {
    let fatal = stderr
        .lines()
        .chain(stdout.lines())
        .find_map(|l| l.split_once(FATAL_MARKER).map(|(_, r)| r.trim()))
        .filter(|r| !r.is_empty());
    if let Some(reason) = fatal {
        return reason.to_owned();
    }
    let last_line = |s: &str| {
        s.lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_owned)
    };
    last_line(stderr)
        .or_else(|| last_line(stdout))
        .unwrap_or_else(|| format!("esptool exited with {status}"))
}

/// Parse the output of `esptool version`.
///
/// Dev builds report themselves as `4.9.dev3`, which is read as `4.9.0-dev.3`.
pub fn parse_tool_version(output: &str) -> Result<Version, FlashError> {
    let raw = output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.split_whitespace().last())
        .map(|v| v.trim_start_matches('v'))
        .ok_or_else(|| FlashError::UnknownToolVersion(output.to_owned()))?;
    let normalized = raw.replace(".dev", ".0-dev.");
    Version::parse(&normalized)
        .or_else(|_| Version::parse(raw))
        .map_err(|_| FlashError::UnknownToolVersion(raw.to_owned()))
}
