// swadge_flash/src/error.rs

use thiserror::Error;

/// Everything that can go wrong while scanning for or flashing a device.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FlashError {
    #[error("{0}")]
    Tool(String),
    #[error("could not run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port enumeration failed: {0}")]
    Serial(#[from] serialport::Error),
    #[error("esptool {found} is older than the required {required}")]
    ToolTooOld { found: String, required: String },
    #[error("could not understand esptool version output: {0:?}")]
    UnknownToolVersion(String),
    #[error("flash task stopped unexpectedly: {0}")]
    Join(String),
}

impl FlashError {
    /// The human readable reason shown next to a failed device.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_reason_is_verbatim() {
        let e = FlashError::Tool("timed out".into());
        assert_eq!(e.reason(), "timed out");
    }

    #[test]
    fn version_error_names_both_versions() {
        let e = FlashError::ToolTooOld {
            found: "4.7.0".into(),
            required: "4.9.0-dev.3".into(),
        };
        let text = e.to_string();
        assert!(text.contains("4.7.0"));
        assert!(text.contains("4.9.0-dev.3"));
    }
}
