use crate::types::Settings;
use directories::ProjectDirs;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// `settings.json` in the per-user config directory.
pub fn settings_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "swadge_programmer").map(|d| d.config_dir().join("settings.json"))
}

/// Read settings from `path`, falling back to defaults when the file is
/// missing or unreadable.
pub fn load_settings(path: Option<&Path>) -> Settings {
    let Some(path) = path else {
        return Settings::default();
    };
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(s) => s,
            Err(e) => {
                warn!("ignoring {}: {}", path.display(), e);
                Settings::default()
            }
        },
        Err(e) => {
            debug!("no settings at {}: {}", path.display(), e);
            Settings::default()
        }
    }
}

pub fn save_settings(path: &Path, s: &Settings) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let data = serde_json::to_string_pretty(s).map_err(std::io::Error::other)?;
    fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "swadge_programmer-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = scratch("missing");
        assert_eq!(load_settings(Some(&dir.join("settings.json"))), Settings::default());
        assert_eq!(load_settings(None), Settings::default());
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = scratch("saved");
        let path = dir.join("nested").join("settings.json");
        let mut s = Settings::default();
        s.settle_before_flash_ms = 500;
        s.plan.baud = 921_600;
        save_settings(&path, &s).unwrap();
        assert_eq!(load_settings(Some(&path)), s);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = scratch("partial");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        let data = r#"{
            "esptool": "esptool",
            "target": { "vendor_id": 4292, "product_id": 60000 }
        }"#;
        fs::write(&path, data).unwrap();
        let s = load_settings(Some(&path));
        assert_eq!(s.esptool, "esptool");
        assert_eq!(s.target.vendor_id, 0x10C4);
        assert_eq!(s.poll_interval_ms, 50);
        assert_eq!(s.timing(), swadge_flash::Timing::default());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn broken_file_gives_defaults() {
        let dir = scratch("broken");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(Some(&path)), Settings::default());
        fs::remove_dir_all(dir).ok();
    }
}
