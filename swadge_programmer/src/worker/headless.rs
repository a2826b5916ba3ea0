use log::info;
use std::sync::Arc;
use std::time::Duration;
use swadge_flash::{DeviceView, Session, Severity};
use tokio::task::JoinHandle;

/// One log line per device, or a reminder when nothing is plugged in.
pub fn render(rows: &[DeviceView]) -> Vec<String> {
    if rows.is_empty() {
        return vec!["Connect a Swadge".to_owned()];
    }
    rows.iter()
        .map(|r| {
            let tag = match r.severity {
                Severity::Neutral => "....",
                Severity::Success => " OK ",
                Severity::Failure => "FAIL",
            };
            format!("[{}] {}", tag, r.text)
        })
        .collect()
}

/// Rendered lines if the session changed since the last call.
pub fn changed_lines(session: &Session) -> Option<Vec<String>> {
    session.take_changed().then(|| render(&session.snapshot()))
}

fn log_lines(lines: Vec<String>) {
    for line in lines {
        info!("{line}");
    }
}

/// Log the device list every time it changes, until `watch` finishes.
pub async fn observe(session: Arc<Session>, mut watch: JoinHandle<()>) {
    let mut tick = tokio::time::interval(Duration::from_millis(100));
    log_lines(render(&session.snapshot()));
    loop {
        tokio::select! {
            _ = &mut watch => break,
            _ = tick.tick() => {
                if let Some(lines) = changed_lines(&session) {
                    log_lines(lines);
                }
            }
        }
    }
    // shutdown removes the last devices after the final tick
    if let Some(lines) = changed_lines(&session) {
        log_lines(lines);
    }
}
