// src/main.rs

mod cli;
mod prefs;
mod types;
mod ui;
mod worker;

use clap::Parser;
use cli::Cli;
use crossbeam::channel::unbounded;
use eframe::{egui, run_native, NativeOptions};
use log::{error, info, warn};
use std::sync::Arc;
use swadge_flash::{
    DeviceTracker, Esptool, SerialPortScanner, Session, MIN_ESPTOOL_VERSION,
};
use tokio::runtime::Runtime;
use types::Command;
use ui::app::{ProgrammerApp, TITLE};
use worker::worker_loop::worker_loop;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let settings_path = cli.config.clone().or_else(prefs::settings_path);
    let settings = prefs::load_settings(settings_path.as_deref());
    if let Some(path) = settings_path.as_deref().filter(|p| !p.exists()) {
        // leave a file behind for people to edit
        if let Err(e) = prefs::save_settings(path, &settings) {
            warn!("could not write {}: {}", path.display(), e);
        }
    }

    let esptool = Esptool::new(settings.esptool.clone(), settings.plan.clone());
    match esptool.check_version(MIN_ESPTOOL_VERSION) {
        Ok(v) => info!("using esptool {v}"),
        Err(e) => {
            eprintln!("{e}");
            eprintln!(
                "Please update esptool to at least {MIN_ESPTOOL_VERSION} and run again. Try:"
            );
            eprintln!("  python -m pip install --upgrade esptool");
            std::process::exit(1);
        }
    }
    for missing in esptool.plan().missing_images() {
        warn!("firmware image not found: {}", missing.display());
    }

    let session = Session::new();
    let tracker = DeviceTracker::new(
        settings.target,
        Arc::new(esptool),
        settings.timing(),
        session.clone(),
    );
    let (tx_cmd, rx_cmd) = unbounded();
    let poll = settings.poll_interval();
    let scanner = Arc::new(SerialPortScanner);

    if cli.headless {
        info!("running in headless mode");
        let rt = Runtime::new()?;
        rt.block_on(async move {
            let watch = tokio::spawn(worker_loop(rx_cmd, tracker, scanner, poll));
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted");
                    tx_cmd.send(Command::Shutdown).ok();
                }
            });
            worker::headless::observe(session, watch).await;
        });
        return Ok(());
    }

    let watcher = std::thread::spawn(move || match Runtime::new() {
        Ok(rt) => rt.block_on(worker_loop(rx_cmd, tracker, scanner, poll)),
        Err(e) => error!("could not start the async runtime: {e}"),
    });

    let app = ProgrammerApp::new(session);
    let options = NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(TITLE)
            .with_inner_size([500.0, 200.0]),
        ..Default::default()
    };
    let result = run_native(TITLE, options, Box::new(|_| Ok(Box::new(app))));

    tx_cmd.send(Command::Shutdown).ok();
    if watcher.join().is_err() {
        error!("watch thread panicked");
    }
    result?;
    Ok(())
}
