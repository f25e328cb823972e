//! GM Core main entry point
//!
//! Loads the configuration, starts the pollers and the command channel, and
//! logs mount events until interrupted.

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use gmcore::{load_config, Dispatcher, MountEvent};

fn log_event(event: &MountEvent) {
    match event {
        MountEvent::Pointing(p) => debug!(
            "pointing ra {:.4}h dec {:+.4} az {:.2} alt {:.2} {} status {}",
            p.ra_jnow, p.dec_jnow, p.az, p.alt, p.pierside, p.status
        ),
        MountEvent::SlewFinished => info!("slew finished"),
        MountEvent::Connection { .. } => {}
        MountEvent::AnyConnected(true) => info!("mount connected"),
        MountEvent::AnyConnected(false) => info!("mount disconnected"),
        MountEvent::FirmwareRead(fw) => info!("{} {} {}", fw.product_name, fw.number, fw.date),
        MountEvent::ModelNamesRefreshed(n) => info!("{} stored models", n),
        MountEvent::AlignmentRefreshed { stars, generation } => {
            info!("alignment model with {} stars (generation {})", stars, generation)
        }
        MountEvent::Stopped => info!("mount core stopped"),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "gmcore.json".to_string());
    info!("GM Core starting, configuration from {}", config_path);

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl-C handler: {}", e);
        process::exit(1);
    }

    let mut dispatcher = Dispatcher::new(config.clone());
    let events = dispatcher.subscribe();
    if let Err(e) = dispatcher.start(&config.host, config.port) {
        eprintln!("Error starting mount core: {}", e);
        process::exit(1);
    }

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => log_event(&event),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    dispatcher.stop();
    for event in events.try_iter() {
        log_event(&event);
    }
    if log::log_enabled!(log::Level::Debug) {
        match serde_json::to_string_pretty(&dispatcher.store().snapshot()) {
            Ok(json) => debug!("final state:\n{}", json),
            Err(e) => debug!("cannot serialize final state: {}", e),
        }
    }
    info!("GM Core shutdown complete");
}
