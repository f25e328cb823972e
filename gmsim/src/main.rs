//! GM Mount Simulator main entry point
//!
//! Usage: `gmsim [state.json]`. The optional JSON file overrides fields of
//! the default mount state; `GMSIM_ADDR` overrides the listen address.

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info};

use gmsim::{MountState, SimServer};

fn load_state(path: &str) -> Result<MountState, String> {
    let file = File::open(path).map_err(|e| format!("{}: {}", path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| format!("{}: {}", path, e))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    info!("GM mount simulator starting up");

    let mut state = match env::args().nth(1) {
        Some(path) => match load_state(&path) {
            Ok(state) => state,
            Err(e) => {
                error!("Error loading mount state: {}", e);
                process::exit(1);
            }
        },
        None => MountState::default(),
    };
    state.jitter = true;

    let address = env::var("GMSIM_ADDR").unwrap_or_else(|_| "127.0.0.1:3492".to_string());
    let mut server = match SimServer::start(&address, state) {
        Ok(server) => server,
        Err(e) => {
            error!("Cannot listen on {}: {}", address, e);
            process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down...");
        r.store(false, Ordering::SeqCst);
    }) {
        error!("Error setting Ctrl-C handler: {}", e);
        process::exit(1);
    }

    let mut batches = 0;
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
        batches += server.received().len();
        server.clear_received();
    }

    server.stop();
    info!("GM mount simulator shut down after {} batches", batches);
}
