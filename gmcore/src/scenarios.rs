//! End-to-end runs against the simulated mount over real TCP

use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

use gmsim::{MountState, SimServer};
use gmwire::{batches, Channel, MountError, PierSide};

use crate::config::MountConfig;
use crate::dispatcher::Dispatcher;
use crate::events::MountEvent;
use crate::testutil::wait_for;

const PATIENCE: Duration = Duration::from_secs(10);

fn config(sim: &SimServer) -> MountConfig {
    MountConfig {
        host: "127.0.0.1".to_string(),
        port: sim.port(),
        socket_timeout_s: 1.0,
        fast_period_ms: 50,
        medium_period_ms: 200,
        slow_period_ms: 300,
        once_retry_ms: 100,
        reconnect_cooldown_ms: 100,
        model_settle_ms: 10,
        loading_timeout_s: 5.0,
        command_timeout_s: 5.0,
        ..MountConfig::default()
    }
}

fn start(sim: &SimServer, config: MountConfig) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(config);
    dispatcher.start("127.0.0.1", sim.port()).unwrap();
    dispatcher
}

fn saw(events: &Receiver<MountEvent>, wanted: &MountEvent) -> bool {
    wait_for(PATIENCE, || events.try_iter().any(|e| e == *wanted))
}

#[test]
fn connect_reads_site_firmware_and_pointing() {
    let sim = SimServer::start("127.0.0.1:0", MountState::default()).unwrap();
    let mut dispatcher = start(&sim, config(&sim));
    let store = dispatcher.store();

    assert!(wait_for(PATIENCE, || store.firmware().fw == 21514));
    let site = store.site();
    assert_eq!(site.elevation_m, 585.2);
    assert!((site.longitude - 11.5833).abs() < 1e-3);
    assert!((site.latitude - 48.1167).abs() < 1e-3);
    assert_eq!(store.firmware().product_name, "10micron GM1000HPS");

    assert!(wait_for(PATIENCE, || store.pointing().pierside == PierSide::West));
    assert!(wait_for(PATIENCE, || store.dut().is_some()));
    assert!(store.pointing().j2000_stale);
    assert_eq!(store.slew_flip().meridian_limit_track_deg, 5.0);

    dispatcher.stop();
    assert_eq!(sim.received_count(batches::ONCE), 1);
    assert!(sim
        .received()
        .iter()
        .any(|b| b.starts_with(batches::SLOW_BASE) && b.ends_with(":GDUTV#")));
}

#[test]
fn fast_poller_recovers_after_outage() {
    let sim = SimServer::start("127.0.0.1:0", MountState::default()).unwrap();
    let mut dispatcher = start(&sim, config(&sim));
    let store = dispatcher.store();
    assert!(wait_for(PATIENCE, || store.connection(Channel::Fast).connected));
    assert!(wait_for(PATIENCE, || store.site().julian_date > 0.0));

    sim.set_online(false);
    assert!(wait_for(PATIENCE, || !store.connection(Channel::Fast).connected));
    let during = store.pointing();
    thread::sleep(Duration::from_millis(500));
    assert_eq!(store.pointing(), during);
    assert!(!store.connection(Channel::Fast).connected);

    sim.set_online(true);
    assert!(wait_for(PATIENCE, || store.connection(Channel::Fast).connected));
    let jd = store.site().julian_date;
    assert!(wait_for(PATIENCE, || store.site().julian_date > jd));
    dispatcher.stop();
}

#[test]
fn slew_finished_is_published_once() {
    let state = MountState {
        slew_ticks: 4,
        ..MountState::default()
    };
    let sim = SimServer::start("127.0.0.1:0", state).unwrap();
    let mut dispatcher = start(&sim, config(&sim));
    let events = dispatcher.subscribe();
    let store = dispatcher.store();
    assert!(wait_for(PATIENCE, || store.connection(Channel::Fast).connected));

    assert_eq!(dispatcher.request(":Sr12:00:00.00#:MS#").unwrap().as_str(), "10");
    assert!(saw(&events, &MountEvent::SlewFinished));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(
        events
            .try_iter()
            .filter(|e| *e == MountEvent::SlewFinished)
            .count(),
        0
    );
    assert!((store.pointing().ra_jnow - 12.0).abs() < 1e-3);
    dispatcher.stop();
}

#[test]
fn environment_reaches_mount() {
    let sim = SimServer::start("127.0.0.1:0", MountState::default()).unwrap();
    let mut dispatcher = start(
        &sim,
        MountConfig {
            auto_refraction_when_camera_idle: true,
            ..config(&sim)
        },
    );
    dispatcher.update_camera_idle(true);
    assert!(dispatcher.update_environment(8.5, 995.5));

    assert!(wait_for(PATIENCE, || sim.with_state(|s| s.pressure == 995.5
        && s.temperature == 8.5)));
    let store = dispatcher.store();
    assert!(wait_for(PATIENCE, || store.refraction().pressure == 995.5));
    dispatcher.stop();
    assert_eq!(sim.received_count(":SRPRS995.5#"), 1);
    assert_eq!(sim.received_count(":SRTMP+8.5#"), 1);
}

#[test]
fn model_round_trip() {
    let sim = SimServer::start("127.0.0.1:0", MountState::default()).unwrap();
    let mut dispatcher = start(&sim, config(&sim));
    let ops = dispatcher.model_ops().unwrap();
    let store = dispatcher.store();

    ops.save("TONIGHT").unwrap();
    assert_eq!(store.model().name_list, vec!["BACKUP", "TONIGHT"]);

    ops.clear().unwrap();
    assert!(store.model().star_list.is_empty());
    assert_eq!(store.model().info.terms, None);

    ops.load("BACKUP").unwrap();
    let model = store.model();
    assert!(!model.loading);
    assert_eq!(model.star_list.len(), 3);
    assert_eq!(model.star_list[2].error_angle_deg, 15.0);
    assert_eq!(model.generation, 2);

    assert!(matches!(ops.load("MISSING"), Err(MountError::ProtocolRefused(_))));
    assert_eq!(store.model().generation, 2);

    ops.delete("TONIGHT").unwrap();
    assert_eq!(store.model().name_list, vec!["BACKUP"]);
    dispatcher.stop();
}

#[test]
fn stop_cancels_and_disconnects() {
    let sim = SimServer::start("127.0.0.1:0", MountState::default()).unwrap();
    let mut dispatcher = start(&sim, config(&sim));
    let events = dispatcher.subscribe();
    let store = dispatcher.store();
    assert!(wait_for(PATIENCE, || store.any_connected()));

    let channel = dispatcher.command_channel().unwrap();
    dispatcher.stop();
    assert!(matches!(channel.submit(":AP#"), Err(MountError::Canceled)));
    assert!(!store.any_connected());
    assert!(events.try_iter().any(|e| e == MountEvent::Stopped));
    assert!(wait_for(PATIENCE, || sim.connection_count() == 0));
}
