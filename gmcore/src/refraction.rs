//! Automatic refraction updates
//!
//! Before each Medium query the current weather reading may be written to the
//! mount through the command channel, so the mount's own refraction
//! correction follows the sky.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use gmwire::{set_pressure, set_temperature, status, MountError, MountResult};

use crate::command::CommandChannel;
use crate::providers::EnvironmentProvider;
use crate::store::DataStore;

/// When automatic updates are allowed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefractionPolicy {
    pub when_not_tracking: bool,
    pub when_camera_idle: bool,
}

impl RefractionPolicy {
    pub fn allows(&self, mount_status: u32, camera_idle: bool) -> bool {
        (self.when_not_tracking && mount_status != status::TRACKING)
            || (self.when_camera_idle && camera_idle)
    }
}

pub struct RefractionUpdater {
    policy: RefractionPolicy,
    environment: Arc<dyn EnvironmentProvider>,
    camera_idle: Arc<AtomicBool>,
    store: Arc<DataStore>,
    channel: Arc<CommandChannel>,
}

impl RefractionUpdater {
    pub fn new(
        policy: RefractionPolicy,
        environment: Arc<dyn EnvironmentProvider>,
        camera_idle: Arc<AtomicBool>,
        store: Arc<DataStore>,
        channel: Arc<CommandChannel>,
    ) -> Self {
        Self {
            policy,
            environment,
            camera_idle,
            store,
            channel,
        }
    }

    /// Write pressure then temperature if the reading is usable, the policy
    /// allows it and the mount does not already hold these values. Returns
    /// whether the mount accepted both writes.
    pub fn before_medium(&self) -> bool {
        let reading = match self.environment.reading() {
            Some(r) if r.is_plausible() => r,
            Some(r) => {
                debug!(
                    "ignoring implausible environment reading {:.1} C {:.1} hPa",
                    r.temperature, r.pressure
                );
                return false;
            }
            None => return false,
        };
        let mount_status = self.store.pointing().status;
        if !self
            .policy
            .allows(mount_status, self.camera_idle.load(Ordering::SeqCst))
        {
            return false;
        }

        // Compare against what the Medium poll last read back, so a refused
        // write or a mount restart is retried on the next tick
        let held = self.store.refraction();
        if same_tenth(held.pressure, reading.pressure)
            && same_tenth(held.temperature, reading.temperature)
        {
            return false;
        }
        match self.write(reading.pressure, reading.temperature) {
            Ok(()) => {
                info!(
                    "refraction update {:.1} C {:.1} hPa",
                    reading.temperature, reading.pressure
                );
                true
            }
            Err(e) => {
                warn!("refraction update failed: {}", e);
                false
            }
        }
    }

    fn write(&self, pressure: f64, temperature: f64) -> MountResult<()> {
        for command in [set_pressure(pressure), set_temperature(temperature)] {
            let reply = self.channel.request(command.as_str())?;
            if !reply.ends_with_success() {
                return Err(MountError::refused(format!("{} refused", command)));
            }
        }
        Ok(())
    }
}

fn same_tenth(a: f64, b: f64) -> bool {
    format!("{:.1}", a) == format!("{:.1}", b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CoreContext;
    use crate::providers::{EnvironmentReading, LatestReading};
    use crate::testutil::ScriptedConnection;
    use gmwire::{MediumReply, Reply, SlewFlip};
    use std::time::Duration;

    #[test]
    fn test_policy() {
        let not_tracking = RefractionPolicy {
            when_not_tracking: true,
            when_camera_idle: false,
        };
        assert!(!not_tracking.allows(status::TRACKING, true));
        assert!(not_tracking.allows(status::PARKED, false));

        let camera = RefractionPolicy {
            when_not_tracking: false,
            when_camera_idle: true,
        };
        assert!(camera.allows(status::TRACKING, true));
        assert!(!camera.allows(status::STOPPED, false));
        assert!(!RefractionPolicy::default().allows(status::STOPPED, true));
    }

    fn make_updater(
        policy: RefractionPolicy,
        environment: Arc<LatestReading>,
        answer: &'static str,
    ) -> (RefractionUpdater, crate::testutil::SentLog, Arc<CommandChannel>, Arc<DataStore>) {
        let conn = ScriptedConnection::new(move |_| match answer {
            "" => Err(MountError::SocketClosed),
            _ => Ok(Reply::new(answer)),
        });
        let sent = conn.sent();
        let ctx = CoreContext::new();
        let store = ctx.store.clone();
        let channel =
            Arc::new(CommandChannel::start(conn, ctx, Duration::from_secs(5)).unwrap());
        let updater = RefractionUpdater::new(
            policy,
            environment,
            Arc::new(AtomicBool::new(true)),
            store.clone(),
            channel.clone(),
        );
        (updater, sent, channel, store)
    }

    fn camera_idle() -> RefractionPolicy {
        RefractionPolicy {
            when_not_tracking: false,
            when_camera_idle: true,
        }
    }

    fn medium(temperature: f64, pressure: f64) -> MediumReply {
        MediumReply {
            slew_flip: SlewFlip::default(),
            temperature,
            pressure,
        }
    }

    #[test]
    fn test_writes_pressure_then_temperature() {
        let environment = Arc::new(LatestReading::new());
        environment.update(EnvironmentReading::new(12.3, 1013.2));
        let (updater, sent, channel, store) = make_updater(camera_idle(), environment, "1");

        assert!(updater.before_medium());
        assert_eq!(sent.batches(), vec![":SRPRS1013.2#", ":SRTMP+12.3#"]);

        // Once the mount reports the values back there is nothing to write
        store.apply_medium(&medium(12.3, 1013.2));
        assert!(!updater.before_medium());
        assert_eq!(sent.batches().len(), 2);
        channel.stop();
    }

    #[test]
    fn test_refused_write_is_retried() {
        let environment = Arc::new(LatestReading::new());
        environment.update(EnvironmentReading::new(12.3, 1013.2));
        let (updater, sent, channel, _) = make_updater(camera_idle(), environment, "0");

        assert!(!updater.before_medium());
        assert_eq!(sent.batches(), vec![":SRPRS1013.2#"]);
        assert!(!updater.before_medium());
        assert_eq!(sent.batches(), vec![":SRPRS1013.2#", ":SRPRS1013.2#"]);
        channel.stop();
    }

    #[test]
    fn test_lost_connection_is_retried() {
        let environment = Arc::new(LatestReading::new());
        environment.update(EnvironmentReading::new(12.3, 1013.2));
        let (updater, sent, channel, _) = make_updater(camera_idle(), environment, "");

        assert!(!updater.before_medium());
        assert!(!updater.before_medium());
        assert_eq!(sent.batches(), vec![":SRPRS1013.2#", ":SRPRS1013.2#"]);
        channel.stop();
    }

    #[test]
    fn test_mount_drift_triggers_rewrite() {
        let environment = Arc::new(LatestReading::new());
        environment.update(EnvironmentReading::new(12.3, 1013.2));
        let (updater, sent, channel, store) = make_updater(camera_idle(), environment, "1");

        store.apply_medium(&medium(12.3, 1013.2));
        assert!(!updater.before_medium());
        assert!(sent.batches().is_empty());

        // The mount lost its settings, e.g. after a power cycle
        store.apply_medium(&medium(10.0, 1010.0));
        assert!(updater.before_medium());
        assert_eq!(sent.batches(), vec![":SRPRS1013.2#", ":SRTMP+12.3#"]);
        channel.stop();
    }

    #[test]
    fn test_no_write_without_reading_or_policy() {
        let environment = Arc::new(LatestReading::new());
        let (updater, sent, channel, _) =
            make_updater(RefractionPolicy::default(), environment.clone(), "1");
        assert!(!updater.before_medium());
        environment.update(EnvironmentReading::new(12.3, 1013.2));
        assert!(!updater.before_medium());
        assert!(sent.batches().is_empty());
        channel.stop();
    }
}
