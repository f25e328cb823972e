//! Shared mount data store
//!
//! Every group is written by exactly one cadence and read by anyone. Readers
//! always see a whole group from one parse, never a mix of two.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use gmwire::{
    AlignmentInfo, AlignmentStar, Channel, ConnectionState, DutInfo, FastReply, Firmware,
    MediumReply, ModelCatalogue, MountError, MountResult, OnceReply, Pointing, Refraction, Site,
    SlewFlip, SlowReply,
};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of a `set_connection` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionChange {
    /// The channel's connected bit flipped
    pub channel_changed: bool,
    /// New value of "any channel connected", when it flipped
    pub any_connected: Option<bool>,
}

#[derive(Debug, Default)]
struct Connections {
    channels: BTreeMap<Channel, ConnectionState>,
    any_connected: bool,
}

#[derive(Debug, Default)]
struct LoadGate {
    loading: bool,
    failure: Option<String>,
}

/// Point-in-time copy of the whole store
#[derive(Debug, Clone, Serialize)]
pub struct MountSnapshot {
    pub site: Site,
    pub firmware: Firmware,
    pub pointing: Pointing,
    pub refraction: Refraction,
    pub slew_flip: SlewFlip,
    pub dut: Option<DutInfo>,
    pub model: ModelCatalogue,
    pub connections: BTreeMap<Channel, ConnectionState>,
}

#[derive(Debug, Default)]
pub struct DataStore {
    site: RwLock<Site>,
    firmware: RwLock<Firmware>,
    pointing: RwLock<Pointing>,
    refraction: RwLock<Refraction>,
    slew_flip: RwLock<SlewFlip>,
    dut: RwLock<Option<DutInfo>>,
    model: RwLock<ModelCatalogue>,
    connections: RwLock<Connections>,
    load_gate: Mutex<LoadGate>,
    load_cvar: Condvar,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn site(&self) -> Site {
        read(&self.site).clone()
    }

    pub fn firmware(&self) -> Firmware {
        read(&self.firmware).clone()
    }

    pub fn pointing(&self) -> Pointing {
        read(&self.pointing).clone()
    }

    pub fn refraction(&self) -> Refraction {
        read(&self.refraction).clone()
    }

    pub fn slew_flip(&self) -> SlewFlip {
        read(&self.slew_flip).clone()
    }

    pub fn dut(&self) -> Option<DutInfo> {
        read(&self.dut).clone()
    }

    pub fn model(&self) -> ModelCatalogue {
        let mut model = read(&self.model).clone();
        model.loading = self.is_loading();
        model
    }

    pub fn connection(&self, channel: Channel) -> ConnectionState {
        read(&self.connections)
            .channels
            .get(&channel)
            .cloned()
            .unwrap_or_default()
    }

    pub fn connections(&self) -> BTreeMap<Channel, ConnectionState> {
        read(&self.connections).channels.clone()
    }

    pub fn any_connected(&self) -> bool {
        read(&self.connections).any_connected
    }

    pub fn snapshot(&self) -> MountSnapshot {
        MountSnapshot {
            site: self.site(),
            firmware: self.firmware(),
            pointing: self.pointing(),
            refraction: self.refraction(),
            slew_flip: self.slew_flip(),
            dut: self.dut(),
            model: self.model(),
            connections: self.connections(),
        }
    }

    /// Site position and firmware identity
    pub fn apply_once(&self, once: &OnceReply) {
        {
            let mut site = write(&self.site);
            site.latitude = once.latitude;
            site.longitude = once.longitude;
            site.elevation_m = once.elevation_m;
        }
        *write(&self.firmware) = once.firmware.clone();
    }

    /// Store one pointing sample. `j2000` is the converted position, or None
    /// when no conversion was available; the previous J2000 values are then
    /// kept and flagged stale. Returns true on the slewing 1 -> 0 edge.
    pub fn apply_fast(&self, fast: &FastReply, j2000: Option<(f64, f64)>) -> bool {
        {
            let mut site = write(&self.site);
            site.local_sidereal_time = fast.local_sidereal_time.clone();
            site.julian_date = fast.julian_date;
        }
        let mut pointing = write(&self.pointing);
        let was_slewing = pointing.slewing;
        pointing.ra_jnow = fast.ra_jnow;
        pointing.dec_jnow = fast.dec_jnow;
        match j2000 {
            Some((ra, dec)) => {
                pointing.ra_j2000 = ra;
                pointing.dec_j2000 = dec;
                pointing.j2000_epoch_jd = fast.julian_date;
                pointing.j2000_stale = false;
            }
            None => pointing.j2000_stale = true,
        }
        pointing.az = fast.az;
        pointing.alt = fast.alt;
        pointing.pierside = fast.pierside;
        pointing.status = fast.status;
        pointing.slewing = fast.slewing;
        was_slewing && !fast.slewing
    }

    pub fn apply_medium(&self, medium: &MediumReply) {
        *write(&self.slew_flip) = medium.slew_flip.clone();
        let mut refraction = write(&self.refraction);
        refraction.temperature = medium.temperature;
        refraction.pressure = medium.pressure;
    }

    pub fn apply_slow(&self, slow: &SlowReply) {
        {
            let mut refraction = write(&self.refraction);
            refraction.telescope_temperature = slow.telescope_temperature;
            refraction.refraction_status = slow.refraction_status;
            refraction.unattended_flip = slow.unattended_flip;
            refraction.dual_axis_tracking = slow.dual_axis_tracking;
            refraction.horizon_limit_high = slow.horizon_limit_high;
            refraction.horizon_limit_low = slow.horizon_limit_low;
        }
        if slow.dut.is_some() {
            *write(&self.dut) = slow.dut.clone();
        }
    }

    pub fn set_model_names(&self, names: Vec<String>) {
        write(&self.model).name_list = names;
    }

    /// Update one channel's state. `last_error` is only replaced when an
    /// error is given.
    pub fn set_connection(
        &self,
        channel: Channel,
        connected: bool,
        endpoint: &str,
        error: Option<String>,
    ) -> ConnectionChange {
        let mut conns = write(&self.connections);
        let state = conns.channels.entry(channel).or_default();
        let channel_changed = state.connected != connected;
        if channel_changed || state.last_change.is_none() {
            state.last_change = Some(Utc::now());
        }
        state.connected = connected;
        state.endpoint = endpoint.to_string();
        if error.is_some() {
            state.last_error = error;
        }

        let any = conns.channels.values().any(|s| s.connected);
        let any_connected = if any != conns.any_connected {
            conns.any_connected = any;
            Some(any)
        } else {
            None
        };
        ConnectionChange {
            channel_changed,
            any_connected,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.load_gate.lock().unwrap_or_else(PoisonError::into_inner).loading
    }

    /// Mark the alignment model as being reloaded. Fails with `Busy` if a
    /// reload is already running.
    pub fn begin_loading(&self) -> MountResult<()> {
        let mut gate = self.load_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if gate.loading {
            return Err(MountError::Busy);
        }
        gate.loading = true;
        gate.failure = None;
        Ok(())
    }

    /// End a reload. On success the star list and summary are replaced and
    /// the generation advances; on failure the old catalogue is kept.
    pub fn finish_loading(&self, result: Result<(AlignmentInfo, Vec<AlignmentStar>), String>) {
        let failure = match result {
            Ok((info, stars)) => {
                let mut model = write(&self.model);
                model.info = info;
                model.star_list = stars;
                model.generation += 1;
                None
            }
            Err(reason) => Some(reason),
        };
        let mut gate = self.load_gate.lock().unwrap_or_else(PoisonError::into_inner);
        gate.loading = false;
        gate.failure = failure;
        self.load_cvar.notify_all();
    }

    /// Block until no reload is running. A reload that failed, or one that
    /// outlives `timeout`, is reported as refused.
    pub fn wait_until_loaded(&self, timeout: Duration) -> MountResult<()> {
        let gate = self.load_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let (gate, result) = self
            .load_cvar
            .wait_timeout_while(gate, timeout, |g| g.loading)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && gate.loading {
            return Err(MountError::refused("alignment model reload timed out"));
        }
        match &gate.failure {
            Some(reason) => Err(MountError::refused(format!(
                "alignment model reload failed: {}",
                reason
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmwire::PierSide;
    use std::sync::Arc;
    use std::thread;

    fn fast(ra: f64, slewing: bool) -> FastReply {
        FastReply {
            local_sidereal_time: "18:45:12.3".to_string(),
            ra_jnow: ra,
            dec_jnow: 45.2,
            pierside: PierSide::East,
            az: 123.4,
            alt: 52.1,
            julian_date: 2458352.1,
            status: 0,
            slewing,
        }
    }

    #[test]
    fn test_slew_finished_edge() {
        let store = DataStore::new();
        assert!(!store.apply_fast(&fast(10.5, true), Some((10.4, 45.1))));
        assert!(!store.apply_fast(&fast(10.5, true), Some((10.4, 45.1))));
        assert!(store.apply_fast(&fast(10.5, false), Some((10.4, 45.1))));
        assert!(!store.apply_fast(&fast(10.5, false), Some((10.4, 45.1))));
    }

    #[test]
    fn test_j2000_stale_keeps_previous_values() {
        let store = DataStore::new();
        store.apply_fast(&fast(10.5, false), Some((10.4, 45.1)));
        store.apply_fast(&fast(11.0, false), None);
        let p = store.pointing();
        assert_eq!(p.ra_jnow, 11.0);
        assert_eq!(p.ra_j2000, 10.4);
        assert!(p.j2000_stale);
        assert_eq!(p.j2000_epoch_jd, 2458352.1);
    }

    #[test]
    fn test_connection_change_tracking() {
        let store = DataStore::new();
        let c = store.set_connection(Channel::Fast, true, "m:3492", None);
        assert!(c.channel_changed);
        assert_eq!(c.any_connected, Some(true));

        let c = store.set_connection(Channel::Slow, true, "m:3492", None);
        assert!(c.channel_changed);
        assert_eq!(c.any_connected, None);

        let c = store.set_connection(Channel::Fast, true, "m:3492", None);
        assert_eq!(c, ConnectionChange::default());

        store.set_connection(Channel::Fast, false, "m:3492", Some("Socket closed".into()));
        let c = store.set_connection(Channel::Slow, false, "m:3492", None);
        assert_eq!(c.any_connected, Some(false));
        assert_eq!(
            store.connection(Channel::Fast).last_error.as_deref(),
            Some("Socket closed")
        );
        assert!(!store.any_connected());
    }

    #[test]
    fn test_loading_gate() {
        let store = Arc::new(DataStore::new());
        store.begin_loading().unwrap();
        assert!(matches!(store.begin_loading(), Err(MountError::Busy)));
        assert!(store.model().loading);

        let finisher = store.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            finisher.finish_loading(Ok((AlignmentInfo::default(), Vec::new())));
        });
        store.wait_until_loaded(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();

        let model = store.model();
        assert!(!model.loading);
        assert_eq!(model.generation, 1);
    }

    #[test]
    fn test_loading_failure_and_timeout() {
        let store = DataStore::new();
        store.begin_loading().unwrap();
        assert!(matches!(
            store.wait_until_loaded(Duration::from_millis(20)),
            Err(MountError::ProtocolRefused(_))
        ));
        store.finish_loading(Err("read timeout".to_string()));
        assert!(!store.is_loading());
        assert!(matches!(
            store.wait_until_loaded(Duration::from_millis(20)),
            Err(MountError::ProtocolRefused(_))
        ));
        assert_eq!(store.model().generation, 0);
    }
}
