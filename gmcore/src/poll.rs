//! Poll loops, one thread per cadence
//!
//! A loop sends its batch, parses the reply, writes its own store group and
//! then sleeps for its period. The next query is never sent before the
//! previous one has been answered or abandoned, so queries do not stack.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use gmlink::{Connection, LinkStatistics, MountClient};
use gmwire::{Channel, ErrorKind, MountError, MountResult};

use crate::context::{CoreContext, StopSignal};
use crate::events::{MountEvent, PointingSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Site and firmware, until the first success
    Once,
    Fast,
    Medium,
    Slow,
}

impl Cadence {
    pub fn channel(&self) -> Channel {
        match self {
            Cadence::Once => Channel::Once,
            Cadence::Fast => Channel::Fast,
            Cadence::Medium => Channel::Medium,
            Cadence::Slow => Channel::Slow,
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.channel(), f)
    }
}

/// Runs on the loop's thread right before each query
pub type TickHook = Box<dyn FnMut() + Send>;

/// Query, parse and store one tick of `cadence`
pub fn poll_tick<C: Connection>(
    cadence: Cadence,
    client: &mut MountClient<C>,
    ctx: &CoreContext,
) -> MountResult<()> {
    match cadence {
        Cadence::Once => {
            let once = client.read_once()?;
            ctx.store.apply_once(&once);
            info!(
                "mount {} firmware {} ({})",
                once.firmware.product_name, once.firmware.number, once.firmware.fw
            );
            ctx.bus.publish(MountEvent::FirmwareRead(once.firmware));
        }
        Cadence::Fast => {
            let fast = client.read_fast()?;
            let site = ctx.store.site();
            let j2000 = ctx
                .transform
                .jnow_to_j2000(fast.ra_jnow, fast.dec_jnow, fast.julian_date, &site);
            let finished = ctx.store.apply_fast(&fast, j2000);
            ctx.bus.publish(MountEvent::Pointing(PointingSample::from(&fast)));
            if finished {
                info!("slew finished");
                ctx.bus.publish(MountEvent::SlewFinished);
            }
        }
        Cadence::Medium => {
            let medium = client.read_medium()?;
            ctx.store.apply_medium(&medium);
        }
        Cadence::Slow => {
            let fw = ctx.store.firmware().fw;
            let slow = client.read_slow(fw)?;
            ctx.store.apply_slow(&slow);
        }
    }
    Ok(())
}

/// Log a failed tick. Repeats of the same failure go to debug.
fn log_failure(cadence: Cadence, error: &MountError, last: &mut Option<String>) {
    let text = error.to_string();
    let repeated = last.as_deref() == Some(text.as_str());
    match error.kind() {
        // The connection already throttles its own connect noise
        ErrorKind::ConnectFailed => debug!("{}: {}", cadence, text),
        ErrorKind::ParseShort | ErrorKind::ParseMismatch if !repeated => {
            warn!("{}: reply discarded: {}", cadence, text)
        }
        _ if !repeated => warn!("{}: {}", cadence, text),
        _ => debug!("{}: {}", cadence, text),
    }
    *last = Some(text);
}

fn run_loop<C: Connection>(
    cadence: Cadence,
    mut client: MountClient<C>,
    period: Duration,
    ctx: CoreContext,
    stop: Arc<StopSignal>,
    mut hook: Option<TickHook>,
) -> LinkStatistics {
    let channel = cadence.channel();
    info!("{} poller started, period {:?}", cadence, period);
    let mut last_failure = None;
    loop {
        if stop.is_set() {
            break;
        }
        if let Some(hook) = hook.as_mut() {
            hook();
        }
        let result = poll_tick(cadence, &mut client, &ctx);
        if stop.is_set() {
            break;
        }
        ctx.record_exchange(
            channel,
            &client.endpoint(),
            client.is_connected(),
            result.as_ref().err(),
        );
        match result {
            Ok(()) => {
                last_failure = None;
                if cadence == Cadence::Once {
                    // Nothing more to read until the next start
                    stop.wait();
                    break;
                }
            }
            Err(e) => log_failure(cadence, &e, &mut last_failure),
        }
        if stop.wait_timeout(period) {
            break;
        }
    }
    client.close();
    ctx.record_disconnected(channel, &client.endpoint());
    info!("{} poller stopped", cadence);
    client.statistics()
}

/// Handle to one running poll loop
pub struct PollLoop {
    cadence: Cadence,
    stop: Arc<StopSignal>,
    handle: Option<JoinHandle<LinkStatistics>>,
}

impl PollLoop {
    pub fn spawn<C: Connection + 'static>(
        cadence: Cadence,
        connection: C,
        period: Duration,
        ctx: CoreContext,
        hook: Option<TickHook>,
    ) -> MountResult<Self> {
        let stop = Arc::new(StopSignal::new());
        let loop_stop = stop.clone();
        let client = MountClient::new(connection);
        let handle = thread::Builder::new()
            .name(format!("gm-{}", cadence))
            .spawn(move || run_loop(cadence, client, period, ctx, loop_stop, hook))?;
        Ok(Self {
            cadence,
            stop,
            handle: Some(handle),
        })
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Ask the loop to stop without waiting for it
    pub fn request_stop(&self) {
        self.stop.set();
    }

    pub fn join(mut self) -> Option<LinkStatistics> {
        self.stop.set();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(stats) => {
                debug!("{} poller: {:?}", self.cadence, stats);
                Some(stats)
            }
            Err(_) => {
                warn!("{} poller panicked", self.cadence);
                None
            }
        }
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.stop.set();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
