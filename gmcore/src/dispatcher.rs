//! Lifecycle owner for the pollers and the command channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use log::{debug, info, warn};

use gmlink::{Connection, ConnectionConfig, TcpConnection};
use gmwire::{
    set_dual_axis_tracking, set_horizon_limit_high, set_horizon_limit_low,
    set_meridian_limit_slew, set_meridian_limit_track, set_refraction, set_unattended_flip,
    Channel, MountError, MountResult, Reply, FLIP, PARK, STOP, TRACK_OFF, TRACK_SIDEREAL, UNPARK,
};

use crate::command::CommandChannel;
use crate::config::MountConfig;
use crate::context::CoreContext;
use crate::events::MountEvent;
use crate::model::ModelOps;
use crate::poll::{Cadence, PollLoop, TickHook};
use crate::providers::{DomeSink, EnvironmentReading, LatestReading, TransformProvider};
use crate::refraction::RefractionUpdater;
use crate::store::DataStore;

/// Opens one connection per channel
pub trait Connector {
    fn connect(&self, channel: Channel) -> Box<dyn Connection>;
}

/// Real TCP connections built from the configuration
pub struct TcpConnector {
    config: MountConfig,
}

impl TcpConnector {
    pub fn new(config: MountConfig) -> Self {
        Self { config }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, channel: Channel) -> Box<dyn Connection> {
        let config = ConnectionConfig::new(self.config.host.clone(), self.config.port)
            .with_timeout(self.config.socket_timeout())
            .with_cooldown(self.config.reconnect_cooldown())
            .with_keepalive(self.config.keepalive)
            .with_label(channel.to_string());
        Box::new(TcpConnection::new(config))
    }
}

struct Running {
    pollers: Vec<PollLoop>,
    command: Arc<CommandChannel>,
    model_ops: ModelOps,
}

pub struct Dispatcher {
    config: MountConfig,
    ctx: CoreContext,
    environment: Arc<LatestReading>,
    camera_idle: Arc<AtomicBool>,
    dome: Option<Arc<dyn DomeSink>>,
    running: Option<Running>,
}

impl Dispatcher {
    pub fn new(config: MountConfig) -> Self {
        Self {
            config,
            ctx: CoreContext::new(),
            environment: Arc::new(LatestReading::new()),
            camera_idle: Arc::new(AtomicBool::new(false)),
            dome: None,
            running: None,
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn TransformProvider>) -> Self {
        self.ctx.transform = transform;
        self
    }

    pub fn with_dome(mut self, dome: Arc<dyn DomeSink>) -> Self {
        self.dome = Some(dome);
        self
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<DataStore> {
        self.ctx.store.clone()
    }

    pub fn subscribe(&self) -> Receiver<MountEvent> {
        self.ctx.bus.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Connect to the mount at `host:port` with real TCP connections
    pub fn start(&mut self, host: &str, port: u16) -> MountResult<()> {
        self.config.host = host.to_string();
        self.config.port = port;
        self.config.validate()?;
        let connector = TcpConnector::new(self.config.clone());
        self.start_with(&connector)
    }

    /// Spawn the command channel and the four pollers, each on its own
    /// connection from `connector`
    pub fn start_with(&mut self, connector: &dyn Connector) -> MountResult<()> {
        if self.running.is_some() {
            return Err(MountError::Channel("dispatcher already running".to_string()));
        }
        info!("starting mount core for {}:{}", self.config.host, self.config.port);

        let command = Arc::new(CommandChannel::start(
            connector.connect(Channel::Command),
            self.ctx.clone(),
            self.config.command_timeout(),
        )?);
        let updater = RefractionUpdater::new(
            self.config.refraction_policy(),
            self.environment.clone(),
            self.camera_idle.clone(),
            self.ctx.store.clone(),
            command.clone(),
        );
        let medium_hook: TickHook = Box::new(move || {
            updater.before_medium();
        });

        let plan = [
            (Cadence::Once, self.config.once_retry(), None),
            (Cadence::Fast, self.config.fast_period(), None),
            (Cadence::Medium, self.config.medium_period(), Some(medium_hook)),
            (Cadence::Slow, self.config.slow_period(), None),
        ];
        let mut pollers = Vec::with_capacity(plan.len());
        for (cadence, period, hook) in plan {
            match PollLoop::spawn(
                cadence,
                connector.connect(cadence.channel()),
                period,
                self.ctx.clone(),
                hook,
            ) {
                Ok(poller) => pollers.push(poller),
                Err(e) => {
                    warn!("cannot start {} poller: {}", cadence, e);
                    Self::shutdown(pollers, &command);
                    return Err(e);
                }
            }
        }

        let model_ops = ModelOps::new(
            command.clone(),
            self.ctx.clone(),
            self.config.model_settle(),
            self.config.loading_timeout(),
        );
        self.running = Some(Running {
            pollers,
            command,
            model_ops,
        });
        Ok(())
    }

    fn shutdown(pollers: Vec<PollLoop>, command: &CommandChannel) {
        for poller in &pollers {
            poller.request_stop();
        }
        command.stop();
        for poller in pollers {
            poller.join();
        }
    }

    /// Stop every worker, cancel pending commands and wait for all threads
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!("stopping mount core");
        Self::shutdown(running.pollers, &running.command);
        self.ctx.bus.publish(MountEvent::Stopped);
        info!("mount core stopped");
    }

    fn running(&self) -> MountResult<&Running> {
        self.running
            .as_ref()
            .ok_or_else(|| MountError::Channel("dispatcher not running".to_string()))
    }

    pub fn command_channel(&self) -> MountResult<Arc<CommandChannel>> {
        Ok(self.running()?.command.clone())
    }

    pub fn model_ops(&self) -> MountResult<ModelOps> {
        Ok(self.running()?.model_ops.clone())
    }

    /// Feed a weather reading. Implausible readings are dropped and the
    /// previous one stays in effect.
    pub fn update_environment(&self, temperature: f64, pressure: f64) -> bool {
        let accepted = self
            .environment
            .update(EnvironmentReading::new(temperature, pressure));
        if !accepted {
            debug!(
                "environment reading {:.1} C {:.1} hPa rejected",
                temperature, pressure
            );
        }
        accepted
    }

    pub fn update_camera_idle(&self, idle: bool) {
        self.camera_idle.store(idle, Ordering::SeqCst);
    }

    /// Forward an azimuth to the dome, if one is attached
    pub fn slew_dome_to(&self, azimuth_deg: f64) {
        match &self.dome {
            Some(dome) => dome.slew_to_azimuth(azimuth_deg),
            None => debug!("no dome attached, azimuth {:.1} dropped", azimuth_deg),
        }
    }

    /// Queue a command that gets no reply
    pub fn send(&self, command: &str) -> MountResult<()> {
        self.running()?.command.submit(command)
    }

    /// Send a command and wait for its reply
    pub fn request(&self, command: &str) -> MountResult<Reply> {
        self.running()?.command.request(command)
    }

    /// Send a setter and check its `1` answer
    fn set(&self, command: &str) -> MountResult<()> {
        let reply = self.request(command)?;
        if reply.ends_with_success() {
            Ok(())
        } else {
            Err(MountError::refused(format!("{} refused", command)))
        }
    }

    pub fn park(&self) -> MountResult<()> {
        self.send(PARK)
    }

    pub fn unpark(&self) -> MountResult<()> {
        self.send(UNPARK)
    }

    pub fn stop_motion(&self) -> MountResult<()> {
        self.send(STOP)
    }

    pub fn flip(&self) -> MountResult<()> {
        self.set(FLIP)
    }

    pub fn set_tracking(&self, on: bool) -> MountResult<()> {
        self.send(if on { TRACK_SIDEREAL } else { TRACK_OFF })
    }

    pub fn set_refraction(&self, on: bool) -> MountResult<()> {
        self.set(&set_refraction(on))
    }

    pub fn set_unattended_flip(&self, on: bool) -> MountResult<()> {
        self.set(&set_unattended_flip(on))
    }

    pub fn set_dual_axis_tracking(&self, on: bool) -> MountResult<()> {
        self.set(&set_dual_axis_tracking(on))
    }

    pub fn set_horizon_limits(&self, low_deg: i8, high_deg: i8) -> MountResult<()> {
        if low_deg >= high_deg {
            return Err(MountError::InvalidArgument(format!(
                "horizon limits {}..{} are inverted",
                low_deg, high_deg
            )));
        }
        self.set(&set_horizon_limit_low(low_deg))?;
        self.set(&set_horizon_limit_high(high_deg))
    }

    pub fn set_meridian_limits(&self, track_deg: u8, slew_deg: u8) -> MountResult<()> {
        self.set(&set_meridian_limit_track(track_deg))?;
        self.set(&set_meridian_limit_slew(slew_deg))
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
