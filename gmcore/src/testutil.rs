//! Scripted in-memory connections for tests

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use gmlink::Connection;
use gmwire::{Channel, MountResult, Reply};

use crate::dispatcher::Connector;

pub type Responder = Arc<dyn Fn(&str) -> MountResult<Reply> + Send + Sync>;

/// Every batch a scripted connection was asked to send
#[derive(Clone, Default)]
pub struct SentLog(Arc<Mutex<Vec<String>>>);

impl SentLog {
    fn push(&self, batch: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch.to_string());
    }

    pub fn batches(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

pub struct ScriptedConnection {
    responder: Responder,
    sent: SentLog,
    connected: bool,
}

impl ScriptedConnection {
    pub fn new(responder: impl Fn(&str) -> MountResult<Reply> + Send + Sync + 'static) -> Self {
        Self::from_responder(Arc::new(responder))
    }

    pub fn from_responder(responder: Responder) -> Self {
        Self {
            responder,
            sent: SentLog::default(),
            connected: false,
        }
    }

    pub fn sent(&self) -> SentLog {
        self.sent.clone()
    }
}

impl Connection for ScriptedConnection {
    fn send_batch(&mut self, batch: &str) -> MountResult<Reply> {
        self.sent.push(batch);
        let result = (self.responder)(batch);
        match &result {
            Ok(_) => self.connected = true,
            Err(e) if e.is_connection_loss() => self.connected = false,
            Err(_) => {}
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn endpoint(&self) -> String {
        "scripted:3492".to_string()
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

/// Hands every channel a scripted connection sharing one responder
pub struct ScriptedConnector {
    responder: Responder,
    logs: Mutex<BTreeMap<Channel, SentLog>>,
}

impl ScriptedConnector {
    pub fn new(responder: impl Fn(&str) -> MountResult<Reply> + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            logs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn sent(&self, channel: Channel) -> Vec<String> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .map(SentLog::batches)
            .unwrap_or_default()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, channel: Channel) -> Box<dyn Connection> {
        let conn = ScriptedConnection::from_responder(self.responder.clone());
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, conn.sent());
        Box::new(conn)
    }
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
