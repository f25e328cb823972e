//! TCP front end of the simulated mount
//!
//! Every accepted connection gets its own thread. All of them answer from
//! one shared `MountState`, like the real mount answers all its sockets
//! from one controller.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use gmwire::escape_log;

use crate::mount::MountState;

const ACCEPT_POLL: Duration = Duration::from_millis(20);
const READ_POLL: Duration = Duration::from_millis(20);

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<MountState>>,
    received: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicBool>,
    online: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
}

impl Shared {
    fn record(&self, batch: &str) {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch.to_string());
    }

    fn answer(&self, batch: &str) -> String {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .answer_batch(batch)
    }

    fn serving(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.online.load(Ordering::SeqCst)
    }
}

/// A running simulated mount
pub struct SimServer {
    addr: SocketAddr,
    shared: Shared,
    handle: Option<JoinHandle<()>>,
}

impl SimServer {
    /// Listen on `address`; port 0 picks a free port
    pub fn start(address: &str, state: MountState) -> io::Result<Self> {
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let shared = Shared {
            state: Arc::new(Mutex::new(state)),
            received: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(true)),
            online: Arc::new(AtomicBool::new(true)),
            connections: Arc::new(AtomicUsize::new(0)),
        };
        let accept_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("gmsim-accept".to_string())
            .spawn(move || accept_loop(listener, accept_shared))?;
        info!("simulated mount listening on {}", addr);
        Ok(Self {
            addr,
            shared,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Run `f` against the mount state
    pub fn with_state<T>(&self, f: impl FnOnce(&mut MountState) -> T) -> T {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Every batch received so far, in arrival order
    pub fn received(&self) -> Vec<String> {
        self.shared
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn received_count(&self, batch: &str) -> usize {
        self.received().iter().filter(|b| *b == batch).count()
    }

    pub fn clear_received(&self) {
        self.shared
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Going offline drops every open connection and refuses new ones
    pub fn set_online(&self, online: bool) {
        info!("simulated mount {}", if online { "online" } else { "offline" });
        self.shared.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, shared: Shared) {
    let mut handlers: Vec<JoinHandle<()>> = Vec::new();
    while shared.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if !shared.online.load(Ordering::SeqCst) {
                    debug!("offline, dropping connection from {}", peer);
                    drop(stream);
                    continue;
                }
                debug!("connection from {}", peer);
                let conn_shared = shared.clone();
                match thread::Builder::new()
                    .name(format!("gmsim-{}", peer))
                    .spawn(move || serve(stream, conn_shared))
                {
                    Ok(h) => handlers.push(h),
                    Err(e) => warn!("cannot serve {}: {}", peer, e),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("accept error: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
        handlers.retain(|h| !h.is_finished());
    }
    for h in handlers {
        let _ = h.join();
    }
}

fn serve(stream: TcpStream, shared: Shared) {
    shared.connections.fetch_add(1, Ordering::SeqCst);
    if let Err(e) = serve_stream(stream, &shared) {
        debug!("connection ended: {}", e);
    }
    shared.connections.fetch_sub(1, Ordering::SeqCst);
}

fn serve_stream(mut stream: TcpStream, shared: &Shared) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(READ_POLL))?;
    let mut pending = String::new();
    let mut buf = [0u8; 1024];
    while shared.serving() {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => pending.push_str(&String::from_utf8_lossy(&buf[..n])),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue
            }
            Err(e) => return Err(e),
        }
        // Answer every complete command received so far as one batch
        let Some(end) = pending.rfind('#') else {
            continue;
        };
        let batch: String = pending.drain(..=end).collect();
        shared.record(&batch);
        let reply = shared.answer(&batch);
        debug!("{} -> {}", escape_log(&batch), escape_log(&reply));
        if !reply.is_empty() {
            stream.write_all(reply.as_bytes())?;
            stream.flush()?;
        }
    }
    Ok(())
}
