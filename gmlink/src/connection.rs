//! Connection management for mount conversations
//!
//! A `TcpConnection` owns one socket to the mount. It connects lazily on the
//! first send, reconnects after a cool-down when the mount goes away, and reads
//! each reply until the batch's expectation (see `gmwire::analyze`) is met.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use gmwire::{analyze, escape_log, Expectation, MountError, MountResult, Reply, DEFAULT_PORT};
use log::{debug, error, info, trace, warn};
use socket2::{Domain, Protocol, Socket, Type};

/// One conversation with the mount. Callers serialize access; there is never
/// more than one batch in flight.
pub trait Connection: Send {
    /// Send a batch and wait for its complete reply. Batches without any
    /// answering command return an empty reply as soon as they are flushed.
    fn send_batch(&mut self, batch: &str) -> MountResult<Reply>;

    /// Check whether a socket is currently open
    fn is_connected(&self) -> bool;

    /// `host:port` this connection talks to
    fn endpoint(&self) -> String;

    /// Close the socket. The next send reconnects.
    fn close(&mut self);
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn send_batch(&mut self, batch: &str) -> MountResult<Reply> {
        (**self).send_batch(batch)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn endpoint(&self) -> String {
        (**self).endpoint()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Connect, write and read timeout
    pub timeout: Duration,
    /// Wait after a failed connect before trying again
    pub cooldown: Duration,
    pub keepalive: bool,
    /// Name used in log lines
    pub label: String,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(2),
            cooldown: Duration::from_secs(1),
            keepalive: true,
            label: "mount".to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

/// Caps connect-failure logging: two warnings, one error, then silence until
/// the connection comes back
#[derive(Debug, Default)]
pub struct ConnectNoise {
    failures: u32,
}

impl ConnectNoise {
    pub const WARNINGS: u32 = 2;

    pub fn failure(&mut self, label: &str, endpoint: &str, reason: &str) {
        self.failures = self.failures.saturating_add(1);
        match self.failures {
            n if n <= Self::WARNINGS => {
                warn!("{}: cannot connect to {}: {}", label, endpoint, reason)
            }
            n if n == Self::WARNINGS + 1 => error!(
                "{}: cannot connect to {}: {} (further failures not logged)",
                label, endpoint, reason
            ),
            _ => trace!("{}: connect to {} failed again", label, endpoint),
        }
    }

    pub fn success(&mut self, label: &str, endpoint: &str) {
        if self.failures > 0 {
            info!(
                "{}: connected to {} after {} failed attempts",
                label, endpoint, self.failures
            );
        } else {
            info!("{}: connected to {}", label, endpoint);
        }
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// TCP conversation with the mount
pub struct TcpConnection {
    config: ConnectionConfig,
    stream: Option<TcpStream>,
    retry_at: Option<Instant>,
    noise: ConnectNoise,
}

impl TcpConnection {
    /// Create a connection. Nothing is opened until the first send.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            stream: None,
            retry_at: None,
            noise: ConnectNoise::default(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open the socket now, honouring the cool-down
    pub fn connect(&mut self) -> MountResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let endpoint = self.config.endpoint();
        if let Some(at) = self.retry_at {
            if Instant::now() < at {
                return Err(MountError::ConnectFailed {
                    endpoint,
                    reason: "cooling down".to_string(),
                });
            }
        }
        match self.open_stream() {
            Ok(stream) => {
                self.stream = Some(stream);
                self.retry_at = None;
                self.noise.success(&self.config.label, &endpoint);
                Ok(())
            }
            Err(e) => {
                self.retry_at = Some(Instant::now() + self.config.cooldown);
                let reason = e.to_string();
                self.noise.failure(&self.config.label, &endpoint, &reason);
                Err(MountError::ConnectFailed { endpoint, reason })
            }
        }
    }

    fn open_stream(&self) -> io::Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()?
            .collect();
        let mut last_err = None;
        for addr in addrs {
            match self.open_addr(addr) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no address")
        }))
    }

    fn open_addr(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        if self.config.keepalive {
            socket.set_keepalive(true)?;
        }
        socket.connect_timeout(&addr.into(), self.config.timeout)?;
        let stream: TcpStream = socket.into();
        stream.set_read_timeout(Some(self.config.timeout))?;
        stream.set_write_timeout(Some(self.config.timeout))?;
        Ok(stream)
    }

    fn drop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("{}: socket to {} closed", self.config.label, self.config.endpoint());
        }
    }

    fn exchange(stream: &mut TcpStream, batch: &str, timeout: Duration) -> MountResult<Reply> {
        discard_stale(stream).map_err(|_| MountError::SocketClosed)?;

        if let Err(e) = stream.write_all(batch.as_bytes()).and_then(|_| stream.flush()) {
            return Err(if is_timeout(&e) {
                MountError::SendTimeout
            } else {
                MountError::SocketClosed
            });
        }

        let expectation = analyze(batch);
        if !expectation.needs_response {
            return Ok(Reply::empty());
        }
        read_reply(stream, expectation, timeout)
    }
}

impl Connection for TcpConnection {
    fn send_batch(&mut self, batch: &str) -> MountResult<Reply> {
        self.connect()?;
        let timeout = self.config.timeout;
        let stream = self.stream.as_mut().ok_or(MountError::SocketClosed)?;

        trace!("{}: -> {}", self.config.label, escape_log(batch));
        let result = Self::exchange(stream, batch, timeout);
        match &result {
            Ok(reply) => trace!("{}: <- {}", self.config.label, escape_log(reply.as_str())),
            Err(MountError::SocketClosed) => {
                warn!("{}: mount closed the connection", self.config.label);
                self.drop_stream();
            }
            Err(e) => debug!("{}: {} for {}", self.config.label, e, escape_log(batch)),
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    fn close(&mut self) {
        self.drop_stream();
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.drop_stream();
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Throw away bytes left over from an abandoned reply so they are not read as
/// the answer to the next batch
fn discard_stale(stream: &mut TcpStream) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    let mut scratch = [0u8; 256];
    let result = loop {
        match stream.read(&mut scratch) {
            Ok(0) => break Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(n) => trace!("discarding {} stale bytes", n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        }
    };
    stream.set_nonblocking(false)?;
    result
}

/// Whether `buf` holds everything the expectation asks for
pub fn reply_complete(buf: &[u8], expectation: &Expectation) -> bool {
    let hashes = buf.iter().filter(|b| **b == b'#').count();
    hashes >= expectation.hash_chunks && buf.len() >= expectation.min_len()
}

/// A raw answer may be shorter than its budget; once the terminated part is in
/// and at least one raw byte arrived, the read timeout ends the reply
fn short_raw_acceptable(buf: &[u8], expectation: &Expectation) -> bool {
    let hashes = buf.iter().filter(|b| **b == b'#').count();
    expectation.raw_bytes > 0
        && hashes >= expectation.hash_chunks
        && buf.len() > expectation.hash_chunks
}

fn read_reply<R: Read>(reader: &mut R, expectation: Expectation, timeout: Duration) -> MountResult<Reply> {
    let deadline = Instant::now() + timeout;
    let mut buf: Vec<u8> = Vec::with_capacity(64);
    let mut chunk = [0u8; 512];

    while !reply_complete(&buf, &expectation) {
        let timed_out = match reader.read(&mut chunk) {
            Ok(0) => return Err(MountError::SocketClosed),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                Instant::now() >= deadline && !reply_complete(&buf, &expectation)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => false,
            Err(e) if is_timeout(&e) => true,
            Err(_) => return Err(MountError::SocketClosed),
        };
        if timed_out {
            if short_raw_acceptable(&buf, &expectation) {
                break;
            }
            return Err(MountError::ReadTimeout);
        }
    }

    Ok(Reply::new(String::from_utf8_lossy(&buf).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::TcpListener;
    use std::thread;

    /// Hands out pre-cut chunks, then times out
    struct ChunkReader {
        chunks: VecDeque<Vec<u8>>,
    }

    impl ChunkReader {
        fn new(chunks: &[&str]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            }
        }
    }

    impl Read for ChunkReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(c) => {
                    buf[..c.len()].copy_from_slice(&c);
                    Ok(c.len())
                }
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }
    }

    #[test]
    fn test_reply_reassembled_from_chunks() {
        let mut reader = ChunkReader::new(&["18:45", ":12.3#10.5,45.2,W,", "1,2,3,5,0#"]);
        let reply = read_reply(&mut reader, analyze(":U2#:GS#:Ginfo#"), Duration::from_secs(1)).unwrap();
        assert_eq!(reply.as_str(), "18:45:12.3#10.5,45.2,W,1,2,3,5,0#");
    }

    #[test]
    fn test_slow_reply_with_bare_flag_digits() {
        let mut reader = ChunkReader::new(&["+012.3#10", "1+80*#+05*#"]);
        let batch = gmwire::slow_batch(21400);
        let reply = read_reply(&mut reader, analyze(&batch), Duration::from_secs(1)).unwrap();
        assert_eq!(reply.as_str(), "+012.3#101+80*#+05*#");
        assert!(gmwire::parse_slow(reply.as_str(), false).is_ok());
    }

    #[test]
    fn test_short_terminated_reply_times_out() {
        let mut reader = ChunkReader::new(&["18:45:12.3#"]);
        let err = read_reply(&mut reader, analyze(":GS#:Ginfo#"), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, MountError::ReadTimeout));
    }

    #[test]
    fn test_short_raw_reply_accepted_on_timeout() {
        let mut reader = ChunkReader::new(&["1"]);
        let reply = read_reply(&mut reader, analyze(":modeldel00#:modelsv00#"), Duration::from_secs(1)).unwrap();
        assert_eq!(reply.as_str(), "1");
    }

    #[test]
    fn test_raw_reply_without_bytes_times_out() {
        let mut reader = ChunkReader::new(&[]);
        let err = read_reply(&mut reader, analyze(":modelld0X#"), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, MountError::ReadTimeout));
    }

    #[test]
    fn test_connect_noise_levels() {
        let mut noise = ConnectNoise::default();
        for _ in 0..5 {
            noise.failure("fast", "mount:3492", "refused");
        }
        assert_eq!(noise.failures(), 5);
        noise.success("fast", "mount:3492");
        assert_eq!(noise.failures(), 0);
    }

    #[test]
    fn test_connect_failure_enters_cooldown() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let config = ConnectionConfig::new("127.0.0.1", port)
            .with_timeout(Duration::from_millis(200))
            .with_cooldown(Duration::from_secs(60));
        let mut conn = TcpConnection::new(config);

        let first = conn.send_batch(":GS#").unwrap_err();
        assert!(first.is_connection_loss());
        let second = conn.send_batch(":GS#").unwrap_err();
        match second {
            MountError::ConnectFailed { reason, .. } => assert_eq!(reason, "cooling down"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_exchange_with_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b":U2#:GS#");
            sock.write_all(b"12:00:00.00#").unwrap();
            // Keep the socket open until the client has read
            let _ = sock.read(&mut buf);
        });

        let mut conn = TcpConnection::new(ConnectionConfig::new("127.0.0.1", port));
        let reply = conn.send_batch(":U2#:GS#").unwrap();
        assert_eq!(reply.fields(), vec!["12:00:00.00"]);
        assert!(conn.is_connected());
        conn.close();
        assert!(!conn.is_connected());
        server.join().unwrap();
    }
}
