//! Serialized user command path
//!
//! One worker thread owns the command connection and drains a FIFO of work
//! items. Pollers never touch this connection, so a slow user command cannot
//! delay telemetry.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use gmlink::{Connection, LinkStatistics, MountClient};
use gmwire::{escape_log, Channel, MountError, MountResult, Reply};

use crate::config::constants::COMMAND_IDLE_POLL;
use crate::context::{CoreContext, StopSignal};

/// Filled exactly once by the command worker
pub struct ReplySlot {
    tx: SyncSender<MountResult<Reply>>,
}

impl ReplySlot {
    fn fill(self, result: MountResult<Reply>) {
        // The waiter may have given up already
        let _ = self.tx.send(result);
    }
}

/// Caller's end of a `ReplySlot`
pub struct PendingReply {
    rx: Receiver<MountResult<Reply>>,
}

impl PendingReply {
    pub fn wait(self) -> MountResult<Reply> {
        self.rx.recv().unwrap_or(Err(MountError::Canceled))
    }

    pub fn wait_timeout(self, timeout: Duration) -> MountResult<Reply> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(MountError::ReadTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(MountError::Canceled),
        }
    }
}

pub fn reply_slot() -> (ReplySlot, PendingReply) {
    let (tx, rx) = mpsc::sync_channel(1);
    (ReplySlot { tx }, PendingReply { rx })
}

pub enum WorkItem {
    /// Fire and forget
    Command(String),
    Request { command: String, slot: ReplySlot },
}

impl WorkItem {
    fn command(&self) -> &str {
        match self {
            WorkItem::Command(c) => c,
            WorkItem::Request { command, .. } => command,
        }
    }

    fn cancel(self) {
        if let WorkItem::Request { slot, .. } = self {
            slot.fill(Err(MountError::Canceled));
        }
    }
}

pub struct CommandChannel {
    sender: Mutex<Option<Sender<WorkItem>>>,
    stop: Arc<StopSignal>,
    handle: Mutex<Option<JoinHandle<LinkStatistics>>>,
    request_timeout: Duration,
}

impl CommandChannel {
    pub fn start<C: Connection + 'static>(
        connection: C,
        ctx: CoreContext,
        request_timeout: Duration,
    ) -> MountResult<Self> {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(StopSignal::new());
        let worker_stop = stop.clone();
        let client = MountClient::new(connection);
        let handle = thread::Builder::new()
            .name("gm-command".to_string())
            .spawn(move || run_worker(client, rx, worker_stop, ctx))?;
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            stop,
            handle: Mutex::new(Some(handle)),
            request_timeout,
        })
    }

    fn enqueue(&self, item: WorkItem) -> MountResult<()> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) if !self.stop.is_set() => tx.send(item).map_err(|e| {
                e.0.cancel();
                MountError::Canceled
            }),
            _ => {
                item.cancel();
                Err(MountError::Canceled)
            }
        }
    }

    /// Queue a command whose reply, if any, is discarded
    pub fn submit(&self, command: impl Into<String>) -> MountResult<()> {
        self.enqueue(WorkItem::Command(command.into()))
    }

    /// Queue a command and return the slot its reply will land in
    pub fn submit_request(&self, command: impl Into<String>) -> MountResult<PendingReply> {
        let (slot, pending) = reply_slot();
        self.enqueue(WorkItem::Request {
            command: command.into(),
            slot,
        })?;
        Ok(pending)
    }

    /// Queue a command and wait for its reply
    pub fn request(&self, command: impl Into<String>) -> MountResult<Reply> {
        self.submit_request(command)?.wait_timeout(self.request_timeout)
    }

    pub fn is_running(&self) -> bool {
        !self.stop.is_set()
    }

    /// Stop the worker. Queued requests and any reply still outstanding are
    /// answered with `Canceled`.
    pub fn stop(&self) -> Option<LinkStatistics> {
        self.stop.set();
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                warn!("command worker panicked");
                None
            }
        }
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<C: Connection>(
    mut client: MountClient<C>,
    rx: Receiver<WorkItem>,
    stop: Arc<StopSignal>,
    ctx: CoreContext,
) -> LinkStatistics {
    info!("command channel started");
    loop {
        if stop.is_set() {
            break;
        }
        let item = match rx.recv_timeout(COMMAND_IDLE_POLL) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if stop.is_set() {
            item.cancel();
            break;
        }

        debug!("command: {}", escape_log(item.command()));
        let result = client.query(item.command());
        let error = result.as_ref().err();
        if let Some(e) = error {
            warn!("command {} failed: {}", escape_log(item.command()), e);
        }
        ctx.record_exchange(
            Channel::Command,
            &client.endpoint(),
            client.is_connected(),
            error,
        );

        if let WorkItem::Request { slot, .. } = item {
            if stop.is_set() {
                slot.fill(Err(MountError::Canceled));
            } else {
                slot.fill(result);
            }
        }
    }

    for item in rx.try_iter() {
        item.cancel();
    }
    client.close();
    ctx.record_disconnected(Channel::Command, &client.endpoint());
    info!("command channel stopped");
    client.statistics()
}
