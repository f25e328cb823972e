//! High-level client interface for gmlink
//!
//! Wraps a `Connection` with typed queries for the poll batches and keeps
//! simple traffic statistics.

use gmwire::{
    batches, parse_fast, parse_medium, parse_once, parse_slow, slow_batch, FastReply,
    MediumReply, MountResult, OnceReply, Reply, SlowReply, FW_DUT_QUERY,
};

use crate::connection::Connection;

/// Traffic counters for one conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatistics {
    pub batches_sent: u64,
    pub replies_parsed: u64,
    pub send_failures: u64,
    pub parse_failures: u64,
}

/// Typed client over one mount connection
pub struct MountClient<C: Connection> {
    connection: C,
    stats: LinkStatistics,
}

impl<C: Connection> MountClient<C> {
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            stats: LinkStatistics::default(),
        }
    }

    /// Send a raw batch
    pub fn query(&mut self, batch: &str) -> MountResult<Reply> {
        self.stats.batches_sent += 1;
        self.connection.send_batch(batch).map_err(|e| {
            self.stats.send_failures += 1;
            e
        })
    }

    fn query_parsed<T>(&mut self, batch: &str, parse: impl FnOnce(&str) -> MountResult<T>) -> MountResult<T> {
        let reply = self.query(batch)?;
        match parse(reply.as_str()) {
            Ok(v) => {
                self.stats.replies_parsed += 1;
                Ok(v)
            }
            Err(e) => {
                self.stats.parse_failures += 1;
                Err(e)
            }
        }
    }

    /// Site and firmware
    pub fn read_once(&mut self) -> MountResult<OnceReply> {
        self.query_parsed(batches::ONCE, parse_once)
    }

    /// LST and the `Ginfo` pointing tuple
    pub fn read_fast(&mut self) -> MountResult<FastReply> {
        self.query_parsed(batches::FAST, parse_fast)
    }

    /// Slew rate, flip timing, refraction inputs
    pub fn read_medium(&mut self) -> MountResult<MediumReply> {
        self.query_parsed(batches::MEDIUM, parse_medium)
    }

    /// Settings block; the DUT1 query is only sent to firmware that knows it
    pub fn read_slow(&mut self, fw: u32) -> MountResult<SlowReply> {
        let with_dut = fw >= FW_DUT_QUERY;
        self.query_parsed(&slow_batch(fw), |r| parse_slow(r, with_dut))
    }

    pub fn statistics(&self) -> LinkStatistics {
        self.stats
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn endpoint(&self) -> String {
        self.connection.endpoint()
    }

    pub fn close(&mut self) {
        self.connection.close()
    }

    /// Get the underlying connection for advanced use
    pub fn connection(&self) -> &C {
        &self.connection
    }
}
