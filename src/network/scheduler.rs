//! Scheduler
//!
//! Drives every registered [`Packeter`]:
//!
//! - **Worker pool**: `ceil(connections / bucket_capacity)` threads (at
//!   least one). Worker `i` polls the registry window starting at
//!   `i * bucket_capacity` every `tick_ms`. The pool grows on demand; a
//!   worker whose window starts past the end of the registry retires.
//! - **Sender loop**: one thread that, every `send_tick_ms`, drains up to
//!   `max_packets_per_tick` messages per connection and writes them as a
//!   single buffer. Writes never wait on a peer: bytes it does not accept
//!   stay with its packeter until a later tick.
//!
//! Window membership is positional in a priority-sorted list that changes
//! as connections come and go, so a connection is not pinned to a worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, WireError};
use crate::protocol::{PacketRef, Protocol};

use super::correlator::RequestCorrelator;
use super::packeter::{Incoming, Packeter};
use super::registry::ConnectionRegistry;

/// Owner of the registry, the worker pool and the sender loop
pub struct Scheduler {
    config: Config,

    protocol: Arc<Protocol>,

    registry: ConnectionRegistry,

    correlator: RequestCorrelator,

    running: AtomicBool,

    /// Bumped on every start/stop; threads from an older run exit
    generation: AtomicU64,

    /// Worker handles, indexed by worker number
    workers: Mutex<Vec<JoinHandle<()>>>,

    sender: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: Config, protocol: Arc<Protocol>) -> Arc<Self> {
        Arc::new(Self {
            config,
            protocol,
            registry: ConnectionRegistry::new(),
            correlator: RequestCorrelator::new(),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
            sender: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the worker pool and the sender loop
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let scheduler = Arc::clone(self);
        let sender = thread::Builder::new()
            .name("wirepack-sender".to_string())
            .spawn(move || scheduler.sender_loop(generation))?;
        *self.sender.lock() = Some(sender);

        self.ensure_workers()?;
        tracing::debug!("Scheduler started (generation {})", generation);
        Ok(())
    }

    /// Stop scheduling. Threads are not joined; each exits after its
    /// current tick.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.workers.lock().clear();
        self.sender.lock().take();
        tracing::debug!("Scheduler stopped");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::Acquire) == generation
    }

    pub(crate) fn attach(self: &Arc<Self>, packeter: Arc<Packeter>) {
        let peer = packeter.peer_addr().to_string();
        if self.registry.insert(packeter) {
            tracing::debug!("Registered {} ({} connections)", peer, self.registry.len());
        }
        if self.is_running() {
            if let Err(e) = self.ensure_workers() {
                tracing::error!("Failed to grow worker pool: {}", e);
            }
        }
    }

    pub(crate) fn detach(&self, packeter: &Packeter) {
        if self.registry.remove(packeter) {
            tracing::debug!(
                "Unregistered {} ({} connections)",
                packeter.peer_addr(),
                self.registry.len()
            );
        }
    }

    // =========================================================================
    // Worker Pool
    // =========================================================================

    fn workers_needed(&self) -> usize {
        self.registry
            .len()
            .div_ceil(self.config.bucket_capacity)
            .max(1)
    }

    /// Spawn workers until the pool covers the registry
    fn ensure_workers(self: &Arc<Self>) -> Result<()> {
        let generation = self.generation.load(Ordering::Acquire);
        let needed = self.workers_needed();
        let mut workers = self.workers.lock();
        while workers.len() < needed && self.is_current(generation) {
            let index = workers.len();
            let scheduler = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(format!("wirepack-worker-{}", index))
                .spawn(move || scheduler.worker_loop(index, generation))
                .map_err(WireError::Io)?;
            workers.push(handle);
            tracing::debug!("Spawned worker {}", index);
        }
        Ok(())
    }

    /// Drop worker `index` from the pool if it is the highest one
    fn retire(&self, index: usize, generation: u64) -> bool {
        let mut workers = self.workers.lock();
        if !self.is_current(generation) || workers.len() != index + 1 {
            return false;
        }
        workers.pop();
        true
    }

    fn worker_loop(self: Arc<Self>, index: usize, generation: u64) {
        let bucket = self.config.bucket_capacity;
        let offset = index * bucket;
        let mut buf = vec![0u8; self.config.read_window];

        while self.is_current(generation) {
            if let Err(e) = self.ensure_workers() {
                tracing::error!("Failed to grow worker pool: {}", e);
            }

            let snapshot = self.registry.snapshot();
            if index > 0 && offset > snapshot.len() && self.retire(index, generation) {
                tracing::debug!("Worker {} retired", index);
                return;
            }

            for packeter in snapshot.iter().skip(offset).take(bucket) {
                self.poll(packeter, &mut buf);
            }

            thread::sleep(self.config.tick());
        }
        tracing::debug!("Worker {} exited", index);
    }

    /// One read pass over a single connection, peeking into the worker's
    /// `buf`
    fn poll(&self, packeter: &Arc<Packeter>, buf: &mut [u8]) {
        if !packeter.is_reading() {
            return;
        }
        let transport = packeter.transport();

        let len = match transport.peek(buf) {
            Ok(n) => n,
            Err(e) => {
                packeter.report(e.into());
                return;
            }
        };
        if len == 0 {
            if !transport.is_open() {
                tracing::debug!("Peer {} disconnected", packeter.peer_addr());
                packeter.set_reading(false);
            }
            return;
        }

        let consumed = self.decode_pass(packeter, &buf[..len]);

        // Bytes past the decode cap stay on the socket for the next pass
        if let Err(e) = transport.receive(&mut buf[..consumed]) {
            packeter.report(e.into());
        }
    }

    /// Decode consecutive packets from `buf`; returns the bytes to consume.
    /// A failure abandons the rest of the buffer.
    fn decode_pass(&self, packeter: &Arc<Packeter>, buf: &[u8]) -> usize {
        let cap = self.config.decode_cap();
        let mut cursor = 0;
        let mut decoded = 0;

        while cursor < buf.len() && decoded < cap {
            match self.protocol.decode_packet(buf, &mut cursor) {
                Ok((id, packet)) => {
                    decoded += 1;
                    self.deliver(packeter, id, packet);
                }
                Err(e) => {
                    packeter.report(e);
                    return buf.len();
                }
            }
        }
        if decoded == cap && cursor < buf.len() {
            tracing::trace!(
                "Decode cap reached for {}, {} bytes deferred",
                packeter.peer_addr(),
                buf.len() - cursor
            );
        }
        cursor
    }

    fn deliver(&self, packeter: &Packeter, id: u16, packet: PacketRef) {
        tracing::trace!("Received packet {} from {}", id, packeter.peer_addr());
        packeter.received().publish(&Incoming {
            id,
            packet: PacketRef::clone(&packet),
        });
        self.correlator.fulfill(&packet);
    }

    // =========================================================================
    // Sender Loop
    // =========================================================================

    fn sender_loop(self: Arc<Self>, generation: u64) {
        while self.is_current(generation) {
            let snapshot = self.registry.snapshot();
            for packeter in snapshot.iter() {
                if let Err(e) = self.flush(packeter) {
                    packeter.report(e);
                }
            }

            if let Some(timeout) = self.config.request_timeout() {
                let expired = self.correlator.purge_expired(timeout);
                if expired > 0 {
                    tracing::debug!("Purged {} expired requests", expired);
                }
            }

            thread::sleep(self.config.send_tick());
        }
        tracing::debug!("Sender loop exited");
    }

    /// Finish any partly written batch, then drain one new batch from
    /// `packeter` and write it as a single buffer
    fn flush(&self, packeter: &Packeter) -> Result<()> {
        let mut unsent = packeter.unsent();
        if !unsent.is_empty() {
            self.write_unsent(packeter, &mut unsent)?;
            if !unsent.is_empty() {
                // Peer still backed up; leave the queue for a later tick
                return Ok(());
            }
        }

        let batch = packeter.drain(self.config.max_packets_per_tick);
        if batch.is_empty() {
            return Ok(());
        }

        let mut out = BytesMut::new();
        for message in &batch {
            self.protocol.encode_packet(&**message, &mut out)?;
        }

        if !packeter.is_sending() || !packeter.is_open() {
            tracing::debug!(
                "Dropped {} packets for {} (sending disabled or closed)",
                batch.len(),
                packeter.peer_addr()
            );
            return Ok(());
        }

        *unsent = out;
        self.write_unsent(packeter, &mut unsent)?;
        tracing::trace!("Sent {} packets to {}", batch.len(), packeter.peer_addr());
        Ok(())
    }

    /// Write what the peer accepts now; the remainder stays in `unsent`
    fn write_unsent(&self, packeter: &Packeter, unsent: &mut BytesMut) -> Result<()> {
        if !packeter.is_open() {
            tracing::debug!(
                "Dropped {} unsent bytes for closed {}",
                unsent.len(),
                packeter.peer_addr()
            );
            unsent.clear();
            return Ok(());
        }

        match packeter.transport().send(&unsent[..]) {
            Ok(written) => {
                unsent.advance(written);
                if !unsent.is_empty() {
                    tracing::trace!(
                        "{} bytes deferred for {}",
                        unsent.len(),
                        packeter.peer_addr()
                    );
                }
                Ok(())
            }
            Err(e) => {
                unsent.clear();
                Err(WireError::Network(format!(
                    "send to {} failed: {}",
                    packeter.peer_addr(),
                    e
                )))
            }
        }
    }
}
