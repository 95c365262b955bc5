//! Packeter
//!
//! One per live connection: the outbound queue, the read/send switches and
//! the notifications for decoded messages and asynchronous errors.
//!
//! ## Lifecycle
//! ```text
//!   Idle ──set_reading(true)──▶ Reading   (inserted into the registry)
//!   Reading ──set_reading(false) / close──▶ Idle   (removed)
//! ```
//! Sending is an independent switch: while disabled, batches drained by
//! the sender loop are dropped. A batch the peer only partly accepted is
//! kept and finished before the next batch is drained.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::{Mutex, MutexGuard};

use crate::codec::DynValue;
use crate::error::{Result, WireError};
use crate::protocol::{Packet, PacketRef};

use super::event::Event;
use super::scheduler::Scheduler;
use super::transport::Transport;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A decoded inbound message
#[derive(Clone)]
pub struct Incoming {
    pub id: u16,
    pub packet: PacketRef,
}

impl Incoming {
    pub fn is<T: Any>(&self) -> bool {
        self.packet.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.packet.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for Incoming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incoming").field("id", &self.id).finish()
    }
}

/// Scheduler entry for one connection
pub struct Packeter {
    /// Identity of the underlying connection
    connection_id: u64,

    transport: Arc<dyn Transport>,

    scheduler: Arc<Scheduler>,

    /// Lower values sort first in the registry
    priority: AtomicI32,

    /// Messages waiting for the sender loop
    queue: Mutex<VecDeque<DynValue>>,

    /// Encoded bytes the peer has not accepted yet
    unsent: Mutex<BytesMut>,

    reading: AtomicBool,

    /// Serializes reading transitions with the matching registry update
    reading_transition: Mutex<()>,

    sending: AtomicBool,

    received: Event<Incoming>,

    errors: Event<Arc<WireError>>,
}

impl Packeter {
    /// Bind a packeter to an open transport. Sending starts enabled,
    /// reading disabled.
    pub fn new(transport: Arc<dyn Transport>, scheduler: &Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            scheduler: Arc::clone(scheduler),
            priority: AtomicI32::new(0),
            queue: Mutex::new(VecDeque::new()),
            unsent: Mutex::new(BytesMut::new()),
            reading: AtomicBool::new(false),
            reading_transition: Mutex::new(()),
            sending: AtomicBool::new(true),
            received: Event::new(),
            errors: Event::new(),
        })
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn peer_addr(&self) -> &str {
        self.transport.peer_addr()
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    // =========================================================================
    // Scheduling state
    // =========================================================================

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Acquire)
    }

    pub fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Release);
        if self.is_reading() {
            self.scheduler.registry().resort();
        }
    }

    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::Acquire)
    }

    /// Enable or disable reading; registers with or leaves the scheduler
    pub fn set_reading(self: &Arc<Self>, enabled: bool) {
        let _transition = self.reading_transition.lock();
        if self.reading.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }
        if enabled {
            self.scheduler.attach(Arc::clone(self));
        } else {
            self.scheduler.detach(self);
        }
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    pub fn set_sending(&self, enabled: bool) {
        self.sending.store(enabled, Ordering::Release);
    }

    /// Enable both reading and sending
    pub fn activate(self: &Arc<Self>) {
        self.set_sending(true);
        self.set_reading(true);
    }

    /// Leave the scheduler and close the transport
    pub fn close(self: &Arc<Self>) {
        self.set_reading(false);
        self.transport.close();
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Queue `message` for the sender loop
    pub fn send_packet<P: Packet>(&self, message: P) -> Result<()> {
        self.ensure_registered::<P>()?;
        self.queue.lock().push_back(Box::new(message));
        tracing::trace!("Queued {} for {}", std::any::type_name::<P>(), self.peer_addr());
        Ok(())
    }

    /// Send `message` and invoke `callback` with the next `R` decoded on
    /// any connection. There is no timeout unless one is configured.
    pub fn request<P, R>(
        &self,
        message: P,
        callback: impl FnOnce(Arc<R>) + Send + 'static,
    ) -> Result<()>
    where
        P: Packet,
        R: Packet,
    {
        self.ensure_registered::<P>()?;
        self.ensure_registered::<R>()?;
        // Registered before queueing so a fast reply cannot slip past
        self.scheduler.correlator().register(
            TypeId::of::<R>(),
            std::any::type_name::<R>(),
            move |packet: PacketRef| {
                if let Ok(response) = packet.downcast::<R>() {
                    callback(response);
                }
            },
        );
        self.send_packet(message)
    }

    fn ensure_registered<P: Packet>(&self) -> Result<()> {
        match self.scheduler.protocol().packets().id_of(TypeId::of::<P>()) {
            Some(_) => Ok(()),
            None => Err(WireError::Protocol(format!(
                "{} is not a registered packet",
                std::any::type_name::<P>()
            ))),
        }
    }

    /// Take up to `max` queued messages, oldest first
    pub(crate) fn drain(&self, max: usize) -> Vec<DynValue> {
        let mut queue = self.queue.lock();
        let count = max.min(queue.len());
        queue.drain(..count).collect()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Bytes of an earlier batch still waiting for the peer
    pub fn unsent_bytes(&self) -> usize {
        self.unsent.lock().len()
    }

    pub(crate) fn unsent(&self) -> MutexGuard<'_, BytesMut> {
        self.unsent.lock()
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Fired once per decoded inbound message
    pub fn received(&self) -> &Event<Incoming> {
        &self.received
    }

    /// Fired for decode and send failures on this connection
    pub fn errors(&self) -> &Event<Arc<WireError>> {
        &self.errors
    }

    pub(crate) fn report(&self, error: WireError) {
        tracing::warn!("Connection {}: {}", self.peer_addr(), error);
        self.errors.publish(&Arc::new(error));
    }
}

impl PartialEq for Packeter {
    fn eq(&self, other: &Self) -> bool {
        self.connection_id == other.connection_id
    }
}

impl Eq for Packeter {}

impl std::fmt::Debug for Packeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packeter")
            .field("connection_id", &self.connection_id)
            .field("peer_addr", &self.peer_addr())
            .field("priority", &self.priority())
            .field("reading", &self.is_reading())
            .field("sending", &self.is_sending())
            .finish()
    }
}
