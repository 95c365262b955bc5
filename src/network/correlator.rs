//! Request Correlator
//!
//! Matches decoded messages against outstanding requests by concrete type.
//! There is no correlation id: two outstanding requests expecting the same
//! type are fulfilled in registration order by whichever matching messages
//! arrive first, from any connection.

use std::any::TypeId;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::protocol::PacketRef;

type Callback = Box<dyn FnOnce(PacketRef) + Send>;

struct PendingRequest {
    expected: TypeId,
    expected_name: &'static str,
    callback: Callback,
    registered_at: Instant,
}

/// Outstanding requests awaiting a response
#[derive(Default)]
pub struct RequestCorrelator {
    pending: Mutex<Vec<PendingRequest>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        expected: TypeId,
        expected_name: &'static str,
        callback: impl FnOnce(PacketRef) + Send + 'static,
    ) {
        self.pending.lock().push(PendingRequest {
            expected,
            expected_name,
            callback: Box::new(callback),
            registered_at: Instant::now(),
        });
    }

    /// Hand `packet` to the oldest request expecting its type.
    /// Returns true if a request was fulfilled.
    pub fn fulfill(&self, packet: &PacketRef) -> bool {
        let ty = (**packet).type_id();
        let request = {
            let mut pending = self.pending.lock();
            match pending.iter().position(|r| r.expected == ty) {
                Some(at) => pending.remove(at),
                None => return false,
            }
        };
        tracing::trace!("Fulfilled pending request for {}", request.expected_name);
        // Outside the lock: the callback may issue new requests
        (request.callback)(PacketRef::clone(packet));
        true
    }

    /// Drop requests older than `timeout`. Returns how many were dropped.
    pub fn purge_expired(&self, timeout: Duration) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|r| {
            let keep = r.registered_at.elapsed() < timeout;
            if !keep {
                tracing::debug!("Pending request for {} expired", r.expected_name);
            }
            keep
        });
        before - pending.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}
