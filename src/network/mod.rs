//! Network Module
//!
//! Per-connection scheduling over non-blocking sockets.
//!
//! ## Architecture
//! - One [`Packeter`] per connection (outbound queue + notifications)
//! - Worker pool polling the priority-sorted registry in fixed windows
//! - Single sender loop flushing outbound queues in batches
//! - Request correlator matching responses by type

mod correlator;
mod event;
mod packeter;
mod registry;
mod scheduler;
mod server;
mod transport;

pub use correlator::RequestCorrelator;
pub use event::{Event, SubscriptionId};
pub use packeter::{Incoming, Packeter};
pub use registry::{ConnectionRegistry, Snapshot};
pub use scheduler::Scheduler;
pub use server::{connect, Server};
pub use transport::{TcpTransport, Transport};
