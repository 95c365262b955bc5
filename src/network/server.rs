//! TCP Server
//!
//! Accepts connections and hands each one to the scheduler.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::error::Result;

use super::packeter::Packeter;
use super::scheduler::Scheduler;
use super::transport::TcpTransport;

/// Accept loop feeding new connections into a [`Scheduler`]
pub struct Server {
    scheduler: Arc<Scheduler>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Bind to the scheduler's configured listen address
    pub fn bind(scheduler: Arc<Scheduler>) -> Result<Self> {
        let addr = scheduler.config().listen_addr.clone();
        Self::bind_to(scheduler, addr)
    }

    pub fn bind_to(scheduler: Arc<Scheduler>, addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            scheduler,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Flag that stops [`Server::run`] when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Accept connections until shut down (blocking).
    ///
    /// Each connection is activated before `on_accept` sees it.
    pub fn run(&self, mut on_accept: impl FnMut(&Arc<Packeter>)) -> Result<()> {
        let config = self.scheduler.config();
        tracing::info!("Listening on {}", self.local_addr()?);

        while !self.shutdown.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.scheduler.registry().len() >= config.max_connections {
                        tracing::warn!("Rejecting {}: connection limit reached", addr);
                        continue;
                    }
                    let transport = match TcpTransport::new(stream) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::warn!("Failed to set up connection from {}: {}", addr, e);
                            continue;
                        }
                    };
                    let packeter = Packeter::new(Arc::new(transport), &self.scheduler);
                    packeter.activate();
                    tracing::debug!("Accepted connection from {}", addr);
                    on_accept(&packeter);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(config.tick());
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(config.tick());
                }
            }
        }

        tracing::info!("Server shutting down");
        Ok(())
    }

    /// Signal the server to stop accepting
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// Open an outbound connection and activate it on `scheduler`
pub fn connect(scheduler: &Arc<Scheduler>, addr: impl ToSocketAddrs) -> Result<Arc<Packeter>> {
    let transport = TcpTransport::connect(addr)?;
    let packeter = Packeter::new(Arc::new(transport), scheduler);
    packeter.activate();
    Ok(packeter)
}
