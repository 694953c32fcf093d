//! `Listener`: per-endpoint accept loop and admission cascade.

use std::net::IpAddr;
use std::sync::Arc;

use seismo_policy::{Admission, IpPolicy};
use seismo_registry::{ThreadEntry, ThreadKind, ThreadRegistry, ThreadState};
use strata_ring::PacketRing;
use tracing::{info, warn};

use crate::acceptor::Acceptor;
use crate::client_info::{ClientInfo, ClientMeta};

/// Outcome of a single accept, before the caller decides whether to spawn
/// a worker.
pub enum AcceptOutcome<C> {
    Admitted(ClientInfo<C>),
    Rejected,
}

pub struct Listener<A: Acceptor> {
    acceptor: A,
    policy: Arc<IpPolicy>,
    registry: Arc<ThreadRegistry>,
    ring: PacketRing,
    maxclients: u64,
    maxclients_per_ip: u64,
    same_addr_count: Box<dyn Fn(IpAddr) -> u64 + Send + Sync>,
    entry: Arc<ThreadEntry>,
}

impl<A: Acceptor> Listener<A> {
    pub fn new(
        acceptor: A,
        policy: Arc<IpPolicy>,
        registry: Arc<ThreadRegistry>,
        ring: PacketRing,
        maxclients: u64,
        maxclients_per_ip: u64,
        same_addr_count: impl Fn(IpAddr) -> u64 + Send + Sync + 'static,
    ) -> Self {
        let entry = ThreadEntry::new(ThreadKind::Listener);
        registry.push_server(entry.clone());
        Self {
            acceptor,
            policy,
            registry,
            ring,
            maxclients,
            maxclients_per_ip,
            same_addr_count: Box::new(same_addr_count),
            entry,
        }
    }

    pub fn entry(&self) -> &Arc<ThreadEntry> {
        &self.entry
    }

    /// Closes the underlying acceptor directly. Callers stash a closure over this in the listener's
    /// `ThreadEntry` params so the supervisor can invoke it without
    /// depending on `A`.
    pub fn close(&self) {
        self.acceptor.close();
    }

    /// Bind/listen happened in `A` already; here we flip ACTIVE and log,
    /// then loop accepting connections, handing each admitted one to
    /// `on_admit`.
    pub fn run(&self, mut on_admit: impl FnMut(ClientInfo<A::Connection>)) {
        self.entry.set_state(ThreadState::Active);
        info!(protocol = ?self.acceptor.protocol(), tls = self.acceptor.tls_enabled(), "listener active");

        loop {
            if self.entry.state() == ThreadState::Close {
                break;
            }
            match self.accept_once() {
                Ok(AcceptOutcome::Admitted(info)) => on_admit(info),
                Ok(AcceptOutcome::Rejected) => {}
                Err(err) => {
                    if self.entry.state() == ThreadState::Close {
                        break;
                    }
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::ConnectionAborted | std::io::ErrorKind::Interrupted
                    ) {
                        continue;
                    }
                    warn!(error = %err, "listener accept error, exiting loop");
                    break;
                }
            }
        }

        self.acceptor.close();
        self.entry.set_state(ThreadState::Closed);
    }

    /// One iteration of the accept loop, split out
    /// from `run` so the admission cascade can be exercised directly.
    pub fn accept_once(&self) -> std::io::Result<AcceptOutcome<A::Connection>> {
        let (connection, addr) = self.acceptor.accept()?;
        if !matches!(self.acceptor.protocol(), crate::acceptor::Protocol::LocalSocket) {
            let _ = self.acceptor.configure_connection(&connection);
        }

        let ip = addr.ip();
        let total = self.registry.clientcount();
        let same_addr = (self.same_addr_count)(ip);

        match self.policy.evaluate(ip, same_addr, total, self.maxclients, self.maxclients_per_ip) {
            Admission::Reject => {
                info!(%ip, "connection rejected by admission policy");
                Ok(AcceptOutcome::Rejected)
            }
            Admission::Admit {
                writeperm,
                trusted,
                limit_pattern,
            } => {
                let meta = Arc::new(ClientMeta::new(
                    ip,
                    self.acceptor.local_endpoint(),
                    self.acceptor.tls_enabled(),
                    writeperm,
                    trusted,
                    limit_pattern,
                ));
                let entry = ThreadEntry::new(ThreadKind::Client);
                entry.set_params(meta.clone());
                self.registry.push_client(entry.clone());
                info!(%ip, writeperm, trusted, "connection admitted");
                Ok(AcceptOutcome::Admitted(ClientInfo {
                    connection,
                    entry,
                    meta,
                    cursor: self.ring.open_cursor(),
                }))
            }
        }
    }
}
