//! `Acceptor`: the named-interface collaborator standing in for
//! transport-specific bind/listen/accept machinery. A concrete
//! implementation wraps a real `TcpListener` or local socket;
//! `seismo-listener` only needs the shape below.

use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    TcpV4,
    TcpV6,
    LocalSocket,
}

pub trait Acceptor: Send + Sync {
    /// The transport handle handed to a client worker once admitted.
    type Connection: Send + 'static;

    fn protocol(&self) -> Protocol;

    fn tls_enabled(&self) -> bool {
        false
    }

    /// Block until a connection arrives. Spec §4.4 step 4: `ECONNABORTED`
    /// and interrupted errors are retried by the caller; anything else
    /// ends the accept loop.
    fn accept(&self) -> std::io::Result<(Self::Connection, SocketAddr)>;

    /// Disable Nagle / apply other per-connection socket options (spec
    /// §4.4 step 3a, "if not local socket"). No-op by default.
    fn configure_connection(&self, _conn: &Self::Connection) -> std::io::Result<()> {
        Ok(())
    }

    fn local_endpoint(&self) -> String;

    /// Stop accepting and, for a local socket, remove the path entry
    ///.
    fn close(&self);
}
