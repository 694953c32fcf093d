//! Per-endpoint accept loop, admission cascade, and `ClientInfo`
//! construction.

mod acceptor;
mod client_info;
mod listener;

pub use acceptor::{Acceptor, Protocol};
pub use client_info::{ClientInfo, ClientMeta, RateMeter};
pub use listener::{AcceptOutcome, Listener};
