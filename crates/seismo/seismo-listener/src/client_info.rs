//! `ClientInfo` / `ClientMeta` and the per-client
//! rate meter.

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

/// Keeps `(cur, prev)` pairs for tx/rx packets and bytes, plus the derived
/// rates: `dt = max(now - ratetime, 1s)`, `rate = (cur - prev) / dt`, then
/// `prev <- cur`, `ratetime <- now`. The first tick (no prior `ratetime`)
/// uses `dt = 1s`.
#[derive(Debug, Default)]
pub struct RateMeter {
    tx_packets_cur: u64,
    tx_packets_prev: u64,
    tx_bytes_cur: u64,
    tx_bytes_prev: u64,
    rx_packets_cur: u64,
    rx_packets_prev: u64,
    rx_bytes_cur: u64,
    rx_bytes_prev: u64,
    ratetime: Option<Instant>,
    pub tx_packet_rate: f64,
    pub tx_byte_rate: f64,
    pub rx_packet_rate: f64,
    pub rx_byte_rate: f64,
    /// Deltas observed by the most recent `tick`, for callers (the
    /// supervisor) that need to fold per-client activity into a
    /// server-wide total without re-deriving it from cur/prev.
    pub last_tx_packets: u64,
    pub last_tx_bytes: u64,
    pub last_rx_packets: u64,
    pub last_rx_bytes: u64,
}

impl RateMeter {
    pub fn record_tx(&mut self, packets: u64, bytes: u64) {
        self.tx_packets_cur += packets;
        self.tx_bytes_cur += bytes;
    }

    pub fn record_rx(&mut self, packets: u64, bytes: u64) {
        self.rx_packets_cur += packets;
        self.rx_bytes_cur += bytes;
    }

    pub fn tick(&mut self, now: Instant) {
        let dt = match self.ratetime {
            Some(prev) => (now - prev).as_secs_f64().max(1.0),
            None => 1.0,
        };
        self.tx_packet_rate = (self.tx_packets_cur - self.tx_packets_prev) as f64 / dt;
        self.tx_byte_rate = (self.tx_bytes_cur - self.tx_bytes_prev) as f64 / dt;
        self.rx_packet_rate = (self.rx_packets_cur - self.rx_packets_prev) as f64 / dt;
        self.rx_byte_rate = (self.rx_bytes_cur - self.rx_bytes_prev) as f64 / dt;

        self.last_tx_packets = self.tx_packets_cur - self.tx_packets_prev;
        self.last_tx_bytes = self.tx_bytes_cur - self.tx_bytes_prev;
        self.last_rx_packets = self.rx_packets_cur - self.rx_packets_prev;
        self.last_rx_bytes = self.rx_bytes_cur - self.rx_bytes_prev;

        self.tx_packets_prev = self.tx_packets_cur;
        self.tx_bytes_prev = self.tx_bytes_cur;
        self.rx_packets_prev = self.rx_packets_cur;
        self.rx_bytes_prev = self.rx_bytes_cur;
        self.ratetime = Some(now);
    }

    pub fn tx_bytes_total(&self) -> u64 {
        self.tx_bytes_cur
    }

    pub fn rx_bytes_total(&self) -> u64 {
        self.rx_bytes_cur
    }
}

/// The metadata half of a `ClientInfo`: shareable between the client
/// worker (which updates rates/last-exchange as it does I/O) and the
/// supervisor (which reads them during its per-tick sweep). Stored as the
/// CLIENT `ThreadEntry`'s opaque parameters.
pub struct ClientMeta {
    pub remote_addr: IpAddr,
    pub local_endpoint: String,
    pub tls: bool,
    pub writeperm: bool,
    pub trusted: bool,
    pub limit_pattern: Option<String>,
    pub connect_time: Instant,
    last_exchange: Mutex<Instant>,
    pub rates: Mutex<RateMeter>,
}

impl ClientMeta {
    pub fn new(
        remote_addr: IpAddr,
        local_endpoint: String,
        tls: bool,
        writeperm: bool,
        trusted: bool,
        limit_pattern: Option<String>,
    ) -> Self {
        let now = Instant::now();
        Self {
            remote_addr,
            local_endpoint,
            tls,
            writeperm,
            trusted,
            limit_pattern,
            connect_time: now,
            last_exchange: Mutex::new(now),
            rates: Mutex::new(RateMeter::default()),
        }
    }

    pub fn touch(&self) {
        *self.last_exchange.lock().unwrap() = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(*self.last_exchange.lock().unwrap())
    }
}

/// A freshly admitted connection, bundling the transport-level handle `C`
/// (owned by the worker that will drive it) with its shared metadata,
/// registry entry, and reader cursor.
pub struct ClientInfo<C> {
    pub connection: C,
    pub entry: std::sync::Arc<seismo_registry::ThreadEntry>,
    pub meta: std::sync::Arc<ClientMeta>,
    pub cursor: strata_ring::ReaderCursor,
}
