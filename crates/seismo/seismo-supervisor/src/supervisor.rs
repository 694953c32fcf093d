//! `Supervisor`: the watchdog tick loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use seismo_listener::ClientMeta;
use seismo_registry::ThreadRegistry;
use strata_config::Config;
use tracing::{info, warn};

use crate::signal_router::{SHUTDOWN_INITIATED, SHUTDOWN_REQUESTED};

const TICK_NORMAL: Duration = Duration::from_millis(250);
const TICK_SHUTDOWN: Duration = Duration::from_millis(100);
/// Shutdown deadlock watchdog bound,
/// expressed in 100 ms shutdown ticks.
const SHUTDOWN_DEADLOCK_TICKS: u32 = 100;

#[derive(Debug, Default)]
pub struct AggregateTotals {
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub rx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
}

impl AggregateTotals {
    fn accumulate(&self, tx_packets: u64, tx_bytes: u64, rx_packets: u64, rx_bytes: u64) {
        self.tx_packets.fetch_add(tx_packets, Ordering::Relaxed);
        self.tx_bytes.fetch_add(tx_bytes, Ordering::Relaxed);
        self.rx_packets.fetch_add(rx_packets, Ordering::Relaxed);
        self.rx_bytes.fetch_add(rx_bytes, Ordering::Relaxed);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Exit,
}

/// One tick's worth of window-rollover bookkeeping.
struct Window {
    start: SystemTime,
    end: SystemTime,
}

pub struct Supervisor {
    registry: Arc<ThreadRegistry>,
    shutdownsig: Arc<AtomicU8>,
    dump_requested: Arc<AtomicBool>,
    shutdown_ticks: AtomicU32,
    config_path: PathBuf,
    config: Mutex<Config>,
    config_mtime: Mutex<SystemTime>,
    window: Mutex<Window>,
    pub totals: AggregateTotals,
}

impl Supervisor {
    pub fn new(
        registry: Arc<ThreadRegistry>,
        shutdownsig: Arc<AtomicU8>,
        dump_requested: Arc<AtomicBool>,
        config_path: PathBuf,
        config: Config,
        config_mtime: SystemTime,
    ) -> Self {
        let now = SystemTime::now();
        let window_secs = config.transfer_log.window_secs;
        Self {
            registry,
            shutdownsig,
            dump_requested,
            shutdown_ticks: AtomicU32::new(0),
            config_path,
            config: Mutex::new(config),
            config_mtime: Mutex::new(config_mtime),
            window: Mutex::new(Window {
                start: now,
                end: now + Duration::from_secs(window_secs),
            }),
            totals: AggregateTotals::default(),
        }
    }

    /// Run the tick loop until the exit condition fires.
    pub fn run(&self) {
        let mut last_pass = Instant::now();
        loop {
            if self.tick(SystemTime::now(), Instant::now()) == TickOutcome::Exit {
                break;
            }

            if self.shutdownsig.load(Ordering::SeqCst) >= SHUTDOWN_INITIATED {
                std::thread::sleep(TICK_SHUTDOWN);
                continue;
            }

            // Sleep in 250 ms increments until a full second has elapsed
            // since the previous pass, so a signal-driven shutdown request
            // is noticed within one tick instead of up to a second late.
            loop {
                std::thread::sleep(TICK_NORMAL);
                if self.shutdownsig.load(Ordering::SeqCst) != 0 {
                    break;
                }
                if last_pass.elapsed() >= Duration::from_secs(1) {
                    break;
                }
            }
            last_pass = Instant::now();
        }
    }

    /// One tick of the watchdog, exposed separately
    /// from `run` so it can be driven directly in tests.
    pub fn tick(&self, now: SystemTime, instant_now: Instant) -> TickOutcome {
        // 1. Shutdown initiation, exactly once, on the 1 -> 2 transition.
        if self
            .shutdownsig
            .compare_exchange(
                SHUTDOWN_REQUESTED,
                SHUTDOWN_INITIATED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            info!("shutdown initiated, requesting close on all threads");
            self.registry.request_shutdown_all();
        }
        let shutting_down = self.shutdownsig.load(Ordering::SeqCst) >= SHUTDOWN_INITIATED;

        // 2. Shutdown deadlock watchdog.
        if shutting_down {
            let ticks = self.shutdown_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            if ticks >= SHUTDOWN_DEADLOCK_TICKS {
                warn!("shutdown deadlock watchdog expired, giving up cleanly");
                return TickOutcome::Exit;
            }
        }

        if self.dump_requested.swap(false, Ordering::SeqCst) {
            info!(
                clientcount = self.registry.clientcount(),
                server_threads = self.registry.server_thread_count(),
                "dumping server parameters at elevated verbosity"
            );
        }

        let (transfer_log_enabled, transfer_log_path, clienttimeout) = {
            let config = self.config.lock().unwrap();
            (
                config.transfer_log.enabled,
                config.transfer_log.path.clone(),
                config.clienttimeout,
            )
        };

        // 3. Transfer-log window rollover.
        let mut flush_this_tick = transfer_log_enabled && now >= self.window.lock().unwrap().end;

        // 4. Server-thread sweep. Re-spawning a listener/scanner needs the
        // endpoint-specific constructor, which lives with the binary that
        // wires `Acceptor` impls together; this sweep only logs state and
        // lets the caller observe entries through `registry`.
        self.registry.sweep_server(|entry| {
            tracing::debug!(state = ?entry.state(), kind = ?entry.kind, "server thread");
        });

        // 5. Client-thread sweep: recompute rates, accumulate totals, emit
        // a transfer-log line on a flush tick, and reap idle clients.
        self.registry.sweep_clients(|entry| {
            entry.with_params::<Arc<ClientMeta>, _>(|meta| {
                let mut rates = meta.rates.lock().unwrap();
                rates.tick(instant_now);
                self.totals.accumulate(
                    rates.last_tx_packets,
                    rates.last_tx_bytes,
                    rates.last_rx_packets,
                    rates.last_rx_bytes,
                );

                if flush_this_tick && transfer_log_path.is_some() {
                    info!(
                        target: "transfer_log",
                        remote_addr = %meta.remote_addr,
                        tx_packet_rate = rates.tx_packet_rate,
                        tx_byte_rate = rates.tx_byte_rate,
                        rx_packet_rate = rates.rx_packet_rate,
                        rx_byte_rate = rates.rx_byte_rate,
                        "client transfer stats"
                    );
                }

                if clienttimeout > 0 && meta.idle_for(instant_now) > Duration::from_secs(clienttimeout) {
                    entry.request_close();
                }
            });
        });

        // 7. Config reload.
        let mut config_reset = false;
        {
            let last_mtime = *self.config_mtime.lock().unwrap();
            match Config::reload_if_changed(&self.config_path, last_mtime) {
                Ok(Some((new_config, mtime))) => {
                    info!(path = %self.config_path.display(), "reloaded config");
                    *self.config.lock().unwrap() = new_config;
                    *self.config_mtime.lock().unwrap() = mtime;
                    config_reset = true;
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "config reload failed, keeping current config"),
            }
        }

        // 8. Window recompute.
        if flush_this_tick || config_reset {
            let window_secs = self.config.lock().unwrap().transfer_log.window_secs;
            let mut window = self.window.lock().unwrap();
            window.start = now;
            window.end = now + Duration::from_secs(window_secs);
            flush_this_tick = false;
        }
        let _ = flush_this_tick;

        // 9. Exit condition.
        if shutting_down && self.registry.server_thread_count() == 0 && self.registry.clientcount() == 0 {
            return TickOutcome::Exit;
        }

        TickOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seismo_registry::{ThreadEntry, ThreadKind, ThreadState};
    use strata_config::{Config, RingConfig};
    use std::net::{IpAddr, Ipv4Addr};

    fn minimal_config() -> Config {
        Config {
            log_level: "info".into(),
            ring: RingConfig {
                ring_directory: None,
                pktsize: 512,
                ringsize: 1 << 20,
                autorecovery: 1,
            },
            maxclients: 600,
            maxclients_per_ip: 20,
            clienttimeout: 0,
            ip_policy: Default::default(),
            tls: Default::default(),
            archive: Default::default(),
            transfer_log: strata_config::TransferLogConfig {
                enabled: false,
                path: None,
                window_secs: 600,
            },
            endpoints: Vec::new(),
        }
    }

    fn supervisor(config_path: PathBuf) -> Supervisor {
        Supervisor::new(
            Arc::new(ThreadRegistry::new()),
            Arc::new(AtomicU8::new(0)),
            Arc::new(AtomicBool::new(false)),
            config_path,
            minimal_config(),
            SystemTime::now(),
        )
    }

    #[test]
    fn tick_is_a_noop_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seismod.toml");
        std::fs::write(&path, "[ring]\n").unwrap();
        let sup = supervisor(path);
        assert_eq!(sup.tick(SystemTime::now(), Instant::now()), TickOutcome::Continue);
    }

    #[test]
    fn shutdown_transition_requests_close_on_all_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seismod.toml");
        std::fs::write(&path, "[ring]\n").unwrap();
        let registry = Arc::new(ThreadRegistry::new());
        let client = ThreadEntry::new(ThreadKind::Client);
        registry.push_client(client.clone());
        let shutdownsig = Arc::new(AtomicU8::new(SHUTDOWN_REQUESTED));

        let sup = Supervisor::new(
            registry,
            shutdownsig.clone(),
            Arc::new(AtomicBool::new(false)),
            path,
            minimal_config(),
            SystemTime::now(),
        );
        sup.tick(SystemTime::now(), Instant::now());

        assert_eq!(shutdownsig.load(Ordering::SeqCst), SHUTDOWN_INITIATED);
        assert_eq!(client.state(), ThreadState::Close);
    }

    #[test]
    fn idle_client_is_closed_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seismod.toml");
        std::fs::write(&path, "[ring]\n").unwrap();
        let mut config = minimal_config();
        config.clienttimeout = 1;
        let registry = Arc::new(ThreadRegistry::new());

        let meta = Arc::new(ClientMeta::new(
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            "0.0.0.0:18000".into(),
            false,
            false,
            false,
            None,
        ));
        let entry = ThreadEntry::new(ThreadKind::Client);
        entry.set_params(meta);
        registry.push_client(entry.clone());

        let sup = Supervisor::new(
            registry,
            Arc::new(AtomicU8::new(0)),
            Arc::new(AtomicBool::new(false)),
            path,
            config,
            SystemTime::now(),
        );
        let later = Instant::now() + Duration::from_secs(2);
        sup.tick(SystemTime::now(), later);

        assert_eq!(entry.state(), ThreadState::Close);
    }

    #[test]
    fn exit_condition_fires_once_shutting_down_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seismod.toml");
        std::fs::write(&path, "[ring]\n").unwrap();
        let shutdownsig = Arc::new(AtomicU8::new(SHUTDOWN_INITIATED));
        let sup = Supervisor::new(
            Arc::new(ThreadRegistry::new()),
            shutdownsig,
            Arc::new(AtomicBool::new(false)),
            path,
            minimal_config(),
            SystemTime::now(),
        );
        assert_eq!(sup.tick(SystemTime::now(), Instant::now()), TickOutcome::Exit);
    }
}
