use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use seismo_listener::{Acceptor, ClientInfo, Listener, Protocol};
use seismo_policy::IpPolicy;
use seismo_registry::{ThreadRegistry, ThreadState};
use seismo_supervisor::{SignalRouter, Supervisor};
use strata_config::Config;
use strata_ring::{NextOutcome, PacketRing};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// A plain TCP `Acceptor`. Nonblocking so `close()` (called by the
/// supervisor's shutdown-initiation step) can unstick a blocked accept
/// within one poll interval instead of needing a forced thread cancel.
struct TcpAcceptor {
    listener: TcpListener,
    protocol: Protocol,
    stopped: AtomicBool,
}

impl TcpAcceptor {
    fn bind(address: &str, protocol: Protocol) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            protocol,
            stopped: AtomicBool::new(false),
        })
    }
}

impl Acceptor for TcpAcceptor {
    type Connection = TcpStream;

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "listener closing",
                ));
            }
            match self.listener.accept() {
                Ok(pair) => return Ok(pair),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn configure_connection(&self, conn: &TcpStream) -> std::io::Result<()> {
        conn.set_nodelay(true)
    }

    fn local_endpoint(&self) -> String {
        self.listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default()
    }

    fn close(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Drive one admitted connection: pull packets off its cursor and stream
/// the raw payload to the socket until the ring or the client closes.
/// Wire-protocol framing/acknowledgement/command parsing is out of scope
/// here; this is the minimal loop the ring and registry need a real
/// worker to exercise.
fn run_client(mut info: ClientInfo<TcpStream>, ring: PacketRing) {
    loop {
        if info.entry.state() == ThreadState::Close {
            break;
        }
        match info.cursor.next() {
            NextOutcome::Packet(packet) => {
                if info.connection.write_all(&packet.payload).is_err() {
                    break;
                }
                info.meta.touch();
                info.meta
                    .rates
                    .lock()
                    .unwrap()
                    .record_tx(1, packet.payload.len() as u64);
            }
            NextOutcome::Skipped(missed) => {
                warn!(missed, "client cursor skipped evicted packets");
            }
            NextOutcome::WouldBlock => {
                ring.wait_for_write(Duration::from_millis(250));
            }
        }
    }
    info.entry.set_state(ThreadState::Closed);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/seismod/config.toml".to_string());
    let config = Config::load(&config_path)?;
    let config_mtime = std::fs::metadata(&config_path)?.modified()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let ring = match &config.ring.ring_directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (ring, validation) = PacketRing::open(
                &dir.join("packetbuf"),
                config.ring.pktsize,
                config.ring.maxpackets(),
                config.ring.autorecovery,
            )?;
            info!(?validation, "opened packet ring");
            ring
        }
        None => PacketRing::create_anon(config.ring.pktsize, config.ring.maxpackets())?,
    };

    let policy = Arc::new(IpPolicy::from_config(&config.ip_policy)?);
    let registry = Arc::new(ThreadRegistry::new());
    let shutdownsig = Arc::new(AtomicU8::new(0));
    let dump_requested = Arc::new(AtomicBool::new(false));

    let signal_router = SignalRouter::spawn(shutdownsig.clone(), dump_requested.clone())?;

    let supervisor = Arc::new(Supervisor::new(
        registry.clone(),
        shutdownsig.clone(),
        dump_requested,
        config_path.clone().into(),
        config.clone(),
        config_mtime,
    ));
    let supervisor_handle = {
        let supervisor = supervisor.clone();
        std::thread::Builder::new()
            .name("supervisor".into())
            .spawn(move || supervisor.run())?
    };

    let mut listener_handles = Vec::new();
    for endpoint in &config.endpoints {
        let protocol = match endpoint.protocol {
            strata_config::EndpointProtocol::Tcp => Protocol::TcpV4,
            strata_config::EndpointProtocol::LocalSocket => Protocol::LocalSocket,
        };
        let acceptor = TcpAcceptor::bind(&endpoint.address, protocol)?;
        let registry = registry.clone();
        let policy = policy.clone();
        let ring_for_listener = ring.clone();
        let ring_for_workers = ring.clone();
        let registry_for_same_addr = registry.clone();

        let listener = Arc::new(Listener::new(
            acceptor,
            policy,
            registry.clone(),
            ring_for_listener,
            config.maxclients,
            config.maxclients_per_ip,
            move |ip| {
                registry_for_same_addr
                    .client_entries()
                    .iter()
                    .filter(|entry| {
                        entry
                            .with_params::<Arc<seismo_listener::ClientMeta>, _>(|meta| meta.remote_addr == ip)
                            .unwrap_or(false)
                    })
                    .count() as u64
            },
        ));
        let listener_for_close = listener.clone();
        listener
            .entry()
            .set_params(Arc::new(move || listener_for_close.close()) as Arc<dyn Fn() + Send + Sync>);

        info!(address = %endpoint.address, "listening");
        let handle = {
            let listener = listener.clone();
            std::thread::Builder::new()
                .name(format!("listener-{}", endpoint.address))
                .spawn(move || {
                    listener.run(|info| {
                        let ring = ring_for_workers.clone();
                        if let Err(err) = std::thread::Builder::new()
                            .name("client".into())
                            .spawn(move || run_client(info, ring))
                        {
                            error!(error = %err, "failed to spawn client worker");
                        }
                    });
                })?
        };
        listener_handles.push(handle);
    }

    supervisor_handle.join().ok();
    for handle in listener_handles {
        handle.join().ok();
    }
    signal_router.shutdown();
    ring.shutdown()?;

    Ok(())
}
