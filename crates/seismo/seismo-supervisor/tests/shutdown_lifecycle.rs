//! Integration test driving `Supervisor` against a real `ThreadRegistry`
//! populated with listener and client entries shaped the way
//! `seismo-listener` actually shapes them, through a full
//! request -> initiate -> drain -> exit cycle.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use seismo_listener::ClientMeta;
use seismo_registry::{ThreadEntry, ThreadKind, ThreadRegistry, ThreadState};
use seismo_supervisor::{SHUTDOWN_INITIATED, SHUTDOWN_REQUESTED, Supervisor, TickOutcome};
use strata_config::{Config, RingConfig, TransferLogConfig};

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
        transfer_log: TransferLogConfig {
            enabled: false,
            path: None,
            window_secs: 600,
        },
        endpoints: Vec::new(),
    }
}

#[test]
fn shutdown_signal_closes_listener_and_client_then_exits() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("seismod.toml");
    std::fs::write(&config_path, "[ring]\n").unwrap();

    let registry = Arc::new(ThreadRegistry::new());

    let listener_entry = ThreadEntry::new(ThreadKind::Listener);
    let closed = Arc::new(AtomicBool::new(false));
    let closed_for_closure = closed.clone();
    listener_entry.set_params(Arc::new(move || closed_for_closure.store(true, Ordering::SeqCst))
        as Arc<dyn Fn() + Send + Sync>);
    registry.push_server(listener_entry.clone());

    let client_meta = Arc::new(ClientMeta::new(
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        "0.0.0.0:18000".into(),
        false,
        false,
        false,
        None,
    ));
    let client_entry = ThreadEntry::new(ThreadKind::Client);
    client_entry.set_params(client_meta);
    registry.push_client(client_entry.clone());

    let shutdownsig = Arc::new(AtomicU8::new(0));
    let supervisor = Supervisor::new(
        registry.clone(),
        shutdownsig.clone(),
        Arc::new(AtomicBool::new(false)),
        config_path,
        minimal_config(),
        SystemTime::now(),
    );

    // A TERM/INT signal only sets the `SHUTDOWN_REQUESTED` flag; the
    // supervisor's tick loop is what acts on it.
    shutdownsig.store(SHUTDOWN_REQUESTED, Ordering::SeqCst);
    assert_eq!(supervisor.tick(SystemTime::now(), Instant::now()), TickOutcome::Continue);

    assert_eq!(shutdownsig.load(Ordering::SeqCst), SHUTDOWN_INITIATED);
    assert!(closed.load(Ordering::SeqCst), "listener closer was never invoked");
    assert_eq!(listener_entry.state(), ThreadState::Close);
    assert_eq!(client_entry.state(), ThreadState::Close);

    // Workers observe `Close` and finish; simulate that here.
    listener_entry.set_state(ThreadState::Closed);
    client_entry.set_state(ThreadState::Closed);

    // One more tick reaps both CLOSED entries and fires the exit condition.
    assert_eq!(supervisor.tick(SystemTime::now(), Instant::now()), TickOutcome::Exit);
    assert_eq!(registry.server_thread_count(), 0);
    assert_eq!(registry.clientcount(), 0);
}
