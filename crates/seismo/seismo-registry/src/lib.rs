//! `ThreadRegistry`: server-thread and client-thread bookkeeping.
//!
//! The original ringserver keeps two intrusive doubly-linked C lists under
//! one mutex each. Spec §9's redesign note replaces that with owned
//! `ThreadEntry` values in two `Mutex<Vec<Arc<ThreadEntry>>>` lists; state
//! transitions take only the entry's own mutex, never a list mutex, so a
//! worker can update its state while the supervisor is mid-sweep over the
//! list it belongs to.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    Listener,
    Scanner,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Spawning,
    Active,
    Close,
    Closing,
    Closed,
}

pub struct ThreadEntry {
    pub kind: ThreadKind,
    state: Mutex<ThreadState>,
    handle: Mutex<Option<JoinHandle<()>>>,
    /// Opaque parameters pointer: the kind-specific
    /// data a listener/scanner/client worker needs, stashed here so
    /// `ThreadRegistry` itself stays kind-agnostic. `seismo-listener`
    /// stores an `Arc<ClientMeta>` here for CLIENT entries.
    params: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

impl ThreadEntry {
    pub fn new(kind: ThreadKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            state: Mutex::new(ThreadState::Spawning),
            handle: Mutex::new(None),
            params: Mutex::new(None),
        })
    }

    pub fn set_params<T: Any + Send + Sync>(&self, params: T) {
        *self.params.lock().unwrap() = Some(Box::new(params));
    }

    pub fn with_params<T: Any + Send + Sync, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.params
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .map(f)
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: ThreadState) {
        *self.state.lock().unwrap() = state;
    }

    /// Cooperative cancellation: a worker observes this on its next poll
    /// and tears down.
    pub fn request_close(&self) {
        let mut guard = self.state.lock().unwrap();
        if *guard == ThreadState::Spawning || *guard == ThreadState::Active {
            *guard = ThreadState::Close;
        }
    }

    pub fn attach_handle(&self, handle: JoinHandle<()>) {
        *self.handle.lock().unwrap() = Some(handle);
    }

    fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.lock().unwrap().take()
    }
}

#[derive(Default)]
pub struct ThreadRegistry {
    server_threads: Mutex<Vec<Arc<ThreadEntry>>>,
    client_threads: Mutex<Vec<Arc<ThreadEntry>>>,
    clientcount: AtomicU64,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_server(&self, entry: Arc<ThreadEntry>) {
        self.server_threads.lock().unwrap().push(entry);
    }

    /// Push to the head of the client-thread list and bump `clientcount`,
    /// matching the original's "push to list head, increment clientcount"
    /// admission step.
    pub fn push_client(&self, entry: Arc<ThreadEntry>) {
        self.client_threads.lock().unwrap().insert(0, entry);
        self.clientcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Read without locking, same as the original's atomic `clientcount`
    ///.
    pub fn clientcount(&self) -> u64 {
        self.clientcount.load(Ordering::Relaxed)
    }

    pub fn server_thread_count(&self) -> usize {
        self.server_threads.lock().unwrap().len()
    }

    /// Snapshot of the current client-thread list (cheap `Arc` clones), for
    /// callers that need to inspect entries outside a sweep — e.g. the
    /// admission cascade's per-source-address client count.
    pub fn client_entries(&self) -> Vec<Arc<ThreadEntry>> {
        self.client_threads.lock().unwrap().clone()
    }

    /// Shutdown initiation: for LISTENER entries, invoke
    /// the closer stashed in their opaque params (so a blocked `accept`
    /// fails promptly) before requesting CLOSE; every other server entry
    /// and every client entry just gets a CLOSE request.
    pub fn request_shutdown_all(&self) {
        for entry in self.server_threads.lock().unwrap().iter() {
            if entry.kind == ThreadKind::Listener {
                entry.with_params::<std::sync::Arc<dyn Fn() + Send + Sync>, _>(|closer| closer());
            }
            entry.request_close();
        }
        for entry in self.client_threads.lock().unwrap().iter() {
            entry.request_close();
        }
    }

    /// Server-thread sweep: join and drop CLOSED
    /// entries; hand every other entry to `respawn` so the caller can
    /// restart a slot whose worker exited without transitioning cleanly.
    pub fn sweep_server(&self, mut respawn: impl FnMut(&Arc<ThreadEntry>)) {
        let mut list = self.server_threads.lock().unwrap();
        list.retain_mut(|entry| {
            if entry.state() == ThreadState::Closed {
                if let Some(handle) = entry.take_handle() {
                    let _ = handle.join();
                }
                false
            } else {
                respawn(entry);
                true
            }
        });
    }

    /// Client-thread sweep: join and drop CLOSED
    /// entries, decrementing `clientcount`; hand every other entry to
    /// `per_entry` for rate accounting / idle-timeout checks.
    pub fn sweep_clients(&self, mut per_entry: impl FnMut(&Arc<ThreadEntry>)) {
        let mut list = self.client_threads.lock().unwrap();
        list.retain_mut(|entry| {
            if entry.state() == ThreadState::Closed {
                if let Some(handle) = entry.take_handle() {
                    let _ = handle.join();
                }
                self.clientcount.fetch_sub(1, Ordering::Relaxed);
                false
            } else {
                per_entry(entry);
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_client_increments_count_and_orders_head_first() {
        let registry = ThreadRegistry::new();
        let a = ThreadEntry::new(ThreadKind::Client);
        let b = ThreadEntry::new(ThreadKind::Client);
        registry.push_client(a);
        registry.push_client(b.clone());
        assert_eq!(registry.clientcount(), 2);

        let mut seen = Vec::new();
        registry.sweep_clients(|entry| seen.push(Arc::ptr_eq(entry, &b)));
        assert_eq!(seen, vec![true, false]);
    }

    #[test]
    fn sweep_removes_closed_entries_and_decrements_count() {
        let registry = ThreadRegistry::new();
        let entry = ThreadEntry::new(ThreadKind::Client);
        entry.attach_handle(std::thread::spawn(|| {}));
        registry.push_client(entry.clone());
        entry.set_state(ThreadState::Closed);

        registry.sweep_clients(|_| panic!("closed entry must not reach per_entry"));
        assert_eq!(registry.clientcount(), 0);
    }

    #[test]
    fn request_close_does_not_override_closing_or_closed() {
        let entry = ThreadEntry::new(ThreadKind::Listener);
        entry.set_state(ThreadState::Closing);
        entry.request_close();
        assert_eq!(entry.state(), ThreadState::Closing);
    }

    #[test]
    fn opaque_params_roundtrip_by_type() {
        let entry = ThreadEntry::new(ThreadKind::Client);
        entry.set_params(42u32);
        assert_eq!(entry.with_params::<u32, _>(|v| *v), Some(42));
        assert_eq!(entry.with_params::<String, _>(|v| v.clone()), None);
    }
}
