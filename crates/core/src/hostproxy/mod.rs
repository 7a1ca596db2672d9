//! Host proxy: local HTTP side-channel for containers
//!
//! A small HTTP service containers reach via
//! `http://host.docker.internal:<port>` for OAuth callback capture, GPG
//! Assuan relay, and git-credential forwarding. The supervisor is
//! idempotent: an already-running instance (this process or a previous
//! one) is detected by an identity handshake against `/healthz` and
//! adopted rather than duplicated; a port held by a foreign service is a
//! hard error. The PID file is a hint for crash recovery, never a lock.

mod pidfile;
mod server;
mod sessions;

pub use pidfile::{is_daemon_running, process_alive};
pub use server::MAX_MESSAGE_BYTES;
pub use sessions::{CallbackRecord, SessionStore};

use crate::errors::{ProxyError, Result};
use crate::paths::{self, HOST_PROXY_SERVICE};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Shared state handlers operate on.
#[derive(Debug, Default)]
pub(crate) struct ProxyState {
    pub(crate) sessions: SessionStore,
}

/// Outcome of [`HostProxy::ensure_running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// This call bound the port and started serving
    Started,
    /// This instance was already serving
    AlreadyRunning,
    /// Another live clawker proxy owns the port; it was adopted
    Adopted,
}

struct RunningServer {
    server: Arc<tiny_http::Server>,
    thread: std::thread::JoinHandle<()>,
}

/// The host proxy supervisor and server lifecycle.
pub struct HostProxy {
    port: u16,
    pid_path: PathBuf,
    state: Arc<ProxyState>,
    running: Mutex<Option<RunningServer>>,
    adopted: AtomicBool,
}

impl std::fmt::Debug for HostProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProxy")
            .field("port", &self.port)
            .field("pid_path", &self.pid_path)
            .field("adopted", &self.adopted.load(Ordering::SeqCst))
            .finish()
    }
}

impl HostProxy {
    /// Create a supervisor for the configured port, with the default PID
    /// file location.
    pub fn new(port: u16) -> Self {
        Self::with_pid_path(port, paths::host_proxy_pid_path())
    }

    /// Create a supervisor with an explicit PID file path.
    pub fn with_pid_path(port: u16, pid_path: PathBuf) -> Self {
        Self {
            port,
            pid_path,
            state: Arc::new(ProxyState::default()),
            running: Mutex::new(None),
            adopted: AtomicBool::new(false),
        }
    }

    /// Configured TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether this supervisor considers a proxy available (own listener
    /// bound, or a live instance adopted).
    pub fn is_running(&self) -> bool {
        self.adopted.load(Ordering::SeqCst)
            || self
                .running
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_some()
    }

    /// URL containers use to reach the proxy.
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", paths::host_gateway(), self.port)
    }

    /// URL for host-local probes.
    pub fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Idempotently ensure a proxy is serving on the configured port.
    ///
    /// Free port: bind, record the PID, serve. Port in use: probe
    /// `/healthz`; a matching service identity is adopted, anything else
    /// fails with [`ProxyError::PortInUse`].
    #[instrument(skip(self))]
    pub async fn ensure_running(&self) -> Result<EnsureOutcome> {
        if self.is_running() {
            return Ok(EnsureOutcome::AlreadyRunning);
        }

        if port_in_use(self.port) {
            return if self.handshake().await? {
                info!(port = self.port, "Adopted running host proxy");
                self.adopted.store(true, Ordering::SeqCst);
                Ok(EnsureOutcome::Adopted)
            } else {
                Err(ProxyError::PortInUse { port: self.port }.into())
            };
        }

        pidfile::clear_stale(&self.pid_path);
        let server = tiny_http::Server::http(("0.0.0.0", self.port)).map_err(|e| {
            ProxyError::Server {
                message: format!("cannot bind port {}: {e}", self.port),
            }
        })?;
        let server = Arc::new(server);
        pidfile::write_pid_file(&self.pid_path)?;

        let accept_server = Arc::clone(&server);
        let state = Arc::clone(&self.state);
        let thread = std::thread::spawn(move || {
            // One thread per request; handlers are short and stateless
            // apart from the mutex-guarded session map.
            for request in accept_server.incoming_requests() {
                let state = Arc::clone(&state);
                std::thread::spawn(move || server::handle_request(request, &state));
            }
            debug!("Host proxy accept loop stopped");
        });

        *self.running.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(RunningServer { server, thread });
        info!(port = self.port, "Host proxy started");
        Ok(EnsureOutcome::Started)
    }

    /// Identity handshake: whether `/healthz` on the configured port
    /// answers as a clawker host proxy.
    async fn handshake(&self) -> Result<bool> {
        Ok(probe_identity(self.port).await)
    }

    /// Stop serving: unblock the accept loop, join it within the grace
    /// period, remove the PID file. Idempotent.
    #[instrument(skip(self))]
    pub fn stop(&self, grace: Duration) -> Result<()> {
        self.adopted.store(false, Ordering::SeqCst);
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(running) = running else {
            return Ok(());
        };

        running.server.unblock();
        let deadline = std::time::Instant::now() + grace;
        while !running.thread.is_finished() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if running.thread.is_finished() {
            if running.thread.join().is_err() {
                warn!("Host proxy accept loop panicked");
            }
        } else {
            warn!("Host proxy did not drain within the grace period");
        }

        pidfile::remove_pid_file(&self.pid_path);
        info!(port = self.port, "Host proxy stopped");
        Ok(())
    }

    /// Session buffers, exposed for tests and the proxy status command.
    pub fn sessions(&self) -> &SessionStore {
        &self.state.sessions
    }
}

impl Drop for HostProxy {
    fn drop(&mut self) {
        // A dropped supervisor must not leave a wedged accept loop.
        let _ = self.stop(Duration::from_millis(100));
    }
}

/// Whether something is already listening on the port.
pub fn port_in_use(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_err()
}

/// Whether `/healthz` on the port answers with the clawker host proxy
/// service identity. False on connection failure, timeout, or a foreign
/// body.
pub async fn probe_identity(port: u16) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };
    let url = format!("http://127.0.0.1:{port}/healthz");
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(error = %e, "Identity probe failed");
            return false;
        }
    };
    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(_) => return false,
    };
    body.get("service").and_then(|s| s.as_str()) == Some(HOST_PROXY_SERVICE)
}
