//! Local workload identity authority (server + agent) lifecycle
//!
//! [`IdentityAuthority::start`] boots the server, waits for it to become
//! healthy, bootstraps the agent with a one-time join token and waits for the
//! agent in turn. Once running, a watcher task tears both processes down when
//! either exits, when the caller's token is cancelled, or when [`stop`] is
//! called, whichever comes first.
//!
//! Only one authority per process is supported: [`AuthorityEndpoint::export`]
//! writes a process-wide environment variable.
//!
//! [`stop`]: IdentityAuthority::stop

pub mod config;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use shared::{env, logging, process_debug, process_error, process_info, process_warn, Component};
use tokio_util::sync::CancellationToken;

use crate::error::{HarnessError, HarnessResult};
use crate::services::command::CommandSpec;
use crate::services::process::{ProcessHandle, ProcessMonitor};
use crate::services::supervisor::Supervisor;
use crate::traits::CommandRunner;

pub use config::{AuthorityConfig, AuthorityPaths, ConfBlock};

/// Label the token generator puts before the raw token
const TOKEN_LABEL: &str = "Token:";

/// Lifecycle of an [`IdentityAuthority`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityState {
    Created,
    Configuring,
    ServerStarting,
    ServerHealthy,
    AgentStarting,
    AgentHealthy,
    Running,
    /// Startup failed and teardown is in progress
    Failed,
    Stopped,
}

impl AuthorityState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthorityState::Stopped)
    }
}

/// Why the authority was torn down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownCause {
    /// `stop()` or the caller's cancellation
    Requested,
    /// One of the supervised processes exited on its own
    Crashed { component: Component, status: String },
}

/// Address of the live agent socket, handed to dependent processes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityEndpoint {
    socket: PathBuf,
}

impl AuthorityEndpoint {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self { socket: socket.into() }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// `unix:<path>` form expected by workload API clients
    pub fn address(&self) -> String {
        format!("unix:{}", self.socket.display())
    }

    /// Variable name and value for a child environment overlay
    pub fn env_pair(&self) -> (String, String) {
        (env::ENDPOINT_SOCKET.to_string(), self.address())
    }

    /// Publish the endpoint in this process's environment.
    ///
    /// Meant for the outermost command boundary only; library code passes
    /// [`env_pair`](Self::env_pair) to the children that need it.
    pub fn export(&self) {
        std::env::set_var(env::ENDPOINT_SOCKET, self.address());
        process_info!(Component::Harness, "Env variable {}={} is set", env::ENDPOINT_SOCKET, self.address());
    }
}

impl fmt::Display for AuthorityEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", env::ENDPOINT_SOCKET, self.address())
    }
}

struct Inner {
    config: AuthorityConfig,
    paths: AuthorityPaths,
    owns_root: bool,
    scope: Mutex<CancellationToken>,
    state: Mutex<AuthorityState>,
    server: Mutex<Option<ProcessHandle>>,
    agent: Mutex<Option<ProcessHandle>>,
    cause: Mutex<Option<TeardownCause>>,
    stopping: AtomicBool,
    stopped: CancellationToken,
}

/// A running (or startable) server + agent pair. Clones share the same pair.
#[derive(Clone)]
pub struct IdentityAuthority {
    inner: Arc<Inner>,
}

impl fmt::Debug for IdentityAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityAuthority")
            .field("root", &self.inner.paths.root)
            .field("owns_root", &self.inner.owns_root)
            .field("state", &self.state())
            .finish()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl IdentityAuthority {
    /// Materialise the storage root.
    ///
    /// Without a configured root a unique directory is created under the
    /// system temp dir and removed again on stop. A configured root is
    /// created if missing and reused in place.
    pub fn new(config: AuthorityConfig) -> HarnessResult<Self> {
        if config.server_command.is_empty() || config.agent_command.is_empty() {
            return Err(HarnessError::invalid_argument("authority server and agent commands must not be empty"));
        }
        if config.health_attempts == 0 {
            return Err(HarnessError::invalid_argument("at least one health check attempt is required"));
        }

        let (root, owns_root) = match &config.root {
            Some(root) => (root.clone(), false),
            None => (
                std::env::temp_dir().join(format!("testrig-authority-{}", uuid::Uuid::new_v4().simple())),
                true,
            ),
        };
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            inner: Arc::new(Inner {
                paths: AuthorityPaths::new(&root),
                config,
                owns_root,
                scope: Mutex::new(CancellationToken::new()),
                state: Mutex::new(AuthorityState::Created),
                server: Mutex::new(None),
                agent: Mutex::new(None),
                cause: Mutex::new(None),
                stopping: AtomicBool::new(false),
                stopped: CancellationToken::new(),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.paths.root
    }

    pub fn paths(&self) -> &AuthorityPaths {
        &self.inner.paths
    }

    /// Whether the root is removed on stop
    pub fn owns_root(&self) -> bool {
        self.inner.owns_root
    }

    pub fn state(&self) -> AuthorityState {
        *locked(&self.inner.state)
    }

    fn set_state(&self, state: AuthorityState) {
        let mut current = locked(&self.inner.state);
        // A late startup failure must not resurrect a stopped authority
        if current.is_terminal() {
            return;
        }
        process_debug!(Component::Harness, "Identity authority state: {:?}", state);
        *current = state;
    }

    /// Endpoint of the agent, available while running
    pub fn endpoint(&self) -> Option<AuthorityEndpoint> {
        (self.state() == AuthorityState::Running).then(|| AuthorityEndpoint::new(&self.inner.paths.agent_socket))
    }

    pub fn server_pid(&self) -> Option<u32> {
        locked(&self.inner.server).as_ref().and_then(ProcessHandle::pid)
    }

    pub fn agent_pid(&self) -> Option<u32> {
        locked(&self.inner.agent).as_ref().and_then(ProcessHandle::pid)
    }

    /// Recorded reason for teardown, once teardown began
    pub fn teardown_cause(&self) -> Option<TeardownCause> {
        locked(&self.inner.cause).clone()
    }

    fn scope(&self) -> CancellationToken {
        locked(&self.inner.scope).clone()
    }

    fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.scope())
    }

    fn server_command<const N: usize>(&self, args: [&str; N]) -> CommandSpec {
        CommandSpec::new(self.inner.config.server_command.iter().cloned())
            .args(args)
            .current_dir(self.root())
    }

    fn agent_command<const N: usize>(&self, args: [&str; N]) -> CommandSpec {
        CommandSpec::new(self.inner.config.agent_command.iter().cloned())
            .args(args)
            .current_dir(self.root())
    }

    /// Boot server and agent under a token derived from `parent`.
    ///
    /// On success the pair is fully running and watched; on failure it has
    /// been torn down completely before this returns.
    pub async fn start(&self, parent: &CancellationToken) -> HarnessResult<AuthorityEndpoint> {
        {
            let state = locked(&self.inner.state);
            if *state != AuthorityState::Created || self.inner.stopping.load(Ordering::SeqCst) {
                return Err(HarnessError::invalid_argument(format!(
                    "identity authority cannot start from state {:?}",
                    *state
                )));
            }
        }
        *locked(&self.inner.scope) = parent.child_token();

        logging::log_startup(&Component::AuthorityServer, &format!("identity authority in {}", self.root().display()));
        match self.boot().await {
            Ok(endpoint) => {
                self.set_state(AuthorityState::Running);
                self.spawn_watcher();
                logging::log_success(&Component::AuthorityAgent, &format!("Identity authority running, {endpoint}"));
                Ok(endpoint)
            }
            Err(e) => {
                self.set_state(AuthorityState::Failed);
                logging::log_error(&Component::Harness, "Identity authority startup", &e);
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn boot(&self) -> HarnessResult<AuthorityEndpoint> {
        let paths = &self.inner.paths;
        let supervisor = self.supervisor();

        self.set_state(AuthorityState::Configuring);
        paths.write_defaults().await?;

        self.set_state(AuthorityState::ServerStarting);
        let server_conf = paths.server_conf.display().to_string();
        let server = supervisor.start(self.server_command(["run", "-config", server_conf.as_str()]))?;
        let server_monitor = server.monitor();
        *locked(&self.inner.server) = Some(server);

        let registration = paths.registration_socket.display().to_string();
        self.health_check(
            &supervisor,
            Component::AuthorityServer,
            &server_monitor,
            self.server_command(["healthcheck", "-registrationUDSPath", registration.as_str()]),
        )
        .await?;
        self.set_state(AuthorityState::ServerHealthy);

        self.set_state(AuthorityState::AgentStarting);
        let token = self.join_token(&supervisor).await?;
        let agent = supervisor.start(self.agent_command(["run", "-config", config::AGENT_CONF, "-joinToken", token.as_str()]))?;
        let agent_monitor = agent.monitor();
        *locked(&self.inner.agent) = Some(agent);

        let socket = paths.agent_socket.display().to_string();
        self.health_check(
            &supervisor,
            Component::AuthorityAgent,
            &agent_monitor,
            self.agent_command(["healthcheck", "-socketPath", socket.as_str()]),
        )
        .await?;
        self.set_state(AuthorityState::AgentHealthy);

        Ok(AuthorityEndpoint::new(&paths.agent_socket))
    }

    /// Bounded retry of a health-check command against a starting process
    async fn health_check(
        &self,
        supervisor: &Supervisor,
        component: Component,
        process: &ProcessMonitor,
        spec: CommandSpec,
    ) -> HarnessResult<()> {
        let spec = spec.echo(false);
        let attempts = self.inner.config.health_attempts;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match supervisor.exec(&spec).await {
                Ok(()) => {
                    process_info!(component, "Health check passed after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(e) if e.is_start_failure() || matches!(e, HarnessError::Cancelled { .. }) => return Err(e),
                Err(e) => {
                    process_debug!(component, "Health check attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e.to_string());
                }
            }

            if !process.is_running() {
                let status = process.wait().await.describe();
                return Err(HarnessError::UnexpectedExit { component, status });
            }

            if attempt < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.inner.config.health_interval) => {}
                    _ = supervisor.token().cancelled() => {
                        return Err(HarnessError::Cancelled { operation: format!("{component} health check") });
                    }
                }
            }
        }

        Err(HarnessError::HealthCheckTimeout {
            component,
            attempts,
            last_error,
        })
    }

    /// One-time bootstrap token for the agent identity
    async fn join_token(&self, supervisor: &Supervisor) -> HarnessResult<String> {
        let registration = self.inner.paths.registration_socket.display().to_string();
        let spec = self.server_command([
            "token",
            "generate",
            "-spiffeID",
            self.inner.config.agent_id.as_str(),
            "-registrationUDSPath",
            registration.as_str(),
        ]);
        let output = supervisor.exec_read(&spec).await?.join("");
        let token = output.replacen(TOKEN_LABEL, "", 1).trim().to_string();
        if token.is_empty() {
            return Err(HarnessError::parse("join token", output));
        }
        Ok(token)
    }

    /// Register `spiffe_id` under `parent_id` for workloads matching `selector`
    pub async fn add_entry(&self, parent_id: &str, spiffe_id: &str, selector: &str) -> HarnessResult<()> {
        let registration = self.inner.paths.registration_socket.display().to_string();
        let spec = self.server_command([
            "entry",
            "create",
            "-parentID",
            parent_id,
            "-spiffeID",
            spiffe_id,
            "-selector",
            selector,
            "-registrationUDSPath",
            registration.as_str(),
        ]);
        self.supervisor().exec(&spec).await
    }

    fn spawn_watcher(&self) {
        let (Some(server), Some(agent)) = (
            locked(&self.inner.server).as_ref().map(ProcessHandle::monitor),
            locked(&self.inner.agent).as_ref().map(ProcessHandle::monitor),
        ) else {
            return;
        };
        let scope = self.scope();
        let authority = self.clone();

        tokio::spawn(async move {
            let crashed = tokio::select! {
                outcome = server.wait() => Some((Component::AuthorityServer, outcome)),
                outcome = agent.wait() => Some((Component::AuthorityAgent, outcome)),
                _ = scope.cancelled() => None,
            };

            if let Some((component, outcome)) = crashed {
                if !scope.is_cancelled() {
                    process_error!(component, "{} quit unexpectedly ({})", component, outcome);
                    locked(&authority.inner.cause).get_or_insert(TeardownCause::Crashed {
                        component,
                        status: outcome.describe(),
                    });
                }
            }
            authority.stop().await;
        });
    }

    /// Tear both processes down. Safe to call repeatedly, concurrently and
    /// before `start`; only the first caller does the work.
    pub async fn stop(&self) {
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            self.inner.stopped.cancelled().await;
            return;
        }

        let cause = locked(&self.inner.cause)
            .get_or_insert(TeardownCause::Requested)
            .clone();
        logging::log_shutdown(&Component::Harness, &format!("identity authority ({cause:?})"));

        self.scope().cancel();
        let monitors: Vec<ProcessMonitor> = [&self.inner.server, &self.inner.agent]
            .into_iter()
            .filter_map(|slot| locked(slot).as_ref().map(ProcessHandle::monitor))
            .collect();
        for monitor in monitors {
            monitor.wait().await;
        }

        if self.inner.owns_root {
            match tokio::fs::remove_dir_all(self.root()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => process_warn!(Component::Harness, "Failed to remove {}: {}", self.root().display(), e),
            }
        }

        self.set_state(AuthorityState::Stopped);
        self.inner.stopped.cancel();
    }

    /// Resolves once teardown has completed.
    ///
    /// Reports [`HarnessError::UnexpectedExit`] when a crashed process caused it.
    pub async fn stopped(&self) -> HarnessResult<()> {
        self.inner.stopped.cancelled().await;
        match self.teardown_cause() {
            Some(TeardownCause::Crashed { component, status }) => Err(HarnessError::UnexpectedExit { component, status }),
            _ => Ok(()),
        }
    }
}
