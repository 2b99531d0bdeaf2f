//! Identity authority configuration: settings, file layout and generated config files

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shared::{process_debug, process_info, Component};

use crate::error::HarnessResult;

/// Server configuration, relative to the storage root
pub const SERVER_CONF: &str = "server/server.conf";
/// Agent configuration, relative to the storage root
pub const AGENT_CONF: &str = "agent/agent.conf";
/// Workload API socket of the agent
pub const AGENT_SOCKET: &str = "agent.sock";
/// Registration API socket of the server
pub const REGISTRATION_SOCKET: &str = "spire-registration.sock";
/// Persistent data of both processes
pub const DATA_DIR: &str = ".data";

pub const TRUST_DOMAIN: &str = "example.org";
pub const DEFAULT_AGENT_ID: &str = "spiffe://example.org/myagent";

pub const DEFAULT_HEALTH_ATTEMPTS: u32 = 10;
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_millis(50);

/// Settings for one [`IdentityAuthority`](super::IdentityAuthority)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityConfig {
    /// Storage root; a fresh temporary directory is used (and removed) when unset
    pub root: Option<PathBuf>,
    /// Identity the agent attests as
    pub agent_id: String,
    /// Program prefix for server invocations
    pub server_command: Vec<String>,
    /// Program prefix for agent invocations
    pub agent_command: Vec<String>,
    pub health_attempts: u32,
    pub health_interval: Duration,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            root: None,
            agent_id: DEFAULT_AGENT_ID.to_string(),
            server_command: vec!["spire-server".to_string()],
            agent_command: vec!["spire-agent".to_string()],
            health_attempts: DEFAULT_HEALTH_ATTEMPTS,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }
}

impl AuthorityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse `root` in place instead of a temporary directory (fluent API)
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Replace the server program, e.g. `["sh", "fake-server.sh"]` (fluent API)
    pub fn with_server_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server_command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the agent program (fluent API)
    pub fn with_agent_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent_command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_health_checks(mut self, attempts: u32, interval: Duration) -> Self {
        self.health_attempts = attempts;
        self.health_interval = interval;
        self
    }
}

/// Well-known locations under a storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityPaths {
    pub root: PathBuf,
    pub server_conf: PathBuf,
    pub agent_conf: PathBuf,
    pub agent_socket: PathBuf,
    pub registration_socket: PathBuf,
    pub data_dir: PathBuf,
}

impl AuthorityPaths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            server_conf: root.join(SERVER_CONF),
            agent_conf: root.join(AGENT_CONF),
            agent_socket: root.join(AGENT_SOCKET),
            registration_socket: root.join(REGISTRATION_SOCKET),
            data_dir: root.join(DATA_DIR),
        }
    }

    /// Write default server and agent configs where none exist yet.
    ///
    /// Existing files are left untouched so callers can customise them.
    pub async fn write_defaults(&self) -> HarnessResult<()> {
        let files = [
            (&self.server_conf, server_conf(self)),
            (&self.agent_conf, agent_conf(self)),
        ];
        for (path, contents) in files {
            write_if_absent(path, &contents).await?;
        }
        Ok(())
    }
}

async fn write_if_absent(path: &Path, contents: &str) -> HarnessResult<()> {
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = path.parent() {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(parent).await?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    match options.open(path).await {
        Ok(mut file) => {
            process_info!(Component::Harness, "Configuration file {} not found, using defaults", path.display());
            file.write_all(contents.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            process_debug!(Component::Harness, "Keeping existing configuration {}", path.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfItem {
    Str(String, String),
    Raw(String, String),
    List(String, Vec<String>),
    Object(String, ConfBlock),
    Block(ConfBlock),
}

/// Builder for the nested `name "label" { key = value }` config format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfBlock {
    name: String,
    label: Option<String>,
    items: Vec<ConfItem>,
}

impl ConfBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            items: Vec::new(),
        }
    }

    /// Block with a quoted label, as used for plugin declarations
    pub fn labelled(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::new(name)
        }
    }

    /// `key = "value"`
    pub fn string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.items.push(ConfItem::Str(key.into(), value.into()));
        self
    }

    /// `key = value`, unquoted
    pub fn raw(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.items.push(ConfItem::Raw(key.into(), value.into()));
        self
    }

    /// `key = ["a", "b"]`
    pub fn list<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items
            .push(ConfItem::List(key.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    /// `key = { ... }`; the object's own name is ignored
    pub fn object(mut self, key: impl Into<String>, object: ConfBlock) -> Self {
        self.items.push(ConfItem::Object(key.into(), object));
        self
    }

    pub fn block(mut self, child: ConfBlock) -> Self {
        self.items.push(ConfItem::Block(child));
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write(&mut out, 0);
        out
    }

    fn write(&self, out: &mut String, depth: usize) {
        let indent = "\t".repeat(depth);
        let _ = write!(out, "{indent}{}", self.name);
        if let Some(label) = &self.label {
            let _ = write!(out, " \"{label}\"");
        }
        out.push_str(" {");
        self.write_body(out, depth);
    }

    fn write_body(&self, out: &mut String, depth: usize) {
        if self.items.is_empty() {
            out.push_str("}\n");
            return;
        }
        out.push('\n');

        let inner = "\t".repeat(depth + 1);
        for item in &self.items {
            match item {
                ConfItem::Str(key, value) => {
                    let _ = writeln!(out, "{inner}{key} = \"{value}\"");
                }
                ConfItem::Raw(key, value) => {
                    let _ = writeln!(out, "{inner}{key} = {value}");
                }
                ConfItem::List(key, values) => {
                    let quoted: Vec<String> = values.iter().map(|v| format!("\"{v}\"")).collect();
                    let _ = writeln!(out, "{inner}{key} = [{}]", quoted.join(", "));
                }
                ConfItem::Object(key, object) => {
                    let _ = write!(out, "{inner}{key} = {{");
                    object.write_body(out, depth + 1);
                }
                ConfItem::Block(child) => child.write(out, depth + 1),
            }
        }
        let _ = writeln!(out, "{}}}", "\t".repeat(depth));
    }
}

fn plugin(kind: &str, name: &str, data: ConfBlock) -> ConfBlock {
    ConfBlock::labelled(kind, name).block(data)
}

fn plugin_data() -> ConfBlock {
    ConfBlock::new("plugin_data")
}

/// Default agent configuration for `paths`
pub fn agent_conf(paths: &AuthorityPaths) -> String {
    let data_dir = paths.data_dir.display().to_string();
    let agent = ConfBlock::new("agent")
        .string("data_dir", &data_dir)
        .string("log_level", "WARN")
        .string("server_address", "127.0.0.1")
        .string("server_port", "8081")
        .string("socket_path", paths.agent_socket.display().to_string())
        .raw("insecure_bootstrap", "true")
        .string("trust_domain", TRUST_DOMAIN);
    let plugins = ConfBlock::new("plugins")
        .block(plugin("NodeAttestor", "join_token", plugin_data()))
        .block(plugin("KeyManager", "disk", plugin_data().string("directory", &data_dir)))
        .block(plugin("WorkloadAttestor", "unix", plugin_data()));

    agent.render() + &plugins.render()
}

/// Default server configuration for `paths`
pub fn server_conf(paths: &AuthorityPaths) -> String {
    let data_dir = paths.data_dir.display().to_string();
    let subject = ConfBlock::new("ca_subject")
        .list("country", ["US"])
        .list("organization", ["SPIFFE"])
        .string("common_name", "");
    let server = ConfBlock::new("server")
        .string("bind_address", "127.0.0.1")
        .string("bind_port", "8081")
        .string("registration_uds_path", paths.registration_socket.display().to_string())
        .string("trust_domain", TRUST_DOMAIN)
        .string("data_dir", &data_dir)
        .string("log_level", "DEBUG")
        .string("ca_key_type", "rsa-2048")
        .string("default_svid_ttl", "1h")
        .object("ca_subject", subject);
    let datastore = plugin_data()
        .string("database_type", "sqlite3")
        .string("connection_string", paths.data_dir.join("datastore.sqlite3").display().to_string());
    let plugins = ConfBlock::new("plugins")
        .block(plugin("DataStore", "sql", datastore))
        .block(plugin("NodeAttestor", "join_token", plugin_data()))
        .block(plugin("NodeResolver", "noop", plugin_data()))
        .block(plugin("KeyManager", "memory", plugin_data()));

    server.render() + &plugins.render()
}
