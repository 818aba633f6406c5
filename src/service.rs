//! OS Service Management
//!
//! Thin handles over the init system that runs the Kubernetes service.
//! Every operation is idempotent so the bootstrap machines can repeat
//! them across ticks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Handle on a single OS service
#[async_trait]
pub trait ServiceHandle: Send + Sync {
    /// Service name (unit or init script)
    fn name(&self) -> &str;

    /// Environment file read by the service
    fn env_file(&self) -> PathBuf;

    /// Replace the command line the service runs
    async fn override_cmd(&self, command_line: &str) -> Result<()>;

    /// Start the service
    async fn start(&self) -> Result<()>;

    /// Enable the service at boot
    async fn enable(&self) -> Result<()>;
}

/// Hands out service handles
pub trait ServiceManager: Send + Sync {
    /// Get a handle for `name`
    fn service(&self, name: &str) -> Box<dyn ServiceHandle>;
}

/// Supported init systems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSystem {
    Systemd,
    OpenRc,
}

impl InitSystem {
    /// Detect the init system under `root`
    pub fn detect(root: &Path) -> Self {
        if root.join("sbin/openrc-run").exists() {
            InitSystem::OpenRc
        } else {
            InitSystem::Systemd
        }
    }
}

/// Service manager of the running system
#[derive(Debug, Clone)]
pub struct SystemManager {
    root: PathBuf,
    init: InitSystem,
}

impl SystemManager {
    /// Create a manager for the system rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let init = InitSystem::detect(&root);
        tracing::debug!("Detected init system {:?}", init);
        Self { root, init }
    }

    /// Detected init system
    pub fn init_system(&self) -> InitSystem {
        self.init
    }
}

impl ServiceManager for SystemManager {
    fn service(&self, name: &str) -> Box<dyn ServiceHandle> {
        match self.init {
            InitSystem::Systemd => Box::new(SystemdService {
                name: name.to_string(),
                root: self.root.clone(),
            }),
            InitSystem::OpenRc => Box::new(OpenRcService {
                name: name.to_string(),
                root: self.root.clone(),
            }),
        }
    }
}

/// A systemd unit
struct SystemdService {
    name: String,
    root: PathBuf,
}

#[async_trait]
impl ServiceHandle for SystemdService {
    fn name(&self) -> &str {
        &self.name
    }

    fn env_file(&self) -> PathBuf {
        self.root
            .join("etc/systemd/system")
            .join(format!("{}.service.env", self.name))
    }

    async fn override_cmd(&self, command_line: &str) -> Result<()> {
        let dir = self
            .root
            .join("etc/systemd/system")
            .join(format!("{}.service.d", self.name));
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("override.conf"), systemd_override(command_line)).await?;

        run_command("systemctl", &["daemon-reload"])
            .await
            .map_err(|e| service_error(&self.name, "reload", e))?;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        run_command("systemctl", &["start", &self.name])
            .await
            .map_err(|e| service_error(&self.name, "start", e))?;
        Ok(())
    }

    async fn enable(&self) -> Result<()> {
        run_command("systemctl", &["enable", &self.name])
            .await
            .map_err(|e| service_error(&self.name, "enable", e))?;
        Ok(())
    }
}

/// An OpenRC init script
struct OpenRcService {
    name: String,
    root: PathBuf,
}

#[async_trait]
impl ServiceHandle for OpenRcService {
    fn name(&self) -> &str {
        &self.name
    }

    fn env_file(&self) -> PathBuf {
        self.root.join("etc/sysconfig").join(&self.name)
    }

    async fn override_cmd(&self, command_line: &str) -> Result<()> {
        let script = self.root.join("etc/init.d").join(&self.name);
        let content = tokio::fs::read_to_string(&script)
            .await
            .map_err(|e| service_error(&self.name, "override", Error::Io(e)))?;
        tokio::fs::write(&script, openrc_override(&content, command_line)).await?;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        run_command("rc-service", &[&self.name, "start"])
            .await
            .map_err(|e| service_error(&self.name, "start", e))?;
        Ok(())
    }

    async fn enable(&self) -> Result<()> {
        run_command("rc-update", &["add", &self.name, "default"])
            .await
            .map_err(|e| service_error(&self.name, "enable", e))?;
        Ok(())
    }
}

fn service_error(service: &str, action: &str, err: Error) -> Error {
    Error::Service {
        service: service.to_string(),
        action: action.to_string(),
        reason: err.to_string(),
    }
}

/// Render a systemd drop-in that replaces `ExecStart`
pub fn systemd_override(command_line: &str) -> String {
    format!("[Service]\nExecStart=\nExecStart={}\n", command_line.trim())
}

/// Rewrite the `command=` and `command_args=` lines of an OpenRC script
pub fn openrc_override(script: &str, command_line: &str) -> String {
    let mut parts = command_line.trim().splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let args = parts.next().unwrap_or_default().trim();

    let mut out = String::with_capacity(script.len());
    let mut saw_command = false;
    let mut saw_args = false;

    for line in script.lines() {
        if line.starts_with("command=") {
            out.push_str(&format!("command=\"{}\"", command));
            saw_command = true;
        } else if line.starts_with("command_args=") {
            out.push_str(&format!("command_args=\"{}\"", args));
            saw_args = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    if !saw_command {
        out.push_str(&format!("command=\"{}\"\n", command));
    }
    if !saw_args {
        out.push_str(&format!("command_args=\"{}\"\n", args));
    }

    out
}

/// Run a program and return its stdout
pub async fn run_command(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Command {
            command: format!("{} {}", program, args.join(" ")),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::Command {
            command: format!("{} {}", program, args.join(" ")),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// A call recorded by [`DryRunServiceManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Override { service: String, command: String },
    Start(String),
    Enable(String),
}

/// Service manager that records calls instead of touching the system
#[derive(Clone, Default)]
pub struct DryRunServiceManager {
    root: PathBuf,
    calls: Arc<Mutex<Vec<ServiceCall>>>,
    fail_start: Arc<Mutex<bool>>,
}

impl DryRunServiceManager {
    /// Create a recorder whose env files live under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Recorded calls, oldest first
    pub async fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().await.clone()
    }

    /// Make every subsequent start fail
    pub async fn fail_start(&self, fail: bool) {
        *self.fail_start.lock().await = fail;
    }
}

impl ServiceManager for DryRunServiceManager {
    fn service(&self, name: &str) -> Box<dyn ServiceHandle> {
        Box::new(DryRunService {
            name: name.to_string(),
            root: self.root.clone(),
            calls: self.calls.clone(),
            fail_start: self.fail_start.clone(),
        })
    }
}

struct DryRunService {
    name: String,
    root: PathBuf,
    calls: Arc<Mutex<Vec<ServiceCall>>>,
    fail_start: Arc<Mutex<bool>>,
}

#[async_trait]
impl ServiceHandle for DryRunService {
    fn name(&self) -> &str {
        &self.name
    }

    fn env_file(&self) -> PathBuf {
        self.root
            .join("etc/systemd/system")
            .join(format!("{}.service.env", self.name))
    }

    async fn override_cmd(&self, command_line: &str) -> Result<()> {
        tracing::info!("[dry-run] {} ExecStart={}", self.name, command_line);
        self.calls.lock().await.push(ServiceCall::Override {
            service: self.name.clone(),
            command: command_line.to_string(),
        });
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        if *self.fail_start.lock().await {
            return Err(Error::Service {
                service: self.name.clone(),
                action: "start".into(),
                reason: "start refused".into(),
            });
        }
        tracing::info!("[dry-run] start {}", self.name);
        self.calls.lock().await.push(ServiceCall::Start(self.name.clone()));
        Ok(())
    }

    async fn enable(&self) -> Result<()> {
        tracing::info!("[dry-run] enable {}", self.name);
        self.calls.lock().await.push(ServiceCall::Enable(self.name.clone()));
        Ok(())
    }
}
