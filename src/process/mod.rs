/// Starting and stopping server processes
use crate::core::{CmdOptions, Repository, Server};
use crate::error::{MongoctlError, MongoctlResult};
use crate::utils::read_pid_file;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use toml::Value;
use tracing::{debug, info, warn};

const STOP_WAIT_ATTEMPTS: u32 = 20;
const STOP_WAIT_INTERVAL: Duration = Duration::from_millis(500);

/// Everything needed to launch one server process
#[derive(Debug, Clone)]
pub struct ProcessLaunch {
    pub server_id: String,
    /// `mongod` or `mongos`
    pub binary: String,
    pub options: CmdOptions,
    /// Content of the key file named by the `keyFile` option
    pub repl_key: Option<String>,
}

impl ProcessLaunch {
    /// Command line arguments: `--name value`, a bare `--name` for `true`,
    /// nothing for `false`, arrays comma-joined
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (name, value) in &self.options {
            let flag = format!("--{}", name);
            match value {
                Value::Boolean(true) => args.push(flag),
                Value::Boolean(false) => {}
                Value::String(s) => {
                    args.push(flag);
                    args.push(s.clone());
                }
                Value::Array(values) => {
                    args.push(flag);
                    args.push(values.iter().map(render_scalar).collect::<Vec<_>>().join(","));
                }
                other => {
                    args.push(flag);
                    args.push(render_scalar(other));
                }
            }
        }
        args
    }

    pub fn is_fork(&self) -> bool {
        self.options
            .get("fork")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn option_path(&self, name: &str) -> Option<PathBuf> {
        self.options.get(name).and_then(Value::as_str).map(PathBuf::from)
    }

    pub fn port(&self) -> Option<u16> {
        self.options
            .get("port")
            .and_then(Value::as_integer)
            .and_then(|port| u16::try_from(port).ok())
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pid printed by a forking mongod/mongos (`forked process: 1234`)
fn forked_pid(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .find_map(|line| line.split("forked process:").nth(1))
        .and_then(|rest| rest.trim().split_whitespace().next())
        .and_then(|pid| pid.parse().ok())
}

#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Launch the process and return its pid
    async fn start_process(&self, launch: &ProcessLaunch) -> MongoctlResult<u32>;

    /// Signal the process; true once it is gone
    async fn stop_process(&self, pid: u32, force: bool) -> MongoctlResult<bool>;

    async fn is_pid_alive(&self, pid: u32) -> bool;
}

/// Runs binaries on this machine and signals them with `kill`
#[derive(Debug, Clone, Default)]
pub struct LocalProcessControl {
    bin_dir: Option<PathBuf>,
}

impl LocalProcessControl {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self { bin_dir }
    }

    fn binary_path(&self, binary: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(binary),
            None => PathBuf::from(binary),
        }
    }

    /// Create the data and log directories and write the key file
    async fn prepare(&self, launch: &ProcessLaunch) -> MongoctlResult<()> {
        if let Some(dbpath) = launch.option_path("dbpath") {
            tokio::fs::create_dir_all(&dbpath).await?;
        }
        for option in ["logpath", "pidfilepath"] {
            if let Some(parent) = launch.option_path(option).as_deref().and_then(Path::parent) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        if let (Some(key), Some(key_file)) = (&launch.repl_key, launch.option_path("keyFile")) {
            if !key_file.exists() {
                debug!("Writing key file {}", key_file.display());
                tokio::fs::write(&key_file, key).await?;
                restrict_permissions(&key_file)?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> MongoctlResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> MongoctlResult<()> {
    Ok(())
}

#[async_trait]
impl ProcessControl for LocalProcessControl {
    async fn start_process(&self, launch: &ProcessLaunch) -> MongoctlResult<u32> {
        self.prepare(launch).await?;

        let binary = self.binary_path(&launch.binary);
        let args = launch.args();
        info!("Starting server '{}' with {}", launch.server_id, binary.display());
        debug!("{} {}", binary.display(), args.join(" "));

        let mut command = Command::new(&binary);
        command.args(&args).stdin(Stdio::null());

        if launch.is_fork() {
            let output = command.output().await.map_err(|e| {
                MongoctlError::process(format!("Unable to run {}: {}", binary.display(), e))
            })?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            if !output.status.success() {
                return Err(MongoctlError::process(format!(
                    "Server '{}' failed to start ({}): {}",
                    launch.server_id,
                    output.status,
                    stdout.trim()
                )));
            }

            return launch
                .option_path("pidfilepath")
                .and_then(|path| read_pid_file(&path))
                .or_else(|| forked_pid(&stdout))
                .ok_or_else(|| {
                    MongoctlError::process(format!(
                        "Unable to determine the pid of server '{}'",
                        launch.server_id
                    ))
                });
        }

        let child = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MongoctlError::process(format!("Unable to run {}: {}", binary.display(), e)))?;
        child.id().ok_or_else(|| {
            MongoctlError::process(format!("Server '{}' exited immediately", launch.server_id))
        })
    }

    async fn stop_process(&self, pid: u32, force: bool) -> MongoctlResult<bool> {
        let signal = if force { "KILL" } else { "TERM" };
        info!("Sending {} to pid {}", signal, pid);

        let status = Command::new("kill")
            .arg("-s")
            .arg(signal)
            .arg(pid.to_string())
            .status()
            .await?;
        if !status.success() {
            return Ok(false);
        }

        for _ in 0..STOP_WAIT_ATTEMPTS {
            if !self.is_pid_alive(pid).await {
                return Ok(true);
            }
            tokio::time::sleep(STOP_WAIT_INTERVAL).await;
        }
        Ok(!self.is_pid_alive(pid).await)
    }

    async fn is_pid_alive(&self, pid: u32) -> bool {
        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Launch `server` on this machine with `overrides` applied to its options
pub async fn start_server(
    server: &mut Server,
    overrides: &CmdOptions,
    repo: &dyn Repository,
    process: &dyn ProcessControl,
) -> MongoctlResult<u32> {
    server.validate_local_op("start").await?;

    let options = server.export_cmd_options(overrides, repo).await?;
    let launch = ProcessLaunch {
        server_id: server.id().to_string(),
        binary: server.kind().binary().to_string(),
        options,
        repl_key: server.repl_key(repo).await?,
    };

    let pid = process.start_process(&launch).await?;
    info!("Server '{}' started with pid {}", server.id(), pid);
    Ok(pid)
}

/// Stop `server`: the shutdown command when it answers, else a signal to
/// `pid_hint` or the pid from its pid file
pub async fn stop_server(
    server: &mut Server,
    process: &dyn ProcessControl,
    pid_hint: Option<u32>,
    force: bool,
) -> MongoctlResult<()> {
    server.validate_local_op("stop").await?;

    let mut shutdown_error = None;
    if server.is_online().await {
        info!("Stopping server '{}'", server.id());
        match server.shutdown(force).await {
            Ok(()) => {
                info!("Server '{}' stopped", server.id());
                return Ok(());
            }
            Err(e) => {
                warn!("Shutdown command failed on server '{}': {}", server.id(), e);
                shutdown_error = Some(e);
            }
        }
    }

    let pid = pid_hint.or_else(|| server.pid());
    match pid {
        Some(pid) if process.is_pid_alive(pid).await => {
            if process.stop_process(pid, force).await? {
                info!("Server '{}' (pid {}) stopped", server.id(), pid);
                Ok(())
            } else {
                Err(MongoctlError::process(format!(
                    "Unable to stop server '{}' (pid {})",
                    server.id(),
                    pid
                )))
            }
        }
        _ => match shutdown_error {
            Some(e) => Err(e),
            None => {
                info!("Server '{}' is not running", server.id());
                Ok(())
            }
        },
    }
}

#[cfg(test)]
pub(crate) use mock::MockProcessControl;
