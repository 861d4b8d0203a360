//! Owned `p2pd` process.

use crate::config::DaemonConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::local::{self, ControlAddr};
use crate::utils::timeout::{attempts_within, with_timeout_error, SHUTDOWN_TIMEOUT};
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Running daemon started by this process
#[derive(Debug)]
pub struct DaemonProcess {
    child: Child,
    control: ControlAddr,
    log_tasks: Vec<JoinHandle<()>>,
}

impl DaemonProcess {
    /// Start the daemon listening on `control` and wait for its control socket.
    ///
    /// The socket is probed at `config.poll_interval` until it accepts a
    /// connection or `config.startup_timeout` passes.
    #[instrument(skip(config), fields(binary = %config.binary, control = %control))]
    pub async fn spawn(config: &DaemonConfig, control: &ControlAddr) -> Result<Self> {
        remove_socket_file(control)?;

        let args = config.to_args(&control.to_multiaddr().to_string());
        debug!(?args, "Starting daemon");
        let mut child = Command::new(&config.binary)
            .args(&args)
            .envs(config.flags.clone().normalize().to_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProtocolError::DaemonError(format!("failed to start {}: {e}", config.binary)))?;

        let mut log_tasks = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            log_tasks.push(tokio::spawn(forward_output(stdout, "stdout")));
        }
        if let Some(stderr) = child.stderr.take() {
            log_tasks.push(tokio::spawn(forward_output(stderr, "stderr")));
        }

        let mut process = Self {
            child,
            control: control.clone(),
            log_tasks,
        };
        if let Err(e) = process.wait_ready(config).await {
            let _ = process.shutdown().await;
            return Err(e);
        }
        info!(pid = ?process.pid(), "Daemon ready");
        Ok(process)
    }

    async fn wait_ready(&mut self, config: &DaemonConfig) -> Result<()> {
        let attempts = attempts_within(config.startup_timeout, config.poll_interval);
        for attempt in 0..attempts {
            if let Some(status) = self.child.try_wait()? {
                warn!(%status, "Daemon exited during startup");
                return Err(ProtocolError::DaemonError(constants::ERR_DAEMON_EXITED.to_string()));
            }
            match local::connect(&self.control).await {
                Ok(_) => return Ok(()),
                Err(e) => debug!(attempt, error = %e, "Control socket not ready"),
            }
            tokio::time::sleep(config.poll_interval).await;
        }
        Err(ProtocolError::DaemonError(constants::ERR_DAEMON_NOT_READY.to_string()))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn control_addr(&self) -> &ControlAddr {
        &self.control
    }

    /// Kill and reap the daemon, then remove its control socket
    #[instrument(skip(self), fields(pid = ?self.child.id()))]
    pub async fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "Daemon already gone");
        }
        let child = &mut self.child;
        let reaped = with_timeout_error(async { Ok(child.wait().await?) }, SHUTDOWN_TIMEOUT)
            .await
            .map(|status| debug!(%status, "Daemon exited"));

        if let Err(e) = remove_socket_file(&self.control) {
            warn!(control = %self.control, error = %e, "Failed to remove control socket");
        }

        for task in self.log_tasks.drain(..) {
            task.abort();
        }
        reaped
    }
}

/// Remove the Unix socket file behind `control`, if any
fn remove_socket_file(control: &ControlAddr) -> io::Result<()> {
    match control {
        #[cfg(unix)]
        ControlAddr::Unix(path) => match std::fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
        ControlAddr::Tcp(_) => Ok(()),
    }
}

async fn forward_output<R>(output: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(output).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "p2pd", stream, "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(target: "p2pd", stream, error = %e, "Daemon output closed");
                break;
            }
        }
    }
}
