// dbsync/src/tunnel/ssh.rs
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};

use super::{TunnelHandle, TunnelOpener, TunnelSpec};
use crate::errors::{AppError, Result};
use crate::utils::find_executable;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Opens forwards with the system `ssh` client (`ssh -N -L ...`).
#[derive(Debug, Clone)]
pub struct SshTunnelOpener {
    connect_timeout: Duration,
}

impl SshTunnelOpener {
    pub fn new(connect_timeout: Duration) -> Self {
        SshTunnelOpener { connect_timeout }
    }
}

/// Builds the ssh argument list for a forward. Kept separate so it can be
/// checked without spawning anything.
pub(crate) fn forward_args(spec: &TunnelSpec) -> Vec<String> {
    vec![
        "-N".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-L".to_string(),
        format!(
            "{}:{}:{}",
            spec.local_port, spec.remote_host, spec.remote_port
        ),
        format!("{}@{}", spec.gateway_user, spec.gateway_host),
    ]
}

#[async_trait]
impl TunnelOpener for SshTunnelOpener {
    async fn open(&self, spec: &TunnelSpec) -> Result<Box<dyn TunnelHandle>> {
        let ssh_path =
            find_executable("ssh").map_err(|e| AppError::Tunnel(e.to_string()))?;

        // The forward would silently attach to whatever already listens here.
        drop(
            TcpListener::bind(("127.0.0.1", spec.local_port))
                .await
                .map_err(|e| {
                    AppError::Tunnel(format!(
                        "local port {} is not available: {}",
                        spec.local_port, e
                    ))
                })?,
        );

        let mut child = Command::new(ssh_path)
            .args(forward_args(spec))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Tunnel(format!("failed to spawn ssh: {}", e)))?;

        let deadline = Instant::now() + self.connect_timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                let stderr = read_stderr(&mut child).await;
                return Err(AppError::Tunnel(format!(
                    "ssh to {}@{} exited with {}: {}",
                    spec.gateway_user,
                    spec.gateway_host,
                    status,
                    stderr.trim()
                )));
            }
            if TcpStream::connect(("127.0.0.1", spec.local_port)).await.is_ok() {
                break;
            }
            if Instant::now() >= deadline {
                let _ = child.kill().await;
                return Err(AppError::Tunnel(format!(
                    "forward on local port {} not ready after {}s",
                    spec.local_port,
                    self.connect_timeout.as_secs()
                )));
            }
            sleep(POLL_INTERVAL).await;
        }

        drain_stderr(&mut child);
        tracing::info!(
            "SSH tunnel listening on local port {} (ssh pid {:?})",
            spec.local_port,
            child.id()
        );
        Ok(Box::new(SshTunnel {
            child,
            local_port: spec.local_port,
        }))
    }
}

async fn read_stderr(child: &mut Child) -> String {
    let mut buf = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut buf).await;
    }
    buf
}

/// Forwards whatever ssh writes to stderr into the debug log for as long as
/// the process lives, so a long-running tunnel never stalls on a full pipe.
fn drain_stderr(child: &mut Child) {
    let Some(stderr) = child.stderr.take() else {
        return;
    };
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!("ssh: {}", line);
        }
    });
}

struct SshTunnel {
    child: Child,
    local_port: u16,
}

#[async_trait]
impl TunnelHandle for SshTunnel {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            tracing::warn!(
                "ssh process for local port {} had already exited",
                self.local_port
            );
            return Ok(());
        }
        self.child
            .kill()
            .await
            .map_err(|e| AppError::Tunnel(format!("failed to stop ssh: {}", e)))?;
        tracing::info!("SSH tunnel on local port {} stopped", self.local_port);
        Ok(())
    }
}
