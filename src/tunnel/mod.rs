// dbsync/src/tunnel/mod.rs
pub(crate) mod ssh;

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::config::{AppSettings, Environment};
use crate::errors::{AppError, Result};

pub use ssh::SshTunnelOpener;

/// Parameters of one local port forward through a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub gateway_user: String,
    pub gateway_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl TunnelSpec {
    /// Forward `settings.local_port` to the source's database host, on the
    /// same port the gateway-side mysqldump uses.
    pub fn for_source(source: &Environment, settings: &AppSettings) -> Self {
        TunnelSpec {
            gateway_user: source.gateway_user().to_string(),
            gateway_host: source.gateway_host().to_string(),
            local_port: settings.local_port,
            remote_host: source.host().to_string(),
            remote_port: source.port.unwrap_or(settings.remote_port),
        }
    }
}

/// An open forward. `close` must be called exactly once.
#[async_trait]
pub trait TunnelHandle: Send {
    fn local_port(&self) -> u16;

    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait TunnelOpener: Send + Sync {
    async fn open(&self, spec: &TunnelSpec) -> Result<Box<dyn TunnelHandle>>;
}

/// Opens a tunnel, runs `body` with its local port and closes the tunnel on
/// every exit path: success, an error from `body`, or cancellation.
///
/// If `body` fails and closing fails too, the body's error is returned and the
/// close error is logged.
pub async fn with_tunnel<T, F, Fut>(
    opener: &dyn TunnelOpener,
    spec: &TunnelSpec,
    cancel: &CancellationToken,
    body: F,
) -> Result<T>
where
    F: FnOnce(u16) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    tracing::info!(
        "Opening tunnel 127.0.0.1:{} -> {}:{} via {}@{}",
        spec.local_port,
        spec.remote_host,
        spec.remote_port,
        spec.gateway_user,
        spec.gateway_host
    );
    let tunnel = tokio::select! {
        opened = opener.open(spec) => opened?,
        _ = cancel.cancelled() => {
            return Err(AppError::Cancelled("tunnel setup interrupted".to_string()));
        }
    };

    let outcome = tokio::select! {
        result = body(tunnel.local_port()) => result,
        _ = cancel.cancelled() => Err(AppError::Cancelled("interrupted while tunnel was open".to_string())),
    };

    let closed = tunnel.close().await;
    tracing::debug!("Tunnel on local port {} closed", spec.local_port);
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            tracing::warn!("Failed to close tunnel after error: {}", close_err);
            Err(err)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records opens and closes instead of spawning ssh.
    #[derive(Default, Clone)]
    pub(crate) struct FakeTunnels {
        pub opened: Arc<Mutex<Vec<TunnelSpec>>>,
        pub closed: Arc<AtomicUsize>,
        pub fail_open: bool,
    }

    impl FakeTunnels {
        pub fn close_count(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct FakeHandle {
        port: u16,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TunnelHandle for FakeHandle {
        fn local_port(&self) -> u16 {
            self.port
        }

        async fn close(self: Box<Self>) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl TunnelOpener for FakeTunnels {
        async fn open(&self, spec: &TunnelSpec) -> Result<Box<dyn TunnelHandle>> {
            if self.fail_open {
                return Err(AppError::Tunnel(format!("{} unreachable", spec.gateway_host)));
            }
            self.opened.lock().unwrap().push(spec.clone());
            Ok(Box::new(FakeHandle {
                port: spec.local_port,
                closed: self.closed.clone(),
            }))
        }
    }
}
