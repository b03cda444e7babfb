use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use roam_stream::{Client, Connector, HandshakeConfig, NoDispatcher, accept};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;

use crate::config::{DecodeErrorPolicy, HookConfig};
use crate::error::HookError;
use crate::hook::{self, HookService, HookServiceClient, HookServiceDispatcher};
use crate::hook::{InfoResult, OnDefineDomainResult};
use crate::rules::RuleTable;

// ── Connector: always Unix socket ───────────────────────────────────

pub struct HookConnector {
    path: PathBuf,
}

impl Connector for HookConnector {
    type Transport = UnixStream;

    async fn connect(&self) -> io::Result<UnixStream> {
        UnixStream::connect(&self.path).await
    }
}

pub type HookClient = HookServiceClient<Client<HookConnector, NoDispatcher>>;

/// Create a client for the hook listening on `path`.
pub fn connect(path: &Path) -> HookClient {
    let connector = HookConnector {
        path: path.to_path_buf(),
    };
    let client = roam_stream::connect(connector, HandshakeConfig::default(), NoDispatcher);
    HookServiceClient::new(client)
}

// ── HookImpl ────────────────────────────────────────────────────────

enum ServerAction {
    Terminate { reason: String },
}

#[derive(Clone)]
struct HookImpl {
    info: InfoResult,
    rules: Arc<RuleTable>,
    policy: DecodeErrorPolicy,
    action_tx: mpsc::Sender<ServerAction>,
}

impl HookImpl {
    fn new(config: &HookConfig, action_tx: mpsc::Sender<ServerAction>) -> Self {
        Self {
            info: hook::info(&config.name),
            rules: Arc::new(config.rule_table()),
            policy: config.decode_error_policy,
            action_tx,
        }
    }

    /// Signal the serve loop to exit after a short delay, giving the failed
    /// call's response time to flush back to the caller.
    fn signal_exit_deferred(&self, action: ServerAction) {
        let tx = self.action_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            let _ = tx.send(action).await;
        });
    }
}

impl HookService for HookImpl {
    async fn info(&self, _cx: &roam::Context) -> Result<InfoResult, String> {
        tracing::info!("hook's Info method has been called");
        Ok(self.info.clone())
    }

    async fn on_define_domain(
        &self,
        _cx: &roam::Context,
        vmi: Vec<u8>,
        domain_xml: Vec<u8>,
    ) -> Result<OnDefineDomainResult, String> {
        tracing::info!("hook's OnDefineDomain callback method has been called");

        match hook::on_define_domain(&self.rules, &vmi, &domain_xml) {
            Ok(domain_xml) => Ok(OnDefineDomainResult { domain_xml }),
            Err(e) => {
                if e.is_fatal() && self.policy == DecodeErrorPolicy::Terminate {
                    self.signal_exit_deferred(ServerAction::Terminate {
                        reason: e.to_string(),
                    });
                }
                Err(e.to_string())
            }
        }
    }
}

// ── serve loop ──────────────────────────────────────────────────────

/// Accept hook calls on `listener` until `shutdown` resolves.
///
/// Under [`DecodeErrorPolicy::Terminate`] a failed call also ends the loop,
/// returning [`HookError::Terminated`].
pub async fn serve(
    listener: UnixListener,
    config: &HookConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<(), HookError> {
    let (action_tx, mut action_rx) = mpsc::channel::<ServerAction>(4);
    let handler = HookImpl::new(config, action_tx);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let dispatcher = HookServiceDispatcher::new(handler.clone());
                        tokio::spawn(async move {
                            match accept(stream, HandshakeConfig::default(), dispatcher).await {
                                Ok((_handle, _incoming, driver)) => {
                                    let _ = driver.run().await;
                                }
                                Err(e) => tracing::error!("hook handshake failed: {e}"),
                            }
                        });
                    }
                    Err(e) => tracing::error!("hook accept error: {e}"),
                }
            }
            Some(ServerAction::Terminate { reason }) = action_rx.recv() => {
                tracing::error!(reason = %reason, "terminating after fatal call error");
                return Err(HookError::Terminated { reason });
            }
            _ = &mut shutdown => {
                tracing::info!("hook server shutting down");
                return Ok(());
            }
        }
    }
}

/// Bind the hook socket, serve until SIGTERM/SIGINT, then remove the socket.
pub async fn run_serve(config: &HookConfig) -> Result<(), HookError> {
    let sock_path = config.socket_path();

    std::fs::create_dir_all(&config.socket_dir).map_err(|source| HookError::Io {
        context: format!("creating socket directory {}", config.socket_dir.display()),
        source,
    })?;
    if sock_path.exists() {
        let _ = std::fs::remove_file(&sock_path);
    }
    let listener = UnixListener::bind(&sock_path).map_err(|source| HookError::Io {
        context: format!(
            "binding Unix socket {} (check the directory exists and the name is not taken)",
            sock_path.display()
        ),
        source,
    })?;

    let mut sigterm = signal(SignalKind::terminate()).map_err(|source| HookError::Io {
        context: "registering SIGTERM handler".into(),
        source,
    })?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(|source| HookError::Io {
        context: "registering SIGINT handler".into(),
        source,
    })?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
    };

    tracing::info!(
        name = %config.name,
        sock = %sock_path.display(),
        "starting hook server exposing info and {} services",
        hook::SUPPORTED_VERSION
    );

    let result = serve(listener, config, shutdown).await;
    let _ = std::fs::remove_file(&sock_path);
    tracing::info!("hook server exited");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_xml::DomainDocument;
    use tokio::sync::oneshot;

    fn test_config(dir: &Path, policy: DecodeErrorPolicy) -> HookConfig {
        HookConfig {
            socket_dir: dir.to_path_buf(),
            decode_error_policy: policy,
            ..HookConfig::default()
        }
    }

    #[tokio::test]
    async fn info_and_define_domain_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), DecodeErrorPolicy::FailCall);
        let listener = UnixListener::bind(config.socket_path()).unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let server_config = config.clone();
        let server = tokio::spawn(async move {
            serve(listener, &server_config, async {
                let _ = stop_rx.await;
            })
            .await
        });

        let client = connect(&config.socket_path());
        let info = client.info().await.unwrap();
        assert_eq!(info, hook::info("android-x86"));

        let vmi = br#"{"metadata":{"annotations":{"graphics.vm.kubevirt.io/eglHeadless":""}}}"#;
        let result = client
            .on_define_domain(vmi.to_vec(), b"<domain type=\"kvm\"/>".to_vec())
            .await
            .unwrap();
        let doc = DomainDocument::decode(&result.domain_xml).unwrap();
        assert_eq!(doc.graphics_types(), vec!["egl-headless".to_string()]);

        // A malformed call fails without taking the server down.
        assert!(
            client
                .on_define_domain(b"garbage".to_vec(), b"<domain/>".to_vec())
                .await
                .is_err()
        );
        assert!(client.info().await.is_ok());

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn terminate_policy_stops_server() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), DecodeErrorPolicy::Terminate);
        let listener = UnixListener::bind(config.socket_path()).unwrap();

        let server_config = config.clone();
        let server = tokio::spawn(async move {
            serve(listener, &server_config, std::future::pending::<()>()).await
        });

        let client = connect(&config.socket_path());
        assert!(
            client
                .on_define_domain(b"{}".to_vec(), b"not xml".to_vec())
                .await
                .is_err()
        );

        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(err, HookError::Terminated { .. }));
    }
}
