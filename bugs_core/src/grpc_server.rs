// gRPC server following ML-Agents' RpcCommunicator pattern
// This side is the SERVER; the Unity player is the CLIENT that connects to it

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tonic::{transport::Server, Request, Response, Status};
use tracing::{debug, error};

use crate::communicator_objects::{
    unity_to_external_proto_server::{UnityToExternalProto, UnityToExternalProtoServer},
    HeaderProto, UnityInputProto, UnityMessageProto, UnityOutputProto,
};
use crate::error::{Result, UnityEnvironmentError};

const STATUS_OK: i32 = 200;
const STATUS_QUIT: i32 = 400;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

// Channel-based communication between the gRPC service and the environment
#[derive(Clone)]
pub struct UnityServiceImpl {
    // Unity -> environment
    unity_to_external_tx: mpsc::UnboundedSender<UnityMessageProto>,
    // environment -> Unity
    external_to_unity_rx: Arc<Mutex<mpsc::UnboundedReceiver<UnityMessageProto>>>,
}

impl UnityServiceImpl {
    pub fn new(
        unity_to_external_tx: mpsc::UnboundedSender<UnityMessageProto>,
        external_to_unity_rx: mpsc::UnboundedReceiver<UnityMessageProto>,
    ) -> Self {
        Self {
            unity_to_external_tx,
            external_to_unity_rx: Arc::new(Mutex::new(external_to_unity_rx)),
        }
    }
}

#[tonic::async_trait]
impl UnityToExternalProto for UnityServiceImpl {
    async fn exchange(
        &self,
        request: Request<UnityMessageProto>,
    ) -> Result<Response<UnityMessageProto>, Status> {
        let msg_from_unity = request.into_inner();

        self.unity_to_external_tx
            .send(msg_from_unity)
            .map_err(|e| Status::unavailable(format!("environment is gone: {}", e)))?;

        let mut rx = self.external_to_unity_rx.lock().await;
        let response_msg = rx
            .recv()
            .await
            .ok_or_else(|| Status::unavailable("environment channel closed"))?;

        Ok(Response::new(response_msg))
    }
}

pub struct GrpcServer {
    port: u16,
    timeout_wait: Duration,
    unity_to_external_rx: mpsc::UnboundedReceiver<UnityMessageProto>,
    external_to_unity_tx: Option<mpsc::UnboundedSender<UnityMessageProto>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl GrpcServer {
    /// Starts serving on `base_port + worker_id`. Must be called from within a tokio runtime.
    pub fn bind(worker_id: u16, base_port: u16, timeout_wait: Duration) -> Result<Self> {
        let port = base_port
            .checked_add(worker_id)
            .ok_or(UnityEnvironmentError::InvalidPort {
                base_port,
                worker_id,
            })?;
        check_port(port, worker_id)?;

        let (unity_to_external_tx, unity_to_external_rx) = mpsc::unbounded_channel();
        let (external_to_unity_tx, external_to_unity_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let service = UnityServiceImpl::new(unity_to_external_tx, external_to_unity_rx);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        let server = tokio::spawn(async move {
            let result = Server::builder()
                .add_service(UnityToExternalProtoServer::new(service))
                .serve_with_shutdown(addr, async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(port, error = %e, "gRPC server stopped");
            }
        });
        debug!(port, "gRPC server started");

        Ok(Self {
            port,
            timeout_wait,
            unity_to_external_rx,
            external_to_unity_tx: Some(external_to_unity_tx),
            shutdown_tx: Some(shutdown_tx),
            server,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_open(&self) -> bool {
        self.external_to_unity_tx.is_some()
    }

    /// Waits for Unity's first message, answers with `input` and reads the ack.
    ///
    /// Unity speaks first: its initialization output carries the academy
    /// name, versions and brain parameters.
    pub async fn initialize<F>(
        &mut self,
        input: UnityInputProto,
        mut poll_callback: F,
    ) -> Result<UnityOutputProto>
    where
        F: FnMut() -> Result<()>,
    {
        let first = self.poll_for_timeout(&mut poll_callback).await?;
        let aca_output = first.unity_output.unwrap_or_default();
        self.send(input, STATUS_OK)?;
        let _ack = self.poll_for_timeout(&mut poll_callback).await?;
        Ok(aca_output)
    }

    /// Sends `input` and waits for Unity's answer.
    pub async fn exchange<F>(
        &mut self,
        input: UnityInputProto,
        mut poll_callback: F,
    ) -> Result<UnityOutputProto>
    where
        F: FnMut() -> Result<()>,
    {
        self.send(input, STATUS_OK)?;
        let msg = self.poll_for_timeout(&mut poll_callback).await?;
        match msg.header {
            Some(header) if header.status == STATUS_OK => Ok(msg.unity_output.unwrap_or_default()),
            _ => Err(UnityEnvironmentError::CommunicatorStopped),
        }
    }

    /// Tells Unity to quit and stops serving. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(tx) = self.external_to_unity_tx.take() {
            let quit = UnityMessageProto {
                header: Some(HeaderProto {
                    status: STATUS_QUIT,
                    message: String::new(),
                }),
                unity_output: None,
                unity_input: None,
            };
            let _ = tx.send(quit);
        }
        if let Some(shutdown) = self.shutdown_tx.take() {
            let _ = shutdown.send(());
            debug!(port = self.port, "gRPC server shutting down");
        }
    }

    fn send(&self, input: UnityInputProto, status: i32) -> Result<()> {
        let msg = UnityMessageProto {
            header: Some(HeaderProto {
                status,
                message: String::new(),
            }),
            unity_output: None,
            unity_input: Some(input),
        };
        self.external_to_unity_tx
            .as_ref()
            .ok_or(UnityEnvironmentError::CommunicatorStopped)?
            .send(msg)
            .map_err(|_| UnityEnvironmentError::CommunicatorStopped)
    }

    async fn poll_for_timeout<F>(&mut self, poll_callback: &mut F) -> Result<UnityMessageProto>
    where
        F: FnMut() -> Result<()>,
    {
        let deadline = Instant::now() + self.timeout_wait;
        loop {
            let wait = POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()));
            match timeout(wait, self.unity_to_external_rx.recv()).await {
                Ok(Some(msg)) => return Ok(msg),
                Ok(None) => return Err(UnityEnvironmentError::CommunicatorStopped),
                Err(_) => {
                    poll_callback()?;
                    if Instant::now() >= deadline {
                        return Err(UnityEnvironmentError::Timeout(self.timeout_wait));
                    }
                }
            }
        }
    }
}

impl Drop for GrpcServer {
    fn drop(&mut self) {
        self.close();
        if !self.server.is_finished() {
            debug!(port = self.port, "gRPC server task still draining");
        }
    }
}

fn check_port(port: u16, worker_id: u16) -> Result<()> {
    TcpListener::bind(("0.0.0.0", port))
        .map(drop)
        .map_err(|_| UnityEnvironmentError::WorkerInUse { port, worker_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        TcpListener::bind(("127.0.0.1", 0)).unwrap().local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_port_in_use_is_reported() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let err = GrpcServer::bind(0, port, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(
            err,
            UnityEnvironmentError::WorkerInUse { worker_id: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_port_overflow_is_rejected() {
        let err = GrpcServer::bind(10, u16::MAX, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, UnityEnvironmentError::InvalidPort { .. }));
    }

    #[tokio::test]
    async fn test_initialize_times_out_without_unity() {
        let mut server = GrpcServer::bind(0, free_port(), Duration::from_millis(50)).unwrap();
        let err = server.initialize(UnityInputProto::default(), || Ok(())).await.unwrap_err();
        assert!(matches!(err, UnityEnvironmentError::Timeout(_)));
        server.close();
        assert!(!server.is_open());
    }

    #[tokio::test]
    async fn test_poll_callback_error_aborts_wait() {
        let mut server = GrpcServer::bind(0, free_port(), Duration::from_secs(30)).unwrap();
        let err = server
            .initialize(UnityInputProto::default(), || Err(UnityEnvironmentError::NotLoaded))
            .await
            .unwrap_err();
        assert!(matches!(err, UnityEnvironmentError::NotLoaded));
    }

    #[tokio::test]
    async fn test_exchange_after_close_fails() {
        let mut server = GrpcServer::bind(0, free_port(), Duration::from_millis(50)).unwrap();
        server.close();
        let err = server.exchange(UnityInputProto::default(), || Ok(())).await.unwrap_err();
        assert!(matches!(err, UnityEnvironmentError::CommunicatorStopped));
    }
}
