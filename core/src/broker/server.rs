use crate::protocol::{Command, Frame, FrameCodec};
use crate::{
    broker::MessageHandler, config::BrokerConfig, metrics::BrokerMetrics, vhost::VirtualHost,
    RelaymqError, Result,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinError;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

const WRITER_DRAIN: Duration = Duration::from_secs(1);

pub struct BrokerServer {
    config: BrokerConfig,
    handler: Arc<MessageHandler>,
    metrics: Arc<BrokerMetrics>,
    listener: TcpListener,
    // Graceful shutdown coordination
    shutdown_tx: broadcast::Sender<()>,
}

impl BrokerServer {
    /// Opens the virtual host (running recovery) and binds the listener
    pub async fn bind(config: BrokerConfig) -> Result<Self> {
        config.validate().map_err(RelaymqError::Config)?;
        let metrics = Arc::new(BrokerMetrics::new());

        let vhost_config = config.clone();
        let vhost_metrics = Arc::clone(&metrics);
        let vhost = tokio::task::spawn_blocking(move || {
            VirtualHost::open_with_metrics(&vhost_config, vhost_metrics)
        })
        .await
        .map_err(join_error)??;

        let listener = TcpListener::bind(config.bind_address()).await?;
        let (shutdown_tx, _) = broadcast::channel(16);

        Ok(Self {
            config,
            handler: Arc::new(MessageHandler::new(Arc::new(vhost))),
            metrics,
            listener,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handler(&self) -> Arc<MessageHandler> {
        Arc::clone(&self.handler)
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Initiate graceful shutdown of the server
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(());
    }

    /// Accepts connections until shutdown is signalled
    pub async fn run(&self) -> Result<()> {
        info!(
            "RelayMQ broker listening on {} (virtual host {})",
            self.local_addr()?,
            self.handler.vhost().name()
        );

        if self.config.metrics_report_interval_secs > 0 {
            let period = Duration::from_secs(self.config.metrics_report_interval_secs);
            let metrics = Arc::clone(&self.metrics);
            let mut metrics_shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = metrics.reporting_loop(period) => {}
                    _ = metrics_shutdown_rx.recv() => {
                        debug!("Metrics reporting stopped");
                    }
                }
            });
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = Self::optimize_client_socket(&stream) {
                                warn!("Failed to optimize client socket {}: {}", peer_addr, e);
                            }

                            self.metrics.connection_opened();
                            info!(
                                "New client connected: {} (active: {})",
                                peer_addr,
                                self.metrics.active_connections()
                            );

                            let handler = Arc::clone(&self.handler);
                            let metrics = Arc::clone(&self.metrics);
                            let max_frame_size = self.config.max_frame_size;
                            let client_shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_client(
                                    stream,
                                    handler,
                                    max_frame_size,
                                    client_shutdown_rx,
                                )
                                .await
                                {
                                    error!("Error handling client {}: {}", peer_addr, e);
                                } else {
                                    info!("Client {} disconnected", peer_addr);
                                }
                                metrics.connection_closed();
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping server gracefully...");
                    break;
                }
            }
        }

        info!("Server shutdown complete");
        Ok(())
    }

    fn optimize_client_socket(stream: &TcpStream) -> Result<()> {
        use socket2::SockRef;

        let socket_ref = SockRef::from(stream);
        socket_ref.set_nodelay(true)?;
        socket_ref.set_keepalive(true)?;
        Ok(())
    }

    /// Reads commands in order and answers each before reading the next.
    ///
    /// Replies and consumer pushes share one writer task, so a push for this connection
    /// may arrive between a request and its reply.
    async fn handle_client(
        stream: TcpStream,
        handler: Arc<MessageHandler>,
        max_frame_size: usize,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let (mut sink, mut frames) = Framed::new(stream, FrameCodec::new(max_frame_size)).split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();

        let mut writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    warn!("Failed to send frame: {}", e);
                    break;
                }
            }
        });

        let mut channels: Vec<String> = Vec::new();
        let result = loop {
            let next = tokio::select! {
                next = frames.next() => next,
                _ = shutdown_rx.recv() => break Ok(()),
            };
            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            };
            let command = match Command::decode(&frame) {
                Ok(command) => command,
                Err(e) => break Err(e),
            };

            match &command {
                Command::ChannelCreate(header) => channels.push(header.channel_id.clone()),
                Command::ChannelClose(header) => channels.retain(|c| c != &header.channel_id),
                _ => {}
            }

            let request_handler = Arc::clone(&handler);
            let outbound = out_tx.clone();
            let response = match tokio::task::spawn_blocking(move || {
                request_handler.handle(command, &outbound)
            })
            .await
            {
                Ok(response) => response,
                Err(e) => break Err(join_error(e)),
            };

            match response.encode() {
                Ok(frame) => {
                    if out_tx.send(frame).is_err() {
                        break Ok(());
                    }
                }
                Err(e) => break Err(e),
            }
        };

        let cleanup_handler = Arc::clone(&handler);
        if let Err(e) =
            tokio::task::spawn_blocking(move || cleanup_handler.close_connection(&channels)).await
        {
            error!("Channel cleanup failed: {}", e);
        }
        drop(out_tx);
        // Let queued replies flush; a sender still held by an in-flight delivery is not awaited
        if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            writer.abort();
        }
        result
    }
}

fn join_error(e: JoinError) -> RelaymqError {
    RelaymqError::Storage(std::io::Error::new(std::io::ErrorKind::Other, e))
}
