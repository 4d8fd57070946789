//! TCP ingestion server
//!
//! Accepts one connection at a time and drains it completely before the
//! next accept. Framing, timeout and decompression failures end only the
//! connection that caused them.

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::codec::InflaterStats;
use crate::config::NetworkConfig;
use crate::error::{NetworkError, Result};
use crate::network::ingest::IngestionCoordinator;
use crate::network::reader::PacketReader;
use crate::protocol::PacketLimits;

/// Create the listening socket
///
/// Address reuse is enabled so a restarted receiver can rebind at once.
pub fn create_listener(config: &NetworkConfig) -> Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .map_err(|e| {
            NetworkError::BindFailed(format!("{}:{}: {}", config.bind_address, config.port, e))
        })?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;
    socket
        .listen(config.listen_backlog)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener)?)
}

/// Server statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub connections: u64,
    pub connections_failed: u64,
    pub packets_received: u64,
    pub compressed_packets: u64,
    pub bytes_received: u64,
    pub acks_sent: u64,
    /// Inflate totals across every connection so far
    pub inflate: InflaterStats,
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicU64,
    connections_failed: AtomicU64,
    packets_received: AtomicU64,
    compressed_packets: AtomicU64,
    bytes_received: AtomicU64,
    acks_sent: AtomicU64,
}

/// Frame ingestion server
pub struct IngestServer {
    config: NetworkConfig,
    limits: PacketLimits,
    ingest: Arc<IngestionCoordinator>,
    counters: Counters,
    inflate: Mutex<InflaterStats>,
}

impl IngestServer {
    pub fn new(
        config: NetworkConfig,
        limits: PacketLimits,
        ingest: Arc<IngestionCoordinator>,
    ) -> Self {
        Self {
            config,
            limits,
            ingest,
            counters: Counters::default(),
            inflate: Mutex::new(InflaterStats::default()),
        }
    }

    pub fn ingest(&self) -> &Arc<IngestionCoordinator> {
        &self.ingest
    }

    /// Serve connections from `listener` serially until shutdown
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!(
            "Ingestion server listening on {} (max packet {} bytes)",
            listener.local_addr()?,
            self.limits.max_packet_size
        );

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        continue;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Could not disable Nagle on {}: {}", peer, e);
            }

            tokio::select! {
                result = self.handle_connection(stream, peer) => match result {
                    Ok(()) => {}
                    Err(e) if e.is_connection_scoped() => {
                        self.counters.connections_failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Closing connection from {}: {}", peer, e);
                    }
                    Err(e) => {
                        tracing::error!("Ingestion server failing on {}: {}", peer, e);
                        return Err(e);
                    }
                },
                _ = shutdown.changed() => {
                    tracing::info!("Shutdown while serving {}", peer);
                    break;
                }
            }
        }

        tracing::info!("Ingestion server stopped");
        Ok(())
    }

    /// Process packets from one connection until it closes or fails
    ///
    /// Partial data is discarded with the connection on any error.
    pub async fn handle_connection<S>(&self, stream: S, peer: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.counters.connections.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Accepted connection from {}", peer);

        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader =
            PacketReader::new(read_half, self.limits.clone(), self.config.receive_timeout());

        let result = self.drain(&mut reader, &mut write_half).await;
        self.inflate.lock().merge(&reader.inflater_stats());

        if result.is_ok() {
            tracing::debug!("Connection from {} closed by peer", peer);
        }
        result
    }

    async fn drain<R, W>(&self, reader: &mut PacketReader<R>, write_half: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while let Some(packet) = reader.next_packet().await? {
            self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
            self.counters
                .bytes_received
                .fetch_add(packet.wire_size as u64, Ordering::Relaxed);
            if packet.compressed {
                self.counters.compressed_packets.fetch_add(1, Ordering::Relaxed);
            }

            if let Some(ack) = self.ingest.dispatch(packet)? {
                write_half.write_all(&ack.to_bytes()).await?;
                self.counters.acks_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            connections: self.counters.connections.load(Ordering::Relaxed),
            connections_failed: self.counters.connections_failed.load(Ordering::Relaxed),
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            compressed_packets: self.counters.compressed_packets.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            acks_sent: self.counters.acks_sent.load(Ordering::Relaxed),
            inflate: self.inflate.lock().clone(),
        }
    }
}
