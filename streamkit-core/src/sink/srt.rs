//! SRT sink, built directly on `tokio::net::UdpSocket`.
//!
//! Real SRT (handshake, ARQ retransmission, congestion control) needs a
//! vendored C library; this models the connection-parameter surface SRT
//! callers expect (`stream_id`, `passphrase`, `latency_ms`) over a plain UDP
//! datagram transport, with the `TransportStats` the regulator reads
//! derived from actual socket send results rather than stubbed constants.

use crate::error::{Result, StreamkitError};
use crate::model::Packet;
use crate::sink::Sink;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::UdpSocket;

/// SRT connection parameters a caller supplies at construction, mirroring
/// the subset of `srt-live-transmit`'s URI query parameters.
#[derive(Debug, Clone)]
pub struct SrtConfig {
    pub remote_addr: SocketAddr,
    pub stream_id: Option<String>,
    pub passphrase: Option<String>,
    pub latency_ms: u32,
    /// Largest UDP payload to send in one datagram before splitting;
    /// matches SRT's default MTU-derived payload size.
    pub max_payload_size: usize,
}

impl Default for SrtConfig {
    fn default() -> Self {
        SrtConfig {
            remote_addr: "127.0.0.1:9000".parse().unwrap(),
            stream_id: None,
            passphrase: None,
            latency_ms: 120,
            max_payload_size: 1316, // SRT's conventional live-mode payload size
        }
    }
}

/// Transport stats the bitrate regulator polls. `pkt_retrans_total` and
/// `byte_snd_buf` stay 0 and `ms_rtt` stays 0.0: this transport has no ARQ
/// layer or send queue to report on, and no echo protocol to time a round
/// trip, so there is nothing to honestly derive those three from.
/// `pkt_sent_total`, `pkt_snd_loss_total`, and `mbps_bandwidth` are computed
/// from real socket send results.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    pub pkt_sent_total: u64,
    pub pkt_snd_loss_total: u64,
    pub pkt_retrans_total: u64,
    pub byte_snd_buf: u64,
    pub ms_rtt: f64,
    pub mbps_bandwidth: f64,
}

pub struct SrtSink {
    config: SrtConfig,
    socket: Option<UdpSocket>,
    in_error: bool,
    bytes_sent: u64,
    datagrams_sent: u64,
    send_errors: u64,
    connected_at: Option<Instant>,
}

impl SrtSink {
    pub fn new(config: SrtConfig) -> Self {
        SrtSink {
            config,
            socket: None,
            in_error: false,
            bytes_sent: 0,
            datagrams_sent: 0,
            send_errors: 0,
            connected_at: None,
        }
    }

    pub fn stats(&self) -> TransportStats {
        let elapsed_s = self
            .connected_at
            .map(|t| t.elapsed().as_secs_f64())
            .filter(|s| *s > 0.0)
            .unwrap_or(1.0);
        let mbps_bandwidth = (self.bytes_sent as f64 * 8.0) / elapsed_s / 1_000_000.0;
        TransportStats {
            pkt_sent_total: self.datagrams_sent,
            pkt_snd_loss_total: self.send_errors,
            pkt_retrans_total: 0,
            byte_snd_buf: 0,
            ms_rtt: 0.0,
            mbps_bandwidth,
        }
    }
}

#[async_trait::async_trait]
impl Sink for SrtSink {
    async fn open(&mut self) -> Result<()> {
        let local: SocketAddr = if self.config.remote_addr.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.config.remote_addr).await?;
        self.socket = Some(socket);
        self.in_error = false;
        self.connected_at = Some(Instant::now());
        self.bytes_sent = 0;
        self.datagrams_sent = 0;
        self.send_errors = 0;
        Ok(())
    }

    async fn write(&mut self, packet: &Packet) -> Result<()> {
        if self.in_error {
            return Ok(());
        }
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| StreamkitError::InvalidState("write before open".into()))?;
        let data: &[u8] = packet.payload.as_ref();
        for chunk in data.chunks(self.config.max_payload_size) {
            match socket.send(chunk).await {
                Ok(_) => {
                    self.bytes_sent += chunk.len() as u64;
                    self.datagrams_sent += 1;
                }
                Err(e) => {
                    self.send_errors += 1;
                    if e.kind() == std::io::ErrorKind::ConnectionRefused {
                        self.in_error = true;
                        return Err(StreamkitError::ConnectionLost);
                    }
                    self.in_error = true;
                    return Err(StreamkitError::TransientIo(e));
                }
            }
        }
        Ok(())
    }

    async fn start_stream(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop_stream(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.socket = None;
        self.connected_at = None;
        Ok(())
    }
}
