//! RTMP sink: handshake, NetConnection/NetStream AMF0 command framing, and
//! audio/video message chunking over `tokio::net::TcpStream`.
//!
//! Because the server must see audio and video interleaved by timestamp,
//! this sink buffers audio packets and releases them ahead of the next video
//! packet whose `ts_us` has caught up. TLS/tunnel transport variants
//! (`rtmps`, `rtmpt`, ...) are accepted at the URL level but driven over a
//! plain TCP socket; wiring real TLS or HTTP tunneling is future work,
//! noted in DESIGN.md.

use crate::error::{Result, StreamkitError};
use crate::model::{Packet, PacketKind};
use crate::sink::Sink;
use std::collections::VecDeque;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const ALLOWED_SCHEMES: &[&str] = &[
    "rtmp", "rtmps", "rtmpe", "rtmpt", "rtmpte", "rtmpts", "rtmfp",
];

const CSID_COMMAND: u8 = 3;
const CSID_AUDIO: u8 = 4;
const CSID_VIDEO: u8 = 6;

const MSG_TYPE_AUDIO: u8 = 8;
const MSG_TYPE_VIDEO: u8 = 9;
const MSG_TYPE_COMMAND_AMF0: u8 = 20;

#[derive(Debug, Clone)]
pub struct RtmpConfig {
    pub url: String,
    pub chunk_size: u32,
}

impl Default for RtmpConfig {
    fn default() -> Self {
        RtmpConfig {
            url: String::new(),
            chunk_size: 4096,
        }
    }
}

struct RtmpUrl {
    #[allow(dead_code)]
    scheme: String,
    host: String,
    port: u16,
    app: String,
    stream_key: String,
}

fn parse_rtmp_url(url: &str) -> Result<RtmpUrl> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| StreamkitError::BadParameter(format!("not a URL: {url}")))?;
    if !ALLOWED_SCHEMES.contains(&scheme) {
        return Err(StreamkitError::BadParameter(format!(
            "unsupported RTMP scheme: {scheme}"
        )));
    }
    let mut parts = rest.splitn(2, '/');
    let authority = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();
    let (host, port) = match authority.split_once(':') {
        Some((h, p)) => (
            h.to_string(),
            p.parse::<u16>()
                .map_err(|_| StreamkitError::BadParameter(format!("bad port: {p}")))?,
        ),
        None => (authority.to_string(), 1935),
    };
    if host.is_empty() {
        return Err(StreamkitError::BadParameter("missing host".into()));
    }
    let (app, stream_key) = match path.rsplit_once('/') {
        Some((app, key)) => (app.to_string(), key.to_string()),
        None => (path.to_string(), String::new()),
    };
    Ok(RtmpUrl {
        scheme: scheme.to_string(),
        host,
        port,
        app,
        stream_key,
    })
}

/// Minimal AMF0 encoder covering the types the connect/createStream/publish
/// commands need.
enum Amf0 {
    Number(f64),
    String(String),
    Null,
    Object(Vec<(&'static str, Amf0)>),
}

impl Amf0 {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Amf0::Number(n) => {
                out.push(0x00);
                out.extend_from_slice(&n.to_be_bytes());
            }
            Amf0::String(s) => {
                out.push(0x02);
                out.extend_from_slice(&(s.len() as u16).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Amf0::Null => out.push(0x05),
            Amf0::Object(fields) => {
                out.push(0x03);
                for (key, value) in fields {
                    out.extend_from_slice(&(key.len() as u16).to_be_bytes());
                    out.extend_from_slice(key.as_bytes());
                    value.encode(out);
                }
                out.extend_from_slice(&[0, 0, 0x09]);
            }
        }
    }
}

fn build_chunk_header(csid: u8, timestamp_ms: u32, payload_len: u32, msg_type_id: u8, msg_stream_id: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(12);
    header.push(csid & 0x3f); // fmt 0 in top two bits, which are 0
    let ts_field = timestamp_ms.min(0x00FF_FFFF);
    header.extend_from_slice(&ts_field.to_be_bytes()[1..]);
    header.extend_from_slice(&payload_len.to_be_bytes()[1..]);
    header.push(msg_type_id);
    header.extend_from_slice(&msg_stream_id.to_le_bytes());
    if timestamp_ms >= 0x00FF_FFFF {
        header.extend_from_slice(&timestamp_ms.to_be_bytes());
    }
    header
}

/// Chunks one RTMP message into basic-header-prefixed fragments.
fn build_chunks(csid: u8, timestamp_ms: u32, msg_type_id: u8, msg_stream_id: u32, payload: &[u8], chunk_size: u32) -> Vec<u8> {
    let mut out = build_chunk_header(csid, timestamp_ms, payload.len() as u32, msg_type_id, msg_stream_id);
    let extended = timestamp_ms >= 0x00FF_FFFF;
    let chunk_size = chunk_size.max(1) as usize;
    for (i, chunk) in payload.chunks(chunk_size).enumerate() {
        if i > 0 {
            // fmt 3 continuation: basic header only (plus extended timestamp echo).
            out.push(0xc0 | (csid & 0x3f));
            if extended {
                out.extend_from_slice(&timestamp_ms.to_be_bytes());
            }
        }
        out.extend_from_slice(chunk);
    }
    out
}

fn build_command(name: &str, transaction_id: f64, args: Vec<Amf0>) -> Vec<u8> {
    let mut payload = Vec::new();
    Amf0::String(name.to_string()).encode(&mut payload);
    Amf0::Number(transaction_id).encode(&mut payload);
    for arg in args {
        arg.encode(&mut payload);
    }
    payload
}

pub struct RtmpSink {
    config: RtmpConfig,
    stream: Option<TcpStream>,
    in_error: bool,
    audio_queue: VecDeque<(i64, Vec<u8>)>,
}

impl RtmpSink {
    pub fn new(config: RtmpConfig) -> Self {
        RtmpSink {
            config,
            stream: None,
            in_error: false,
            audio_queue: VecDeque::new(),
        }
    }

    async fn handshake(stream: &mut TcpStream) -> Result<()> {
        let mut c1 = vec![0u8; 1536];
        c1[8..].fill(0x42); // arbitrary deterministic "random" fill
        let mut handshake_out = Vec::with_capacity(1537);
        handshake_out.push(3u8); // C0: RTMP version 3
        handshake_out.extend_from_slice(&c1);
        stream.write_all(&handshake_out).await?;

        let mut s0s1 = vec![0u8; 1537];
        stream.read_exact(&mut s0s1).await?;
        let s1 = s0s1[1..].to_vec();

        // C2 echoes S1 verbatim.
        stream.write_all(&s1).await?;

        let mut s2 = vec![0u8; 1536];
        stream.read_exact(&mut s2).await?;
        Ok(())
    }

    async fn send_command(&mut self, csid: u8, msg_stream_id: u32, payload: Vec<u8>) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| StreamkitError::InvalidState("write before open".into()))?;
        let chunks = build_chunks(csid, 0, MSG_TYPE_COMMAND_AMF0, msg_stream_id, &payload, self.config.chunk_size);
        stream.write_all(&chunks).await?;
        Ok(())
    }

    async fn send_media(&mut self, kind: PacketKind, ts_us: i64, payload: &[u8]) -> Result<()> {
        let (csid, msg_type) = match kind {
            PacketKind::Audio => (CSID_AUDIO, MSG_TYPE_AUDIO),
            PacketKind::Video => (CSID_VIDEO, MSG_TYPE_VIDEO),
            PacketKind::Other => (CSID_COMMAND, MSG_TYPE_COMMAND_AMF0),
        };
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| StreamkitError::InvalidState("write before open".into()))?;
        let ts_ms = (ts_us / 1000).max(0) as u32;
        let chunks = build_chunks(csid, ts_ms, msg_type, 1, payload, self.config.chunk_size);
        stream.write_all(&chunks).await?;
        Ok(())
    }

    /// Releases queued audio whose timestamp has been caught up to by
    /// `video_ts_us`, in non-decreasing timestamp order, then returns
    /// control to the caller to send the video packet itself.
    async fn drain_audio_up_to(&mut self, video_ts_us: i64) -> Result<()> {
        while let Some((ts, _)) = self.audio_queue.front() {
            if *ts > video_ts_us {
                break;
            }
            let (ts, payload) = self.audio_queue.pop_front().unwrap();
            self.send_media(PacketKind::Audio, ts, &payload).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink for RtmpSink {
    async fn open(&mut self) -> Result<()> {
        let url = parse_rtmp_url(&self.config.url)?;
        let mut stream = TcpStream::connect((url.host.as_str(), url.port)).await?;
        Self::handshake(&mut stream).await?;
        self.stream = Some(stream);
        self.in_error = false;
        self.audio_queue.clear();

        let tc_url = self.config.url.clone();
        let connect_args = vec![Amf0::Object(vec![
            ("app", Amf0::String(url.app.clone())),
            ("type", Amf0::String("nonprivate".into())),
            ("flashVer", Amf0::String("FMLE/3.0".into())),
            ("tcUrl", Amf0::String(tc_url)),
        ])];
        let connect = build_command("connect", 1.0, connect_args);
        self.send_command(CSID_COMMAND, 0, connect).await?;

        let create_stream = build_command("createStream", 2.0, vec![Amf0::Null]);
        self.send_command(CSID_COMMAND, 0, create_stream).await?;

        let publish = build_command(
            "publish",
            3.0,
            vec![
                Amf0::Null,
                Amf0::String(url.stream_key),
                Amf0::String("live".into()),
            ],
        );
        self.send_command(CSID_COMMAND, 1, publish).await?;
        Ok(())
    }

    async fn write(&mut self, packet: &Packet) -> Result<()> {
        if self.in_error {
            return Ok(());
        }
        if self.stream.is_none() {
            return Err(StreamkitError::InvalidState("write before open".into()));
        }
        let data = packet.payload.as_ref().to_vec();
        let result = match packet.kind {
            PacketKind::Audio => {
                self.audio_queue.push_back((packet.ts_us, data));
                Ok(())
            }
            PacketKind::Video => async {
                self.drain_audio_up_to(packet.ts_us).await?;
                self.send_media(PacketKind::Video, packet.ts_us, &data).await
            }
            .await,
            PacketKind::Other => self.send_media(PacketKind::Other, packet.ts_us, &data).await,
        };
        if let Err(StreamkitError::Io(e)) = result {
            self.in_error = true;
            return Err(StreamkitError::TransientIo(e));
        }
        result
    }

    async fn start_stream(&mut self) -> Result<()> {
        self.audio_queue.clear();
        Ok(())
    }

    async fn stop_stream(&mut self) -> Result<()> {
        let queued: Vec<_> = self.audio_queue.drain(..).collect();
        for (ts, payload) in queued {
            self.send_media(PacketKind::Audio, ts, &payload).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stream = None;
        self.audio_queue.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_scheme_and_splits_app_and_stream_key() {
        let url = parse_rtmp_url("rtmp://example.com/live/stream42").unwrap();
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 1935);
        assert_eq!(url.app, "live");
        assert_eq!(url.stream_key, "stream42");
    }

    #[test]
    fn parses_explicit_port() {
        let url = parse_rtmp_url("rtmps://example.com:443/app/key").unwrap();
        assert_eq!(url.port, 443);
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(matches!(
            parse_rtmp_url("http://example.com/app/key"),
            Err(StreamkitError::BadParameter(_))
        ));
    }

    #[test]
    fn accepts_every_scheme_spec_names() {
        for scheme in ALLOWED_SCHEMES {
            let url = format!("{scheme}://host/app/key");
            assert!(parse_rtmp_url(&url).is_ok());
        }
    }

    #[tokio::test]
    async fn write_before_open_is_invalid_state() {
        let mut sink = RtmpSink::new(RtmpConfig {
            url: "rtmp://127.0.0.1:1935/app/key".into(),
            ..RtmpConfig::default()
        });
        let pkt = Packet::new(crate::model::Payload::Owned(vec![1]), 0, PacketKind::Video);
        assert!(matches!(
            sink.write(&pkt).await,
            Err(StreamkitError::InvalidState(_))
        ));
    }

    #[test]
    fn chunk_header_uses_fmt0_and_little_endian_stream_id() {
        let header = build_chunk_header(CSID_VIDEO, 1000, 42, MSG_TYPE_VIDEO, 1);
        assert_eq!(header[0], CSID_VIDEO);
        assert_eq!(&header[1..4], &[0, 0x03, 0xe8]); // 1000 big-endian 24-bit
        assert_eq!(&header[4..7], &[0, 0, 42]);
        assert_eq!(header[7], MSG_TYPE_VIDEO);
        assert_eq!(&header[8..12], &1u32.to_le_bytes());
    }

    #[test]
    fn large_payload_splits_into_fmt3_continuation_chunks() {
        let payload = vec![0xABu8; 20];
        let chunks = build_chunks(CSID_AUDIO, 0, MSG_TYPE_AUDIO, 1, &payload, 8);
        // header(12) + 8 bytes + fmt3(1) + 8 bytes + fmt3(1) + 4 bytes
        assert_eq!(chunks.len(), 12 + 8 + 1 + 8 + 1 + 4);
        assert_eq!(chunks[12 + 8], 0xc0 | (CSID_AUDIO & 0x3f));
    }
}
