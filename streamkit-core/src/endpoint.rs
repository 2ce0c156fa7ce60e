//! Endpoint composition: a muxer bound to a sink, exposing the same
//! open/write/start/stop/close contract as a single sink. A
//! `CombineEndpoint` fans every frame out to several constituents so a
//! caller can, e.g., record locally while streaming remotely.

use crate::error::{Result, StreamkitError};
use crate::model::{CodecConfig, Frame};
use crate::mux::Muxer;
use crate::sink::Sink;
use std::collections::HashMap;
use tracing::warn;

/// Common surface for `Endpoint` and `CombineEndpoint`, so the pipeline
/// orchestrator can hold either behind `Box<dyn StreamEndpoint>` without
/// caring which one it's driving.
#[async_trait::async_trait]
pub trait StreamEndpoint: Send {
    /// Register one elementary stream ahead of `start`.
    fn add_stream(&mut self, stream_id: u32, config: CodecConfig) -> Result<()>;

    async fn open(&mut self) -> Result<()>;
    async fn start(&mut self) -> Result<()>;
    async fn write(&mut self, stream_id: u32, frame: Frame) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
    fn is_open(&self) -> bool;
}

/// One muxer bound to one sink.
pub struct Endpoint {
    muxer: Box<dyn Muxer>,
    sink: Box<dyn Sink>,
    /// External (pipeline) stream id -> this muxer's own track id.
    track_ids: HashMap<u32, u32>,
    open: bool,
}

impl Endpoint {
    pub fn new(muxer: Box<dyn Muxer>, sink: Box<dyn Sink>) -> Self {
        Endpoint {
            muxer,
            sink,
            track_ids: HashMap::new(),
            open: false,
        }
    }
}

#[async_trait::async_trait]
impl StreamEndpoint for Endpoint {
    fn add_stream(&mut self, stream_id: u32, config: CodecConfig) -> Result<()> {
        let track_id = self.muxer.add_stream(config)?;
        self.track_ids.insert(stream_id, track_id);
        Ok(())
    }

    async fn open(&mut self) -> Result<()> {
        self.sink.open().await?;
        self.open = true;
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        self.sink.start_stream().await?;
        for packet in self.muxer.start_stream()? {
            self.sink.write(&packet).await?;
        }
        Ok(())
    }

    async fn write(&mut self, stream_id: u32, frame: Frame) -> Result<()> {
        let track_id = *self
            .track_ids
            .get(&stream_id)
            .ok_or_else(|| StreamkitError::Unconfigured(format!("no track for stream {stream_id}")))?;
        for packet in self.muxer.write(track_id, frame)? {
            self.sink.write(&packet).await?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        for packet in self.muxer.stop_stream()? {
            self.sink.write(&packet).await?;
        }
        self.sink.stop_stream().await
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Fans every call out to all constituents. A constituent's lifecycle
/// failure (`open`/`close`/`start`/`stop`) is isolated and logged; the
/// constituent is marked closed and skipped by subsequent calls. Only when
/// *every* constituent fails the same call does `CombineEndpoint` report an
/// aggregated error.
pub struct CombineEndpoint {
    constituents: Vec<Endpoint>,
}

impl CombineEndpoint {
    pub fn new(constituents: Vec<Endpoint>) -> Self {
        CombineEndpoint { constituents }
    }
}

#[async_trait::async_trait]
impl StreamEndpoint for CombineEndpoint {
    fn add_stream(&mut self, stream_id: u32, config: CodecConfig) -> Result<()> {
        for c in &mut self.constituents {
            c.add_stream(stream_id, config.clone())?;
        }
        Ok(())
    }

    async fn open(&mut self) -> Result<()> {
        let mut failures = 0;
        let total = self.constituents.len();
        for c in &mut self.constituents {
            if let Err(e) = c.open().await {
                warn!(error = %e, "combine endpoint constituent failed to open");
                failures += 1;
            }
        }
        if failures == total && total > 0 {
            return Err(StreamkitError::InvalidState("all combine endpoint constituents failed to open".into()));
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let mut failures = 0;
        let total = self.constituents.iter().filter(|c| c.is_open()).count();
        for c in self.constituents.iter_mut().filter(|c| c.is_open()) {
            if let Err(e) = c.start().await {
                warn!(error = %e, "combine endpoint constituent failed to start");
                c.open = false;
                failures += 1;
            }
        }
        if failures == total && total > 0 {
            return Err(StreamkitError::InvalidState("all combine endpoint constituents failed to start".into()));
        }
        Ok(())
    }

    async fn write(&mut self, stream_id: u32, mut frame: Frame) -> Result<()> {
        let open_count = self.constituents.iter().filter(|c| c.is_open()).count();
        if open_count == 0 {
            return Err(StreamkitError::Closed);
        }
        let mut failures = 0;
        // `share()` hands back a refcounted clone of the (possibly just-copied)
        // underlying bytes, so every constituent but the first sees a
        // zero-copy view; only the very first `share()` call here pays the
        // one-time cost of moving an `Owned`/`Pooled` payload into `Bytes`.
        for c in self.constituents.iter_mut().filter(|c| c.is_open()) {
            let this_frame = frame.share();
            if let Err(e) = c.write(stream_id, this_frame).await {
                warn!(error = %e, "combine endpoint constituent failed to write, marking closed");
                c.open = false;
                failures += 1;
            }
        }
        if failures == open_count {
            return Err(StreamkitError::InvalidState("all combine endpoint constituents failed to write".into()));
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut failures = 0;
        let total = self.constituents.iter().filter(|c| c.is_open()).count();
        for c in self.constituents.iter_mut().filter(|c| c.is_open()) {
            if let Err(e) = c.stop().await {
                warn!(error = %e, "combine endpoint constituent failed to stop");
                failures += 1;
            }
        }
        if failures == total && total > 0 {
            return Err(StreamkitError::InvalidState("all combine endpoint constituents failed to stop".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut failures = 0;
        let total = self.constituents.len();
        for c in &mut self.constituents {
            if let Err(e) = c.close().await {
                warn!(error = %e, "combine endpoint constituent failed to close");
                failures += 1;
            }
        }
        if failures == total && total > 0 {
            return Err(StreamkitError::InvalidState("all combine endpoint constituents failed to close".into()));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.constituents.iter().any(|c| c.is_open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mime, Payload, Resolution, VideoConfig};
    use crate::mux::ts::{TsMuxer, TsMuxerConfig};
    use crate::sink::file::FileSink;

    fn video_config() -> CodecConfig {
        CodecConfig::Video(VideoConfig {
            mime: Mime::H264,
            start_bitrate: 1_000_000,
            resolution: Resolution { w: 640, h: 360 },
            fps: 30,
            profile: None,
            level: None,
            gop_s: 2.0,
        })
    }

    #[tokio::test]
    async fn endpoint_routes_frame_through_muxer_and_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let mut endpoint = Endpoint::new(Box::new(TsMuxer::new(TsMuxerConfig::default())), Box::new(FileSink::new(&path)));
        endpoint.add_stream(1, video_config()).unwrap();
        endpoint.open().await.unwrap();
        endpoint.start().await.unwrap();
        let frame = Frame::new(1, Mime::H264, Payload::Owned(vec![0, 0, 0, 1, 0x67, 1, 2, 3]), 0, true);
        endpoint.write(1, frame).await.unwrap();
        endpoint.stop().await.unwrap();
        endpoint.close().await.unwrap();

        let bytes = tokio::fs::read(&path).await.unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(bytes.len() % 188, 0);
    }

    #[tokio::test]
    async fn combine_endpoint_writes_to_every_constituent() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.ts");
        let path_b = dir.path().join("b.ts");
        let endpoint_a = Endpoint::new(Box::new(TsMuxer::new(TsMuxerConfig::default())), Box::new(FileSink::new(&path_a)));
        let endpoint_b = Endpoint::new(Box::new(TsMuxer::new(TsMuxerConfig::default())), Box::new(FileSink::new(&path_b)));
        let mut combined = CombineEndpoint::new(vec![endpoint_a, endpoint_b]);
        combined.add_stream(1, video_config()).unwrap();
        combined.open().await.unwrap();
        combined.start().await.unwrap();
        let frame = Frame::new(1, Mime::H264, Payload::Owned(vec![0, 0, 0, 1, 0x67, 1, 2, 3]), 0, true);
        combined.write(1, frame).await.unwrap();
        combined.stop().await.unwrap();
        combined.close().await.unwrap();

        let bytes_a = tokio::fs::read(&path_a).await.unwrap();
        let bytes_b = tokio::fs::read(&path_b).await.unwrap();
        assert_eq!(bytes_a, bytes_b);
        assert!(!bytes_a.is_empty());
    }
}
