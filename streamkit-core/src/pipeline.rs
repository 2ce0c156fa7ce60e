//! Pipeline orchestrator: the lifecycle state machine and frame routing
//! glue between N producers and one `StreamEndpoint`.
//!
//! Each registered stream gets its own bounded, drop-oldest frame queue so a
//! producer's `write` never blocks and a slow
//! stream never starves a healthy one. One task per stream drains its queue
//! and drives the (muxer + sink) endpoint; the endpoint is exclusively
//! owned by whichever task currently holds its `tokio::sync::Mutex` guard.
//! Unlike the `parking_lot` mutex the buffer pool uses, this one is meant
//! to be held across an `.await`, so holding it only for the duration of
//! one `write` call is the idiomatic use, not a violation of the "no lock
//! across await" discipline that applies to the short, CPU-only critical
//! sections elsewhere in this crate.

use crate::config::ChannelConfig;
use crate::endpoint::StreamEndpoint;
use crate::error::{Result, StreamkitError};
use crate::model::{CodecConfig, Frame};
use parking_lot::Mutex as SyncMutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Idle,
    Configured,
    Streaming,
}

/// Bounded queue with drop-oldest-on-overflow semantics, since
/// `tokio::sync::mpsc` only offers backpressure, not eviction. Pushing past
/// capacity evicts the front (oldest) entry instead of blocking or
/// rejecting the new one.
struct DropOldestChannel<T> {
    queue: SyncMutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> DropOldestChannel<T> {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(DropOldestChannel {
            queue: SyncMutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        })
    }

    /// Pushes `item`, evicting and returning the oldest entry if the queue
    /// was already at capacity.
    fn push(&self, item: T) -> Option<T> {
        let dropped = {
            let mut q = self.queue.lock();
            let dropped = if q.len() >= self.capacity { q.pop_front() } else { None };
            q.push_back(item);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Waits for and pops the next item.
    async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.queue.lock().pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    fn try_pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }
}

struct WorkerHandle {
    join: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Orchestrates one `StreamEndpoint` across N producer streams. See spec
/// §4.1 for the public contract and §5 for the concurrency model.
pub struct Pipeline {
    state: PipelineState,
    released: bool,
    endpoint: Arc<AsyncMutex<Option<Box<dyn StreamEndpoint>>>>,
    channels: HashMap<u32, Arc<DropOldestChannel<Frame>>>,
    channel_config: ChannelConfig,
    stop_timeout: Duration,
    next_stream_id: u32,
    workers: Vec<WorkerHandle>,
}

impl Pipeline {
    pub fn new(endpoint: Box<dyn StreamEndpoint>, channel_config: ChannelConfig, stop_timeout: Duration) -> Self {
        Pipeline {
            state: PipelineState::Idle,
            released: false,
            endpoint: Arc::new(AsyncMutex::new(Some(endpoint))),
            channels: HashMap::new(),
            channel_config,
            stop_timeout,
            next_stream_id: 1,
            workers: Vec::new(),
        }
    }

    fn check_not_released(&self) -> Result<()> {
        if self.released {
            return Err(StreamkitError::Closed);
        }
        Ok(())
    }

    /// Registers one elementary stream. Must be called before `start_stream`.
    pub async fn add_stream(&mut self, config: CodecConfig) -> Result<u32> {
        self.check_not_released()?;
        if self.state == PipelineState::Streaming {
            return Err(StreamkitError::InvalidState("add_stream after start_stream".into()));
        }
        let stream_id = self.next_stream_id;
        self.next_stream_id += 1;

        let mut guard = self.endpoint.lock().await;
        let endpoint = guard.as_mut().ok_or(StreamkitError::Closed)?;
        endpoint.add_stream(stream_id, config)?;
        drop(guard);

        self.channels.insert(stream_id, DropOldestChannel::new(self.channel_config.capacity));
        self.state = PipelineState::Configured;
        Ok(stream_id)
    }

    /// Enqueues one frame for `stream_id`. Non-blocking: on overflow the
    /// oldest queued frame for that stream is dropped and a warning logged;
    /// this method itself never fails on overflow, only on a closed
    /// pipeline or an unknown stream id.
    pub fn write(&self, stream_id: u32, frame: Frame) -> Result<()> {
        self.check_not_released()?;
        let channel = self
            .channels
            .get(&stream_id)
            .ok_or_else(|| StreamkitError::Unconfigured(format!("no stream registered with id {stream_id}")))?;
        if channel.push(frame).is_some() {
            warn!("{}", StreamkitError::Overflow { stream_id });
        }
        Ok(())
    }

    /// Transitions to `Streaming`: opens the endpoint, emits its
    /// initialization output, and spawns one drain task per registered
    /// stream.
    pub async fn start_stream(&mut self) -> Result<()> {
        self.check_not_released()?;
        if self.state != PipelineState::Configured {
            return Err(StreamkitError::Unconfigured("start_stream before any add_stream".into()));
        }
        {
            let mut guard = self.endpoint.lock().await;
            let endpoint = guard.as_mut().ok_or(StreamkitError::Closed)?;
            endpoint.open().await?;
            endpoint.start().await?;
        }

        for (&stream_id, channel) in &self.channels {
            let channel = channel.clone();
            let endpoint = self.endpoint.clone();
            let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

            let join = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        frame = channel.pop() => {
                            Self::drive_one(&endpoint, stream_id, frame).await;
                        }
                    }
                }
                // Drain whatever queued up before the shutdown signal landed.
                while let Some(frame) = channel.try_pop() {
                    Self::drive_one(&endpoint, stream_id, frame).await;
                }
            });

            self.workers.push(WorkerHandle { join, shutdown: shutdown_tx });
        }

        self.state = PipelineState::Streaming;
        Ok(())
    }

    async fn drive_one(endpoint: &Arc<AsyncMutex<Option<Box<dyn StreamEndpoint>>>>, stream_id: u32, frame: Frame) {
        let mut guard = endpoint.lock().await;
        if let Some(endpoint) = guard.as_mut() {
            if let Err(e) = endpoint.write(stream_id, frame).await {
                warn!(stream_id, error = %e, "muxer/sink write failed, frame dropped");
            }
        }
    }

    /// Flushes the muxer and sink. Idempotent: a no-op when not currently
    /// streaming. Signals every drain task, waits up to `stop_timeout` for
    /// them to finish draining, then flushes the endpoint itself.
    pub async fn stop_stream(&mut self) -> Result<()> {
        self.check_not_released()?;
        if self.state != PipelineState::Streaming {
            return Ok(());
        }

        for worker in &self.workers {
            let _ = worker.shutdown.send(true);
        }
        let workers = std::mem::take(&mut self.workers);
        let drain = async {
            for worker in workers {
                let _ = worker.join.await;
            }
        };
        if tokio::time::timeout(self.stop_timeout, drain).await.is_err() {
            warn!("stop_stream timed out waiting for drain tasks to finish");
        }

        {
            let mut guard = self.endpoint.lock().await;
            if let Some(endpoint) = guard.as_mut() {
                endpoint.stop().await?;
            }
        }
        self.state = PipelineState::Idle;
        Ok(())
    }

    /// Releases buffers and aborts background tasks without draining.
    /// Permitted from any state; the pipeline is unusable afterward.
    pub async fn release(&mut self) {
        for worker in &self.workers {
            let _ = worker.shutdown.send(true);
        }
        for worker in std::mem::take(&mut self.workers) {
            worker.join.abort();
        }
        let mut guard = self.endpoint.lock().await;
        if let Some(mut endpoint) = guard.take() {
            let _ = endpoint.close().await;
        }
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
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

    fn build_pipeline(path: &std::path::Path) -> Pipeline {
        let endpoint = Endpoint::new(Box::new(TsMuxer::new(TsMuxerConfig::default())), Box::new(FileSink::new(path)));
        Pipeline::new(Box::new(endpoint), ChannelConfig::default(), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn full_lifecycle_produces_ts_aligned_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let mut pipeline = build_pipeline(&path);

        let stream_id = pipeline.add_stream(video_config()).await.unwrap();
        pipeline.start_stream().await.unwrap();
        let frame = Frame::new(stream_id, Mime::H264, Payload::Owned(vec![0, 0, 0, 1, 0x67, 1, 2, 3]), 0, true);
        pipeline.write(stream_id, frame).unwrap();
        // give the drain task a chance to run before stopping
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline.stop_stream().await.unwrap();
        pipeline.release().await;

        let bytes = tokio::fs::read(&path).await.unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(bytes.len() % 188, 0);
    }

    #[tokio::test]
    async fn add_stream_after_start_is_invalid_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let mut pipeline = build_pipeline(&path);
        pipeline.add_stream(video_config()).await.unwrap();
        pipeline.start_stream().await.unwrap();
        assert!(matches!(
            pipeline.add_stream(video_config()).await,
            Err(StreamkitError::InvalidState(_))
        ));
        pipeline.release().await;
    }

    #[tokio::test]
    async fn write_to_unknown_stream_is_unconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let pipeline = build_pipeline(&path);
        let frame = Frame::new(99, Mime::H264, Payload::Owned(vec![1]), 0, true);
        assert!(matches!(
            pipeline.write(99, frame),
            Err(StreamkitError::Unconfigured(_))
        ));
    }

    #[tokio::test]
    async fn write_after_release_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let mut pipeline = build_pipeline(&path);
        let stream_id = pipeline.add_stream(video_config()).await.unwrap();
        pipeline.release().await;
        let frame = Frame::new(stream_id, Mime::H264, Payload::Owned(vec![1]), 0, true);
        assert!(matches!(pipeline.write(stream_id, frame), Err(StreamkitError::Closed)));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_without_erroring() {
        let channel = DropOldestChannel::new(2);
        assert!(channel.push(1).is_none());
        assert!(channel.push(2).is_none());
        assert_eq!(channel.push(3), Some(1));
        assert_eq!(channel.try_pop(), Some(2));
        assert_eq!(channel.try_pop(), Some(3));
    }
}
