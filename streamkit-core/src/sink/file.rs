//! File sink: writes packets to a path on disk, truncating on (re)open.

use crate::error::{Result, StreamkitError};
use crate::model::Packet;
use crate::sink::Sink;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    in_error: bool,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSink {
            path: path.into(),
            writer: None,
            in_error: false,
        }
    }
}

#[async_trait::async_trait]
impl Sink for FileSink {
    async fn open(&mut self) -> Result<()> {
        let file = File::create(&self.path).await?;
        self.writer = Some(BufWriter::new(file));
        self.in_error = false;
        Ok(())
    }

    async fn write(&mut self, packet: &Packet) -> Result<()> {
        if self.in_error {
            return Ok(());
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| StreamkitError::InvalidState("write before open".into()))?;
        let data: &[u8] = packet.payload.as_ref();
        if let Err(e) = writer.write_all(data).await {
            self.in_error = true;
            return Err(StreamkitError::TransientIo(e));
        }
        Ok(())
    }

    async fn start_stream(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop_stream(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PacketKind, Payload};

    #[tokio::test]
    async fn writes_payload_bytes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let mut sink = FileSink::new(&path);
        sink.open().await.unwrap();
        sink.start_stream().await.unwrap();
        let pkt = Packet::new(Payload::Owned(vec![1, 2, 3, 4]), 0, PacketKind::Other);
        sink.write(&pkt).await.unwrap();
        sink.stop_stream().await.unwrap();
        sink.close().await.unwrap();

        let bytes = tokio::fs::read(&path).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn write_before_open_is_invalid_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let mut sink = FileSink::new(&path);
        let pkt = Packet::new(Payload::Owned(vec![1]), 0, PacketKind::Other);
        assert!(matches!(
            sink.write(&pkt).await,
            Err(StreamkitError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn reopen_truncates_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        let mut sink = FileSink::new(&path);
        sink.open().await.unwrap();
        sink.write(&Packet::new(Payload::Owned(vec![9; 10]), 0, PacketKind::Other))
            .await
            .unwrap();
        sink.close().await.unwrap();

        sink.open().await.unwrap();
        sink.write(&Packet::new(Payload::Owned(vec![1, 2]), 0, PacketKind::Other))
            .await
            .unwrap();
        sink.stop_stream().await.unwrap();

        let bytes = tokio::fs::read(&path).await.unwrap();
        assert_eq!(bytes, vec![1, 2]);
    }
}
