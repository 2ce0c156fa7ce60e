//! Generic sink over any blocking `std::io::Write`, standing in for a
//! platform content-stream abstraction (e.g. Android's `ContentResolver`
//! output stream). The Rust analogue of "any writable stream handle" is
//! simply `Write`, so that's the bound this sink takes.

use crate::error::{Result, StreamkitError};
use crate::model::Packet;
use crate::sink::Sink;
use std::io::Write;

pub struct ContentStreamSink<W: Write + Send> {
    writer: Option<W>,
    factory: Box<dyn FnMut() -> std::io::Result<W> + Send>,
    in_error: bool,
}

impl<W: Write + Send> ContentStreamSink<W> {
    /// `factory` is called on every `open()`, so a sink can reconnect to a
    /// freshly-obtained stream handle after `close`.
    pub fn new(factory: impl FnMut() -> std::io::Result<W> + Send + 'static) -> Self {
        ContentStreamSink {
            writer: None,
            factory: Box::new(factory),
            in_error: false,
        }
    }
}

#[async_trait::async_trait]
impl<W: Write + Send> Sink for ContentStreamSink<W> {
    async fn open(&mut self) -> Result<()> {
        let writer = (self.factory)()?;
        self.writer = Some(writer);
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
        if let Err(e) = writer.write_all(data) {
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
            writer.flush()?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PacketKind, Payload};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn writes_forward_to_the_underlying_writer() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let buf_clone = buf.clone();
        let mut sink = ContentStreamSink::new(move || Ok(VecWriter(buf_clone.clone())));
        sink.open().await.unwrap();
        sink.write(&Packet::new(Payload::Owned(vec![1, 2, 3]), 0, PacketKind::Other))
            .await
            .unwrap();
        sink.stop_stream().await.unwrap();
        assert_eq!(*buf.lock().unwrap(), vec![1, 2, 3]);
    }

    struct VecWriter(Arc<Mutex<Vec<u8>>>);
    impl Write for VecWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
