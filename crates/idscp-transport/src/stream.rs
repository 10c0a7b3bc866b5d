//! [`SecureChannel`] over any byte stream (for example a TLS stream).

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::framing::LengthCodec;
use crate::traits::{SecureChannel, TransportError};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Length-prefixed message channel on top of an authenticated byte stream.
///
/// Writes are handed to a dedicated writer task so that `send` never blocks
/// the caller. Must be created inside a tokio runtime.
pub struct FramedChannel {
    codec: LengthCodec,
    writer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    reader: tokio::sync::Mutex<BoxedReader>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl FramedChannel {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_codec(stream, LengthCodec::default())
    }

    pub fn with_codec<S>(stream: S, codec: LengthCodec) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let (shutdown, _) = watch::channel(false);

        tokio::spawn(write_loop(write_half, rx, connected.clone()));

        Self {
            codec,
            writer: Mutex::new(Some(tx)),
            reader: tokio::sync::Mutex::new(Box::new(read_half)),
            connected,
            shutdown,
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    connected: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            warn!("secure channel write failed: {}", e);
            break;
        }
    }
    connected.store(false, Ordering::SeqCst);
    if let Err(e) = writer.shutdown().await {
        debug!("secure channel shutdown: {}", e);
    }
}

#[async_trait]
impl SecureChannel for FramedChannel {
    fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let frame = self.codec.encode(&data)?;
        match self.writer.lock().as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::Disconnected),
            None => Err(TransportError::Disconnected),
        }
    }

    async fn recv(&self) -> Result<Option<Bytes>, TransportError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Ok(None);
        }
        let mut reader = self.reader.lock().await;
        tokio::select! {
            frame = self.codec.read_frame(&mut *reader) => Ok(frame?),
            _ = shutdown.changed() => Ok(None),
        }
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the sender lets the writer flush queued frames and shut down.
        if self.writer.lock().take().is_some() {
            debug!("closing framed secure channel");
        }
        self.shutdown.send_replace(true);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let a = FramedChannel::new(a);
        let b = FramedChannel::new(b);

        a.send(Bytes::from_static(b"hello")).unwrap();
        a.send(Bytes::from_static(b"world")).unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap(), &b"hello"[..]);
        assert_eq!(b.recv().await.unwrap().unwrap(), &b"world"[..]);
    }

    #[tokio::test]
    async fn test_peer_close_is_end_of_stream() {
        let (a, b) = tokio::io::duplex(1024);
        let a = FramedChannel::new(a);
        let b = FramedChannel::new(b);

        a.send(Bytes::from_static(b"bye")).unwrap();
        a.close();

        assert_eq!(b.recv().await.unwrap().unwrap(), &b"bye"[..]);
        assert!(b.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (a, _b) = tokio::io::duplex(1024);
        let a = FramedChannel::new(a);
        a.close();
        a.close();

        assert!(!a.is_connected());
        assert!(matches!(
            a.send(Bytes::from_static(b"late")),
            Err(TransportError::Disconnected)
        ));
        assert!(a.recv().await.unwrap().is_none());
    }
}
