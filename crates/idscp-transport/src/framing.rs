//! Length-prefixed framing for reliable message delimiting.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum frame size for IDSCP2 messages (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Framing error
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("Frame too large: {0} bytes (max: {1})")]
    TooLarge(usize, usize),

    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Length-prefixed frame codec
#[derive(Clone, Copy, Debug)]
pub struct LengthCodec {
    max_frame_size: usize,
}

impl LengthCodec {
    /// Create a new codec with the specified maximum frame size
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode data with length prefix
    /// Format: length (4 bytes BE) || data
    pub fn encode(&self, data: &[u8]) -> Result<Bytes, FramingError> {
        if data.len() > self.max_frame_size {
            return Err(FramingError::TooLarge(data.len(), self.max_frame_size));
        }

        let mut encoded = BytesMut::with_capacity(LENGTH_PREFIX + data.len());
        encoded.put_u32(data.len() as u32);
        encoded.extend_from_slice(data);
        Ok(encoded.freeze())
    }

    /// Decode a single complete frame
    pub fn decode(&self, framed: &[u8]) -> Result<Bytes, FramingError> {
        if framed.len() < LENGTH_PREFIX {
            return Err(FramingError::Incomplete(LENGTH_PREFIX - framed.len()));
        }

        let mut buf = framed;
        let len = buf.get_u32() as usize;

        if len > self.max_frame_size {
            return Err(FramingError::TooLarge(len, self.max_frame_size));
        }

        if buf.remaining() < len {
            return Err(FramingError::Incomplete(len - buf.remaining()));
        }

        Ok(Bytes::copy_from_slice(&buf[..len]))
    }

    /// Read the next frame from a byte stream.
    ///
    /// Returns `Ok(None)` on a clean end of stream at a frame boundary; an end
    /// of stream inside a frame is an error.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<Bytes>, FramingError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut prefix = [0u8; LENGTH_PREFIX];
        let mut filled = 0;
        while filled < LENGTH_PREFIX {
            let n = reader.read(&mut prefix[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(FramingError::Incomplete(LENGTH_PREFIX - filled));
            }
            filled += n;
        }

        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_frame_size {
            return Err(FramingError::TooLarge(len, self.max_frame_size));
        }

        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await?;
        Ok(Some(Bytes::from(frame)))
    }
}

impl Default for LengthCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}
