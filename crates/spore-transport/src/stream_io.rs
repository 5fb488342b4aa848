//! Async frame read/write over byte streams.
//!
//! Generic over tokio's `AsyncRead`/`AsyncWrite`, so the same code drives
//! quinn's `SendStream`/`RecvStream` and in-memory duplex pipes.
//!
//! [`write_framed`] and [`read_framed`] are the standalone one-shot entry
//! points for code that owns a raw byte stream. [`FramedStream`] does not
//! use them: it writes through its own loop so it can tell how much of a
//! frame went out before a failure, and reads through [`FrameReader`],
//! which keeps partial frames across cancelled receives.
//!
//! [`FramedStream`]: crate::stream::FramedStream

use bytes::{Bytes, BytesMut};
use spore_proto::codec::{decode_frame, encode_frame, peek_frame_len, FRAME_HEADER_LEN};
use spore_proto::FrameError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write one frame: the length prefix and payload go out as a single
/// buffer, and success is only reported once all of it was written.
pub async fn write_framed<W>(sink: &mut W, payload: &[u8], max_len: usize) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(payload, max_len)?;
    sink.write_all(&frame).await?;
    sink.flush().await?;
    Ok(())
}

/// Read exactly one frame.
///
/// End of data before the first header byte is [`FrameError::EndOfStream`];
/// end of data anywhere after that is [`FrameError::ShortRead`]. A length
/// above `max_len` fails before the payload buffer is allocated.
pub async fn read_framed<R>(source: &mut R, max_len: usize) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let got = read_full(source, &mut header).await?;
    if got == 0 {
        return Err(FrameError::EndOfStream);
    }
    if got < FRAME_HEADER_LEN {
        return Err(FrameError::ShortRead {
            expected: FRAME_HEADER_LEN,
            received: got,
        });
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    let got = read_full(source, &mut payload).await?;
    if got < len {
        return Err(FrameError::ShortRead {
            expected: len,
            received: got,
        });
    }
    Ok(Bytes::from(payload))
}

/// Fill `buf` unless the source ends first; returns the bytes read.
async fn read_full<R>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Buffered frame reader.
///
/// Bytes already pulled off the source stay in the buffer when a
/// [`next_frame`](FrameReader::next_frame) future is dropped, so a cancelled
/// receive never loses a frame boundary.
#[derive(Debug)]
pub struct FrameReader<R> {
    source: R,
    buf: BytesMut,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(source: R, max_len: usize) -> Self {
        Self {
            source,
            buf: BytesMut::with_capacity(FRAME_HEADER_LEN),
            max_len,
        }
    }

    /// Wait for the next complete frame.
    pub async fn next_frame(&mut self) -> Result<Bytes, FrameError> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.max_len)? {
                return Ok(frame);
            }

            if self.source.read_buf(&mut self.buf).await? == 0 {
                return Err(self.eof_error());
            }
        }
    }

    fn eof_error(&self) -> FrameError {
        if self.buf.is_empty() {
            return FrameError::EndOfStream;
        }
        match peek_frame_len(&self.buf) {
            Some(len) => FrameError::ShortRead {
                expected: len,
                received: self.buf.len() - FRAME_HEADER_LEN,
            },
            None => FrameError::ShortRead {
                expected: FRAME_HEADER_LEN,
                received: self.buf.len(),
            },
        }
    }
}
