//! Framed bidirectional streams with send-side health tracking.
//!
//! A [`FramedStream`] pairs the two halves of one ordered byte stream with
//! the frame codec and a health state:
//!
//! ```text
//! Healthy  --send ok-------------------> Healthy
//! Degraded --send ok-------------------> Healthy
//! Healthy|Degraded --transient failure-> Degraded
//! Healthy|Degraded --terminal failure--> Closed
//! Closed   --send--> StreamClosed (nothing written)
//! ```
//!
//! Only sends classify health; a plain receive never changes it. A
//! [`request`](PeerStream::request) whose reply is lost closes the stream.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use spore_proto::codec::encode_frame;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::stream_io::FrameReader;

/// Health of a stream, as seen by its sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Healthy = 0,
    /// The last send failed for a reason that may clear up; retry is allowed.
    Degraded = 1,
    /// Terminal. The stream must be replaced.
    Closed = 2,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => StreamState::Healthy,
            1 => StreamState::Degraded,
            _ => StreamState::Closed,
        }
    }
}

/// Why a send failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// Peer stopped the stream, closed the connection, or the pipe ended.
    PeerClosed,
    /// Connection reset or lost underneath the stream.
    Reset,
    /// The send deadline passed.
    TimedOut,
    /// Any other I/O failure.
    Transient,
}

impl SendFailure {
    /// Terminal failures move the stream to [`StreamState::Closed`].
    pub fn is_terminal(self) -> bool {
        matches!(self, SendFailure::PeerClosed | SendFailure::Reset)
    }

    /// Classify a write error from the underlying stream.
    pub fn classify(err: &io::Error) -> Self {
        if let Some(write_err) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<quinn::WriteError>())
        {
            return Self::from_quinn(write_err);
        }

        match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero => {
                SendFailure::PeerClosed
            }
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => SendFailure::Reset,
            io::ErrorKind::TimedOut => SendFailure::TimedOut,
            _ => SendFailure::Transient,
        }
    }

    fn from_quinn(err: &quinn::WriteError) -> Self {
        use quinn::ConnectionError;

        match err {
            quinn::WriteError::Stopped(_) | quinn::WriteError::ClosedStream => {
                SendFailure::PeerClosed
            }
            quinn::WriteError::ConnectionLost(
                ConnectionError::ApplicationClosed(_)
                | ConnectionError::ConnectionClosed(_)
                | ConnectionError::LocallyClosed,
            ) => SendFailure::PeerClosed,
            // Includes the QUIC idle timeout: the connection itself is gone.
            quinn::WriteError::ConnectionLost(_) => SendFailure::Reset,
            quinn::WriteError::ZeroRttRejected => SendFailure::Transient,
        }
    }
}

/// Capability interface of one framed peer stream.
#[async_trait]
pub trait PeerStream: Send + Sync + std::fmt::Debug {
    /// Send one frame. Updates the stream's health as a side effect.
    async fn send(&self, cancel: &CancellationToken, payload: &[u8]) -> Result<()>;

    /// Wait for the next frame. Assumes a single reader per stream.
    async fn recv(&self, cancel: &CancellationToken) -> Result<Bytes>;

    /// Finish the sending half. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;

    fn state(&self) -> StreamState;

    /// One send followed by the next received frame.
    async fn request(&self, cancel: &CancellationToken, payload: &[u8]) -> Result<Bytes> {
        self.send(cancel, payload).await?;
        self.recv(cancel).await
    }
}

/// A stream over the QUIC halves of one bidirectional stream.
pub type QuicStream = FramedStream<quinn::SendStream, quinn::RecvStream>;

/// What stopped a send before the whole frame was written.
enum Interrupted {
    Cancelled,
    Failed(SendFailure, io::Error),
}

/// Framing plus health tracking over a writer/reader pair.
pub struct FramedStream<W, R> {
    writer: Mutex<W>,
    reader: Mutex<FrameReader<R>>,
    state: AtomicU8,
    closed_locally: AtomicBool,
    max_frame_size: usize,
    send_timeout: Duration,
    request_timeout: Duration,
    peer: String,
}

impl<W, R> FramedStream<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    /// Wrap a writer/reader pair. `peer` labels log lines.
    pub fn new(writer: W, reader: R, peer: impl Into<String>, config: &TransportConfig) -> Self {
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(FrameReader::new(reader, config.max_frame_size)),
            state: AtomicU8::new(StreamState::Healthy as u8),
            closed_locally: AtomicBool::new(false),
            max_frame_size: config.max_frame_size,
            send_timeout: config.send_timeout,
            request_timeout: config.request_timeout,
            peer: peer.into(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Move to `to` unless already `Closed`.
    fn transition(&self, to: StreamState) {
        let prev = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur != StreamState::Closed as u8).then_some(to as u8)
            })
            .map(StreamState::from_u8);

        if let Ok(from) = prev {
            if from != to {
                debug!(peer = %self.peer, ?from, ?to, "stream health changed");
            }
        }
    }

    /// Record an interrupted send. `written` is how much of the frame made it
    /// out; once any of it did, the frame boundary is lost for good.
    fn record_interruption(&self, interrupted: Interrupted, written: usize) -> TransportError {
        match interrupted {
            Interrupted::Cancelled => {
                if written > 0 {
                    self.transition(StreamState::Closed);
                }
                TransportError::Cancelled
            }
            Interrupted::Failed(failure, source) => {
                if failure.is_terminal() || written > 0 {
                    self.transition(StreamState::Closed);
                } else {
                    self.transition(StreamState::Degraded);
                }
                TransportError::Send { failure, source }
            }
        }
    }

    /// Write `frame` under the send deadline. On interruption, also reports
    /// how many bytes had already been accepted by the writer.
    async fn write_frame(
        &self,
        writer: &mut W,
        frame: &[u8],
        cancel: &CancellationToken,
    ) -> std::result::Result<(), (Interrupted, usize)> {
        let deadline = Instant::now() + self.send_timeout;
        let mut written = 0;

        while written < frame.len() {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err((Interrupted::Cancelled, written)),
                r = tokio::time::timeout_at(deadline, writer.write(&frame[written..])) => r,
            };
            match step {
                Ok(Ok(0)) => {
                    let err = io::Error::from(io::ErrorKind::WriteZero);
                    return Err((Interrupted::Failed(SendFailure::PeerClosed, err), written));
                }
                Ok(Ok(n)) => written += n,
                Ok(Err(err)) => {
                    let failure = SendFailure::classify(&err);
                    return Err((Interrupted::Failed(failure, err), written));
                }
                Err(_) => return Err((deadline_elapsed(), written)),
            }
        }

        let flushed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err((Interrupted::Cancelled, written)),
            r = tokio::time::timeout_at(deadline, writer.flush()) => r,
        };
        match flushed {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                let failure = SendFailure::classify(&err);
                Err((Interrupted::Failed(failure, err), written))
            }
            Err(_) => Err((deadline_elapsed(), written)),
        }
    }
}

fn deadline_elapsed() -> Interrupted {
    Interrupted::Failed(
        SendFailure::TimedOut,
        io::Error::new(io::ErrorKind::TimedOut, "send deadline elapsed"),
    )
}

#[async_trait]
impl<W, R> PeerStream for FramedStream<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    async fn send(&self, cancel: &CancellationToken, payload: &[u8]) -> Result<()> {
        let mut writer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            w = self.writer.lock() => w,
        };

        // Checked under the writer lock so a racing close is observed.
        if self.state() == StreamState::Closed {
            return Err(TransportError::StreamClosed);
        }

        // Oversized payloads are refused before any byte is written and do
        // not count against the stream's health.
        let frame = encode_frame(payload, self.max_frame_size)?;

        match self.write_frame(&mut writer, &frame, cancel).await {
            Ok(()) => {
                self.transition(StreamState::Healthy);
                Ok(())
            }
            Err((interrupted, written)) => Err(self.record_interruption(interrupted, written)),
        }
    }

    async fn recv(&self, cancel: &CancellationToken) -> Result<Bytes> {
        let mut reader = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            r = self.reader.lock() => r,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            frame = reader.next_frame() => Ok(frame?),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed_locally.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.transition(StreamState::Closed);

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.send_timeout, writer.shutdown()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(TransportError::Close(err)),
            Err(_) => Err(TransportError::TimedOut("stream close")),
        }
    }

    fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Holds the receive side across the exchange, so a concurrent `recv`
    /// cannot take the reply.
    ///
    /// The reply must arrive within the configured request timeout. If it
    /// does not (deadline, cancel, truncation or hang-up) the stream is
    /// closed: a late reply would otherwise be handed to the next request.
    async fn request(&self, cancel: &CancellationToken, payload: &[u8]) -> Result<Bytes> {
        let mut reader = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            r = self.reader.lock() => r,
        };
        self.send(cancel, payload).await?;
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            frame = tokio::time::timeout(self.request_timeout, reader.next_frame()) => match frame {
                Ok(frame) => frame.map_err(TransportError::from),
                Err(_) => Err(TransportError::TimedOut("reply")),
            },
        };
        if let Err(e) = &reply {
            debug!(peer = %self.peer, error = %e, "no reply, retiring stream");
        }
        if reply.is_err() {
            self.transition(StreamState::Closed);
        }
        reply
    }
}

impl<W, R> std::fmt::Debug for FramedStream<W, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedStream")
            .field("peer", &self.peer)
            .field("state", &StreamState::from_u8(self.state.load(Ordering::Relaxed)))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::task::{Context, Poll};

    /// Writer that replays a script: `None` accepts the whole buffer,
    /// `Some(kind)` fails the call with that error kind.
    #[derive(Clone, Default)]
    struct ScriptedWriter {
        script: Arc<StdMutex<VecDeque<Option<io::ErrorKind>>>>,
        written: Arc<StdMutex<Vec<u8>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedWriter {
        fn with_script(steps: impl IntoIterator<Item = Option<io::ErrorKind>>) -> Self {
            let writer = Self::default();
            writer.script.lock().unwrap().extend(steps);
            writer
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AsyncWrite for ScriptedWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front().flatten() {
                Some(kind) => Poll::Ready(Err(io::Error::from(kind))),
                None => {
                    self.written.lock().unwrap().extend_from_slice(buf);
                    Poll::Ready(Ok(buf.len()))
                }
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Writer that never makes progress.
    struct StuckWriter;

    impl AsyncWrite for StuckWriter {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Writer that takes two bytes and then stalls.
    struct TrickleWriter {
        taken: bool,
    }

    impl AsyncWrite for TrickleWriter {
        fn poll_write(mut self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            if self.taken {
                return Poll::Pending;
            }
            self.taken = true;
            Poll::Ready(Ok(buf.len().min(2)))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn config(send_timeout: Duration) -> TransportConfig {
        TransportConfig {
            send_timeout,
            ..TransportConfig::default()
        }
    }

    fn stream_over<W: AsyncWrite + Unpin + Send>(writer: W) -> FramedStream<W, tokio::io::Empty> {
        FramedStream::new(writer, tokio::io::empty(), "test-peer", &config(Duration::from_secs(5)))
    }

    #[test]
    fn classification_of_io_kinds() {
        let kind = |k| SendFailure::classify(&io::Error::from(k));
        assert_eq!(kind(io::ErrorKind::BrokenPipe), SendFailure::PeerClosed);
        assert_eq!(kind(io::ErrorKind::UnexpectedEof), SendFailure::PeerClosed);
        assert_eq!(kind(io::ErrorKind::ConnectionReset), SendFailure::Reset);
        assert_eq!(kind(io::ErrorKind::TimedOut), SendFailure::TimedOut);
        assert_eq!(kind(io::ErrorKind::WouldBlock), SendFailure::Transient);
        assert_eq!(kind(io::ErrorKind::Other), SendFailure::Transient);
    }

    #[test]
    fn classification_of_quinn_write_errors() {
        let wrap = |e: quinn::WriteError| io::Error::new(io::ErrorKind::Other, e);

        let stopped = wrap(quinn::WriteError::Stopped(quinn::VarInt::from_u32(0)));
        assert_eq!(SendFailure::classify(&stopped), SendFailure::PeerClosed);

        let idle = wrap(quinn::WriteError::ConnectionLost(quinn::ConnectionError::TimedOut));
        assert_eq!(SendFailure::classify(&idle), SendFailure::Reset);

        let reset = wrap(quinn::WriteError::ConnectionLost(quinn::ConnectionError::Reset));
        assert_eq!(SendFailure::classify(&reset), SendFailure::Reset);

        let local = wrap(quinn::WriteError::ConnectionLost(
            quinn::ConnectionError::LocallyClosed,
        ));
        assert_eq!(SendFailure::classify(&local), SendFailure::PeerClosed);
    }

    #[tokio::test]
    async fn transient_failure_degrades_then_recovers_then_terminal_closes() {
        let writer = ScriptedWriter::with_script([
            Some(io::ErrorKind::TimedOut),
            None,
            Some(io::ErrorKind::BrokenPipe),
        ]);
        let probe = writer.clone();
        let stream = stream_over(writer);
        let cancel = CancellationToken::new();

        assert_eq!(stream.state(), StreamState::Healthy);

        let err = stream.send(&cancel, b"one").await.unwrap_err();
        assert!(matches!(err, TransportError::Send { failure: SendFailure::TimedOut, .. }));
        assert_eq!(stream.state(), StreamState::Degraded);

        stream.send(&cancel, b"two").await.unwrap();
        assert_eq!(stream.state(), StreamState::Healthy);
        assert_eq!(&probe.written.lock().unwrap()[..], &[0, 0, 0, 3, b't', b'w', b'o']);

        let err = stream.send(&cancel, b"three").await.unwrap_err();
        assert!(matches!(err, TransportError::Send { failure: SendFailure::PeerClosed, .. }));
        assert_eq!(stream.state(), StreamState::Closed);

        // Closed is final: nothing more reaches the writer.
        let calls = probe.calls();
        assert!(matches!(
            stream.send(&cancel, b"four").await,
            Err(TransportError::StreamClosed)
        ));
        assert_eq!(probe.calls(), calls);
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn send_deadline_with_nothing_written_degrades() {
        let stream = FramedStream::new(
            StuckWriter,
            tokio::io::empty(),
            "stuck",
            &config(Duration::from_millis(30)),
        );
        let err = stream.send(&CancellationToken::new(), b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::Send { failure: SendFailure::TimedOut, .. }));
        assert_eq!(stream.state(), StreamState::Degraded);
    }

    #[tokio::test]
    async fn deadline_after_partial_write_closes() {
        let stream = FramedStream::new(
            TrickleWriter { taken: false },
            tokio::io::empty(),
            "trickle",
            &config(Duration::from_millis(30)),
        );
        let err = stream.send(&CancellationToken::new(), b"payload").await.unwrap_err();
        assert!(matches!(err, TransportError::Send { failure: SendFailure::TimedOut, .. }));
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn cancel_before_any_write_leaves_state_alone() {
        let stream = stream_over(StuckWriter);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = stream.send(&cancel, b"x").await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(stream.state(), StreamState::Healthy);
    }

    #[tokio::test]
    async fn oversized_payload_does_not_touch_health() {
        let probe = ScriptedWriter::default();
        let stream = FramedStream::new(
            probe.clone(),
            tokio::io::empty(),
            "small",
            &TransportConfig {
                max_frame_size: 8,
                ..TransportConfig::default()
            },
        );
        let err = stream.send(&CancellationToken::new(), &[0u8; 9]).await.unwrap_err();
        assert!(matches!(err, TransportError::Frame(spore_proto::FrameError::TooLarge { .. })));
        assert_eq!(stream.state(), StreamState::Healthy);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_sends() {
        let stream = stream_over(ScriptedWriter::default());
        stream.close().await.unwrap();
        stream.close().await.unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(matches!(
            stream.send(&CancellationToken::new(), b"late").await,
            Err(TransportError::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn duplex_request_and_peer_hangup() {
        let (near, far) = tokio::io::duplex(256);
        let (near_r, near_w) = tokio::io::split(near);
        let (far_r, far_w) = tokio::io::split(far);
        let cfg = TransportConfig::default();
        let client = FramedStream::new(near_w, near_r, "server", &cfg);
        let server = FramedStream::new(far_w, far_r, "client", &cfg);
        let cancel = CancellationToken::new();

        let echo = {
            let cancel = cancel.clone();
            async move {
                let got = server.recv(&cancel).await.unwrap();
                server.send(&cancel, &got).await.unwrap();
                server
            }
        };
        let (reply, server) = tokio::join!(client.request(&cancel, b"ping"), echo);
        assert_eq!(&reply.unwrap()[..], b"ping");

        // Receiving is not a health signal.
        server.close().await.unwrap();
        assert!(client.recv(&cancel).await.unwrap_err().is_end_of_stream());
        assert_eq!(client.state(), StreamState::Healthy);

        // A request whose reply cannot arrive retires the stream.
        let half_open = FramedStream::new(
            ScriptedWriter::default(),
            tokio::io::empty(),
            "half-open",
            &cfg,
        );
        assert!(half_open.request(&cancel, b"hello?").await.unwrap_err().is_end_of_stream());
        assert_eq!(half_open.state(), StreamState::Closed);

        // Once the far end is gone entirely, sending hits a broken pipe.
        drop(server);
        let err = client.send(&cancel, b"anyone?").await.unwrap_err();
        assert!(matches!(err, TransportError::Send { failure: SendFailure::PeerClosed, .. }));
        assert_eq!(client.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn silent_peer_times_out_request_and_retires_stream() {
        // The far end stays open but never answers.
        let (near, _far) = tokio::io::duplex(256);
        let (near_r, near_w) = tokio::io::split(near);
        let client = FramedStream::new(
            near_w,
            near_r,
            "silent",
            &TransportConfig {
                request_timeout: Duration::from_millis(50),
                ..TransportConfig::default()
            },
        );

        let err = client
            .request(&CancellationToken::new(), b"hello?")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::TimedOut("reply")), "got {err:?}");
        assert!(!err.is_cancelled());
        assert_eq!(client.state(), StreamState::Closed);
    }
}
