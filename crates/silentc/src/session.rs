use crate::error::SessionError;
use futures_util::{SinkExt, StreamExt};
use silent_common::crypto::credential_digest;
use silent_common::{FrameCodec, FrameError, FrameLimits, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// A live connection to the chat server.
///
/// Reads and writes are serialized independently, so a receive loop, a send
/// loop and the decoy generator can share one `Arc<Session>`. The write lock
/// is held only for the encode and write of a single frame.
pub struct Session<S> {
    reader: Mutex<FramedRead<ReadHalf<S>, FrameCodec>>,
    writer: Mutex<FramedWrite<WriteHalf<S>, FrameCodec>>,
    connected: AtomicBool,
    closing: AtomicBool,
    shut_down: AtomicBool,
    closed: Notify,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps a verified transport. The session is not connected until
    /// [`Session::authenticate`] succeeds.
    pub fn new(stream: S, limits: FrameLimits) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        let codec = FrameCodec::new(limits);
        Self {
            reader: Mutex::new(FramedRead::new(rd, codec)),
            writer: Mutex::new(FramedWrite::new(wr, codec)),
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            closed: Notify::new(),
        }
    }

    /// Sends the login request and waits up to `timeout` for the verdict.
    ///
    /// Only the password digest leaves the process. On any failure the
    /// transport is closed before the error is returned.
    ///
    /// # Errors
    ///
    /// [`SessionError::AuthTimeout`] if no reply arrives in time,
    /// [`SessionError::AuthRejected`] if the server refuses the credentials,
    /// [`SessionError::ProtocolViolation`] for any other reply, or the
    /// underlying transport error.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let request = Message::auth(username, &credential_digest(password));
        match self.auth_exchange(&request, timeout).await {
            Ok(()) => {
                self.connected.store(true, Ordering::Release);
                info!(username, "authenticated");
                Ok(())
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn auth_exchange(&self, request: &Message, timeout: Duration) -> Result<(), SessionError> {
        {
            let mut writer = self.writer.lock().await;
            writer
                .send(request)
                .await
                .map_err(|e| SessionError::Write(e.to_string()))?;
        }

        let reply = {
            let mut reader = self.reader.lock().await;
            tokio::time::timeout(timeout, reader.next())
                .await
                .map_err(|_| SessionError::AuthTimeout)?
        };

        match reply {
            None => Err(SessionError::ConnectionLost),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(Message::AuthResult { success: true, .. })) => Ok(()),
            Some(Ok(Message::AuthResult {
                success: false,
                error,
            })) => Err(SessionError::AuthRejected(
                error.unwrap_or_else(|| "no reason given".to_string()),
            )),
            Some(Ok(other)) => Err(SessionError::ProtocolViolation(format!(
                "expected auth_result, got {}",
                other.kind()
            ))),
        }
    }

    /// Encodes and writes one frame.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] if the session is down on entry.
    /// [`SessionError::Frame`] with `SizeExceeded` if the message is over the
    /// soft limit; the session stays usable. Any transport failure closes the
    /// session and yields [`SessionError::Write`].
    pub async fn send(&self, msg: &Message) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let result = {
            let mut writer = self.writer.lock().await;
            tokio::select! {
                () = self.closed() => return Err(SessionError::NotConnected),
                r = writer.send(msg) => r,
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e @ FrameError::SizeExceeded { .. }) => Err(e.into()),
            Err(e) => {
                self.mark_closed();
                Err(SessionError::Write(e.to_string()))
            }
        }
    }

    /// Writes `bytes` verbatim, bypassing the frame codec.
    ///
    /// # Errors
    ///
    /// Same as [`Session::send`] for transport failures.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let result = {
            let mut writer = self.writer.lock().await;
            tokio::select! {
                () = self.closed() => return Err(SessionError::NotConnected),
                r = async {
                    SinkExt::<&Message>::flush(&mut *writer).await?;
                    let io = writer.get_mut();
                    io.write_all(bytes).await?;
                    io.flush().await?;
                    Ok::<(), FrameError>(())
                } => r,
            }
        };

        result.map_err(|e| {
            self.mark_closed();
            SessionError::Write(e.to_string())
        })
    }

    /// Reads exactly one frame.
    ///
    /// With `deadline` set, gives up after that long with
    /// [`SessionError::ReadTimeout`]; a partially received frame stays
    /// buffered and the next call resumes it.
    ///
    /// # Errors
    ///
    /// [`SessionError::ReadTimeout`] on deadline, [`SessionError::ConnectionLost`]
    /// on end of stream, [`SessionError::NotConnected`] once the session is
    /// closed, and frame or transport errors otherwise.
    pub async fn receive(&self, deadline: Option<Duration>) -> Result<Message, SessionError> {
        let mut reader = self.reader.lock().await;
        let read = async {
            match deadline {
                Some(d) => tokio::time::timeout(d, reader.next())
                    .await
                    .map_err(|_| SessionError::ReadTimeout),
                None => Ok(reader.next().await),
            }
        };

        let next = tokio::select! {
            () = self.closed() => return Err(SessionError::NotConnected),
            r = read => r?,
        };

        match next {
            None => Err(SessionError::ConnectionLost),
            Some(Ok(msg)) => Ok(msg),
            Some(Err(e)) => Err(e.into()),
        }
    }

    /// Returns `true` while the session is authenticated and no fatal error
    /// has been seen.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Resolves once the session has been closed locally or a write failed.
    pub async fn closed(&self) {
        let notified = self.closed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    /// Marks the session down and wakes every task waiting in
    /// [`Session::closed`].
    fn mark_closed(&self) {
        self.connected.store(false, Ordering::Release);
        if !self.closing.swap(true, Ordering::AcqRel) {
            self.closed.notify_waiters();
        }
    }

    /// Marks the session down, wakes every waiter and shuts the transport.
    ///
    /// Only the first call has any effect.
    pub async fn close(&self) {
        self.mark_closed();
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, writer.get_mut().shutdown()).await {
            Ok(Ok(())) => debug!("transport shut down"),
            Ok(Err(e)) => debug!(error = %e, "transport shutdown failed"),
            Err(_) => debug!("transport shutdown timed out"),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::{DuplexStream, ReadBuf};
    use tokio_util::codec::Framed;

    pub(crate) type Server = Framed<DuplexStream, FrameCodec>;

    pub(crate) fn pair(limits: FrameLimits) -> (Session<DuplexStream>, Server) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (
            Session::new(client, limits),
            Framed::new(server, FrameCodec::new(limits)),
        )
    }

    pub(crate) async fn accept(server: &mut Server, reply: Message) -> Message {
        let request = server.next().await.unwrap().unwrap();
        server.send(&reply).await.unwrap();
        request
    }

    pub(crate) fn success() -> Message {
        Message::AuthResult {
            success: true,
            error: None,
        }
    }

    pub(crate) async fn connected_pair() -> (Session<DuplexStream>, Server) {
        let (session, mut server) = pair(FrameLimits::default());
        let (res, _) = tokio::join!(
            session.authenticate("alice", "pw", Duration::from_secs(5)),
            accept(&mut server, success()),
        );
        res.unwrap();
        (session, server)
    }

    /// Duplex transport whose writes fail with `BrokenPipe` once `broken` is set.
    pub(crate) struct BreakableStream {
        inner: DuplexStream,
        broken: Arc<AtomicBool>,
    }

    impl AsyncRead for BreakableStream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for BreakableStream {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            if this.broken.load(Ordering::Acquire) {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            Pin::new(&mut this.inner).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            if this.broken.load(Ordering::Acquire) {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            Pin::new(&mut this.inner).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
        }
    }

    /// An authenticated session over a [`BreakableStream`], plus its switch.
    pub(crate) async fn breakable_pair() -> (Session<BreakableStream>, Server, Arc<AtomicBool>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let broken = Arc::new(AtomicBool::new(false));
        let stream = BreakableStream {
            inner: client,
            broken: Arc::clone(&broken),
        };
        let limits = FrameLimits::default();
        let session = Session::new(stream, limits);
        let mut server = Framed::new(server, FrameCodec::new(limits));
        let (res, _) = tokio::join!(
            session.authenticate("alice", "pw", Duration::from_secs(5)),
            accept(&mut server, success()),
        );
        res.unwrap();
        (session, server, broken)
    }
}
