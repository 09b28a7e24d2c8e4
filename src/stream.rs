//! Buffered postgres message transport.
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    Result,
    connection::Config,
    error::ErrorKind,
    net::{self, Socket},
    postgres::{BackendMessage, BackendProtocol, ProtocolError, backend, frontend},
};

const DEFAULT_BUF_CAPACITY: usize = 8 * 1024;

/// A buffered stream which can send and receive postgres messages.
///
/// Outgoing messages accumulate in the write buffer until [`flush`][1], so a
/// composite batch like Parse+Describe+Sync reaches the wire as one
/// contiguous write.
///
/// Any socket or framing failure trips a sticky flag: the stream is then
/// permanently bad and every further operation short-circuits with a
/// bad-connection error without touching the socket.
///
/// [1]: PgStream::flush
#[derive(Debug)]
pub(crate) struct PgStream {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,
    broken: bool,
}

impl PgStream {
    /// Dial and, when configured, TLS-upgrade a connection.
    pub(crate) async fn connect(config: &Config) -> Result<Self> {
        let socket = net::establish(config).await?;
        Ok(Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            broken: false,
        })
    }

    /// Fail fast once the sticky error flag is set.
    pub(crate) fn guard(&self) -> Result<()> {
        match self.broken {
            true => Err(ErrorKind::BadConnection.into()),
            false => Ok(()),
        }
    }

    fn fail_io(&mut self, err: std::io::Error) -> crate::Error {
        self.broken = true;
        err.into()
    }

    fn fail_protocol(&mut self, err: ProtocolError) -> crate::Error {
        self.broken = true;
        err.into()
    }

    /// Buffer a frontend message; call [`flush`][PgStream::flush] to send.
    pub(crate) fn send<F: frontend::FrontendProtocol>(&mut self, message: F) {
        frontend::write(message, &mut self.write_buf);
    }

    /// Buffer a startup-family message, which carries no message-type byte.
    pub(crate) fn send_startup(&mut self, startup: frontend::Startup) {
        startup.write(&mut self.write_buf);
    }

    /// Write the whole buffered batch to the socket.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        self.guard()?;
        match self.socket.write_all_buf(&mut self.write_buf).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail_io(err)),
        }
    }

    /// Receive exactly one backend message.
    ///
    /// `NoticeResponse` is absorbed here and never returned. `ErrorResponse`
    /// *is* returned as a plain message: response loops capture it and keep
    /// draining, because session-state messages legitimately arrive after an
    /// error.
    pub(crate) async fn recv(&mut self) -> Result<BackendMessage> {
        self.guard()?;
        loop {
            // msgtype + length already buffered?
            if let Some(mut header) = self.read_buf.get(..5) {
                let msgtype = header.get_u8();
                let len = header.get_i32();
                if len < 4 {
                    return Err(self.fail_protocol(ProtocolError::truncated(msgtype)));
                }

                // The length count includes itself, but not the message-type byte.
                let frame = 1 + len as usize;
                if self.read_buf.len() >= frame {
                    self.read_buf.advance(5);
                    let body = self.read_buf.split_to(len as usize - 4).freeze();

                    if msgtype == backend::NoticeResponse::MSGTYPE {
                        #[cfg(feature = "log")]
                        if let Ok(notice) = crate::postgres::DbError::parse(body) {
                            log::warn!("{notice}");
                        }
                        #[cfg(not(feature = "log"))]
                        drop(body);
                        continue;
                    }

                    return match BackendMessage::decode(msgtype, body) {
                        Ok(message) => Ok(message),
                        Err(err) => Err(self.fail_protocol(err)),
                    };
                }
                self.read_buf.reserve(frame - self.read_buf.len());
            } else {
                self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
            }

            match self.socket.read_buf(&mut self.read_buf).await {
                Ok(0) => {
                    let err = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
                    return Err(self.fail_io(err));
                }
                Ok(_) => {}
                Err(err) => return Err(self.fail_io(err)),
            }
        }
    }

    /// Send Terminate, close the socket and poison the stream.
    ///
    /// No response is expected; the session is unusable afterwards.
    pub(crate) async fn terminate(&mut self) -> Result<()> {
        self.send(frontend::Terminate);
        self.flush().await?;
        let _ = self.socket.shutdown().await;
        self.broken = true;
        Ok(())
    }
}
