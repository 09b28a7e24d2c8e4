//! Out-of-band query cancellation.
//!
//! A CancelRequest cannot travel on the session socket, which is blocked
//! reading the response of the statement being cancelled. It runs on a
//! second short-lived connection instead, authenticated by the process
//! ID and secret key issued at startup. The backend then aborts the
//! current statement, which surfaces on the session socket as an
//! `ErrorResponse` with SQLSTATE `57014` followed by `ReadyForQuery` —
//! the session stays usable.
use bytes::BytesMut;
use tokio::{io::AsyncWriteExt, sync::oneshot};

use crate::{
    Result,
    connection::Config,
    net,
    postgres::frontend,
};

/// A detached handle able to cancel whatever the connection that issued it
/// is currently running.
///
/// Cancellation is advisory: the statement may complete before the request
/// lands, in which case the session simply returns the real result.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    config: Config,
    process_id: u32,
    secret_key: u32,
}

impl CancelHandle {
    pub(crate) fn new(config: Config, process_id: u32, secret_key: u32) -> Self {
        Self { config, process_id, secret_key }
    }

    /// Dial a side connection and fire a CancelRequest at the backend.
    ///
    /// No reply is expected; the side connection is dropped right after the
    /// frame is written.
    pub async fn cancel_request(&self) -> Result<()> {
        self.send_request()
            .await
            .map_err(|err| err.context("cancel request"))
    }

    async fn send_request(&self) -> Result<()> {
        let mut socket = net::dial(
            self.config.host.as_str(),
            self.config.port,
            self.config.connect_timeout,
        )
        .await?;

        let mut buf = BytesMut::with_capacity(16);
        frontend::CancelRequest {
            process_id: self.process_id,
            secret_key: self.secret_key,
        }
        .write(&mut buf);

        socket.write_all(&buf).await?;
        let _ = socket.shutdown().await;
        Ok(())
    }
}

/// Bridge an external cancellation signal to the wire.
///
/// The watcher waits for whichever fires first: the caller's cancel signal,
/// which triggers [`CancelHandle::cancel_request`], or the completion signal
/// the operation sends once it finishes (successfully or not). The
/// rendezvous pair is allocated fresh for every call, so a watcher can never
/// observe a completion from an earlier operation.
pub(crate) fn watch(
    handle: CancelHandle,
    cancel: oneshot::Receiver<()>,
    done: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        tokio::select! {
            signal = cancel => {
                // a dropped sender means the caller lost interest in
                // cancelling, not that it cancelled
                if signal.is_ok() {
                    #[cfg(feature = "log")]
                    log::trace!("sending cancel request for backend {}", handle.process_id);
                    let _ = handle.cancel_request().await;
                }
            }
            _ = done => {}
        }
    });
}
