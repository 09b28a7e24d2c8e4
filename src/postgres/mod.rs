//! Postgres Frontend and Backend Protocol
//!
//! Docs here mostly quoted from the official postgres documentation.
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte). The remaining contents of the message are determined by the message type.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        i32        ┃ [u8] ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! For historical reasons, the very first messages sent by the client (the startup message
//! family: `StartupMessage`, `SSLRequest` and `CancelRequest`) have no initial
//! message-type byte.
//!
//! Several type bytes are overloaded between the two directions, `'C'` is
//! `Close` from the frontend but `CommandComplete` from the backend. Decoding
//! therefore keys off direction, which the module split here encodes.
//!
//! <https://www.postgresql.org/docs/17/protocol-overview.html>

pub mod frontend;
pub mod backend;

mod error;

pub use frontend::FrontendProtocol;
pub use backend::{BackendMessage, BackendProtocol};
pub use error::{DbError, ProtocolError};

/// The SQLSTATE reported when the backend aborts a statement for a
/// [`CancelRequest`][frontend::CancelRequest].
pub const SQLSTATE_QUERY_CANCELED: &str = "57014";
