//! `postwire` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{
    connection::ParseError,
    postgres::{DbError, ProtocolError},
    protocol::UnsupportedAuth,
};

/// A specialized [`Result`] type for `postwire` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `postwire` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Label the operation this error came out of; shown as a display prefix,
    /// e.g. `prepare: ERROR: syntax error at or near ")" (SQLSTATE 42601)`.
    pub fn context(mut self, context: impl Into<String>) -> Error {
        self.context = context.into();
        self
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// The structured server error, when the backend reported one.
    pub fn as_db_error(&self) -> Option<&DbError> {
        match &self.kind {
            ErrorKind::Database(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the backend aborted the statement for a cancel request
    /// (SQLSTATE `57014`). The session stays usable after such an error.
    pub fn is_canceled(&self) -> bool {
        matches!(&self.kind, ErrorKind::Database(err) if err.is_canceled())
    }

    /// Whether the connection already failed at the socket level; every call
    /// after the first such failure reports this without touching the wire.
    pub fn is_bad_connection(&self) -> bool {
        matches!(self.kind, ErrorKind::BadConnection)
    }
}

/// All possible error kind from `postwire` library.
pub enum ErrorKind {
    /// Url or environment configuration failed to parse.
    Config(ParseError),
    /// Socket level failure. Fatal for the connection.
    Io(io::Error),
    /// The byte stream disagrees with the protocol. Fatal for the connection.
    Protocol(ProtocolError),
    /// The backend reported an error; the session continues.
    Database(DbError),
    /// The backend requested an authentication exchange not spoken here.
    UnsupportedAuth(UnsupportedAuth),
    /// The server refused TLS while the ssl mode demands it.
    TlsRefused,
    /// The connection previously failed; the session is terminal.
    BadConnection,
    /// A supposedly textual field is not utf8.
    Utf8(Utf8Error),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<DbError>e => ErrorKind::Database(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::TlsRefused => f.write_str("server refused TLS"),
            Self::BadConnection => f.write_str("bad connection"),
            Self::Utf8(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
