//! Protocol and server error types.
use std::{fmt, str::Utf8Error};

use bytes::{Buf, Bytes};

use crate::ext::BytesExt;

use super::BackendMessage;

/// An error when translating buffer from postgres
pub enum ProtocolError {
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    Truncated {
        msgtype: u8,
    },
    MissingNul,
    Utf8(Utf8Error),
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn truncated(msgtype: u8) -> ProtocolError {
        Self::Truncated { msgtype }
    }

    pub(crate) fn missing_nul() -> ProtocolError {
        Self::MissingNul
    }
}

impl From<Utf8Error> for ProtocolError {
    fn from(err: Utf8Error) -> Self {
        Self::Utf8(err)
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unexpected { expect, found, phase } => {
                write!(f, "unexpected message `{}`", BackendMessage::message_name(*found))?;
                if let Some(expect) = expect {
                    write!(f, ", expect `{}`", BackendMessage::message_name(*expect))?;
                }
                if let Some(phase) = phase {
                    write!(f, " in {phase}")?;
                }
                Ok(())
            }
            Self::Truncated { msgtype } => {
                write!(f, "truncated `{}` message", BackendMessage::message_name(*msgtype))
            }
            Self::MissingNul => f.write_str("string field is not nul terminated"),
            Self::Utf8(err) => err.fmt(f),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// A structured error reported by the backend via `ErrorResponse`.
///
/// Receiving one of these does not end the session; the response stream it
/// arrives in is still drained to `ReadyForQuery` before it is surfaced.
#[derive(Debug, Clone)]
pub struct DbError {
    /// The field contents are ERROR, FATAL, or PANIC, or a localized translation of one of these.
    pub severity: String,
    /// The SQLSTATE code for the error. Not localizable.
    pub code: String,
    /// The primary human-readable error message.
    pub message: String,
    /// An optional secondary error message carrying more detail about the problem.
    pub detail: Option<String>,
    /// An optional suggestion what to do about the problem.
    pub hint: Option<String>,
    /// Error cursor position as an index into the original query string,
    /// measured in characters, first character being 1.
    pub position: Option<u32>,
}

impl DbError {
    /// Walk the tagged fields of an `ErrorResponse`/`NoticeResponse` body.
    ///
    /// Unrecognized field tags are skipped, per the protocol contract.
    pub(crate) fn parse(mut body: Bytes) -> Result<DbError, ProtocolError> {
        let mut error = DbError {
            severity: String::new(),
            code: String::new(),
            message: String::new(),
            detail: None,
            hint: None,
            position: None,
        };

        loop {
            if !body.has_remaining() {
                break;
            }
            let field = body.get_u8();
            if field == 0 {
                break;
            }
            let value = body.get_nul_string()?;
            match field {
                b'S' => error.severity = value,
                b'C' => error.code = value,
                b'M' => error.message = value,
                b'D' => error.detail = Some(value),
                b'H' => error.hint = Some(value),
                b'P' => error.position = value.parse().ok(),
                _ => {}
            }
        }

        Ok(error)
    }

    /// Whether the backend aborted the statement because of a `CancelRequest`.
    pub fn is_canceled(&self) -> bool {
        self.code == super::SQLSTATE_QUERY_CANCELED
    }
}

impl std::error::Error for DbError { }

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if !self.code.is_empty() {
            write!(f, " (SQLSTATE {})", self.code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}
