//! Negotiated per-connection state.
use std::collections::HashMap;

use chrono_tz::Tz;

use crate::postgres::{ProtocolError, backend::ReadyForQuery};

/// Current backend transaction status, as carried by the last `ReadyForQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block).
    Idle,
    /// In a transaction block.
    InTransaction,
    /// In a failed transaction block (queries will be rejected until block is ended).
    InFailedTransaction,
}

impl TransactionStatus {
    fn from_byte(status: u8) -> Result<Self, ProtocolError> {
        match status {
            b'I' => Ok(Self::Idle),
            b'T' => Ok(Self::InTransaction),
            b'E' => Ok(Self::InFailedTransaction),
            other => Err(ProtocolError::unexpected_phase(other, "transaction status")),
        }
    }
}

/// Everything the backend told us about itself during and after startup.
///
/// Updated only from backend messages; the transaction status always equals
/// the status byte of the most recently received `ReadyForQuery`.
#[derive(Debug)]
pub struct Session {
    parameters: HashMap<String, String>,
    timezone: Option<Tz>,
    process_id: u32,
    secret_key: u32,
    tx_status: TransactionStatus,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            parameters: HashMap::new(),
            timezone: None,
            process_id: 0,
            secret_key: 0,
            tx_status: TransactionStatus::Idle,
        }
    }
}

impl Session {
    /// Current value of a run-time parameter reported by the backend,
    /// e.g. `server_version` or `client_encoding`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// The session timezone, when the backend's `TimeZone` parameter names a
    /// zone known locally.
    ///
    /// A `TimeZone` value that does not resolve leaves this unset without
    /// failing the session; callers must cope with `None`.
    pub fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    /// The process ID of the backend serving this session.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub(crate) fn secret_key(&self) -> u32 {
        self.secret_key
    }

    /// Transaction status carried by the most recent `ReadyForQuery`.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.tx_status
    }

    /// Whether the session is inside a transaction block, failed or not.
    pub fn in_transaction(&self) -> bool {
        matches!(
            self.tx_status,
            TransactionStatus::InTransaction | TransactionStatus::InFailedTransaction
        )
    }

    pub(crate) fn set_parameter(&mut self, name: String, value: String) {
        if name == "TimeZone" {
            self.timezone = value.parse().ok();
        }
        self.parameters.insert(name, value);
    }

    pub(crate) fn set_key_data(&mut self, process_id: u32, secret_key: u32) {
        self.process_id = process_id;
        self.secret_key = secret_key;
    }

    pub(crate) fn sync_ready(&mut self, ready: ReadyForQuery) -> Result<(), ProtocolError> {
        self.tx_status = TransactionStatus::from_byte(ready.status)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timezone_resolves_known_zone() {
        let mut session = Session::default();
        session.set_parameter("TimeZone".into(), "America/New_York".into());
        assert_eq!(session.timezone(), Some(chrono_tz::America::New_York));
        assert_eq!(session.parameter("TimeZone"), Some("America/New_York"));
    }

    #[test]
    fn unknown_timezone_is_not_fatal() {
        let mut session = Session::default();
        session.set_parameter("TimeZone".into(), "Not/AZone".into());
        assert_eq!(session.timezone(), None);
        // the raw parameter is still recorded
        assert_eq!(session.parameter("TimeZone"), Some("Not/AZone"));
    }

    #[test]
    fn transaction_status_tracks_ready() {
        let mut session = Session::default();
        session.sync_ready(ReadyForQuery { status: b'T' }).unwrap();
        assert_eq!(session.transaction_status(), TransactionStatus::InTransaction);
        assert!(session.in_transaction());

        session.sync_ready(ReadyForQuery { status: b'E' }).unwrap();
        assert_eq!(session.transaction_status(), TransactionStatus::InFailedTransaction);
        assert!(session.in_transaction());

        session.sync_ready(ReadyForQuery { status: b'I' }).unwrap();
        assert!(!session.in_transaction());

        assert!(session.sync_ready(ReadyForQuery { status: b'?' }).is_err());
    }
}
