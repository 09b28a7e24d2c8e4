//! Postgres Frontend Messages
//!
//! All struct fields here mirror the actual message sent to postgres.
use bytes::{BufMut, BytesMut};

use crate::{
    ext::{BufMutExt, StrExt, UsizeExt},
    row::Param,
};

// Other Frontend Message:
// CopyData('d')
// CopyDone('c')
// CopyFail('f')
// FunctionCall('F')
// GSSENCRequest
// GSSENCResponse('p')
// SASLInitialResponse('p')
// SASLResponse('p')

/// write a frontend message to `buf`
///
/// multiple messages written back to back share the buffer, so a composite
/// like Parse+Describe+Sync leaves as one contiguous write
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let size = msg.size_hint();
    buf.reserve(PREFIX + size as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_i32(4 + size);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size as usize,
        "frontend message body does not match its size hint"
    );
}

/// A type which can be encoded into postgres frontend message
///
/// For historical reasons, the very first message sent by the client (the startup message)
/// has no initial message-type byte.
///
/// Thus, [`Startup`], [`SslRequest`] and [`CancelRequest`] do not implement
/// [`FrontendProtocol`]
pub trait FrontendProtocol {
    /// message type
    const MSGTYPE: u8;

    /// size of the main body
    ///
    /// note that this is *only* the size of main body as oppose of actual postgres message
    fn size_hint(&self) -> i32;

    /// write the main body of the message
    ///
    /// `buf` have the length returned from `size_hint`
    ///
    /// writing less or past length results in panic
    fn encode(self, buf: impl BufMut);
}

/// Postgres Startup frontend message
///
/// For historical reasons, the very first message sent by the client (the startup message)
/// has no initial message-type byte.
///
/// Thus, [`Startup`] does not implement [`FrontendProtocol`]
#[derive(Debug)]
pub struct Startup<'a> {
    /// Name/value parameter pairs, `user` required first among them.
    ///
    /// Parameter names beginning with `_pq_.` are reserved for use as protocol
    /// extensions, while others are treated as run-time parameters to be set
    /// at backend start time.
    pub parameters: &'a [(&'a str, &'a str)],
}

impl Startup<'_> {
    pub fn write(self, buf: &mut BytesMut) {
        let offset = buf.len();

        // Length of message contents in bytes, including self.
        // reserve 4 bytes for length
        buf.put_i32(0);

        // Int32(196608)
        // The protocol version number.
        // The most significant 16 bits are the major version number (3 for the protocol described here).
        // The least significant 16 bits are the minor version number (0 for the protocol described here).
        buf.put_i32(196608);

        // The protocol version number is followed by one or more pairs of parameter name and value strings.
        for (name, value) in self.parameters {
            buf.put_nul_string(name);
            buf.put_nul_string(value);
        }

        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');

        // write the length
        let mut written_buf = &mut buf[offset..];
        written_buf.put_i32(written_buf.len().to_i32());
    }
}

/// Ask the server whether it is willing to perform TLS on this connection.
///
/// The server responds with a single byte, `'S'` to proceed with the TLS
/// handshake or `'N'` to stay in plaintext. Like [`Startup`], this message
/// carries no message-type byte.
#[derive(Debug)]
pub struct SslRequest;

impl SslRequest {
    /// The SSL request code `80877103`.
    ///
    /// The value is chosen to contain 1234 in the most significant 16 bits,
    /// and 5679 in the least significant 16 bits.
    pub const CODE: i32 = 80877103;

    pub fn write(self, buf: &mut BytesMut) {
        buf.put_i32(8);
        buf.put_i32(Self::CODE);
    }
}

/// Interrupt the current statement of another backend.
///
/// Sent on its own fresh connection, never on the session the query runs on,
/// because the session socket is blocked reading the response. Carries no
/// message-type byte.
#[derive(Debug)]
pub struct CancelRequest {
    /// The process ID of the target backend.
    pub process_id: u32,
    /// The secret key for the target backend.
    pub secret_key: u32,
}

impl CancelRequest {
    /// The cancel request code `80877102`.
    ///
    /// The value is chosen to contain 1234 in the most significant 16 bits,
    /// and 5678 in the least significant 16 bits.
    pub const CODE: i32 = 80877102;

    pub fn write(self, buf: &mut BytesMut) {
        buf.put_i32(16);
        buf.put_i32(Self::CODE);
        buf.put_u32(self.process_id);
        buf.put_u32(self.secret_key);
    }
}

/// Identifies the message as a password response.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    /// The password (encrypted, if requested)
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.password.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}

/// Identifies the message as a simple query
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> i32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a Parse command
///
/// Parameter data types are never prespecified here; the count is written as
/// zero and the backend infers every placeholder type, reported back through
/// `ParameterDescription`.
pub struct Parse<'a> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub name: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> i32 {
        self.name.nul_string_len() +
        self.sql.nul_string_len() +
        // parameter data type count, always zero
        2
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.name);
        buf.put_nul_string(self.sql);
        buf.put_i16(0);
    }
}

/// Identifies the message as a Describe command.
pub struct Describe<'a> {
    /// 'S' to describe a prepared statement; or 'P' to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> i32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as a Bind command.
///
/// Parameters and result columns all use the default text format; the format
/// code lists are therefore written with a zero count.
pub struct Bind<'a> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal: &'a str,
    /// The name of the source prepared statement (an empty string selects the unnamed prepared statement).
    pub statement: &'a str,
    /// One entry per placeholder, already encoded in the text on-wire form.
    ///
    /// `None` is SQL NULL, written as the length `-1` with no value bytes
    /// following.
    pub params: &'a [Param<'a>],
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> i32 {
        self.portal.nul_string_len() +
        self.statement.nul_string_len() +
        // parameter format code count (i16)
        2 +
        // parameter count (i16)
        2 +
        self.params.iter().fold(0i32, |acc, param| {
            acc + 4 + param.map_or(0, |value| value.len().to_i32())
        }) +
        // result format code count (i16)
        2
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal);
        buf.put_nul_string(self.statement);

        // The number of parameter format codes that follow.
        //
        // This can be zero to indicate that there are no parameters or that the parameters
        // all use the default format (text).
        buf.put_i16(0);

        buf.put_i16(self.params.len().to_i16());
        for param in self.params {
            match param {
                // The length of the parameter value, in bytes (this count does not
                // include itself), followed by that many value bytes.
                Some(value) => {
                    buf.put_i32(value.len().to_i32());
                    buf.put_slice(value);
                }
                // As a special case, -1 indicates a NULL parameter value.
                // No value bytes follow in the NULL case.
                None => buf.put_i32(-1),
            }
        }

        // The number of result-column format codes that follow.
        //
        // Zero: the result columns should all use the default format (text).
        buf.put_i16(0);
    }
}

/// Identifies the message as a Execute command
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal: &'a str,
    /// Maximum number of rows to return, if portal contains a query that returns rows
    /// (ignored otherwise). Zero denotes “no limit”.
    pub max_rows: i32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> i32 {
        self.portal.nul_string_len() +
        // self.max_rows
        4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal);
        buf.put_i32(self.max_rows);
    }
}

/// Identifies the message as a Close command
pub struct Close<'a> {
    /// 'S' to close a prepared statement; or 'P' to close a portal.
    pub variant: u8,
    /// The name of the prepared statement or portal to close
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Close<'_> {
    const MSGTYPE: u8 = b'C';

    fn size_hint(&self) -> i32 {
        // self.variant (u8)
        1 +
        self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.variant);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as a Sync command
pub struct Sync;

impl FrontendProtocol for Sync {
    const MSGTYPE: u8 = b'S';

    fn size_hint(&self) -> i32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a termination
///
/// The backend closes the connection without replying.
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn size_hint(&self) -> i32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Buf;

    fn framed<F: FrontendProtocol>(msg: F) -> (u8, i32, BytesMut) {
        let mut buf = BytesMut::new();
        write(msg, &mut buf);
        let msgtype = buf.get_u8();
        let len = buf.get_i32();
        (msgtype, len, buf)
    }

    #[test]
    fn length_counts_itself() {
        let (msgtype, len, body) = framed(Query { sql: "SELECT 1" });
        assert_eq!(msgtype, b'Q');
        assert_eq!(len as usize, 4 + body.len());
        assert_eq!(&body[..], b"SELECT 1\0");
    }

    #[test]
    fn empty_body_messages() {
        let (msgtype, len, body) = framed(Sync);
        assert_eq!((msgtype, len), (b'S', 4));
        assert!(body.is_empty());

        let (msgtype, len, _) = framed(Terminate);
        assert_eq!((msgtype, len), (b'X', 4));
    }

    #[test]
    fn startup_layout() {
        let mut buf = BytesMut::new();
        Startup { parameters: &[("user", "alice"), ("database", "db")] }.write(&mut buf);

        let mut read = buf.freeze();
        assert_eq!(read.get_i32() as usize, read.remaining() + 4);
        assert_eq!(read.get_i32(), 196608);
        assert_eq!(&read[..], b"user\0alice\0database\0db\0\0");
    }

    #[test]
    fn ssl_request_frame() {
        let mut buf = BytesMut::new();
        SslRequest.write(&mut buf);
        let mut read = buf.freeze();
        assert_eq!(read.get_i32(), 8);
        assert_eq!(read.get_i32(), 80877103);
        assert!(read.is_empty());
    }

    #[test]
    fn cancel_request_frame() {
        let mut buf = BytesMut::new();
        CancelRequest { process_id: 4242, secret_key: 0xDEADBEEF }.write(&mut buf);
        let mut read = buf.freeze();
        assert_eq!(read.get_i32(), 16);
        assert_eq!(read.get_i32(), 80877102);
        assert_eq!(read.get_u32(), 4242);
        assert_eq!(read.get_u32(), 0xDEADBEEF);
    }

    #[test]
    fn bind_writes_null_sentinel() {
        let params: &[Param] = &[None, Some(b"7")];
        let (msgtype, len, mut body) = framed(Bind { portal: "", statement: "s1", params });
        assert_eq!(msgtype, b'B');
        assert_eq!(len as usize, 4 + body.len());

        assert_eq!(body.get_u8(), b'\0'); // unnamed portal
        assert_eq!(&body.split_to(3)[..], b"s1\0");
        assert_eq!(body.get_i16(), 0); // all-text parameter formats
        assert_eq!(body.get_i16(), 2);
        assert_eq!(body.get_i32(), -1); // NULL, no value bytes
        assert_eq!(body.get_i32(), 1);
        assert_eq!(body.get_u8(), b'7');
        assert_eq!(body.get_i16(), 0); // all-text result formats
        assert!(body.is_empty());
    }

    #[test]
    fn parse_never_prespecifies_types() {
        let (_, _, mut body) = framed(Parse { name: "s1", sql: "SELECT $1" });
        assert_eq!(&body.split_to(3)[..], b"s1\0");
        assert_eq!(&body.split_to(10)[..], b"SELECT $1\0");
        assert_eq!(body.get_i16(), 0);
        assert!(body.is_empty());
    }
}
